//! Error types for the migration system.

use std::path::PathBuf;

use strata_schema::SchemaError;

use crate::connection::Param;

/// Errors that can occur during migration and seed operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A schema description could not be rendered.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A statement failed on the server.
    #[error("Query failed: {source} (code: {}, sql: {sql}, params: {params:?})", .code.as_deref().unwrap_or("none"))]
    Query {
        /// The statement that failed.
        sql: String,
        /// The parameters bound to it.
        params: Vec<Param>,
        /// Driver error code, if the server reported one.
        code: Option<String>,
        /// Underlying driver error.
        source: sqlx::Error,
    },

    /// Opening the connection failed.
    #[error("Could not connect to '{name}': {source}")]
    Connect {
        /// Connection name.
        name: String,
        /// Underlying driver error.
        source: sqlx::Error,
    },

    /// Transaction nesting or savepoint misuse.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// The migrations history table has not been created.
    #[error("The migrations table '{0}' does not exist, create it with 'strata migrations init'")]
    HistoryMissing(String),

    /// The migrations history table still holds applied migrations.
    #[error("Cannot drop the migrations table '{0}' while it contains completed migrations")]
    HistoryNotEmpty(String),

    /// A unit file has no valid declaration line.
    #[error("Cannot find a {kind} declaration in '{path}'")]
    UnitNotDeclared {
        /// `migration` or `seed`.
        kind: &'static str,
        /// Unit file.
        path: PathBuf,
    },

    /// A declared unit is not known to the loader.
    #[error("The {kind} '{name}' declared in '{path}' is not registered")]
    UnitNotRegistered {
        /// `migration` or `seed`.
        kind: &'static str,
        /// Declared identifier.
        name: String,
        /// Unit file.
        path: PathBuf,
    },

    /// A unit file name could not be derived from the given name.
    #[error("Invalid unit name '{0}', use letters, digits, spaces, dashes or underscores")]
    InvalidName(String),

    /// The requested seed file does not exist.
    #[error("Seed not found: {0}")]
    SeedNotFound(PathBuf),

    /// A seed file with the same name already exists.
    #[error("Seed already exists: {0}")]
    SeedExists(PathBuf),

    /// Reading or writing unit files failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML.
    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

impl MigrateError {
    /// Wraps a driver error raised by `sql` with `params`.
    pub(crate) fn query(sql: &str, params: &[Param], source: sqlx::Error) -> Self {
        let code = source
            .as_database_error()
            .and_then(|e| e.code())
            .map(|c| c.into_owned());
        Self::Query {
            sql: sql.to_string(),
            params: params.to_vec(),
            code,
            source,
        }
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
