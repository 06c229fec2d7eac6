//! Error types for the schema builders.

use crate::dialect::Dialect;

/// Errors raised while describing or rendering a schema change.
///
/// All of these are contract errors: the schema description itself must be
/// fixed, retrying cannot help.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// The driver name does not match a supported dialect.
    #[error("Unsupported dialect '{0}', expected one of mysql, postgres, sqlite")]
    UnknownDialect(String),

    /// A column with the same name was already added to the table.
    #[error("Cannot create duplicate column name '{column}' on table '{table}'")]
    DuplicateColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// An index with the same name was already added to the table.
    #[error("Cannot create duplicate index name '{index}' on table '{table}'")]
    DuplicateIndex {
        /// Table name.
        table: String,
        /// Index name.
        index: String,
    },

    /// A structural call was made while the table is not in create or alter mode.
    #[error("Cannot add {call} to table '{table}' during a {mode} operation")]
    WrongMode {
        /// Table name.
        table: String,
        /// Current table mode.
        mode: &'static str,
        /// What was being added.
        call: &'static str,
    },

    /// No create/alter/drop/rename/truncate mode was chosen before rendering.
    #[error("No table operation chosen, call create, alter, drop, rename or truncate first")]
    NoMode,

    /// The dialect cannot express the requested operation.
    #[error("{dialect} does not support {operation}: {reason}")]
    Unsupported {
        /// Target dialect.
        dialect: Dialect,
        /// Operation that was requested.
        operation: &'static str,
        /// Why it cannot be rendered.
        reason: &'static str,
    },

    /// A column in create or alter mode was never given a type.
    #[error("Column '{0}' has no type, call a type method such as integer() or varchar()")]
    MissingType(String),

    /// A foreign key was declared without the table it references.
    #[error("Foreign key '{0}' does not reference a table, call references() first")]
    MissingReference(String),

    /// The auto-increment column cannot be rendered for the dialect.
    #[error("Invalid auto-increment column on table '{table}': {reason}")]
    InvalidAutoIncrement {
        /// Table name.
        table: String,
        /// What is wrong with the column.
        reason: &'static str,
    },
}

/// Result type for schema operations.
pub type Result<T> = std::result::Result<T, SchemaError>;
