//! Migration and seed units.
//!
//! A unit file declares its identifier on a comment line:
//!
//! ```sql
//! -- migration: CreateUsersTable
//!
//! -- up
//! CREATE TABLE users (id INTEGER PRIMARY KEY);
//!
//! -- down
//! DROP TABLE users;
//! ```
//!
//! A [`UnitLoader`] turns the file into something runnable. [`SqlUnitLoader`]
//! executes the file's own sections, [`UnitRegistry`] looks the declared
//! identifier up among units compiled into the program.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::connection::Connection;
use crate::error::{MigrateError, Result};

/// Declaration keyword of migration files.
pub const MIGRATION: &str = "migration";

/// Declaration keyword of seed files.
pub const SEED: &str = "seed";

/// Extension of unit files.
pub const EXTENSION: &str = "sql";

/// One reversible schema change.
#[async_trait]
pub trait MigrationUnit: Send + Sync {
    /// Applies the change.
    async fn up(&self, db: &mut Connection) -> Result<()>;

    /// Reverts the change.
    async fn down(&self, db: &mut Connection) -> Result<()>;
}

/// One batch of seed data.
#[async_trait]
pub trait SeedUnit: Send + Sync {
    /// Inserts the data.
    async fn seed(&self, db: &mut Connection) -> Result<()>;
}

/// Resolves unit files into runnable units.
pub trait UnitLoader {
    /// Loads the migration declared in `source`, read from `path`.
    fn load_migration(&self, path: &Path, source: &str) -> Result<Arc<dyn MigrationUnit>>;

    /// Loads the seed declared in `source`, read from `path`.
    fn load_seed(&self, path: &Path, source: &str) -> Result<Arc<dyn SeedUnit>>;
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Returns the identifier declared by a `-- {kind}: Name` line, if any.
#[must_use]
pub fn declaration<'a>(kind: &str, source: &'a str) -> Option<&'a str> {
    source.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("--")?.trim_start();
        let name = rest.strip_prefix(kind)?.strip_prefix(':')?.trim();
        is_identifier(name).then_some(name)
    })
}

/// Like [`declaration`], failing with [`MigrateError::UnitNotDeclared`].
pub fn declared<'a>(kind: &'static str, path: &Path, source: &'a str) -> Result<&'a str> {
    declaration(kind, source).ok_or_else(|| MigrateError::UnitNotDeclared {
        kind,
        path: path.to_path_buf(),
    })
}

// =============================================================================
// Naming
// =============================================================================

/// Derives a unit identifier from free text.
///
/// `"create users table"`, `"create-users_table"` and `"createUsersTable"`
/// all give `CreateUsersTable`. A trailing `.sql` is ignored.
pub fn unit_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    let stem = trimmed
        .strip_suffix(".sql")
        .or_else(|| trimmed.strip_suffix(".SQL"))
        .unwrap_or(trimmed);
    let camel: String = stem
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_ascii_uppercase().to_string() + chars.as_str()
            })
        })
        .collect();
    if is_identifier(&camel) {
        Ok(camel)
    } else {
        Err(MigrateError::InvalidName(name.to_string()))
    }
}

/// `CreateUsersTable` -> `create_users_table`.
#[must_use]
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_ascii_alphanumeric();
        }
    }
    out
}

/// `CreateUsersTable` -> `createUsersTable`.
#[must_use]
pub fn camel_case(name: &str) -> String {
    let mut chars = name.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_ascii_lowercase().to_string() + chars.as_str()
    })
}

/// Migration file name for `name` created at `timestamp`.
#[must_use]
pub fn migration_filename(timestamp: i64, name: &str) -> String {
    format!("{timestamp}_{}.{EXTENSION}", snake_case(name))
}

/// Seed file name for `name`.
#[must_use]
pub fn seed_filename(name: &str) -> String {
    format!("{}.{EXTENSION}", camel_case(name))
}

/// Contents of a new migration file.
#[must_use]
pub fn migration_template(name: &str) -> String {
    format!("-- {MIGRATION}: {name}\n\n-- up\n\n\n-- down\n\n")
}

/// Contents of a new seed file.
#[must_use]
pub fn seed_template(name: &str) -> String {
    format!("-- {SEED}: {name}\n\n")
}

// =============================================================================
// SQL units
// =============================================================================

/// A migration whose `up` and `down` are SQL sections of its file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlMigration {
    up: String,
    down: String,
}

impl SqlMigration {
    /// Splits `source` at its `-- up` and `-- down` markers.
    #[must_use]
    pub fn parse(source: &str) -> Self {
        let mut up = Vec::new();
        let mut down = Vec::new();
        let mut section = None;
        for line in source.lines() {
            let marker = line.trim().to_ascii_lowercase();
            match marker.strip_prefix("--").map(str::trim) {
                Some("up") => section = Some(true),
                Some("down") => section = Some(false),
                _ => match section {
                    Some(true) => up.push(line),
                    Some(false) => down.push(line),
                    None => {}
                },
            }
        }
        Self {
            up: up.join("\n").trim().to_string(),
            down: down.join("\n").trim().to_string(),
        }
    }

    /// Returns the `up` section.
    #[must_use]
    pub fn up_sql(&self) -> &str {
        &self.up
    }

    /// Returns the `down` section.
    #[must_use]
    pub fn down_sql(&self) -> &str {
        &self.down
    }
}

async fn run_section(db: &mut Connection, sql: &str) -> Result<()> {
    if sql.is_empty() {
        debug!("Skipping empty section");
        return Ok(());
    }
    db.raw(sql).await.map(|_| ())
}

#[async_trait]
impl MigrationUnit for SqlMigration {
    async fn up(&self, db: &mut Connection) -> Result<()> {
        run_section(db, &self.up).await
    }

    async fn down(&self, db: &mut Connection) -> Result<()> {
        run_section(db, &self.down).await
    }
}

/// A seed whose body is the SQL of its file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlSeed {
    body: String,
}

impl SqlSeed {
    /// Takes every line of `source` except the declaration.
    #[must_use]
    pub fn parse(source: &str) -> Self {
        let body = source
            .lines()
            .filter(|line| declaration(SEED, line).is_none())
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            body: body.trim().to_string(),
        }
    }

    /// Returns the seed SQL.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.body
    }
}

#[async_trait]
impl SeedUnit for SqlSeed {
    async fn seed(&self, db: &mut Connection) -> Result<()> {
        run_section(db, &self.body).await
    }
}

/// Loads unit files as plain SQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlUnitLoader;

impl UnitLoader for SqlUnitLoader {
    fn load_migration(&self, path: &Path, source: &str) -> Result<Arc<dyn MigrationUnit>> {
        let name = declared(MIGRATION, path, source)?;
        debug!(migration = name, path = %path.display(), "Loaded SQL migration");
        Ok(Arc::new(SqlMigration::parse(source)))
    }

    fn load_seed(&self, path: &Path, source: &str) -> Result<Arc<dyn SeedUnit>> {
        let name = declared(SEED, path, source)?;
        debug!(seed = name, path = %path.display(), "Loaded SQL seed");
        Ok(Arc::new(SqlSeed::parse(source)))
    }
}

// =============================================================================
// Registered units
// =============================================================================

/// Units compiled into the program, looked up by declared identifier.
#[derive(Clone, Default)]
pub struct UnitRegistry {
    migrations: BTreeMap<String, Arc<dyn MigrationUnit>>,
    seeds: BTreeMap<String, Arc<dyn SeedUnit>>,
}

impl std::fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitRegistry")
            .field("migrations", &self.migrations.keys().collect::<Vec<_>>())
            .field("seeds", &self.seeds.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl UnitRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a migration under `name`.
    #[must_use]
    pub fn migration(mut self, name: impl Into<String>, unit: impl MigrationUnit + 'static) -> Self {
        self.migrations.insert(name.into(), Arc::new(unit));
        self
    }

    /// Registers a seed under `name`.
    #[must_use]
    pub fn seed(mut self, name: impl Into<String>, unit: impl SeedUnit + 'static) -> Self {
        self.seeds.insert(name.into(), Arc::new(unit));
        self
    }
}

impl UnitLoader for UnitRegistry {
    fn load_migration(&self, path: &Path, source: &str) -> Result<Arc<dyn MigrationUnit>> {
        let name = declared(MIGRATION, path, source)?;
        self.migrations
            .get(name)
            .cloned()
            .ok_or_else(|| MigrateError::UnitNotRegistered {
                kind: MIGRATION,
                name: name.to_string(),
                path: path.to_path_buf(),
            })
    }

    fn load_seed(&self, path: &Path, source: &str) -> Result<Arc<dyn SeedUnit>> {
        let name = declared(SEED, path, source)?;
        self.seeds
            .get(name)
            .cloned()
            .ok_or_else(|| MigrateError::UnitNotRegistered {
                kind: SEED,
                name: name.to_string(),
                path: path.to_path_buf(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declaration() {
        let source = "-- a comment\n--  migration:  CreateUsers \n-- up\n";
        assert_eq!(declaration(MIGRATION, source), Some("CreateUsers"));
        assert_eq!(declaration(SEED, source), None);
        assert_eq!(declaration(MIGRATION, "-- migration: 1Bad"), None);
        assert_eq!(declaration(MIGRATION, "SELECT 1; -- migration: X"), None);
    }

    #[test]
    fn test_undeclared_is_error() {
        let err = declared(MIGRATION, Path::new("m/1_x.sql"), "-- up\nSELECT 1;").unwrap_err();
        assert!(matches!(err, MigrateError::UnitNotDeclared { kind: "migration", .. }));
    }

    #[test]
    fn test_naming() {
        assert_eq!(unit_name("create users table").unwrap(), "CreateUsersTable");
        assert_eq!(unit_name("create-users_table.sql").unwrap(), "CreateUsersTable");
        assert_eq!(unit_name("addV2Column").unwrap(), "AddV2Column");
        assert!(matches!(unit_name(" -- "), Err(MigrateError::InvalidName(_))));
        assert!(matches!(unit_name("2fa"), Err(MigrateError::InvalidName(_))));

        assert_eq!(snake_case("CreateUsersTable"), "create_users_table");
        assert_eq!(snake_case("AddV2Column"), "add_v2_column");
        assert_eq!(migration_filename(1000, "CreateUsers"), "1000_create_users.sql");
        assert_eq!(seed_filename("UsersSeed"), "usersSeed.sql");
    }

    #[test]
    fn test_templates_declare_their_unit() {
        let migration = migration_template("CreateUsers");
        assert_eq!(declaration(MIGRATION, &migration), Some("CreateUsers"));
        let parsed = SqlMigration::parse(&migration);
        assert_eq!(parsed.up_sql(), "");
        assert_eq!(parsed.down_sql(), "");

        assert_eq!(declaration(SEED, &seed_template("Users")), Some("Users"));
    }

    #[test]
    fn test_sql_migration_sections() {
        let parsed = SqlMigration::parse(
            "-- migration: M\nignored\n-- UP\nCREATE TABLE t (n INT);\n\n--down\nDROP TABLE t;\n",
        );
        assert_eq!(parsed.up_sql(), "CREATE TABLE t (n INT);");
        assert_eq!(parsed.down_sql(), "DROP TABLE t;");
    }

    #[test]
    fn test_sql_seed_body() {
        let seed = SqlSeed::parse("-- seed: Users\nINSERT INTO t VALUES (1);\n");
        assert_eq!(seed.sql(), "INSERT INTO t VALUES (1);");
    }

    #[test]
    fn test_registry_lookup() {
        let registry = UnitRegistry::new().migration("Known", SqlMigration::default());
        let path = Path::new("1_known.sql");
        assert!(registry.load_migration(path, "-- migration: Known").is_ok());
        assert!(matches!(
            registry.load_migration(path, "-- migration: Other"),
            Err(MigrateError::UnitNotRegistered { .. })
        ));
        assert!(matches!(
            registry.load_seed(path, "-- seed: Known"),
            Err(MigrateError::UnitNotRegistered { kind: "seed", .. })
        ));
    }
}
