//! Database connections and transaction nesting.
//!
//! A [`Connection`] wraps one lazily opened `sqlx` [`AnyConnection`], so the
//! same code path serves MySQL, PostgreSQL and SQLite. Transactions nest by
//! counting: only the outermost `begin`/`commit`/`rollback` reaches the
//! server.

use std::collections::BTreeMap;

use sqlx::any::{AnyArguments, AnyRow};
use sqlx::query::{Query, QueryScalar};
use sqlx::{Any, AnyConnection, Connection as _, Executor as _};
use strata_schema::{Dialect, Table};
use tracing::{debug, error, warn};

use crate::config::{ConnectionConfig, Settings};
use crate::error::{MigrateError, Result};

/// A value bound to a statement placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Text.
    Text(String),
    /// Binary data.
    Bytes(Vec<u8>),
}

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Param {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Param {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

fn bind<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    params: &[Param],
) -> Query<'q, Any, AnyArguments<'q>> {
    for param in params {
        query = match param.clone() {
            Param::Null => query.bind(None::<String>),
            Param::Bool(v) => query.bind(v),
            Param::Int(v) => query.bind(v),
            Param::Float(v) => query.bind(v),
            Param::Text(v) => query.bind(v),
            Param::Bytes(v) => query.bind(v),
        };
    }
    query
}

fn bind_scalar<'q, O>(
    mut query: QueryScalar<'q, Any, O, AnyArguments<'q>>,
    params: &[Param],
) -> QueryScalar<'q, Any, O, AnyArguments<'q>> {
    for param in params {
        query = match param.clone() {
            Param::Null => query.bind(None::<String>),
            Param::Bool(v) => query.bind(v),
            Param::Int(v) => query.bind(v),
            Param::Float(v) => query.bind(v),
            Param::Text(v) => query.bind(v),
            Param::Bytes(v) => query.bind(v),
        };
    }
    query
}

/// Returns whether `name` is usable as a savepoint identifier.
fn valid_savepoint(name: &str) -> bool {
    (1..=255).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// A named database connection.
pub struct Connection {
    name: String,
    config: ConnectionConfig,
    conn: Option<AnyConnection>,
    depth: usize,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("dialect", &self.config.dialect())
            .field("connected", &self.conn.is_some())
            .field("depth", &self.depth)
            .finish()
    }
}

impl Connection {
    /// Creates an unopened connection; it connects on first use.
    #[must_use]
    pub fn new(name: impl Into<String>, config: ConnectionConfig) -> Self {
        Self {
            name: name.into(),
            config,
            conn: None,
            depth: 0,
        }
    }

    /// Returns the connection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the dialect of the connected engine.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.config.dialect()
    }

    /// Returns the connection definition.
    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Returns whether a transaction is open.
    #[must_use]
    pub const fn in_transaction(&self) -> bool {
        self.depth > 0
    }

    /// Returns the transaction nesting depth.
    #[must_use]
    pub const fn transaction_depth(&self) -> usize {
        self.depth
    }

    /// Returns the placeholder for the 1-based parameter `n`.
    #[must_use]
    pub fn placeholder(&self, n: usize) -> String {
        self.dialect().placeholder(n)
    }

    /// Opens the connection if it is not open yet.
    pub async fn connect(&mut self) -> Result<()> {
        self.handle().await.map(|_| ())
    }

    async fn handle(&mut self) -> Result<&mut AnyConnection> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                sqlx::any::install_default_drivers();
                debug!(connection = %self.name, dialect = %self.dialect(), "Connecting");
                AnyConnection::connect(&self.config.to_url())
                    .await
                    .map_err(|source| MigrateError::Connect {
                        name: self.name.clone(),
                        source,
                    })?
            }
        };
        Ok(self.conn.insert(conn))
    }

    fn fail(&self, sql: &str, params: &[Param], source: sqlx::Error) -> MigrateError {
        let err = MigrateError::query(sql, params, source);
        error!(connection = %self.name, sql, error = %err, "Statement failed");
        err
    }

    /// Prepares and executes one statement with bound parameters, returning
    /// the number of affected rows.
    pub async fn execute(&mut self, sql: &str, params: &[Param]) -> Result<u64> {
        debug!(connection = %self.name, sql, "Executing statement");
        let conn = self.handle().await?;
        let result = bind(sqlx::query(sql), params).execute(&mut *conn).await;
        result
            .map(|done| done.rows_affected())
            .map_err(|source| self.fail(sql, params, source))
    }

    /// Prepares and runs one query, returning every row.
    pub async fn fetch_all(&mut self, sql: &str, params: &[Param]) -> Result<Vec<AnyRow>> {
        debug!(connection = %self.name, sql, "Fetching rows");
        let conn = self.handle().await?;
        let result = bind(sqlx::query(sql), params).fetch_all(&mut *conn).await;
        result.map_err(|source| self.fail(sql, params, source))
    }

    /// Runs a query returning one nullable integer, such as `COUNT(*)` or `MAX(x)`.
    pub async fn fetch_i64(&mut self, sql: &str, params: &[Param]) -> Result<Option<i64>> {
        debug!(connection = %self.name, sql, "Fetching scalar");
        let conn = self.handle().await?;
        let query = bind_scalar(sqlx::query_scalar::<Any, Option<i64>>(sql), params);
        let result = query.fetch_one(&mut *conn).await;
        result.map_err(|source| self.fail(sql, params, source))
    }

    /// Executes unprepared SQL, which may hold several statements.
    pub async fn raw(&mut self, sql: &str) -> Result<u64> {
        debug!(connection = %self.name, sql, "Executing raw SQL");
        let conn = self.handle().await?;
        let result = conn.execute(sqlx::raw_sql(sql)).await;
        result
            .map(|done| done.rows_affected())
            .map_err(|source| self.fail(sql, &[], source))
    }

    /// Renders `table` for this connection's dialect and executes each
    /// statement in order.
    pub async fn run(&mut self, table: &Table) -> Result<()> {
        if table.dialect() != self.dialect() {
            return Err(MigrateError::Config(format!(
                "Table '{}' was described for {} but connection '{}' is {}",
                table.name(),
                table.dialect(),
                self.name,
                self.dialect()
            )));
        }
        for statement in table.statements()? {
            self.raw(&statement).await?;
        }
        Ok(())
    }

    /// Starts a transaction; nested calls only increase the depth.
    pub async fn begin(&mut self) -> Result<()> {
        if self.depth == 0 {
            self.raw("BEGIN").await?;
        }
        self.depth += 1;
        debug!(connection = %self.name, depth = self.depth, "Transaction begun");
        Ok(())
    }

    /// Commits the outermost transaction; nested calls only decrease the depth.
    ///
    /// When the server rejects the outermost `COMMIT` the transaction is
    /// rolled back, the depth is reset and the commit error is returned.
    pub async fn commit(&mut self) -> Result<()> {
        match self.depth {
            0 => Err(self.idle("commit")),
            1 => {
                if let Err(err) = self.raw("COMMIT").await {
                    if let Err(rollback) = self.raw("ROLLBACK").await {
                        warn!(connection = %self.name, error = %rollback, "Rollback after failed commit failed");
                    }
                    self.depth = 0;
                    return Err(err);
                }
                self.depth = 0;
                debug!(connection = %self.name, "Transaction committed");
                Ok(())
            }
            _ => {
                self.depth -= 1;
                Ok(())
            }
        }
    }

    /// Rolls back the outermost transaction; nested calls only decrease the depth.
    ///
    /// The depth is reset even when the outermost `ROLLBACK` fails, since the
    /// server side state is unknown at that point.
    pub async fn rollback(&mut self) -> Result<()> {
        match self.depth {
            0 => Err(self.idle("roll back")),
            1 => {
                let result = self.raw("ROLLBACK").await;
                self.depth = 0;
                result?;
                debug!(connection = %self.name, "Transaction rolled back");
                Ok(())
            }
            _ => {
                self.depth -= 1;
                Ok(())
            }
        }
    }

    /// Rolls back every open level at once. A failed `ROLLBACK` is logged,
    /// not returned, so the caller's original error can be reported.
    pub async fn rollback_all(&mut self) {
        if self.depth == 0 {
            return;
        }
        self.depth = 1;
        if let Err(err) = self.rollback().await {
            warn!(connection = %self.name, error = %err, "Rollback failed");
        }
    }

    fn idle(&self, verb: &str) -> MigrateError {
        MigrateError::Transaction(format!(
            "Cannot {verb}, no transaction is open on '{}'",
            self.name
        ))
    }

    fn check_savepoint(&self, name: &str) -> Result<()> {
        if !valid_savepoint(name) {
            return Err(MigrateError::Transaction(format!(
                "Invalid savepoint name '{name}', use 1 to 255 ascii letters, digits, dashes or underscores"
            )));
        }
        if !self.in_transaction() {
            return Err(MigrateError::Transaction(format!(
                "Cannot use savepoint '{name}' outside a transaction, call begin() first"
            )));
        }
        Ok(())
    }

    /// Creates a savepoint inside the open transaction.
    pub async fn savepoint(&mut self, name: &str) -> Result<()> {
        self.check_savepoint(name)?;
        let sql = format!("SAVEPOINT {}", self.dialect().quote(name));
        self.raw(&sql).await.map(|_| ())
    }

    /// Rolls back to a savepoint created in the open transaction.
    pub async fn rollback_to(&mut self, name: &str) -> Result<()> {
        self.check_savepoint(name)?;
        let sql = format!("ROLLBACK TO SAVEPOINT {}", self.dialect().quote(name));
        self.raw(&sql).await.map(|_| ())
    }
}

/// Every configured connection, with one selected as active.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: BTreeMap<String, Connection>,
    active: String,
}

impl ConnectionRegistry {
    /// Builds the registry from `database.connections`, selecting `database.use`.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let connections = settings
            .connections()?
            .into_iter()
            .map(|(name, config)| (name.clone(), Connection::new(name, config)))
            .collect();
        let mut registry = Self {
            connections,
            active: String::new(),
        };
        registry.use_connection(&settings.default_connection())?;
        Ok(registry)
    }

    /// A registry holding a single connection.
    #[must_use]
    pub fn single(name: impl Into<String>, config: ConnectionConfig) -> Self {
        let name = name.into();
        let mut connections = BTreeMap::new();
        connections.insert(name.clone(), Connection::new(name.clone(), config));
        Self {
            connections,
            active: name,
        }
    }

    /// Returns the name of the active connection.
    #[must_use]
    pub fn using(&self) -> &str {
        &self.active
    }

    /// Returns the names of every configured connection.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.connections.keys().map(String::as_str)
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.connections.get(&self.active) {
            Some(current) if current.in_transaction() => Err(MigrateError::Transaction(format!(
                "Cannot switch connections while '{}' is inside a transaction",
                self.active
            ))),
            _ => Ok(()),
        }
    }

    /// Makes `name` the active connection.
    pub fn use_connection(&mut self, name: &str) -> Result<()> {
        self.ensure_idle()?;
        if !self.connections.contains_key(name) {
            return Err(MigrateError::Config(format!(
                "No connection named '{name}' is configured"
            )));
        }
        debug!(connection = name, "Using connection");
        self.active = name.to_string();
        Ok(())
    }

    /// Registers a connection from a DSN under the name `dsn` and makes it active.
    pub fn connect_dsn(
        &mut self,
        dsn: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<()> {
        self.ensure_idle()?;
        let config = ConnectionConfig::from_dsn(dsn, username, password)?;
        self.connections
            .insert("dsn".to_string(), Connection::new("dsn", config));
        self.active = "dsn".to_string();
        Ok(())
    }

    /// Returns the active connection.
    pub fn connection(&mut self) -> Result<&mut Connection> {
        let active = self.active.clone();
        self.connections
            .get_mut(&active)
            .ok_or_else(|| MigrateError::Config(format!("No connection named '{active}'")))
    }

    /// Consumes the registry, returning the connection called `name`.
    pub fn take(mut self, name: &str) -> Result<Connection> {
        self.connections
            .remove(name)
            .ok_or_else(|| MigrateError::Config(format!("No connection named '{name}' is configured")))
    }

    /// Consumes the registry, returning the active connection.
    pub fn into_active(self) -> Result<Connection> {
        let active = self.active.clone();
        self.take(&active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;
    use strata_schema::{Column, Table, integer, text};
    use tokio_test::{assert_err, assert_ok};

    fn memory() -> Connection {
        Connection::new("test", ConnectionConfig::sqlite(":memory:").unwrap())
    }

    #[tokio::test]
    async fn test_execute_and_fetch() {
        let mut db = memory();
        db.raw("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        let inserted = db
            .execute(
                "INSERT INTO items (id, name) VALUES (?, ?)",
                &[Param::from(1_i64), Param::from("apple")],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let rows = db
            .fetch_all("SELECT name FROM items WHERE id = ?", &[Param::Int(1)])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].try_get::<String, _>(0).unwrap(), "apple");

        let count = db.fetch_i64("SELECT COUNT(*) FROM items", &[]).await.unwrap();
        assert_eq!(count, Some(1));
    }

    #[tokio::test]
    async fn test_query_error_carries_sql() {
        let mut db = memory();
        let err = db
            .execute("INSERT INTO missing VALUES (?)", &[Param::Int(1)])
            .await
            .unwrap_err();
        match err {
            MigrateError::Query { sql, params, .. } => {
                assert_eq!(sql, "INSERT INTO missing VALUES (?)");
                assert_eq!(params, vec![Param::Int(1)]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_table() {
        let mut db = memory();
        let table = Table::new(Dialect::Sqlite, "notes")
            .create()
            .column(integer("id").auto_increment())
            .unwrap()
            .column(text("body").nullable())
            .unwrap();
        db.run(&table).await.unwrap();

        let alter = Table::new(Dialect::Sqlite, "notes")
            .alter()
            .column(Column::new("body").rename("content"))
            .unwrap();
        db.run(&alter).await.unwrap();
        db.execute("INSERT INTO notes (content) VALUES (?)", &[Param::Null])
            .await
            .unwrap();

        let mysql = Table::new(Dialect::MySql, "notes").drop();
        assert_err!(db.run(&mysql).await);
    }

    #[tokio::test]
    async fn test_nested_transactions_only_touch_outermost() {
        let mut db = memory();
        db.raw("CREATE TABLE t (n INTEGER)").await.unwrap();

        db.begin().await.unwrap();
        db.begin().await.unwrap();
        assert_eq!(db.transaction_depth(), 2);
        db.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        db.commit().await.unwrap();
        assert!(db.in_transaction());
        db.rollback().await.unwrap();
        assert!(!db.in_transaction());

        let count = db.fetch_i64("SELECT COUNT(*) FROM t", &[]).await.unwrap();
        assert_eq!(count, Some(0));

        assert_err!(db.commit().await);
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back() {
        let mut db = memory();
        db.raw("CREATE TABLE p (id INTEGER PRIMARY KEY)").await.unwrap();
        db.raw("CREATE TABLE c (pid INTEGER REFERENCES p(id) DEFERRABLE INITIALLY DEFERRED)")
            .await
            .unwrap();

        db.begin().await.unwrap();
        db.execute("INSERT INTO c VALUES (42)", &[]).await.unwrap();
        assert!(matches!(
            db.commit().await,
            Err(MigrateError::Query { ref sql, .. }) if sql == "COMMIT"
        ));
        assert!(!db.in_transaction());

        let count = db.fetch_i64("SELECT COUNT(*) FROM c", &[]).await.unwrap();
        assert_eq!(count, Some(0));

        // The server transaction is closed, so a new one can start.
        assert_ok!(db.begin().await);
        assert_ok!(db.commit().await);
    }

    #[tokio::test]
    async fn test_rollback_all_unwinds_every_level() {
        let mut db = memory();
        db.raw("CREATE TABLE t (n INTEGER)").await.unwrap();

        db.rollback_all().await;
        db.begin().await.unwrap();
        db.begin().await.unwrap();
        db.begin().await.unwrap();
        db.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        db.rollback_all().await;
        assert_eq!(db.transaction_depth(), 0);

        let count = db.fetch_i64("SELECT COUNT(*) FROM t", &[]).await.unwrap();
        assert_eq!(count, Some(0));
    }

    #[tokio::test]
    async fn test_savepoints() {
        let mut db = memory();
        db.raw("CREATE TABLE t (n INTEGER)").await.unwrap();

        assert!(matches!(
            db.savepoint("sp1").await,
            Err(MigrateError::Transaction(_))
        ));

        db.begin().await.unwrap();
        assert!(matches!(
            db.savepoint("bad name").await,
            Err(MigrateError::Transaction(_))
        ));
        assert!(matches!(
            db.savepoint(&"x".repeat(256)).await,
            Err(MigrateError::Transaction(_))
        ));

        db.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        assert_ok!(db.savepoint("sp-1").await);
        db.execute("INSERT INTO t VALUES (2)", &[]).await.unwrap();
        assert_ok!(db.rollback_to("sp-1").await);
        db.commit().await.unwrap();

        let count = db.fetch_i64("SELECT COUNT(*) FROM t", &[]).await.unwrap();
        assert_eq!(count, Some(1));
    }

    #[tokio::test]
    async fn test_registry_switching() {
        let settings = Settings::parse(
            r#"
            [database]
            use = "main"

            [database.connections.main]
            driver = "sqlite"
            database = ":memory:"

            [database.connections.other]
            driver = "sqlite"
            database = ":memory:"
            "#,
        )
        .unwrap();
        let mut registry = ConnectionRegistry::from_settings(&settings).unwrap();
        assert_eq!(registry.using(), "main");
        assert_eq!(registry.names().collect::<Vec<_>>(), ["main", "other"]);

        registry.connection().unwrap().begin().await.unwrap();
        assert!(matches!(
            registry.use_connection("other"),
            Err(MigrateError::Transaction(_))
        ));
        registry.connection().unwrap().rollback().await.unwrap();

        registry.use_connection("other").unwrap();
        assert_eq!(registry.using(), "other");
        assert!(matches!(
            registry.use_connection("nope"),
            Err(MigrateError::Config(_))
        ));

        registry.connect_dsn("sqlite::memory:", None, None).unwrap();
        assert_eq!(registry.using(), "dsn");
        let db = registry.into_active().unwrap();
        assert_eq!(db.name(), "dsn");
    }

    #[test]
    fn test_registry_requires_known_default() {
        let settings = Settings::default().with("database.use", "ghost");
        assert!(ConnectionRegistry::from_settings(&settings).is_err());
    }
}
