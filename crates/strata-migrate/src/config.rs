//! Configuration: the settings file and connection definitions.
//!
//! Settings are read from a TOML file shaped like:
//!
//! ```toml
//! [database]
//! use = "default"
//!
//! [database.connections.default]
//! driver = "sqlite"
//! database = "storage/app.sqlite"
//!
//! [database.migrations]
//! table = "_migrations"
//! path = "resources/migrations"
//!
//! [database.seeds]
//! path = "resources/seeds"
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use strata_schema::Dialect;

use crate::error::{MigrateError, Result};

/// Default history table name.
pub const DEFAULT_MIGRATIONS_TABLE: &str = "_migrations";
/// Default migration directory.
pub const DEFAULT_MIGRATIONS_PATH: &str = "resources/migrations";
/// Default seed directory.
pub const DEFAULT_SEEDS_PATH: &str = "resources/seeds";
/// Default connection name.
pub const DEFAULT_CONNECTION: &str = "default";

/// A snapshot of the settings file with dotted-key lookups.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    root: toml::Table,
}

impl Settings {
    /// Reads and parses a settings file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parses settings from TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self {
            root: text.parse::<toml::Table>()?,
        })
    }

    /// Sets `key` (dotted) to `value`, creating intermediate tables.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        let parts: Vec<&str> = key.split('.').collect();
        insert_path(&mut self.root, &parts, value.into());
        self
    }

    /// Looks up a dotted key such as `database.migrations.table`.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&toml::Value> {
        let mut parts = key.split('.');
        let mut value = self.root.get(parts.next()?)?;
        for part in parts {
            value = value.as_table()?.get(part)?;
        }
        Some(value)
    }

    /// Returns the value at `key`, or `default` when missing or of the wrong type.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.lookup(key)
            .cloned()
            .and_then(|v| v.try_into().ok())
            .unwrap_or(default)
    }

    /// Returns the string at `key`, or `default`.
    #[must_use]
    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.get(key, default.to_string())
    }

    /// Name of the connection used unless another is selected.
    #[must_use]
    pub fn default_connection(&self) -> String {
        self.get_str("database.use", DEFAULT_CONNECTION)
    }

    /// History table name, validated as a plain identifier.
    pub fn migrations_table(&self) -> Result<String> {
        let table = self.get_str("database.migrations.table", DEFAULT_MIGRATIONS_TABLE);
        let valid = table
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(table)
        } else {
            Err(MigrateError::Config(format!(
                "Invalid migrations table name '{table}'"
            )))
        }
    }

    /// Directory holding migration files.
    #[must_use]
    pub fn migrations_path(&self) -> PathBuf {
        PathBuf::from(self.get_str("database.migrations.path", DEFAULT_MIGRATIONS_PATH))
    }

    /// Directory holding seed files.
    #[must_use]
    pub fn seeds_path(&self) -> PathBuf {
        PathBuf::from(self.get_str("database.seeds.path", DEFAULT_SEEDS_PATH))
    }

    /// Connection used for seeding.
    #[must_use]
    pub fn seeds_connection(&self) -> String {
        let default = self.default_connection();
        self.get_str("database.seeds.connection", &default)
    }

    /// Validates and returns every configured connection.
    pub fn connections(&self) -> Result<BTreeMap<String, ConnectionConfig>> {
        let raw: BTreeMap<String, RawConnection> = match self.lookup("database.connections") {
            Some(value) => value.clone().try_into().map_err(|e: toml::de::Error| {
                MigrateError::Config(format!("Invalid database.connections: {e}"))
            })?,
            None => BTreeMap::new(),
        };
        raw.into_iter()
            .map(|(name, raw)| {
                ConnectionConfig::from_raw(raw)
                    .map(|config| (name.clone(), config))
                    .map_err(|e| MigrateError::Config(format!("Connection '{name}': {e}")))
            })
            .collect()
    }
}

fn insert_path(table: &mut toml::Table, parts: &[&str], value: toml::Value) {
    match parts {
        [] => {}
        [last] => {
            table.insert((*last).to_string(), value);
        }
        [first, rest @ ..] => {
            let entry = table
                .entry((*first).to_string())
                .or_insert(toml::Value::Table(toml::Table::new()));
            if !entry.is_table() {
                *entry = toml::Value::Table(toml::Table::new());
            }
            if let toml::Value::Table(inner) = entry {
                insert_path(inner, rest, value);
            }
        }
    }
}

/// Connection fields as written in the settings file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConnection {
    /// Driver name (`mysql`, `pgsql`, `sqlite`, or an alias).
    pub driver: Option<String>,
    /// Database name, or the file path for SQLite.
    pub database: Option<String>,
    /// Server host.
    pub host: Option<String>,
    /// Server port.
    pub port: Option<u16>,
    /// Unix socket path.
    #[serde(alias = "unix_socket")]
    pub socket: Option<String>,
    /// Connection character set.
    pub charset: Option<String>,
    /// User to connect as.
    pub username: Option<String>,
    /// Password for the user.
    pub password: Option<String>,
}

/// A validated connection definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    dialect: Dialect,
    database: String,
    host: Option<String>,
    port: Option<u16>,
    socket: Option<String>,
    charset: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

impl ConnectionConfig {
    /// Validates a raw connection definition.
    pub fn from_raw(raw: RawConnection) -> Result<Self> {
        let driver = raw.driver.ok_or_else(|| {
            MigrateError::Config("Cannot create config, the driver name is missing".to_string())
        })?;
        let database = raw.database.ok_or_else(|| {
            MigrateError::Config("Cannot create config, the database name is missing".to_string())
        })?;
        let dialect = driver
            .parse::<Dialect>()
            .map_err(|e| MigrateError::Config(e.to_string()))?;

        let mut config = Self {
            dialect,
            database,
            host: raw.host,
            port: raw.port,
            socket: raw.socket,
            charset: raw.charset,
            username: raw.username,
            password: raw.password,
        };
        config.check()?;
        if config.host.is_some() && config.port.is_none() {
            config.port = match dialect {
                Dialect::MySql => Some(3306),
                Dialect::Postgres => Some(5432),
                Dialect::Sqlite => None,
            };
        }
        Ok(config)
    }

    /// A SQLite connection to `database` (a path, or `:memory:`).
    pub fn sqlite(database: impl Into<String>) -> Result<Self> {
        Self::from_raw(RawConnection {
            driver: Some("sqlite".to_string()),
            database: Some(database.into()),
            ..RawConnection::default()
        })
    }

    /// Parses a DSN such as `sqlite::memory:`, `sqlite:/path/app.db`,
    /// `mysql:host=db;port=3306;dbname=app;charset=utf8mb4` or
    /// `pgsql:unix_socket=/run/postgresql;dbname=app`.
    pub fn from_dsn(dsn: &str, username: Option<&str>, password: Option<&str>) -> Result<Self> {
        let invalid = || MigrateError::Config(format!("Cannot create config from invalid dsn '{dsn}'"));

        if dsn.to_ascii_lowercase().starts_with("sqlite:") {
            let database = if dsn.eq_ignore_ascii_case("sqlite::memory:") {
                ":memory:".to_string()
            } else {
                dsn[7..].to_string()
            };
            return Self::from_raw(RawConnection {
                driver: Some("sqlite".to_string()),
                database: Some(database),
                username: username.map(str::to_string),
                password: password.map(str::to_string),
                ..RawConnection::default()
            });
        }

        let (driver, rest) = dsn.split_once(':').ok_or_else(invalid)?;
        let mut raw = RawConnection {
            driver: Some(driver.to_string()),
            username: username.map(str::to_string),
            password: password.map(str::to_string),
            ..RawConnection::default()
        };
        for param in rest.split(';').filter(|p| !p.is_empty()) {
            let (key, value) = param.split_once('=').ok_or_else(invalid)?;
            let value = value.to_string();
            match key.to_ascii_lowercase().as_str() {
                "host" => raw.host = Some(value),
                "port" => raw.port = Some(value.parse().map_err(|_| invalid())?),
                "dbname" | "database" => raw.database = Some(value),
                "unix_socket" | "socket" => raw.socket = Some(value),
                "charset" => raw.charset = Some(value),
                _ => {}
            }
        }
        Self::from_raw(raw)
    }

    fn check(&self) -> Result<()> {
        let fail = |msg: &str| Err(MigrateError::Config(msg.to_string()));
        match self.dialect {
            Dialect::Sqlite => {
                if self.host.is_some() || self.port.is_some() || self.socket.is_some() {
                    return fail("SQLite does not require host and port or socket details");
                }
                if self.charset.is_some() {
                    return fail("SQLite does not require a charset, it is always UTF-8");
                }
                if self.username.is_some() || self.password.is_some() {
                    return fail("SQLite does not require authentication credentials");
                }
            }
            Dialect::MySql | Dialect::Postgres => match (&self.host, &self.socket) {
                (None, None) => {
                    return fail("Missing host and socket for connection, provide one to connect to");
                }
                (Some(_), Some(_)) => {
                    return fail("Passed host and socket for connection, use one or the other");
                }
                _ => {}
            },
        }
        Ok(())
    }

    /// Returns the dialect.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Returns the database name or SQLite path.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the server host.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Returns the server port.
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    /// Returns the socket path.
    #[must_use]
    pub fn socket(&self) -> Option<&str> {
        self.socket.as_deref()
    }

    /// Returns the connection character set.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    /// Returns the username.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn is_memory(&self) -> bool {
        matches!(self.database.as_str(), ":memory:" | "memory")
    }

    /// Renders the canonical DSN.
    #[must_use]
    pub fn to_dsn(&self) -> String {
        if self.dialect == Dialect::Sqlite {
            return if self.is_memory() {
                "sqlite::memory:".to_string()
            } else {
                format!("sqlite:{}", self.database)
            };
        }
        let driver = match self.dialect {
            Dialect::MySql => "mysql",
            Dialect::Postgres | Dialect::Sqlite => "pgsql",
        };
        let mut params = Vec::new();
        if let Some(ref socket) = self.socket {
            params.push(format!("unix_socket={socket}"));
        } else if let Some(ref host) = self.host {
            params.push(format!("host={host}"));
            if let Some(port) = self.port {
                params.push(format!("port={port}"));
            }
        }
        params.push(format!("dbname={}", self.database));
        if let Some(ref charset) = self.charset {
            params.push(format!("charset={charset}"));
        }
        format!("{driver}:{}", params.join(";"))
    }

    /// Renders the sqlx connection URL. SQLite files are created on connect.
    #[must_use]
    pub fn to_url(&self) -> String {
        let scheme = match self.dialect {
            Dialect::Sqlite => {
                return if self.is_memory() {
                    "sqlite::memory:".to_string()
                } else {
                    format!("sqlite://{}?mode=rwc", self.database)
                };
            }
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
        };

        let mut credentials = String::new();
        if let Some(ref user) = self.username {
            credentials.push_str(&encode(user));
            if let Some(ref password) = self.password {
                credentials.push(':');
                credentials.push_str(&encode(password));
            }
            credentials.push('@');
        }

        let mut query = Vec::new();
        let authority = match (&self.host, &self.socket) {
            (Some(host), _) => match self.port {
                Some(port) => format!("{host}:{port}"),
                None => host.clone(),
            },
            (None, Some(socket)) => {
                let key = if self.dialect == Dialect::MySql { "socket" } else { "host" };
                query.push(format!("{key}={}", encode(socket)));
                "localhost".to_string()
            }
            (None, None) => "localhost".to_string(),
        };
        if let (Dialect::MySql, Some(charset)) = (self.dialect, &self.charset) {
            query.push(format!("charset={charset}"));
        }

        let mut url = format!(
            "{scheme}://{credentials}{authority}/{}",
            encode(&self.database)
        );
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }
}

/// An interactive client invocation for a connection.
///
/// Passwords travel through `env` (`MYSQL_PWD`, `PGPASSWORD`) rather than the
/// argument list, so they never show up in the process table.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCommand {
    /// Executable name.
    pub program: &'static str,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(&'static str, String)>,
}

impl fmt::Debug for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env: Vec<&str> = self.env.iter().map(|(key, _)| *key).collect();
        f.debug_struct("ClientCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &env)
            .finish()
    }
}

impl ConnectionConfig {
    /// Builds the `mysql`, `psql` or `sqlite3` command that opens an
    /// interactive session on this connection.
    #[must_use]
    pub fn client_command(&self) -> ClientCommand {
        fn push(args: &mut Vec<String>, flag: &str, value: &str) {
            args.push(flag.to_string());
            args.push(value.to_string());
        }

        let mut args = Vec::new();
        let mut env = Vec::new();
        let program = match self.dialect {
            Dialect::Sqlite => {
                args.push(self.database.clone());
                "sqlite3"
            }
            Dialect::MySql => {
                match (&self.host, &self.socket) {
                    (Some(host), _) => {
                        push(&mut args, "-h", host);
                        if let Some(port) = self.port {
                            push(&mut args, "-P", &port.to_string());
                        }
                    }
                    (None, Some(socket)) => push(&mut args, "-S", socket),
                    (None, None) => {}
                }
                if let Some(ref user) = self.username {
                    push(&mut args, "-u", user);
                }
                if let Some(ref charset) = self.charset {
                    push(&mut args, "--default-character-set", charset);
                }
                push(&mut args, "-D", &self.database);
                if let Some(ref password) = self.password {
                    env.push(("MYSQL_PWD", password.clone()));
                }
                "mysql"
            }
            Dialect::Postgres => {
                // psql takes a socket directory through -h as well
                if let Some(host) = self.host.as_ref().or(self.socket.as_ref()) {
                    push(&mut args, "-h", host);
                }
                if let Some(port) = self.port {
                    push(&mut args, "-p", &port.to_string());
                }
                if let Some(ref user) = self.username {
                    push(&mut args, "-U", user);
                }
                push(&mut args, "-d", &self.database);
                if let Some(ref password) = self.password {
                    env.push(("PGPASSWORD", password.clone()));
                }
                "psql"
            }
        };
        ClientCommand { program, args, env }
    }
}

/// Percent-encodes everything outside the URL unreserved set.
fn encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_lookup_and_defaults() {
        let settings = Settings::parse(
            r#"
            [database]
            use = "main"

            [database.migrations]
            table = "schema_history"
            "#,
        )
        .unwrap();

        assert_eq!(settings.default_connection(), "main");
        assert_eq!(settings.migrations_table().unwrap(), "schema_history");
        assert_eq!(
            settings.migrations_path(),
            PathBuf::from("resources/migrations")
        );
        assert_eq!(settings.seeds_connection(), "main");
        assert_eq!(settings.get("database.missing", 7_i64), 7);
        assert_eq!(settings.get_str("database.use", "x"), "main");
    }

    #[test]
    fn test_settings_with_overrides() {
        let settings = Settings::default()
            .with("database.migrations.table", "history")
            .with("database.use", "other");
        assert_eq!(settings.migrations_table().unwrap(), "history");
        assert_eq!(settings.default_connection(), "other");
    }

    #[test]
    fn test_invalid_table_name() {
        let settings = Settings::default().with("database.migrations.table", "x; DROP");
        assert!(matches!(
            settings.migrations_table(),
            Err(MigrateError::Config(_))
        ));
    }

    #[test]
    fn test_connections_are_validated() {
        let settings = Settings::parse(
            r#"
            [database.connections.default]
            driver = "pgsql"
            database = "app"
            host = "db"
            username = "app"
            password = "p@ss word"

            [database.connections.local]
            driver = "sqlite"
            database = ":memory:"
            "#,
        )
        .unwrap();
        let connections = settings.connections().unwrap();
        let pg = &connections["default"];
        assert_eq!(pg.dialect(), Dialect::Postgres);
        assert_eq!(pg.port(), Some(5432));
        assert_eq!(pg.to_dsn(), "pgsql:host=db;port=5432;dbname=app");
        assert_eq!(pg.to_url(), "postgres://app:p%40ss%20word@db:5432/app");
        assert_eq!(connections["local"].to_url(), "sqlite::memory:");
    }

    #[test]
    fn test_unknown_driver() {
        let err = ConnectionConfig::from_raw(RawConnection {
            driver: Some("oracle".to_string()),
            database: Some("x".to_string()),
            ..RawConnection::default()
        })
        .unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[test]
    fn test_sqlite_rejects_server_details() {
        for raw in [
            RawConnection {
                host: Some("h".to_string()),
                ..RawConnection::default()
            },
            RawConnection {
                charset: Some("utf8".to_string()),
                ..RawConnection::default()
            },
            RawConnection {
                username: Some("u".to_string()),
                ..RawConnection::default()
            },
        ] {
            let raw = RawConnection {
                driver: Some("sqlite".to_string()),
                database: Some("app.db".to_string()),
                ..raw
            };
            assert!(ConnectionConfig::from_raw(raw).is_err());
        }
    }

    #[test]
    fn test_server_needs_exactly_one_of_host_or_socket() {
        assert!(ConnectionConfig::from_dsn("mysql:dbname=app", None, None).is_err());
        assert!(
            ConnectionConfig::from_dsn("mysql:host=h;unix_socket=/s;dbname=app", None, None)
                .is_err()
        );
    }

    #[test]
    fn test_from_dsn() {
        let mysql = ConnectionConfig::from_dsn(
            "mysql:host=db;dbname=app;charset=utf8mb4",
            Some("root"),
            None,
        )
        .unwrap();
        assert_eq!(mysql.dialect(), Dialect::MySql);
        assert_eq!(mysql.port(), Some(3306));
        assert_eq!(mysql.charset(), Some("utf8mb4"));
        assert_eq!(
            mysql.to_dsn(),
            "mysql:host=db;port=3306;dbname=app;charset=utf8mb4"
        );
        assert_eq!(mysql.to_url(), "mysql://root@db:3306/app?charset=utf8mb4");

        let socket =
            ConnectionConfig::from_dsn("pgsql:unix_socket=/run/pg;dbname=app", None, None)
                .unwrap();
        assert_eq!(socket.socket(), Some("/run/pg"));
        assert_eq!(socket.port(), None);
        assert_eq!(socket.to_dsn(), "pgsql:unix_socket=/run/pg;dbname=app");
        assert_eq!(
            socket.to_url(),
            "postgres://localhost/app?host=%2Frun%2Fpg"
        );

        let memory = ConnectionConfig::from_dsn("sqlite::memory:", None, None).unwrap();
        assert_eq!(memory.database(), ":memory:");
        assert_eq!(memory.to_dsn(), "sqlite::memory:");

        let file = ConnectionConfig::from_dsn("sqlite:/tmp/app.db", None, None).unwrap();
        assert_eq!(file.database(), "/tmp/app.db");
        assert_eq!(file.to_url(), "sqlite:///tmp/app.db?mode=rwc");

        assert!(ConnectionConfig::from_dsn("nonsense", None, None).is_err());
    }

    #[test]
    fn test_client_command() {
        let mysql = ConnectionConfig::from_dsn(
            "mysql:host=db;dbname=app;charset=utf8mb4",
            Some("root"),
            Some("secret"),
        )
        .unwrap()
        .client_command();
        assert_eq!(mysql.program, "mysql");
        assert_eq!(
            mysql.args,
            ["-h", "db", "-P", "3306", "-u", "root", "--default-character-set", "utf8mb4", "-D", "app"]
        );
        assert_eq!(mysql.env, [("MYSQL_PWD", "secret".to_string())]);
        assert!(!format!("{mysql:?}").contains("secret"));

        let pg = ConnectionConfig::from_dsn("pgsql:unix_socket=/run/pg;dbname=app", Some("app"), None)
            .unwrap()
            .client_command();
        assert_eq!(pg.program, "psql");
        assert_eq!(pg.args, ["-h", "/run/pg", "-U", "app", "-d", "app"]);
        assert!(pg.env.is_empty());

        let sqlite = ConnectionConfig::sqlite("storage/app.sqlite")
            .unwrap()
            .client_command();
        assert_eq!(sqlite.program, "sqlite3");
        assert_eq!(sqlite.args, ["storage/app.sqlite"]);
    }
}
