//! Per-dialect rendering rules.
//!
//! Every rendering decision that differs between MySQL, PostgreSQL and
//! SQLite is answered here, from lookup tables indexed by dialect and by
//! logical type or logical operation. Builders never branch on the dialect
//! themselves: they ask for a [`Rule`] and either fill its template or
//! surface its "unsupported" marker as an error.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SchemaError};

/// A supported database engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// MySQL / MariaDB.
    MySql,
    /// PostgreSQL.
    Postgres,
    /// SQLite 3.35+.
    Sqlite,
}

impl Dialect {
    /// All supported dialects.
    pub const ALL: [Self; 3] = [Self::MySql, Self::Postgres, Self::Sqlite];

    /// Returns the canonical driver name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Quotes an identifier (table, column or index name).
    #[must_use]
    pub fn quote(self, ident: &str) -> String {
        match self {
            Self::MySql => format!("`{ident}`"),
            Self::Postgres | Self::Sqlite => format!("\"{ident}\""),
        }
    }

    /// Quotes and comma-joins a list of identifiers.
    #[must_use]
    pub fn quote_list<S: AsRef<str>>(self, idents: &[S]) -> String {
        idents
            .iter()
            .map(|i| self.quote(i.as_ref()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Returns the bind placeholder for the 1-based parameter `n`.
    #[must_use]
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Self::MySql | Self::Sqlite => "?".to_string(),
            Self::Postgres => format!("${n}"),
        }
    }

    /// Returns the concrete type name for a logical column type.
    #[must_use]
    pub const fn type_name(self, kind: TypeKind) -> &'static str {
        use TypeKind as K;
        match (self, kind) {
            (Self::MySql, K::Binary) => "binary",
            (Self::Postgres, K::Binary | K::Blob) => "bytea",
            (Self::Sqlite, K::Binary | K::Blob) | (Self::MySql, K::Blob) => "blob",

            (Self::MySql, K::Boolean) => "tinyint(1)",
            (Self::Postgres, K::Boolean) => "boolean",

            (Self::MySql | Self::Postgres, K::Char) => "char",
            (Self::MySql | Self::Postgres, K::Varchar) => "varchar",
            (_, K::Text) => "text",

            (Self::MySql | Self::Postgres, K::Date) => "date",
            (Self::MySql, K::DateTime) => "datetime",
            (Self::Postgres, K::DateTime) => "timestamp",
            (Self::MySql | Self::Postgres, K::Time) => "time",
            (Self::MySql | Self::Postgres, K::Timestamp) | (Self::MySql, K::TimestampTz) => {
                "timestamp"
            }
            (Self::Postgres, K::TimestampTz) => "timestamptz",

            (Self::MySql, K::TinyInt) => "tinyint",
            (Self::Postgres, K::TinyInt) | (Self::MySql | Self::Postgres, K::SmallInt) => {
                "smallint"
            }
            (Self::MySql, K::MediumInt) => "mediumint",
            (Self::Postgres, K::MediumInt) | (Self::MySql | Self::Postgres, K::Integer) => {
                "integer"
            }
            (Self::MySql | Self::Postgres, K::BigInt) => "bigint",

            (Self::MySql, K::Double) => "double",
            (Self::Postgres, K::Double) => "double precision",
            (Self::MySql, K::Float) => "float",
            (Self::Postgres, K::Float) | (Self::Sqlite, K::Double | K::Float) => "real",
            (Self::MySql, K::Decimal) => "decimal",
            (Self::Postgres | Self::Sqlite, K::Decimal) | (_, K::Numeric) => "numeric",

            (Self::MySql, K::Json | K::Jsonb) | (Self::Postgres, K::Json) => "json",
            (Self::Postgres, K::Jsonb) => "jsonb",

            (
                Self::Sqlite,
                K::Char | K::Varchar | K::Date | K::DateTime | K::Time | K::Json | K::Jsonb,
            ) => "text",
            (
                Self::Sqlite,
                K::Boolean
                | K::Timestamp
                | K::TimestampTz
                | K::TinyInt
                | K::SmallInt
                | K::MediumInt
                | K::Integer
                | K::BigInt,
            ) => "integer",
        }
    }

    /// Returns whether a `(n)` / `(p,s)` suffix may follow the type name.
    #[must_use]
    pub const fn supports_size(self, kind: TypeKind) -> bool {
        use TypeKind as K;
        match self {
            Self::MySql => matches!(
                kind,
                K::Char
                    | K::Varchar
                    | K::Text
                    | K::TinyInt
                    | K::SmallInt
                    | K::MediumInt
                    | K::Integer
                    | K::BigInt
                    | K::Double
                    | K::Float
                    | K::Decimal
                    | K::Numeric
            ),
            Self::Postgres => matches!(kind, K::Char | K::Varchar | K::Decimal | K::Numeric),
            Self::Sqlite => false,
        }
    }

    /// Returns the auto-incrementing replacement type, if the dialect
    /// expresses auto-increment through the column type.
    #[must_use]
    pub const fn serial_type(self, kind: TypeKind) -> Option<&'static str> {
        match self {
            Self::Postgres => Some(match kind {
                TypeKind::BigInt => "bigserial",
                TypeKind::TinyInt | TypeKind::SmallInt => "smallserial",
                _ => "serial",
            }),
            Self::MySql | Self::Sqlite => None,
        }
    }

    /// Returns the auto-increment column keyword.
    #[must_use]
    pub const fn auto_increment_keyword(self) -> Option<&'static str> {
        match self {
            Self::MySql => Some("auto_increment"),
            Self::Postgres => None,
            Self::Sqlite => Some("autoincrement"),
        }
    }

    /// Returns whether a primary column carries `primary key` inline
    /// instead of contributing to a table-level `PRIMARY KEY (...)`.
    #[must_use]
    pub const fn inline_primary(self, auto_increment: bool) -> bool {
        match self {
            Self::Postgres => true,
            Self::Sqlite => auto_increment,
            Self::MySql => false,
        }
    }

    /// Returns whether an auto-increment column must be the table's only
    /// primary key column and have an integer type.
    #[must_use]
    pub const fn auto_increment_needs_integer_key(self) -> bool {
        matches!(self, Self::Sqlite)
    }

    /// Returns whether foreign keys are declared inside `CREATE TABLE`
    /// rather than added afterwards.
    #[must_use]
    pub const fn inline_foreign_keys(self) -> bool {
        matches!(self, Self::Sqlite)
    }

    /// Returns whether columns accept an inline `comment "..."`.
    #[must_use]
    pub const fn supports_column_comment(self) -> bool {
        matches!(self, Self::MySql)
    }

    /// Returns the default expression used by `use_current()`.
    #[must_use]
    pub fn current_timestamp(self, kind: TypeKind) -> &'static str {
        if self.type_name(kind) == "integer" {
            "(strftime('%s', 'now'))"
        } else {
            "CURRENT_TIMESTAMP"
        }
    }

    /// Looks up the rule for a logical operation.
    #[must_use]
    pub const fn rule(self, op: Op) -> Rule {
        use Rule::{Template as T, Unsupported as U};
        match (op, self) {
            (Op::CreateTable, _) => T("CREATE TABLE {guard}{table} (\n{body}\n){options}"),
            (Op::AlterTable, Self::Sqlite) => T("ALTER TABLE {table} {clauses}"),
            (Op::AlterTable, _) => T("ALTER TABLE {table}\n{clauses}"),
            (Op::DropTable, _) => T("DROP TABLE {guard}{table}"),
            (Op::RenameTable, Self::MySql) => T("RENAME TABLE {table} TO {to}"),
            (Op::RenameTable, _) => T("ALTER TABLE {table} RENAME TO {to}"),
            (Op::RenameTableIfExists, Self::Postgres) => {
                T("ALTER TABLE IF EXISTS {table} RENAME TO {to}")
            }
            (Op::RenameTableIfExists, Self::MySql) => U("RENAME TABLE has no IF EXISTS guard"),
            (Op::RenameTableIfExists, Self::Sqlite) => U("ALTER TABLE has no IF EXISTS guard"),
            (Op::TruncateTable, Self::Sqlite) => T("DELETE FROM {table}"),
            (Op::TruncateTable, _) => T("TRUNCATE TABLE {table}"),

            (Op::AddColumn, _) => T("ADD COLUMN {column}"),
            (Op::AlterColumn, Self::MySql) => T("MODIFY COLUMN {column}"),
            (Op::AlterColumn, Self::Postgres) => T("ALTER COLUMN {column}"),
            (Op::AlterColumn, Self::Sqlite) => {
                U("column definitions cannot be altered in place, rebuild the table")
            }
            (Op::DropColumn, _) => T("DROP COLUMN {column}"),
            (Op::RenameColumn, _) => T("RENAME COLUMN {column}"),
            (Op::AddPrimaryKey, Self::Sqlite) => {
                U("a primary key cannot be added to an existing table")
            }
            (Op::AddPrimaryKey, _) => T("ADD PRIMARY KEY ({columns})"),

            (Op::CreateIndex, _) => T("CREATE {unique}INDEX {name} ON {table} ({columns})"),
            (Op::DropIndex, Self::MySql) => T("DROP INDEX {name} ON {table}"),
            (Op::DropIndex, _) => T("DROP INDEX {name}"),
            (Op::RenameIndex, Self::MySql) => T("ALTER TABLE {table} RENAME INDEX {name} TO {to}"),
            (Op::RenameIndex, Self::Postgres) => T("ALTER INDEX {name} RENAME TO {to}"),
            (Op::RenameIndex, Self::Sqlite) => {
                T("DROP INDEX {name}; CREATE {unique}INDEX {to} ON {table} ({columns})")
            }

            (Op::AddForeignKey, Self::Sqlite) => T(
                "ALTER TABLE {table} ADD FOREIGN KEY ({columns}) REFERENCES {references} ({referenced}){actions}",
            ),
            (Op::AddForeignKey, _) => T(
                "ALTER TABLE {table} ADD CONSTRAINT {name} FOREIGN KEY ({columns}) REFERENCES {references} ({referenced}){actions}",
            ),
            (Op::InlineForeignKey, _) => T(
                "CONSTRAINT {name} FOREIGN KEY ({columns}) REFERENCES {references} ({referenced}){actions}",
            ),
            (Op::DropForeignKey, Self::MySql) => T("ALTER TABLE {table} DROP FOREIGN KEY {name}"),
            (Op::DropForeignKey, Self::Postgres) => T("ALTER TABLE {table} DROP CONSTRAINT {name}"),
            (Op::DropForeignKey, Self::Sqlite) => {
                U("foreign keys cannot be dropped without rebuilding the table")
            }
            (Op::RenameForeignKey, _) => U("foreign keys cannot be renamed, drop and re-add them"),
        }
    }

    /// Looks up the template for an operation, failing if the dialect
    /// cannot express it.
    pub fn template(self, op: Op) -> Result<Template> {
        match self.rule(op) {
            Rule::Template(text) => Ok(Template(text)),
            Rule::Unsupported(reason) => Err(SchemaError::Unsupported {
                dialect: self,
                operation: op.describe(),
                reason,
            }),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "pgsql" | "psql" | "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            _ => Err(SchemaError::UnknownDialect(s.to_string())),
        }
    }
}

/// Logical column types, independent of any dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Fixed binary data.
    Binary,
    /// Binary large object.
    Blob,
    /// Boolean.
    Boolean,
    /// Fixed-length string.
    Char,
    /// Variable-length string.
    Varchar,
    /// Unbounded text.
    Text,
    /// Date.
    Date,
    /// Date and time.
    DateTime,
    /// Time of day.
    Time,
    /// Timestamp.
    Timestamp,
    /// Timestamp with time zone.
    TimestampTz,
    /// 8-bit integer.
    TinyInt,
    /// 16-bit integer.
    SmallInt,
    /// 24-bit integer.
    MediumInt,
    /// 64-bit integer.
    BigInt,
    /// 32-bit integer.
    Integer,
    /// Double precision float.
    Double,
    /// Single precision float.
    Float,
    /// Exact decimal.
    Decimal,
    /// Exact numeric.
    Numeric,
    /// JSON document.
    Json,
    /// Binary JSON document.
    Jsonb,
}

/// A logical DDL operation looked up in the rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `CREATE TABLE`.
    CreateTable,
    /// `ALTER TABLE` wrapping column clauses.
    AlterTable,
    /// `DROP TABLE`.
    DropTable,
    /// Table rename.
    RenameTable,
    /// Table rename guarded by `IF EXISTS`.
    RenameTableIfExists,
    /// Remove every row.
    TruncateTable,
    /// Add a column clause.
    AddColumn,
    /// Change a column definition clause.
    AlterColumn,
    /// Drop a column clause.
    DropColumn,
    /// Rename a column clause.
    RenameColumn,
    /// Add a primary key to an existing table.
    AddPrimaryKey,
    /// `CREATE INDEX`.
    CreateIndex,
    /// `DROP INDEX`.
    DropIndex,
    /// Index rename.
    RenameIndex,
    /// Foreign key added to an existing table.
    AddForeignKey,
    /// Foreign key declared inside `CREATE TABLE`.
    InlineForeignKey,
    /// Foreign key removal.
    DropForeignKey,
    /// Foreign key rename.
    RenameForeignKey,
}

impl Op {
    /// Human readable operation name used in diagnostics.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::CreateTable => "create table",
            Self::AlterTable => "alter table",
            Self::DropTable => "drop table",
            Self::RenameTable => "rename table",
            Self::RenameTableIfExists => "rename table if exists",
            Self::TruncateTable => "truncate table",
            Self::AddColumn => "add column",
            Self::AlterColumn => "alter column",
            Self::DropColumn => "drop column",
            Self::RenameColumn => "rename column",
            Self::AddPrimaryKey => "add primary key",
            Self::CreateIndex => "create index",
            Self::DropIndex => "drop index",
            Self::RenameIndex => "rename index",
            Self::AddForeignKey => "add foreign key",
            Self::InlineForeignKey => "inline foreign key",
            Self::DropForeignKey => "drop foreign key",
            Self::RenameForeignKey => "rename foreign key",
        }
    }
}

/// Outcome of a rule lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// A statement template with `{placeholder}` slots.
    Template(&'static str),
    /// The dialect cannot express the operation.
    Unsupported(&'static str),
}

/// A statement template with `{name}` slots.
///
/// A template may hold several statements separated by `"; "`; they are
/// split before any slot is filled, so identifiers never affect the split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Template(&'static str);

impl Template {
    /// Fills every slot and returns a single statement.
    #[must_use]
    pub fn fill(self, vars: &[(&str, &str)]) -> String {
        fill(self.0, vars)
    }

    /// Fills every slot of each statement in the template.
    #[must_use]
    pub fn statements(self, vars: &[(&str, &str)]) -> Vec<String> {
        self.0.split("; ").map(|part| fill(part, vars)).collect()
    }
}

fn fill(text: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(text.len() + 32);
    let mut rest = text;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match vars.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("pgsql".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("MariaDB".parse::<Dialect>().unwrap(), Dialect::MySql);
        assert_eq!("sqlite".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert_eq!(
            "oracle".parse::<Dialect>(),
            Err(SchemaError::UnknownDialect("oracle".to_string()))
        );
    }

    #[test]
    fn test_quote() {
        assert_eq!(Dialect::MySql.quote("users"), "`users`");
        assert_eq!(Dialect::Postgres.quote("users"), "\"users\"");
        assert_eq!(Dialect::Sqlite.quote_list(&["a", "b"]), "\"a\", \"b\"");
    }

    #[test]
    fn test_type_names_are_total() {
        let kinds = [
            TypeKind::Binary,
            TypeKind::Blob,
            TypeKind::Boolean,
            TypeKind::Char,
            TypeKind::Varchar,
            TypeKind::Text,
            TypeKind::Date,
            TypeKind::DateTime,
            TypeKind::Time,
            TypeKind::Timestamp,
            TypeKind::TimestampTz,
            TypeKind::TinyInt,
            TypeKind::SmallInt,
            TypeKind::MediumInt,
            TypeKind::BigInt,
            TypeKind::Integer,
            TypeKind::Double,
            TypeKind::Float,
            TypeKind::Decimal,
            TypeKind::Numeric,
            TypeKind::Json,
            TypeKind::Jsonb,
        ];
        for dialect in Dialect::ALL {
            for kind in kinds {
                assert!(!dialect.type_name(kind).is_empty());
                if dialect == Dialect::Sqlite {
                    assert!(!dialect.supports_size(kind));
                }
            }
        }
    }

    #[test]
    fn test_sqlite_collapses_types() {
        let d = Dialect::Sqlite;
        assert_eq!(d.type_name(TypeKind::Varchar), "text");
        assert_eq!(d.type_name(TypeKind::BigInt), "integer");
        assert_eq!(d.type_name(TypeKind::Double), "real");
        assert_eq!(d.type_name(TypeKind::Decimal), "numeric");
        assert_eq!(d.type_name(TypeKind::Jsonb), "text");
    }

    #[test]
    fn test_postgres_timestamp_tz() {
        assert_eq!(
            Dialect::Postgres.type_name(TypeKind::TimestampTz),
            "timestamptz"
        );
        assert_eq!(Dialect::MySql.type_name(TypeKind::TimestampTz), "timestamp");
    }

    #[test]
    fn test_unsupported_rules() {
        let err = Dialect::Sqlite.template(Op::DropForeignKey).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::Unsupported {
                dialect: Dialect::Sqlite,
                operation: "drop foreign key",
                ..
            }
        ));
        assert!(Dialect::Sqlite.template(Op::AlterColumn).is_err());
        assert!(Dialect::MySql.template(Op::AlterColumn).is_ok());
    }

    #[test]
    fn test_template_fill() {
        let t = Dialect::MySql.template(Op::DropIndex).unwrap();
        assert_eq!(
            t.fill(&[("name", "`idx`"), ("table", "`users`")]),
            "DROP INDEX `idx` ON `users`"
        );
    }

    #[test]
    fn test_template_split_before_fill() {
        let t = Dialect::Sqlite.template(Op::RenameIndex).unwrap();
        let stmts = t.statements(&[
            ("name", "\"a; b\""),
            ("to", "\"c\""),
            ("unique", ""),
            ("table", "\"t\""),
            ("columns", "\"x\""),
        ]);
        assert_eq!(
            stmts,
            vec![
                "DROP INDEX \"a; b\"".to_string(),
                "CREATE INDEX \"c\" ON \"t\" (\"x\")".to_string()
            ]
        );
    }

    #[test]
    fn test_placeholder() {
        assert_eq!(Dialect::Postgres.placeholder(2), "$2");
        assert_eq!(Dialect::Sqlite.placeholder(2), "?");
    }
}
