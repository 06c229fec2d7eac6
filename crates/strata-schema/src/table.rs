//! Table builder.
//!
//! A [`Table`] collects [`Column`]s and [`Index`]es for one table and renders
//! them into the statements of a single create, alter, drop, rename or
//! truncate operation.

use tracing::debug;

use crate::column::{Column, ColumnMode};
use crate::dialect::{Dialect, Op};
use crate::error::{Result, SchemaError};
use crate::index::Index;

/// The operation a table renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableMode {
    /// `CREATE TABLE`.
    Create,
    /// `ALTER TABLE`.
    Alter,
    /// `DROP TABLE`.
    Drop,
    /// Rename to the given name.
    Rename(String),
    /// Remove all rows.
    Truncate,
}

impl TableMode {
    /// Returns the mode name used in diagnostics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Alter => "alter",
            Self::Drop => "drop",
            Self::Rename(_) => "rename",
            Self::Truncate => "truncate",
        }
    }
}

/// Table-level options. Each one only renders for the dialect that knows it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableOptions {
    /// MySQL storage engine.
    pub engine: Option<String>,
    /// MySQL default character set.
    pub charset: Option<String>,
    /// MySQL default collation.
    pub collation: Option<String>,
    /// SQLite `STRICT` table.
    pub strict: bool,
    /// SQLite `WITHOUT ROWID` table.
    pub without_rowid: bool,
}

/// Builder for one table operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    dialect: Dialect,
    name: String,
    mode: Option<TableMode>,
    guard: bool,
    columns: Vec<Column>,
    indexes: Vec<Index>,
    options: TableOptions,
}

impl Table {
    /// Creates a builder for `name` with no operation chosen yet.
    #[must_use]
    pub fn new(dialect: Dialect, name: impl Into<String>) -> Self {
        Self {
            dialect,
            name: name.into(),
            mode: None,
            guard: false,
            columns: Vec::new(),
            indexes: Vec::new(),
            options: TableOptions::default(),
        }
    }

    /// Returns the target dialect.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the chosen operation, if any.
    #[must_use]
    pub const fn mode(&self) -> Option<&TableMode> {
        self.mode.as_ref()
    }

    /// Returns the columns in insertion order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the indexes in insertion order.
    #[must_use]
    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    fn with_mode(mut self, mode: TableMode, guard: bool) -> Self {
        self.mode = Some(mode);
        self.guard = guard;
        self
    }

    // modes, last call wins

    /// Creates the table.
    #[must_use]
    pub fn create(self) -> Self {
        self.with_mode(TableMode::Create, false)
    }

    /// Alters the table.
    #[must_use]
    pub fn alter(self) -> Self {
        self.with_mode(TableMode::Alter, false)
    }

    /// Drops the table.
    #[must_use]
    pub fn drop(self) -> Self {
        self.with_mode(TableMode::Drop, false)
    }

    /// Drops the table if it exists.
    #[must_use]
    pub fn drop_if_exists(self) -> Self {
        self.with_mode(TableMode::Drop, true)
    }

    /// Renames the table to `to`.
    #[must_use]
    pub fn rename(self, to: impl Into<String>) -> Self {
        self.with_mode(TableMode::Rename(to.into()), false)
    }

    /// Renames the table to `to` if it exists.
    #[must_use]
    pub fn rename_if_exists(self, to: impl Into<String>) -> Self {
        self.with_mode(TableMode::Rename(to.into()), true)
    }

    /// Removes every row from the table.
    #[must_use]
    pub fn truncate(self) -> Self {
        self.with_mode(TableMode::Truncate, false)
    }

    /// Guards a create with `IF NOT EXISTS`.
    #[must_use]
    pub fn if_not_exists(mut self) -> Self {
        self.guard = true;
        self
    }

    /// Guards a drop or rename with `IF EXISTS`.
    #[must_use]
    pub fn if_exists(mut self) -> Self {
        self.guard = true;
        self
    }

    // options

    /// Sets the MySQL storage engine.
    #[must_use]
    pub fn engine(mut self, engine: impl Into<String>) -> Self {
        self.options.engine = Some(engine.into());
        self
    }

    /// Sets the MySQL default character set.
    #[must_use]
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.options.charset = Some(charset.into());
        self
    }

    /// Sets the MySQL default collation.
    #[must_use]
    pub fn collation(mut self, collation: impl Into<String>) -> Self {
        self.options.collation = Some(collation.into());
        self
    }

    /// Makes the SQLite table `STRICT`.
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.options.strict = true;
        self
    }

    /// Makes the SQLite table `WITHOUT ROWID`.
    #[must_use]
    pub fn without_rowid(mut self) -> Self {
        self.options.without_rowid = true;
        self
    }

    // structure

    fn check_structural(&self, call: &'static str) -> Result<()> {
        match self.mode {
            Some(TableMode::Create | TableMode::Alter) => Ok(()),
            ref other => Err(SchemaError::WrongMode {
                table: self.name.clone(),
                mode: other.as_ref().map_or("unset", TableMode::as_str),
                call,
            }),
        }
    }

    /// Adds a column. Fails outside create/alter mode or on a duplicate name.
    pub fn column(mut self, column: Column) -> Result<Self> {
        self.check_structural("a column")?;
        if self.columns.iter().any(|c| c.name() == column.name()) {
            return Err(SchemaError::DuplicateColumn {
                table: self.name,
                column: column.name().to_string(),
            });
        }
        self.columns.push(column);
        Ok(self)
    }

    /// Adds an index or foreign key. Fails outside create/alter mode or when
    /// the resolved name is already taken.
    pub fn index(mut self, index: Index) -> Result<Self> {
        self.check_structural("an index")?;
        let name = index.name_for(&self.name);
        if self.indexes.iter().any(|i| i.name_for(&self.name) == name) {
            return Err(SchemaError::DuplicateIndex {
                table: self.name,
                index: name,
            });
        }
        self.indexes.push(index);
        Ok(self)
    }

    /// Adds a foreign key from `columns` to `references (referenced)`.
    pub fn foreign<I, S, R, T>(
        self,
        columns: I,
        references: impl Into<String>,
        referenced: R,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        R: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.index(Index::foreign(columns).references(references, referenced))
    }

    /// Adds a unique index over `columns`.
    pub fn unique<I, S>(self, columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.index(Index::new(columns).unique())
    }

    /// Adds nullable `created_at` and `updated_at` timestamps.
    pub fn timestamps(self) -> Result<Self> {
        self.column(Column::new("created_at").timestamp().nullable())?
            .column(Column::new("updated_at").timestamp().nullable())
    }

    /// Adds a nullable `deleted_at` timestamp.
    pub fn soft_delete(self) -> Result<Self> {
        self.column(Column::new("deleted_at").timestamp().nullable())
    }

    /// Adds nullable `created_by` and `updated_by` integers.
    pub fn userstamps(self) -> Result<Self> {
        self.column(Column::new("created_by").integer().nullable())?
            .column(Column::new("updated_by").integer().nullable())
    }

    // rendering

    /// Renders every statement of the operation, without trailing semicolons.
    pub fn statements(&self) -> Result<Vec<String>> {
        let table = self.dialect.quote(&self.name);
        match self.mode {
            None => Err(SchemaError::NoMode),
            Some(TableMode::Create) => self.create_statements(&table),
            Some(TableMode::Alter) => self.alter_statements(&table),
            Some(TableMode::Drop) => {
                let guard = if self.guard { "IF EXISTS " } else { "" };
                Ok(vec![self
                    .dialect
                    .template(Op::DropTable)?
                    .fill(&[("guard", guard), ("table", table.as_str())])])
            }
            Some(TableMode::Rename(ref to)) => {
                let op = if self.guard {
                    Op::RenameTableIfExists
                } else {
                    Op::RenameTable
                };
                let to = self.dialect.quote(to);
                Ok(vec![self
                    .dialect
                    .template(op)?
                    .fill(&[("table", table.as_str()), ("to", to.as_str())])])
            }
            Some(TableMode::Truncate) => Ok(vec![self
                .dialect
                .template(Op::TruncateTable)?
                .fill(&[("table", table.as_str())])]),
        }
    }

    /// Renders the operation as `;`-terminated statements, one per line.
    pub fn render(&self) -> Result<String> {
        Ok(self
            .statements()?
            .iter()
            .map(|s| format!("{s};"))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn check_auto_increment(&self) -> Result<()> {
        if !self.dialect.auto_increment_needs_integer_key() {
            return Ok(());
        }
        let Some(column) = self.columns.iter().find(|c| c.is_auto_increment()) else {
            return Ok(());
        };
        let integer = column
            .kind()
            .is_some_and(|kind| self.dialect.type_name(kind) == "integer");
        if !integer {
            return Err(SchemaError::InvalidAutoIncrement {
                table: self.name.clone(),
                reason: "the auto-increment column must have an integer type",
            });
        }
        if self.columns.iter().filter(|c| c.is_primary()).count() > 1 {
            return Err(SchemaError::InvalidAutoIncrement {
                table: self.name.clone(),
                reason: "the auto-increment column must be the only primary key column",
            });
        }
        Ok(())
    }

    fn check_strict(&self) -> Result<()> {
        if self.dialect != Dialect::Sqlite || !self.options.strict {
            return Ok(());
        }
        let loose = self
            .columns
            .iter()
            .filter_map(Column::kind)
            .map(|kind| self.dialect.type_name(kind))
            .any(|name| !matches!(name, "integer" | "real" | "text" | "blob"));
        if loose {
            return Err(SchemaError::Unsupported {
                dialect: self.dialect,
                operation: "strict table",
                reason: "STRICT tables only accept INTEGER, REAL, TEXT, BLOB or ANY columns",
            });
        }
        Ok(())
    }

    /// Primary columns that need a table-level `PRIMARY KEY (...)`.
    fn table_primary(&self, columns: &[&Column]) -> Vec<String> {
        columns
            .iter()
            .filter(|c| c.is_primary() && !self.dialect.inline_primary(c.is_auto_increment()))
            .map(|c| c.name().to_string())
            .collect()
    }

    fn options_sql(&self) -> String {
        let opts = &self.options;
        match self.dialect {
            Dialect::MySql => {
                let mut out = String::new();
                if let Some(ref engine) = opts.engine {
                    out.push_str(&format!(" ENGINE={engine}"));
                }
                if let Some(ref charset) = opts.charset {
                    out.push_str(&format!(" DEFAULT CHARSET={charset}"));
                }
                if let Some(ref collation) = opts.collation {
                    out.push_str(&format!(" COLLATE={collation}"));
                }
                out
            }
            Dialect::Sqlite => {
                let mut parts = Vec::new();
                if opts.strict {
                    parts.push("STRICT");
                }
                if opts.without_rowid {
                    parts.push("WITHOUT ROWID");
                }
                if parts.is_empty() {
                    String::new()
                } else {
                    format!(" {}", parts.join(", "))
                }
            }
            Dialect::Postgres => {
                if *opts != TableOptions::default() {
                    debug!(table = %self.name, "Ignoring table options not supported by postgres");
                }
                String::new()
            }
        }
    }

    fn create_statements(&self, table: &str) -> Result<Vec<String>> {
        self.check_auto_increment()?;
        self.check_strict()?;
        let dialect = self.dialect;

        let mut body = Vec::with_capacity(self.columns.len() + 1);
        for column in &self.columns {
            body.push(column.definition(dialect)?);
        }
        let all: Vec<&Column> = self.columns.iter().collect();
        let primary = self.table_primary(&all);
        if !primary.is_empty() {
            body.push(format!("PRIMARY KEY ({})", dialect.quote_list(&primary)));
        }

        let mut after = Vec::new();
        for index in &self.indexes {
            if dialect.inline_foreign_keys() && index.foreign_key().is_some() {
                if let Some(constraint) = index.inline_constraint(dialect, &self.name)? {
                    body.push(constraint);
                }
                let mut plain = Index::new(index.columns().iter().cloned())
                    .named(index.name_for(&self.name));
                if index.is_unique() {
                    plain = plain.unique();
                }
                after.extend(plain.statements(dialect, &self.name)?);
            } else {
                after.extend(index.statements(dialect, &self.name)?);
            }
        }

        let body = body
            .iter()
            .map(|line| format!("    {line}"))
            .collect::<Vec<_>>()
            .join(",\n");
        let guard = if self.guard { "IF NOT EXISTS " } else { "" };
        let options = self.options_sql();
        let create = dialect.template(Op::CreateTable)?.fill(&[
            ("guard", guard),
            ("table", table),
            ("body", body.as_str()),
            ("options", options.as_str()),
        ]);

        let mut statements = vec![create];
        statements.extend(after);
        Ok(statements)
    }

    fn column_clause(&self, column: &Column) -> Result<String> {
        let dialect = self.dialect;
        let op = match column.mode() {
            ColumnMode::Create => Op::AddColumn,
            ColumnMode::Alter => Op::AlterColumn,
            ColumnMode::Drop => Op::DropColumn,
            ColumnMode::Rename(_) => Op::RenameColumn,
        };
        let template = dialect.template(op)?;
        let rendered = column.render(dialect)?;
        let mut clause = template.fill(&[("column", rendered.as_str())]);
        for action in column.alter_actions(dialect) {
            clause.push_str(",\n    ");
            clause.push_str(&template.fill(&[("column", action.as_str())]));
        }
        Ok(clause)
    }

    fn alter_statements(&self, table: &str) -> Result<Vec<String>> {
        let dialect = self.dialect;
        let alter = dialect.template(Op::AlterTable)?;
        let added: Vec<&Column> = self
            .columns
            .iter()
            .filter(|c| *c.mode() == ColumnMode::Create)
            .collect();
        let primary = self.table_primary(&added);
        let primary_clause = if primary.is_empty() {
            None
        } else {
            let columns = dialect.quote_list(&primary);
            Some(
                dialect
                    .template(Op::AddPrimaryKey)?
                    .fill(&[("columns", columns.as_str())]),
            )
        };

        let mut statements = Vec::new();
        if dialect == Dialect::Sqlite {
            if added.iter().any(|c| c.is_primary()) {
                dialect.template(Op::AddPrimaryKey)?;
            }
            for column in &self.columns {
                let clause = self.column_clause(column)?;
                statements.push(alter.fill(&[("table", table), ("clauses", clause.as_str())]));
            }
        } else {
            let mut clauses = Vec::new();
            for column in &self.columns {
                let clause = self.column_clause(column)?;
                // postgres cannot combine RENAME COLUMN with other actions
                if dialect == Dialect::Postgres && matches!(column.mode(), ColumnMode::Rename(_)) {
                    let clause = format!("    {clause}");
                    statements.push(alter.fill(&[("table", table), ("clauses", clause.as_str())]));
                } else {
                    clauses.push(format!("    {clause}"));
                }
            }
            if let Some(clause) = primary_clause {
                clauses.push(format!("    {clause}"));
            }
            if !clauses.is_empty() {
                let clauses = clauses.join(",\n");
                statements.insert(
                    0,
                    alter.fill(&[("table", table), ("clauses", clauses.as_str())]),
                );
            }
        }

        for index in &self.indexes {
            statements.extend(index.statements(dialect, &self.name)?);
        }
        Ok(statements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{big_int, integer, varchar};

    #[test]
    fn test_no_mode() {
        let table = Table::new(Dialect::MySql, "users");
        assert_eq!(table.statements(), Err(SchemaError::NoMode));
    }

    #[test]
    fn test_last_mode_wins() {
        let table = Table::new(Dialect::Postgres, "users").create().drop();
        assert_eq!(table.render().unwrap(), "DROP TABLE \"users\";");
    }

    #[test]
    fn test_structural_call_in_wrong_mode() {
        let err = Table::new(Dialect::MySql, "users")
            .truncate()
            .column(integer("id"))
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::WrongMode {
                table: "users".to_string(),
                mode: "truncate",
                call: "a column",
            }
        );
        assert!(matches!(
            Table::new(Dialect::MySql, "users").index(Index::new(["a"])),
            Err(SchemaError::WrongMode { mode: "unset", .. })
        ));
    }

    #[test]
    fn test_duplicate_column() {
        let err = Table::new(Dialect::Sqlite, "users")
            .create()
            .column(integer("id"))
            .unwrap()
            .column(varchar("id", 10))
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::DuplicateColumn {
                table: "users".to_string(),
                column: "id".to_string(),
            }
        );
    }

    #[test]
    fn test_duplicate_derived_index_name() {
        let err = Table::new(Dialect::MySql, "t")
            .create()
            .index(Index::new(["b", "a"]))
            .unwrap()
            .index(Index::new(["a", "b"]).unique())
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::DuplicateIndex {
                table: "t".to_string(),
                index: "t_a_b_idx".to_string(),
            }
        );
    }

    #[test]
    fn test_mysql_create_with_primary_key() {
        let sql = Table::new(Dialect::MySql, "users")
            .create()
            .engine("InnoDB")
            .strict()
            .column(big_int("id").auto_increment())
            .unwrap()
            .column(varchar("email", 255))
            .unwrap()
            .render()
            .unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE `users` (\n    `id` bigint unsigned not null auto_increment,\n    `email` varchar(255) not null,\n    PRIMARY KEY (`id`)\n) ENGINE=InnoDB;"
        );
    }

    #[test]
    fn test_postgres_create_has_no_table_primary_key() {
        let sql = Table::new(Dialect::Postgres, "users")
            .create()
            .if_not_exists()
            .charset("utf8mb4")
            .column(integer("id").auto_increment())
            .unwrap()
            .render()
            .unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"users\" (\n    \"id\" serial primary key\n);"
        );
    }

    #[test]
    fn test_sqlite_composite_primary_key() {
        let sql = Table::new(Dialect::Sqlite, "memberships")
            .create()
            .without_rowid()
            .column(integer("user_id").primary())
            .unwrap()
            .column(integer("group_id").primary())
            .unwrap()
            .render()
            .unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE \"memberships\" (\n    \"user_id\" integer not null,\n    \"group_id\" integer not null,\n    PRIMARY KEY (\"user_id\", \"group_id\")\n) WITHOUT ROWID;"
        );
    }

    #[test]
    fn test_sqlite_auto_increment_must_be_integer_key() {
        let err = Table::new(Dialect::Sqlite, "t")
            .create()
            .column(varchar("code", 8).auto_increment())
            .unwrap()
            .statements()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidAutoIncrement { .. }));

        let err = Table::new(Dialect::Sqlite, "t")
            .create()
            .column(integer("id").auto_increment())
            .unwrap()
            .column(integer("other").primary())
            .unwrap()
            .statements()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidAutoIncrement { .. }));
    }

    #[test]
    fn test_sqlite_alter_one_statement_per_column() {
        let sql = Table::new(Dialect::Sqlite, "users")
            .alter()
            .column(varchar("nick", 20).nullable())
            .unwrap()
            .column(Column::new("legacy").drop())
            .unwrap()
            .column(Column::new("name").rename("full_name"))
            .unwrap()
            .render()
            .unwrap();
        assert_eq!(
            sql,
            "ALTER TABLE \"users\" ADD COLUMN \"nick\" text null;\nALTER TABLE \"users\" DROP COLUMN \"legacy\";\nALTER TABLE \"users\" RENAME COLUMN \"name\" TO \"full_name\";"
        );
    }

    #[test]
    fn test_sqlite_alter_column_unsupported() {
        let err = Table::new(Dialect::Sqlite, "users")
            .alter()
            .column(integer("age").alter())
            .unwrap()
            .statements()
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::Unsupported {
                dialect: Dialect::Sqlite,
                operation: "alter column",
                ..
            }
        ));
    }

    #[test]
    fn test_mysql_alter_single_statement() {
        let sql = Table::new(Dialect::MySql, "users")
            .alter()
            .column(integer("age").nullable())
            .unwrap()
            .column(varchar("name", 100).alter())
            .unwrap()
            .column(Column::new("legacy").drop())
            .unwrap()
            .render()
            .unwrap();
        assert_eq!(
            sql,
            "ALTER TABLE `users`\n    ADD COLUMN `age` integer null,\n    MODIFY COLUMN `name` varchar(100) not null,\n    DROP COLUMN `legacy`;"
        );
    }

    #[test]
    fn test_postgres_alter() {
        let statements = Table::new(Dialect::Postgres, "users")
            .alter()
            .column(varchar("name", 100).alter().nullable())
            .unwrap()
            .column(Column::new("nick").rename("handle"))
            .unwrap()
            .statements()
            .unwrap();
        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"users\"\n    ALTER COLUMN \"name\" TYPE varchar(100),\n    ALTER COLUMN \"name\" DROP NOT NULL".to_string(),
                "ALTER TABLE \"users\"\n    RENAME COLUMN \"nick\" TO \"handle\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_rename_and_truncate() {
        assert_eq!(
            Table::new(Dialect::MySql, "a").rename("b").render().unwrap(),
            "RENAME TABLE `a` TO `b`;"
        );
        assert_eq!(
            Table::new(Dialect::Sqlite, "a").rename("b").render().unwrap(),
            "ALTER TABLE \"a\" RENAME TO \"b\";"
        );
        assert_eq!(
            Table::new(Dialect::Postgres, "a")
                .rename_if_exists("b")
                .render()
                .unwrap(),
            "ALTER TABLE IF EXISTS \"a\" RENAME TO \"b\";"
        );
        assert!(Table::new(Dialect::MySql, "a")
            .rename_if_exists("b")
            .render()
            .is_err());
        assert_eq!(
            Table::new(Dialect::Sqlite, "a").truncate().render().unwrap(),
            "DELETE FROM \"a\";"
        );
        assert_eq!(
            Table::new(Dialect::Postgres, "a").truncate().render().unwrap(),
            "TRUNCATE TABLE \"a\";"
        );
    }

    #[test]
    fn test_drop_if_exists() {
        assert_eq!(
            Table::new(Dialect::MySql, "a").drop_if_exists().render().unwrap(),
            "DROP TABLE IF EXISTS `a`;"
        );
    }

    #[test]
    fn test_helpers_add_nullable_pairs() {
        let table = Table::new(Dialect::Postgres, "posts")
            .create()
            .timestamps()
            .unwrap()
            .soft_delete()
            .unwrap()
            .userstamps()
            .unwrap();
        let names: Vec<&str> = table.columns().iter().map(Column::name).collect();
        assert_eq!(
            names,
            ["created_at", "updated_at", "deleted_at", "created_by", "updated_by"]
        );
        assert!(table
            .columns()
            .iter()
            .all(|c| c.nullability() == crate::column::Nullability::Nullable));
    }
}
