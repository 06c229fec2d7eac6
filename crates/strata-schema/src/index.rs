//! Index and foreign key builder.

use crate::dialect::{Dialect, Op};
use crate::error::{Result, SchemaError};

/// Foreign key referential action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignKeyAction {
    /// No action.
    NoAction,
    /// Restrict deletion/update.
    Restrict,
    /// Cascade the operation.
    Cascade,
    /// Set to NULL.
    SetNull,
    /// Set to default value.
    SetDefault,
}

impl ForeignKeyAction {
    /// Returns the SQL representation of the action.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

/// The referenced side of a foreign key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForeignKey {
    table: Option<String>,
    columns: Vec<String>,
    on_delete: Option<ForeignKeyAction>,
    on_update: Option<ForeignKeyAction>,
}

impl ForeignKey {
    /// Returns the referenced table, if set.
    #[must_use]
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// Returns the referenced columns.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn actions(&self) -> String {
        let mut out = String::new();
        if let Some(action) = self.on_delete {
            out.push_str(" ON DELETE ");
            out.push_str(action.as_sql());
        }
        if let Some(action) = self.on_update {
            out.push_str(" ON UPDATE ");
            out.push_str(action.as_sql());
        }
        out
    }
}

/// What an index takes part in when its table is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexMode {
    /// Create the index (and its foreign key).
    Create,
    /// Drop the index (and its foreign key).
    Drop,
    /// Rename the index to the given name.
    Rename(String),
}

/// An index over one or more columns, optionally backing a foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    columns: Vec<String>,
    name: Option<String>,
    unique: bool,
    mode: IndexMode,
    foreign: Option<ForeignKey>,
}

impl Index {
    /// Creates a plain index over `columns`, in the given order.
    #[must_use]
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            name: None,
            unique: false,
            mode: IndexMode::Create,
            foreign: None,
        }
    }

    /// Creates an index over `columns` that backs a foreign key.
    /// Call [`Index::references`] before rendering.
    #[must_use]
    pub fn foreign<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index = Self::new(columns);
        index.foreign = Some(ForeignKey::default());
        index
    }

    /// Sets an explicit name instead of the derived one.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Makes the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Renders the index as a removal.
    #[must_use]
    pub fn drop(mut self) -> Self {
        self.mode = IndexMode::Drop;
        self
    }

    /// Renders the index as a rename to `to`.
    #[must_use]
    pub fn rename(mut self, to: impl Into<String>) -> Self {
        self.mode = IndexMode::Rename(to.into());
        self
    }

    /// Sets the referenced table and columns, turning the index into a
    /// foreign key if it was not one already.
    #[must_use]
    pub fn references<I, S>(mut self, table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fk = self.foreign.get_or_insert_with(ForeignKey::default);
        fk.table = Some(table.into());
        fk.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the `ON DELETE` action.
    #[must_use]
    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.foreign.get_or_insert_with(ForeignKey::default).on_delete = Some(action);
        self
    }

    /// Sets the `ON UPDATE` action.
    #[must_use]
    pub fn on_update(mut self, action: ForeignKeyAction) -> Self {
        self.foreign.get_or_insert_with(ForeignKey::default).on_update = Some(action);
        self
    }

    /// Returns the indexed columns in caller order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the render mode.
    #[must_use]
    pub const fn mode(&self) -> &IndexMode {
        &self.mode
    }

    /// Returns whether the index is unique.
    #[must_use]
    pub const fn is_unique(&self) -> bool {
        self.unique
    }

    /// Returns the foreign key descriptor, if this index backs one.
    #[must_use]
    pub const fn foreign_key(&self) -> Option<&ForeignKey> {
        self.foreign.as_ref()
    }

    /// Returns the explicit name, or `{table}_{sorted columns}_idx`.
    ///
    /// The derived name does not depend on the order columns were given in.
    #[must_use]
    pub fn name_for(&self, table: &str) -> String {
        if let Some(ref name) = self.name {
            return name.clone();
        }
        let mut sorted: Vec<&str> = self.columns.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        format!("{table}_{}_idx", sorted.join("_"))
    }

    /// Renders every statement for this index on `table`, without trailing
    /// semicolons.
    pub fn statements(&self, dialect: Dialect, table: &str) -> Result<Vec<String>> {
        let name = dialect.quote(&self.name_for(table));
        let quoted_table = dialect.quote(table);
        let columns = dialect.quote_list(&self.columns);
        let unique = if self.unique { "UNIQUE " } else { "" };
        let base = [
            ("name", name.as_str()),
            ("table", quoted_table.as_str()),
            ("columns", columns.as_str()),
            ("unique", unique),
        ];

        match (&self.mode, &self.foreign) {
            (IndexMode::Create, None) => {
                Ok(vec![dialect.template(Op::CreateIndex)?.fill(&base)])
            }
            (IndexMode::Create, Some(fk)) => {
                let create = dialect.template(Op::CreateIndex)?.fill(&base);
                let add = self.foreign_clause(dialect, table, fk, Op::AddForeignKey)?;
                Ok(vec![create, add])
            }
            (IndexMode::Drop, None) => Ok(vec![dialect.template(Op::DropIndex)?.fill(&base)]),
            (IndexMode::Drop, Some(_)) => {
                let drop_fk = dialect.template(Op::DropForeignKey)?.fill(&base);
                let drop_index = dialect.template(Op::DropIndex)?.fill(&base);
                Ok(vec![drop_fk, drop_index])
            }
            (IndexMode::Rename(to), None) => {
                let to = dialect.quote(to);
                let mut vars = base.to_vec();
                vars.push(("to", to.as_str()));
                Ok(dialect.template(Op::RenameIndex)?.statements(&vars))
            }
            (IndexMode::Rename(_), Some(_)) => {
                dialect.template(Op::RenameForeignKey).map(|_| Vec::new())
            }
        }
    }

    /// Renders the index as `;`-terminated statements joined by a space.
    pub fn render(&self, dialect: Dialect, table: &str) -> Result<String> {
        Ok(self
            .statements(dialect, table)?
            .iter()
            .map(|s| format!("{s};"))
            .collect::<Vec<_>>()
            .join(" "))
    }

    /// Renders the foreign key as a constraint inside `CREATE TABLE`.
    /// Returns `None` for plain indexes.
    pub fn inline_constraint(&self, dialect: Dialect, table: &str) -> Result<Option<String>> {
        match self.foreign {
            Some(ref fk) => self
                .foreign_clause(dialect, table, fk, Op::InlineForeignKey)
                .map(Some),
            None => Ok(None),
        }
    }

    fn foreign_clause(
        &self,
        dialect: Dialect,
        table: &str,
        fk: &ForeignKey,
        op: Op,
    ) -> Result<String> {
        let name = self.name_for(table);
        let references = fk
            .table
            .as_deref()
            .ok_or_else(|| SchemaError::MissingReference(name.clone()))?;
        let name = dialect.quote(&name);
        let quoted_table = dialect.quote(table);
        let columns = dialect.quote_list(&self.columns);
        let references = dialect.quote(references);
        let referenced = dialect.quote_list(&fk.columns);
        let actions = fk.actions();
        Ok(dialect.template(op)?.fill(&[
            ("name", name.as_str()),
            ("table", quoted_table.as_str()),
            ("columns", columns.as_str()),
            ("references", references.as_str()),
            ("referenced", referenced.as_str()),
            ("actions", actions.as_str()),
        ]))
    }
}
