//! Column definition builder.
//!
//! A [`Column`] is a plain value: every modifier consumes it and returns the
//! updated column, and nothing is rendered until a [`Table`](crate::Table)
//! asks for it. Constraints always render in the fixed order
//! `unsigned, not null, null, default, primary key, auto_increment, comment`
//! no matter in which order they were set.

use std::fmt;

use tracing::debug;

use crate::dialect::{Dialect, Op, TypeKind};
use crate::error::{Result, SchemaError};

/// What a column takes part in when its table is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnMode {
    /// Add the column (create table, or add column on alter).
    Create,
    /// Change the column definition.
    Alter,
    /// Remove the column.
    Drop,
    /// Rename the column to the given name.
    Rename(String),
}

/// Whether the column accepts NULL. The two states exclude each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nullability {
    /// `not null`.
    NotNull,
    /// `null`.
    Nullable,
}

/// A size suffix for sized types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
    /// Length or display width, rendered `(n)`.
    Length(u32),
    /// Precision and scale, rendered `(p,s)`.
    Precision(u32, u32),
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Length(n) => write!(f, "({n})"),
            Self::Precision(p, s) => write!(f, "({p},{s})"),
        }
    }
}

/// Default value for a column.
///
/// Numbers render bare, everything else renders as a double-quoted literal.
/// Embedded quotes are not escaped: literals must already be safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultValue {
    /// Rendered unquoted.
    Numeric(String),
    /// Rendered as `"value"`.
    Literal(String),
}

impl DefaultValue {
    /// Returns the SQL representation of the default value.
    #[must_use]
    pub fn to_sql(&self) -> String {
        match self {
            Self::Numeric(n) => n.clone(),
            Self::Literal(s) => format!("\"{s}\""),
        }
    }
}

fn is_numeric(s: &str) -> bool {
    let s = s.trim();
    s.bytes().any(|b| b.is_ascii_digit()) && s.parse::<f64>().is_ok_and(f64::is_finite)
}

impl From<&str> for DefaultValue {
    fn from(value: &str) -> Self {
        if is_numeric(value) {
            Self::Numeric(value.trim().to_string())
        } else {
            Self::Literal(value.to_string())
        }
    }
}

impl From<String> for DefaultValue {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<bool> for DefaultValue {
    fn from(value: bool) -> Self {
        Self::Numeric(if value { "1" } else { "0" }.to_string())
    }
}

impl From<f64> for DefaultValue {
    fn from(value: f64) -> Self {
        if value.is_finite() {
            Self::Numeric(value.to_string())
        } else {
            Self::Literal(value.to_string())
        }
    }
}

macro_rules! impl_integer_default {
    ($($t:ty),*) => {
        $(
            impl From<$t> for DefaultValue {
                fn from(value: $t) -> Self {
                    Self::Numeric(value.to_string())
                }
            }
        )*
    };
}

impl_integer_default!(i8, i16, i32, i64, u8, u16, u32, u64);

/// A single column change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    kind: Option<TypeKind>,
    size: Option<Size>,
    mode: ColumnMode,
    unsigned: bool,
    nullability: Nullability,
    default: Option<DefaultValue>,
    primary: bool,
    auto_increment: bool,
    comment: Option<String>,
    use_current: bool,
}

impl Column {
    /// Creates an untyped `not null` column in create mode.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            size: None,
            mode: ColumnMode::Create,
            unsigned: false,
            nullability: Nullability::NotNull,
            default: None,
            primary: false,
            auto_increment: false,
            comment: None,
            use_current: false,
        }
    }

    /// Returns the column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the logical type, if one was set.
    #[must_use]
    pub const fn kind(&self) -> Option<TypeKind> {
        self.kind
    }

    /// Returns the render mode.
    #[must_use]
    pub const fn mode(&self) -> &ColumnMode {
        &self.mode
    }

    /// Returns the nullability.
    #[must_use]
    pub const fn nullability(&self) -> Nullability {
        self.nullability
    }

    /// Returns whether the column is (part of) the primary key.
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.primary
    }

    /// Returns whether the column auto-increments.
    #[must_use]
    pub const fn is_auto_increment(&self) -> bool {
        self.auto_increment
    }

    // modes

    /// Renders the column as a definition change.
    #[must_use]
    pub fn alter(mut self) -> Self {
        self.mode = ColumnMode::Alter;
        self
    }

    /// Alias for [`Column::alter`].
    #[must_use]
    pub fn change(self) -> Self {
        self.alter()
    }

    /// Renders the column as a removal.
    #[must_use]
    pub fn drop(mut self) -> Self {
        self.mode = ColumnMode::Drop;
        self
    }

    /// Renders the column as a rename to `to`.
    #[must_use]
    pub fn rename(mut self, to: impl Into<String>) -> Self {
        self.mode = ColumnMode::Rename(to.into());
        self
    }

    // types

    fn typed(mut self, kind: TypeKind, size: Option<Size>) -> Self {
        self.kind = Some(kind);
        self.size = size;
        self
    }

    /// Binary data.
    #[must_use]
    pub fn binary(self) -> Self {
        self.typed(TypeKind::Binary, None)
    }

    /// Binary large object.
    #[must_use]
    pub fn blob(self) -> Self {
        self.typed(TypeKind::Blob, None)
    }

    /// Boolean.
    #[must_use]
    pub fn boolean(self) -> Self {
        self.typed(TypeKind::Boolean, None)
    }

    /// Fixed-length string of `len` characters.
    #[must_use]
    pub fn char(self, len: u32) -> Self {
        self.typed(TypeKind::Char, Some(Size::Length(len)))
    }

    /// Variable-length string of at most `len` characters.
    #[must_use]
    pub fn varchar(self, len: u32) -> Self {
        self.typed(TypeKind::Varchar, Some(Size::Length(len)))
    }

    /// Alias for [`Column::varchar`].
    #[must_use]
    pub fn string(self, len: u32) -> Self {
        self.varchar(len)
    }

    /// Text; combine with [`Column::length`] for a sized text column.
    #[must_use]
    pub fn text(self) -> Self {
        self.typed(TypeKind::Text, None)
    }

    /// Date.
    #[must_use]
    pub fn date(self) -> Self {
        self.typed(TypeKind::Date, None)
    }

    /// Date and time.
    #[must_use]
    pub fn datetime(self) -> Self {
        self.typed(TypeKind::DateTime, None)
    }

    /// Time of day.
    #[must_use]
    pub fn time(self) -> Self {
        self.typed(TypeKind::Time, None)
    }

    /// Timestamp.
    #[must_use]
    pub fn timestamp(self) -> Self {
        self.typed(TypeKind::Timestamp, None)
    }

    /// Timestamp with time zone.
    #[must_use]
    pub fn timestamp_tz(self) -> Self {
        self.typed(TypeKind::TimestampTz, None)
    }

    /// 8-bit integer.
    #[must_use]
    pub fn tiny_int(self) -> Self {
        self.typed(TypeKind::TinyInt, None)
    }

    /// 16-bit integer.
    #[must_use]
    pub fn small_int(self) -> Self {
        self.typed(TypeKind::SmallInt, None)
    }

    /// 24-bit integer.
    #[must_use]
    pub fn medium_int(self) -> Self {
        self.typed(TypeKind::MediumInt, None)
    }

    /// 64-bit integer.
    #[must_use]
    pub fn big_int(self) -> Self {
        self.typed(TypeKind::BigInt, None)
    }

    /// 32-bit integer.
    #[must_use]
    pub fn integer(self) -> Self {
        self.typed(TypeKind::Integer, None)
    }

    /// Double precision float.
    #[must_use]
    pub fn double(self) -> Self {
        self.typed(TypeKind::Double, None)
    }

    /// Single precision float.
    #[must_use]
    pub fn float(self) -> Self {
        self.typed(TypeKind::Float, None)
    }

    /// Exact decimal.
    #[must_use]
    pub fn decimal(self) -> Self {
        self.typed(TypeKind::Decimal, None)
    }

    /// Exact numeric.
    #[must_use]
    pub fn numeric(self) -> Self {
        self.typed(TypeKind::Numeric, None)
    }

    /// JSON document.
    #[must_use]
    pub fn json(self) -> Self {
        self.typed(TypeKind::Json, None)
    }

    /// Binary JSON document (PostgreSQL; `json` elsewhere).
    #[must_use]
    pub fn jsonb(self) -> Self {
        self.typed(TypeKind::Jsonb, None)
    }

    /// Sets a length or integer display width.
    #[must_use]
    pub fn length(mut self, len: u32) -> Self {
        self.size = Some(Size::Length(len));
        self
    }

    /// Sets precision and scale for floating and exact numeric types.
    #[must_use]
    pub fn precision(mut self, precision: u32, scale: u32) -> Self {
        self.size = Some(Size::Precision(precision, scale));
        self
    }

    // constraints

    /// Marks a numeric column unsigned (MySQL only).
    #[must_use]
    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    /// Rejects NULL values, clearing `nullable`.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullability = Nullability::NotNull;
        self
    }

    /// Accepts NULL values, clearing `not null`.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullability = Nullability::Nullable;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default(mut self, value: impl Into<DefaultValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Marks the column as (part of) the primary key.
    #[must_use]
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.nullability = Nullability::NotNull;
        self
    }

    /// Makes the column an auto-incrementing primary key.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self.primary().not_null()
    }

    /// Sets the column comment (MySQL only).
    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Defaults the column to the current time unless an explicit default is set.
    #[must_use]
    pub fn use_current(mut self) -> Self {
        self.use_current = true;
        self
    }

    // rendering

    /// Renders this column's DDL fragment.
    ///
    /// - create: `"name" type(size) constraints`
    /// - drop: `"name"`
    /// - rename: `"old" TO "new"`
    /// - alter: the full definition on MySQL, the `TYPE` clause on
    ///   PostgreSQL (see [`Column::alter_actions`]), an error on SQLite.
    pub fn render(&self, dialect: Dialect) -> Result<String> {
        match &self.mode {
            ColumnMode::Drop => Ok(dialect.quote(&self.name)),
            ColumnMode::Rename(to) => Ok(format!(
                "{} TO {}",
                dialect.quote(&self.name),
                dialect.quote(to)
            )),
            ColumnMode::Create => self.definition(dialect),
            ColumnMode::Alter => {
                dialect.template(Op::AlterColumn)?;
                match dialect {
                    // serial is a create-time pseudo type; the column keeps its sequence
                    Dialect::Postgres => Ok(format!(
                        "{} TYPE {}",
                        dialect.quote(&self.name),
                        self.base_type_sql(dialect)?
                    )),
                    Dialect::MySql | Dialect::Sqlite => self.definition(dialect),
                }
            }
        }
    }

    /// Returns the PostgreSQL constraint actions that accompany an altered
    /// column's `TYPE` clause, one per statement. Empty for every other
    /// dialect and mode.
    #[must_use]
    pub fn alter_actions(&self, dialect: Dialect) -> Vec<String> {
        if dialect != Dialect::Postgres || self.mode != ColumnMode::Alter {
            return Vec::new();
        }
        let name = dialect.quote(&self.name);
        let mut actions = vec![match self.nullability {
            Nullability::NotNull => format!("{name} SET NOT NULL"),
            Nullability::Nullable => format!("{name} DROP NOT NULL"),
        }];
        if let Some(default) = self.default_sql(dialect) {
            actions.push(format!("{name} SET DEFAULT {default}"));
        }
        actions
    }

    /// Renders the full `"name" type constraints` definition regardless of mode.
    pub fn definition(&self, dialect: Dialect) -> Result<String> {
        let mut parts = vec![dialect.quote(&self.name), self.type_sql(dialect)?];
        parts.extend(self.constraints(dialect));
        Ok(parts.join(" "))
    }

    fn type_sql(&self, dialect: Dialect) -> Result<String> {
        let kind = self
            .kind
            .ok_or_else(|| SchemaError::MissingType(self.name.clone()))?;
        if let Some(serial) = dialect.serial_type(kind).filter(|_| self.auto_increment) {
            return Ok(serial.to_string());
        }
        self.base_type_sql(dialect)
    }

    fn base_type_sql(&self, dialect: Dialect) -> Result<String> {
        let kind = self
            .kind
            .ok_or_else(|| SchemaError::MissingType(self.name.clone()))?;
        let base = dialect.type_name(kind);
        Ok(match self.size {
            Some(size) if dialect.supports_size(kind) => format!("{base}{size}"),
            _ => base.to_string(),
        })
    }

    fn default_sql(&self, dialect: Dialect) -> Option<String> {
        match (&self.default, self.kind) {
            (Some(value), _) => Some(value.to_sql()),
            (None, Some(kind)) if self.use_current => {
                Some(dialect.current_timestamp(kind).to_string())
            }
            _ => None,
        }
    }

    fn constraints(&self, dialect: Dialect) -> Vec<String> {
        let serial = self.auto_increment
            && self
                .kind
                .is_some_and(|kind| dialect.serial_type(kind).is_some());
        let mut out = Vec::new();

        if dialect == Dialect::MySql && (self.unsigned || self.auto_increment) {
            out.push("unsigned".to_string());
        }
        match self.nullability {
            Nullability::NotNull if !serial => out.push("not null".to_string()),
            Nullability::NotNull => {}
            Nullability::Nullable => out.push("null".to_string()),
        }
        if let Some(default) = self.default_sql(dialect) {
            out.push(format!("default {default}"));
        }
        if self.primary && dialect.inline_primary(self.auto_increment) {
            out.push("primary key".to_string());
        }
        if let Some(keyword) = dialect
            .auto_increment_keyword()
            .filter(|_| self.auto_increment)
        {
            out.push(keyword.to_string());
        }
        if let Some(ref comment) = self.comment {
            if dialect.supports_column_comment() {
                out.push(format!("comment \"{comment}\""));
            } else {
                debug!(column = %self.name, %dialect, "Dropping column comment, not supported inline");
            }
        }
        out
    }
}

// =============================================================================
// Shorthand Functions
// =============================================================================

/// Creates a binary column.
#[must_use]
pub fn binary(name: impl Into<String>) -> Column {
    Column::new(name).binary()
}

/// Creates a blob column.
#[must_use]
pub fn blob(name: impl Into<String>) -> Column {
    Column::new(name).blob()
}

/// Creates a boolean column.
#[must_use]
pub fn boolean(name: impl Into<String>) -> Column {
    Column::new(name).boolean()
}

/// Creates a char column.
#[must_use]
pub fn char(name: impl Into<String>, len: u32) -> Column {
    Column::new(name).char(len)
}

/// Creates a varchar column.
#[must_use]
pub fn varchar(name: impl Into<String>, len: u32) -> Column {
    Column::new(name).varchar(len)
}

/// Creates a varchar column.
#[must_use]
pub fn string(name: impl Into<String>, len: u32) -> Column {
    Column::new(name).string(len)
}

/// Creates a text column.
#[must_use]
pub fn text(name: impl Into<String>) -> Column {
    Column::new(name).text()
}

/// Creates a date column.
#[must_use]
pub fn date(name: impl Into<String>) -> Column {
    Column::new(name).date()
}

/// Creates a datetime column.
#[must_use]
pub fn datetime(name: impl Into<String>) -> Column {
    Column::new(name).datetime()
}

/// Creates a time column.
#[must_use]
pub fn time(name: impl Into<String>) -> Column {
    Column::new(name).time()
}

/// Creates a timestamp column.
#[must_use]
pub fn timestamp(name: impl Into<String>) -> Column {
    Column::new(name).timestamp()
}

/// Creates a timestamp with time zone column.
#[must_use]
pub fn timestamp_tz(name: impl Into<String>) -> Column {
    Column::new(name).timestamp_tz()
}

/// Creates a tiny integer column.
#[must_use]
pub fn tiny_int(name: impl Into<String>) -> Column {
    Column::new(name).tiny_int()
}

/// Creates a small integer column.
#[must_use]
pub fn small_int(name: impl Into<String>) -> Column {
    Column::new(name).small_int()
}

/// Creates a medium integer column.
#[must_use]
pub fn medium_int(name: impl Into<String>) -> Column {
    Column::new(name).medium_int()
}

/// Creates a big integer column.
#[must_use]
pub fn big_int(name: impl Into<String>) -> Column {
    Column::new(name).big_int()
}

/// Creates an integer column.
#[must_use]
pub fn integer(name: impl Into<String>) -> Column {
    Column::new(name).integer()
}

/// Creates a double column.
#[must_use]
pub fn double(name: impl Into<String>) -> Column {
    Column::new(name).double()
}

/// Creates a float column.
#[must_use]
pub fn float(name: impl Into<String>) -> Column {
    Column::new(name).float()
}

/// Creates a decimal column with precision and scale.
#[must_use]
pub fn decimal(name: impl Into<String>, precision: u32, scale: u32) -> Column {
    Column::new(name).decimal().precision(precision, scale)
}

/// Creates a numeric column with precision and scale.
#[must_use]
pub fn numeric(name: impl Into<String>, precision: u32, scale: u32) -> Column {
    Column::new(name).numeric().precision(precision, scale)
}

/// Creates a json column.
#[must_use]
pub fn json(name: impl Into<String>) -> Column {
    Column::new(name).json()
}

/// Creates a jsonb column.
#[must_use]
pub fn jsonb(name: impl Into<String>) -> Column {
    Column::new(name).jsonb()
}
