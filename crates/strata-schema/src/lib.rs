//! # strata-schema
//!
//! Describe table, column and index changes once and render them as DDL for
//! MySQL, PostgreSQL or SQLite.
//!
//! Rendering is pure: no connection is needed and nothing is executed. Every
//! dialect difference is answered by [`Dialect`], which either returns a
//! statement template or reports that the engine cannot express the
//! operation, in which case rendering fails with
//! [`SchemaError::Unsupported`] instead of emitting invalid SQL.
//!
//! ## Example
//!
//! ```rust
//! use strata_schema::{Dialect, Index, Table, big_int, varchar};
//!
//! let users = Table::new(Dialect::Sqlite, "users")
//!     .create()
//!     .column(big_int("id").auto_increment())?
//!     .column(varchar("email", 255))?
//!     .index(Index::new(["email"]).unique())?;
//!
//! assert_eq!(
//!     users.render()?,
//!     "CREATE TABLE \"users\" (\n    \"id\" integer not null primary key autoincrement,\n    \"email\" text not null\n);\nCREATE UNIQUE INDEX \"users_email_idx\" ON \"users\" (\"email\");"
//! );
//! # Ok::<(), strata_schema::SchemaError>(())
//! ```

pub mod column;
pub mod dialect;
pub mod error;
pub mod index;
pub mod table;

pub use column::{
    Column, ColumnMode, DefaultValue, Nullability, Size, big_int, binary, blob, boolean, char,
    date, datetime, decimal, double, float, integer, json, jsonb, medium_int, numeric, small_int,
    string, text, time, timestamp, timestamp_tz, tiny_int, varchar,
};
pub use dialect::{Dialect, Op, Rule, Template, TypeKind};
pub use error::{Result, SchemaError};
pub use index::{ForeignKey, ForeignKeyAction, Index, IndexMode};
pub use table::{Table, TableMode, TableOptions};
