//! Transactional migrations and seeds for MySQL, PostgreSQL and SQLite.
//!
//! `strata-migrate` runs migration and seed files against a database and
//! records applied migrations in a history table:
//! - Pending migrations are applied together as one batch, in one
//!   transaction, under a shared sequence number
//! - Only the most recent batch is reverted by `undo`
//! - Seeds run once per invocation, each in its own transaction
//!
//! Schema changes inside units are described with [`strata_schema`] and
//! executed with [`Connection::run`], or written as plain SQL.
//!
//! # Example
//!
//! ```rust,no_run
//! use strata_migrate::prelude::*;
//!
//! # async fn example() -> strata_migrate::Result<()> {
//! let db = Connection::new("default", ConnectionConfig::sqlite("app.sqlite")?);
//! let mut migrator = Migrator::new(db, LocalFiles::new("resources/migrations"), SqlUnitLoader);
//!
//! migrator.init().await?;
//! for filename in migrator.apply().await? {
//!     println!("applied {filename}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Create the history table
//! strata migrations init
//!
//! # Write a new migration file
//! strata migrations create "create users table"
//!
//! # Apply pending migrations
//! strata migrations do
//!
//! # Revert the most recent batch
//! strata migrations undo
//!
//! # Run a seed file
//! strata seeds run usersSeed.sql
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod files;
pub mod history;
pub mod migrator;
pub mod seeder;
pub mod unit;

pub use connection::Connection;
pub use error::{MigrateError, Result};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{ClientCommand, ConnectionConfig, Settings};
    pub use crate::connection::{Connection, ConnectionRegistry, Param};
    pub use crate::error::{MigrateError, Result};
    pub use crate::files::{Files, LocalFiles};
    pub use crate::history::{MigrationHistory, MigrationRecord};
    pub use crate::migrator::Migrator;
    pub use crate::seeder::Seeder;
    pub use crate::unit::{
        MigrationUnit, SeedUnit, SqlMigration, SqlSeed, SqlUnitLoader, UnitLoader, UnitRegistry,
    };
    pub use strata_schema::{Dialect, Index, Table};
}
