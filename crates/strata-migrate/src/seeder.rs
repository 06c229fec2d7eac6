//! The seed engine.

use tracing::info;

use crate::connection::Connection;
use crate::error::{MigrateError, Result};
use crate::files::Files;
use crate::unit::{self, UnitLoader};

/// Creates, lists and runs seed files against one connection.
#[derive(Debug)]
pub struct Seeder<F, L> {
    db: Connection,
    files: F,
    loader: L,
}

impl<F: Files, L: UnitLoader> Seeder<F, L> {
    /// Creates a seeder.
    pub const fn new(db: Connection, files: F, loader: L) -> Self {
        Self { db, files, loader }
    }

    /// Returns the connection.
    pub fn connection(&mut self) -> &mut Connection {
        &mut self.db
    }

    /// Returns the file store.
    #[must_use]
    pub const fn files(&self) -> &F {
        &self.files
    }

    /// Consumes the seeder, returning its connection.
    pub fn into_connection(self) -> Connection {
        self.db
    }

    /// Writes a new seed file from the template, returning its name.
    pub fn create(&self, name: &str) -> Result<String> {
        let name = unit::unit_name(name)?;
        let filename = unit::seed_filename(&name);
        if self.files.exists(&filename) {
            return Err(MigrateError::SeedExists(self.files.path(&filename)));
        }
        self.files.write(&filename, &unit::seed_template(&name))?;
        info!(filename = %filename, "Created seed");
        Ok(filename)
    }

    /// Lists the seed files.
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self.files.list(unit::EXTENSION)?)
    }

    /// Runs one seed file in a transaction.
    ///
    /// `filename` may carry the seed directory as a prefix.
    pub async fn run(&mut self, filename: &str) -> Result<()> {
        let filename = self.relative(filename);
        if !self.files.exists(&filename) {
            return Err(MigrateError::SeedNotFound(self.files.path(&filename)));
        }

        info!(filename = %filename, "Running seed");
        self.db.begin().await?;
        let result = match self.run_unit(&filename).await {
            Ok(()) => self.db.commit().await,
            Err(err) => Err(err),
        };
        if result.is_err() {
            self.db.rollback_all().await;
        }
        result
    }

    async fn run_unit(&mut self, filename: &str) -> Result<()> {
        let source = self.files.read(filename)?;
        let seed = self
            .loader
            .load_seed(&self.files.path(filename), &source)?;
        seed.seed(&mut self.db).await
    }

    fn relative(&self, filename: &str) -> String {
        let root = self.files.root().to_string_lossy();
        filename
            .strip_prefix(root.as_ref())
            .unwrap_or(filename)
            .trim_start_matches('/')
            .to_string()
    }
}
