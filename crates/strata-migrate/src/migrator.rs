//! The migration engine.
//!
//! Pending migrations are the unit files on disk that the history table does
//! not mention. [`Migrator::apply`] runs all of them in one transaction under
//! a shared sequence number, and [`Migrator::revert`] undoes the batch with
//! the highest sequence. A failure anywhere in a batch rolls the whole batch
//! back, so a batch is either recorded completely or not at all.

use std::collections::HashSet;

use chrono::Utc;
use tracing::info;

use crate::config::DEFAULT_MIGRATIONS_TABLE;
use crate::connection::Connection;
use crate::error::{MigrateError, Result};
use crate::files::Files;
use crate::history::{MigrationHistory, MigrationRecord};
use crate::unit::{self, UnitLoader};

/// Applies and reverts migration files against one connection.
#[derive(Debug)]
pub struct Migrator<F, L> {
    db: Connection,
    files: F,
    loader: L,
    history: MigrationHistory,
}

impl<F: Files, L: UnitLoader> Migrator<F, L> {
    /// Creates a migrator using the default history table.
    pub fn new(db: Connection, files: F, loader: L) -> Self {
        Self {
            db,
            files,
            loader,
            history: MigrationHistory::new(DEFAULT_MIGRATIONS_TABLE),
        }
    }

    /// Uses `table` as the history table.
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.history = MigrationHistory::new(table);
        self
    }

    /// Returns the connection.
    pub fn connection(&mut self) -> &mut Connection {
        &mut self.db
    }

    /// Returns the history table manager.
    #[must_use]
    pub const fn history_table(&self) -> &MigrationHistory {
        &self.history
    }

    /// Returns the file store.
    #[must_use]
    pub const fn files(&self) -> &F {
        &self.files
    }

    /// Consumes the migrator, returning its connection.
    pub fn into_connection(self) -> Connection {
        self.db
    }

    async fn require_history(&mut self) -> Result<()> {
        if self.history.exists(&mut self.db).await? {
            Ok(())
        } else {
            Err(MigrateError::HistoryMissing(self.history.table().to_string()))
        }
    }

    /// Creates the history table, returning `false` when it already existed.
    pub async fn init(&mut self) -> Result<bool> {
        if self.history.exists(&mut self.db).await? {
            info!(table = %self.history.table(), "History table already exists");
            return Ok(false);
        }
        self.history.create(&mut self.db).await?;
        info!(table = %self.history.table(), "History table created");
        Ok(true)
    }

    /// Writes a new migration file from the template, returning its name.
    pub async fn create(&mut self, name: &str) -> Result<String> {
        self.require_history().await?;
        let name = unit::unit_name(name)?;
        let mut timestamp = Utc::now().timestamp();
        let mut filename = unit::migration_filename(timestamp, &name);
        while self.files.exists(&filename) {
            timestamp += 1;
            filename = unit::migration_filename(timestamp, &name);
        }
        self.files
            .write(&filename, &unit::migration_template(&name))?;
        info!(filename = %filename, "Created migration");
        Ok(filename)
    }

    /// Returns the migration files not yet applied, in apply order.
    pub async fn pending(&mut self) -> Result<Vec<String>> {
        self.require_history().await?;
        let applied: HashSet<String> = self
            .history
            .filenames(&mut self.db)
            .await?
            .into_iter()
            .collect();
        let mut pending: Vec<String> = self
            .files
            .list(unit::EXTENSION)?
            .into_iter()
            .filter(|filename| !applied.contains(filename))
            .collect();
        pending.sort();
        pending.dedup();
        Ok(pending)
    }

    /// Returns the applied migration files, oldest first.
    pub async fn applied(&mut self) -> Result<Vec<String>> {
        self.require_history().await?;
        self.history.filenames(&mut self.db).await
    }

    /// Returns the full history, oldest first.
    pub async fn history(&mut self) -> Result<Vec<MigrationRecord>> {
        self.require_history().await?;
        self.history.records(&mut self.db).await
    }

    /// Applies every pending migration as one batch, returning the files in
    /// the order they were applied.
    pub async fn apply(&mut self) -> Result<Vec<String>> {
        let pending = self.pending().await?;
        if pending.is_empty() {
            info!("No migrations to apply");
            return Ok(pending);
        }
        let sequence = self
            .history
            .max_sequence(&mut self.db)
            .await?
            .map_or(1, |max| max + 1);

        self.db.begin().await?;
        let result = match self.apply_batch(&pending, sequence).await {
            Ok(()) => self.db.commit().await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            self.db.rollback_all().await;
            return Err(err);
        }
        info!(sequence, count = pending.len(), "Migrations applied");
        Ok(pending)
    }

    async fn apply_batch(&mut self, pending: &[String], sequence: i64) -> Result<()> {
        for filename in pending {
            info!(filename = %filename, sequence, "Applying migration");
            let source = self.files.read(filename)?;
            let migration = self
                .loader
                .load_migration(&self.files.path(filename), &source)?;
            migration.up(&mut self.db).await?;
            self.history.insert(&mut self.db, filename, sequence).await?;
        }
        Ok(())
    }

    /// Reverts the most recent batch, returning the files in the order they
    /// were reverted. Does nothing when no migration has been applied.
    pub async fn revert(&mut self) -> Result<Vec<String>> {
        self.require_history().await?;
        let Some(sequence) = self.history.max_sequence(&mut self.db).await? else {
            info!("No migrations to revert");
            return Ok(Vec::new());
        };
        let batch = self.history.in_sequence(&mut self.db, sequence).await?;

        self.db.begin().await?;
        let result = match self.revert_batch(&batch).await {
            Ok(()) => self.db.commit().await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            self.db.rollback_all().await;
            return Err(err);
        }
        info!(sequence, count = batch.len(), "Migrations reverted");
        Ok(batch)
    }

    async fn revert_batch(&mut self, batch: &[String]) -> Result<()> {
        for filename in batch {
            info!(filename = %filename, "Reverting migration");
            let source = self.files.read(filename)?;
            let migration = self
                .loader
                .load_migration(&self.files.path(filename), &source)?;
            migration.down(&mut self.db).await?;
            self.history.delete(&mut self.db, filename).await?;
        }
        Ok(())
    }

    /// Drops the history table. Refuses while any migration is recorded.
    pub async fn drop_history(&mut self) -> Result<()> {
        self.require_history().await?;
        if self.history.count(&mut self.db).await? > 0 {
            return Err(MigrateError::HistoryNotEmpty(
                self.history.table().to_string(),
            ));
        }
        self.history.drop(&mut self.db).await?;
        info!(table = %self.history.table(), "History table dropped");
        Ok(())
    }
}
