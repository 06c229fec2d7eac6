//! Migration history tracking.
//!
//! This module manages the history table that records which migration files
//! have been applied, and in which batch.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::any::AnyRow;
use strata_schema::{Dialect, Index, Table, big_int, varchar};
use tracing::debug;

use crate::connection::{Connection, Param};
use crate::error::{MigrateError, Result};

/// A record of an applied migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// Unique ID in the history table.
    pub id: i64,
    /// Migration file name.
    pub filename: String,
    /// Batch the migration was applied in.
    pub sequence: i64,
    /// Version string, mirrors the sequence.
    pub version: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

impl MigrationRecord {
    fn from_row(row: &AnyRow) -> std::result::Result<Self, sqlx::Error> {
        let timestamp: i64 = row.try_get("timestamp")?;
        Ok(Self {
            id: row.try_get("id")?,
            filename: row.try_get("filename")?,
            sequence: row.try_get("sequence")?,
            version: row.try_get("version")?,
            applied_at: DateTime::from_timestamp(timestamp, 0).unwrap_or_default(),
        })
    }
}

/// Reads and writes the history table through a [`Connection`].
#[derive(Debug, Clone)]
pub struct MigrationHistory {
    table: String,
}

impl MigrationHistory {
    /// Creates a history manager for `table`.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// Returns the history table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    fn quoted(&self, db: &Connection) -> String {
        db.dialect().quote(&self.table)
    }

    /// Describes the history table for `dialect`.
    pub fn schema(&self, dialect: Dialect) -> Result<Table> {
        Ok(Table::new(dialect, &self.table)
            .create()
            .if_not_exists()
            .column(big_int("id").auto_increment())?
            .column(varchar("filename", 255))?
            .column(big_int("sequence"))?
            .column(varchar("version", 15))?
            .column(big_int("timestamp"))?
            .index(Index::new(["filename"]).unique())?)
    }

    /// Returns whether the history table exists.
    pub async fn exists(&self, db: &mut Connection) -> Result<bool> {
        let sql = match db.dialect() {
            Dialect::Sqlite => {
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?".to_string()
            }
            Dialect::MySql => "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = ?"
                .to_string(),
            Dialect::Postgres => format!(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = {}",
                db.placeholder(1)
            ),
        };
        let count = db
            .fetch_i64(&sql, &[Param::from(self.table.as_str())])
            .await?;
        Ok(count.unwrap_or(0) > 0)
    }

    /// Creates the history table.
    pub async fn create(&self, db: &mut Connection) -> Result<()> {
        debug!(table = %self.table, "Creating history table");
        let schema = self.schema(db.dialect())?;
        db.run(&schema).await
    }

    /// Drops the history table if it exists.
    pub async fn drop(&self, db: &mut Connection) -> Result<()> {
        debug!(table = %self.table, "Dropping history table");
        db.run(&Table::new(db.dialect(), &self.table).drop_if_exists())
            .await
    }

    /// Counts the recorded migrations.
    pub async fn count(&self, db: &mut Connection) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.quoted(db));
        Ok(db.fetch_i64(&sql, &[]).await?.unwrap_or(0))
    }

    /// Returns the highest recorded sequence, `None` when the table is empty.
    pub async fn max_sequence(&self, db: &mut Connection) -> Result<Option<i64>> {
        let sql = format!("SELECT MAX(sequence) FROM {}", self.quoted(db));
        db.fetch_i64(&sql, &[]).await
    }

    async fn select(
        &self,
        db: &mut Connection,
        filter: &str,
        params: &[Param],
    ) -> Result<Vec<MigrationRecord>> {
        let sql = format!(
            "SELECT id, filename, sequence, version, timestamp FROM {}{filter} \
             ORDER BY timestamp ASC, filename ASC",
            self.quoted(db)
        );
        db.fetch_all(&sql, params)
            .await?
            .iter()
            .map(MigrationRecord::from_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|source| MigrateError::query(&sql, params, source))
    }

    /// Returns every record, oldest first.
    pub async fn records(&self, db: &mut Connection) -> Result<Vec<MigrationRecord>> {
        self.select(db, "", &[]).await
    }

    /// Returns every recorded file name, oldest first.
    pub async fn filenames(&self, db: &mut Connection) -> Result<Vec<String>> {
        Ok(self
            .records(db)
            .await?
            .into_iter()
            .map(|record| record.filename)
            .collect())
    }

    /// Returns the file names recorded under `sequence`, oldest first.
    pub async fn in_sequence(&self, db: &mut Connection, sequence: i64) -> Result<Vec<String>> {
        let filter = format!(" WHERE sequence = {}", db.placeholder(1));
        Ok(self
            .select(db, &filter, &[Param::Int(sequence)])
            .await?
            .into_iter()
            .map(|record| record.filename)
            .collect())
    }

    /// Records `filename` as applied in batch `sequence`.
    pub async fn insert(&self, db: &mut Connection, filename: &str, sequence: i64) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (filename, sequence, version, timestamp) VALUES ({}, {}, {}, {})",
            self.quoted(db),
            db.placeholder(1),
            db.placeholder(2),
            db.placeholder(3),
            db.placeholder(4)
        );
        let params = [
            Param::from(filename),
            Param::Int(sequence),
            Param::Text(sequence.to_string()),
            Param::Int(Utc::now().timestamp()),
        ];
        db.execute(&sql, &params).await.map(|_| ())
    }

    /// Removes the record of `filename`.
    pub async fn delete(&self, db: &mut Connection, filename: &str) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE filename = {}",
            self.quoted(db),
            db.placeholder(1)
        );
        db.execute(&sql, &[Param::from(filename)]).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;

    fn memory() -> Connection {
        Connection::new("test", ConnectionConfig::sqlite(":memory:").unwrap())
    }

    #[tokio::test]
    async fn test_create_and_drop() {
        let mut db = memory();
        let history = MigrationHistory::new("_migrations");

        assert!(!history.exists(&mut db).await.unwrap());
        history.create(&mut db).await.unwrap();
        assert!(history.exists(&mut db).await.unwrap());

        history.drop(&mut db).await.unwrap();
        assert!(!history.exists(&mut db).await.unwrap());
        history.drop(&mut db).await.unwrap();
    }

    #[tokio::test]
    async fn test_record_and_query() {
        let mut db = memory();
        let history = MigrationHistory::new("_migrations");
        history.create(&mut db).await.unwrap();

        assert_eq!(history.max_sequence(&mut db).await.unwrap(), None);
        assert_eq!(history.count(&mut db).await.unwrap(), 0);

        history.insert(&mut db, "1001_b.sql", 1).await.unwrap();
        history.insert(&mut db, "1000_a.sql", 1).await.unwrap();
        history.insert(&mut db, "1002_c.sql", 2).await.unwrap();

        assert_eq!(history.max_sequence(&mut db).await.unwrap(), Some(2));
        assert_eq!(history.count(&mut db).await.unwrap(), 3);
        assert_eq!(
            history.in_sequence(&mut db, 1).await.unwrap(),
            ["1000_a.sql", "1001_b.sql"]
        );

        let records = history.records(&mut db).await.unwrap();
        let last = records.iter().find(|r| r.filename == "1002_c.sql").unwrap();
        assert_eq!(last.sequence, 2);
        assert_eq!(last.version, "2");
        assert!(last.applied_at.timestamp() > 0);

        history.delete(&mut db, "1002_c.sql").await.unwrap();
        assert_eq!(history.max_sequence(&mut db).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_filename_is_unique() {
        let mut db = memory();
        let history = MigrationHistory::new("_migrations");
        history.create(&mut db).await.unwrap();
        history.insert(&mut db, "1000_a.sql", 1).await.unwrap();
        assert!(matches!(
            history.insert(&mut db, "1000_a.sql", 2).await,
            Err(MigrateError::Query { .. })
        ));
    }

    #[test]
    fn test_schema_per_dialect() {
        let history = MigrationHistory::new("_migrations");
        for dialect in Dialect::ALL {
            let statements = history.schema(dialect).unwrap().statements().unwrap();
            assert_eq!(statements.len(), 2, "{dialect}");
            assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS"), "{dialect}");
            assert!(statements[1].starts_with("CREATE UNIQUE INDEX"), "{dialect}");
        }
    }
}
