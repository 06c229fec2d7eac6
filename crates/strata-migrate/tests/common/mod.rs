#![allow(dead_code)]

use strata_migrate::prelude::*;
use tempfile::TempDir;

/// An unopened connection to a fresh in-memory SQLite database.
pub fn memory() -> Connection {
    Connection::new("test", ConnectionConfig::sqlite(":memory:").unwrap())
}

/// A temporary unit directory holding `units` as `(filename, contents)`.
pub fn unit_dir(units: &[(&str, &str)]) -> (TempDir, LocalFiles) {
    let dir = TempDir::new().unwrap();
    let files = LocalFiles::new(dir.path());
    for (filename, contents) in units {
        files.write(filename, contents).unwrap();
    }
    (dir, files)
}

/// A migration file creating and dropping table `name`.
pub fn create_table_unit(name: &str) -> String {
    format!(
        "-- migration: Create{name}\n\n-- up\nCREATE TABLE {name} (n INTEGER);\n\n-- down\nDROP TABLE {name};\n"
    )
}

/// Returns whether `table` exists.
pub async fn table_exists(db: &mut Connection, table: &str) -> bool {
    db.fetch_i64(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        &[Param::from(table)],
    )
    .await
    .unwrap()
        == Some(1)
}

/// Counts the rows of `table`.
pub async fn count(db: &mut Connection, table: &str) -> i64 {
    db.fetch_i64(&format!("SELECT COUNT(*) FROM {table}"), &[])
        .await
        .unwrap()
        .unwrap_or(0)
}
