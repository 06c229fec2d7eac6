//! Integration tests for the seed engine against in-memory SQLite.

mod common;

use async_trait::async_trait;
use common::{count, memory, unit_dir};
use strata_migrate::prelude::*;
use tokio_test::assert_ok;

async fn seeder_with_items(units: &[(&str, &str)]) -> (tempfile::TempDir, Seeder<LocalFiles, SqlUnitLoader>) {
    let (dir, files) = unit_dir(units);
    let mut seeder = Seeder::new(memory(), files, SqlUnitLoader);
    seeder
        .connection()
        .raw("CREATE TABLE items (name TEXT NOT NULL)")
        .await
        .unwrap();
    (dir, seeder)
}

#[tokio::test]
async fn test_create_and_list() {
    let (_dir, files) = unit_dir(&[]);
    let seeder = Seeder::new(memory(), files, SqlUnitLoader);

    assert!(seeder.list().unwrap().is_empty());
    assert_eq!(seeder.create("users seed").unwrap(), "usersSeed.sql");
    assert_eq!(seeder.create("demo").unwrap(), "demo.sql");
    assert!(matches!(
        seeder.create("users_seed"),
        Err(MigrateError::SeedExists(_))
    ));

    assert_eq!(seeder.list().unwrap(), ["demo.sql", "usersSeed.sql"]);
    let source = seeder.files().read("usersSeed.sql").unwrap();
    assert!(source.starts_with("-- seed: UsersSeed"));
}

#[tokio::test]
async fn test_run_commits() {
    let (dir, mut seeder) = seeder_with_items(&[(
        "items.sql",
        "-- seed: Items\nINSERT INTO items VALUES ('a');\nINSERT INTO items VALUES ('b');\n",
    )])
    .await;

    assert_ok!(seeder.run("items.sql").await);
    assert_eq!(count(seeder.connection(), "items").await, 2);

    let prefixed = format!("{}/items.sql", dir.path().display());
    assert_ok!(seeder.run(&prefixed).await);
    assert_eq!(count(seeder.connection(), "items").await, 4);
}

#[tokio::test]
async fn test_failed_seed_rolls_back() {
    let (_dir, mut seeder) = seeder_with_items(&[(
        "broken.sql",
        "-- seed: Broken\nINSERT INTO items VALUES ('a');\nINSERT INTO missing VALUES ('b');\n",
    )])
    .await;

    assert!(matches!(
        seeder.run("broken.sql").await,
        Err(MigrateError::Query { .. })
    ));
    assert!(!seeder.connection().in_transaction());
    assert_eq!(count(seeder.connection(), "items").await, 0);
}

#[tokio::test]
async fn test_failed_commit_rolls_back() {
    let (_dir, mut seeder) = seeder_with_items(&[(
        "orphans.sql",
        "-- seed: Orphans\nINSERT INTO items VALUES ('a');\nINSERT INTO owned VALUES (42);\n",
    )])
    .await;
    seeder
        .connection()
        .raw("CREATE TABLE owners (id INTEGER PRIMARY KEY); CREATE TABLE owned (owner INTEGER REFERENCES owners(id) DEFERRABLE INITIALLY DEFERRED)")
        .await
        .unwrap();

    assert!(matches!(
        seeder.run("orphans.sql").await,
        Err(MigrateError::Query { ref sql, .. }) if sql == "COMMIT"
    ));
    assert!(!seeder.connection().in_transaction());
    assert_eq!(count(seeder.connection(), "items").await, 0);
    assert_eq!(count(seeder.connection(), "owned").await, 0);
}

#[tokio::test]
async fn test_missing_and_undeclared_seeds() {
    let (_dir, mut seeder) =
        seeder_with_items(&[("plain.sql", "INSERT INTO items VALUES ('a');\n")]).await;

    assert!(matches!(
        seeder.run("nope.sql").await,
        Err(MigrateError::SeedNotFound(_))
    ));
    assert!(matches!(
        seeder.run("plain.sql").await,
        Err(MigrateError::UnitNotDeclared { kind: "seed", .. })
    ));
    assert!(!seeder.connection().in_transaction());
    assert_eq!(count(seeder.connection(), "items").await, 0);
}

struct Fruit;

#[async_trait]
impl SeedUnit for Fruit {
    async fn seed(&self, db: &mut Connection) -> strata_migrate::Result<()> {
        let sql = format!("INSERT INTO items (name) VALUES ({})", db.placeholder(1));
        for name in ["apple", "pear"] {
            db.execute(&sql, &[Param::from(name)]).await?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_registered_seed() {
    let (_dir, files) = unit_dir(&[("fruit.sql", "-- seed: Fruit\n")]);
    let mut seeder = Seeder::new(memory(), files, UnitRegistry::new().seed("Fruit", Fruit));
    seeder
        .connection()
        .raw("CREATE TABLE items (name TEXT NOT NULL)")
        .await
        .unwrap();

    seeder.run("fruit.sql").await.unwrap();
    assert_eq!(count(seeder.connection(), "items").await, 2);
}
