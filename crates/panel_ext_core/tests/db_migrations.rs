use panel_ext_core::db::migrations::latest_version;
use panel_ext_core::db::{open_db, open_db_in_memory, DbError};
use panel_ext_core::{MigrationRunner, SqlMigrationRunner};
use rusqlite::Connection;
use std::fs;

#[test]
fn open_db_in_memory_applies_host_schema() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "extensions");
    assert_table_exists(&conn, "extension_migrations");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/registry.sqlite3");

    let first = open_db(&path).unwrap();
    assert_eq!(schema_version(&first), latest_version());
    drop(first);

    let second = open_db(&path).unwrap();
    assert_eq!(schema_version(&second), latest_version());
    assert_table_exists(&second, "extensions");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite3");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn package_migrations_survive_reopen_and_roll_back_once() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("registry.sqlite3");
    let package = dir.path().join("plugins/coupons");
    fs::create_dir_all(package.join("migrations")).unwrap();
    fs::write(
        package.join("migrations/0001_coupons.up.sql"),
        "CREATE TABLE ext_coupons (code TEXT PRIMARY KEY);",
    )
    .unwrap();
    fs::write(
        package.join("migrations/0001_coupons.down.sql"),
        "DROP TABLE ext_coupons;",
    )
    .unwrap();

    {
        let conn = open_db(&db_path).unwrap();
        assert_eq!(SqlMigrationRunner::new(&conn).migrate("coupons", &package).unwrap(), 1);
    }

    let conn = open_db(&db_path).unwrap();
    let runner = SqlMigrationRunner::new(&conn);
    assert_eq!(runner.migrate("coupons", &package).unwrap(), 0);
    assert_table_exists(&conn, "ext_coupons");

    assert_eq!(runner.rollback("coupons", &package).unwrap(), 1);
    assert_eq!(runner.rollback("coupons", &package).unwrap(), 0);
}

#[test]
fn rollback_without_down_script_only_forgets_the_migration() {
    let dir = tempfile::tempdir().unwrap();
    let package = dir.path().join("coupons");
    fs::create_dir_all(package.join("migrations")).unwrap();
    fs::write(
        package.join("migrations/0001_coupons.up.sql"),
        "CREATE TABLE ext_coupons (code TEXT PRIMARY KEY);",
    )
    .unwrap();

    let conn = open_db_in_memory().unwrap();
    let runner = SqlMigrationRunner::new(&conn);
    runner.migrate("coupons", &package).unwrap();

    assert_eq!(runner.rollback("coupons", &package).unwrap(), 1);
    assert!(runner.applied("coupons").unwrap().is_empty());
    assert_table_exists(&conn, "ext_coupons");
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
