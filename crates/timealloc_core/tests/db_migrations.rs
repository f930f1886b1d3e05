use rusqlite::Connection;
use timealloc_core::db::migrations::latest_version;
use timealloc_core::db::{
    ensure_schema_ready, open_db, open_db_in_memory, open_db_with, schema_version, DbError,
};
use timealloc_core::AllocationAdmin;
use timealloc_core::StoreConfig;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn).unwrap(), latest_version());
    for table in [
        "proposals",
        "time_allocations",
        "request_groups",
        "requests",
        "windows",
        "configurations",
    ] {
        assert_table_exists(&conn, table);
    }
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("timealloc.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first).unwrap(), latest_version());
    drop(conn_first);

    let conn_second = open_db_with(&path, &StoreConfig::default()).unwrap();
    assert_eq!(schema_version(&conn_second).unwrap(), latest_version());
    assert_table_exists(&conn_second, "time_allocations");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
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
fn foreign_keys_are_enforced() {
    let conn = open_db_in_memory().unwrap();
    let enabled: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(enabled, 1);
}

#[test]
fn migrated_connection_is_ready() {
    let conn = open_db_in_memory().unwrap();
    ensure_schema_ready(&conn).unwrap();
}

#[test]
fn unmigrated_connection_is_rejected_by_admin() {
    let conn = Connection::open_in_memory().unwrap();

    match AllocationAdmin::try_new(&conn) {
        Err(DbError::SchemaNotReady {
            expected_version,
            actual_version,
        }) => {
            assert_eq!(expected_version, latest_version());
            assert_eq!(actual_version, 0);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("admin accepted an unmigrated connection"),
    }
}

#[test]
fn dropped_table_is_reported_as_missing() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "PRAGMA foreign_keys = OFF;
         DROP TABLE configurations;
         DROP TABLE windows;
         DROP TABLE requests;",
    )
    .unwrap();

    match ensure_schema_ready(&conn).unwrap_err() {
        DbError::MissingTable(table) => assert_eq!(table, "requests"),
        other => panic!("unexpected error: {other}"),
    }
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
