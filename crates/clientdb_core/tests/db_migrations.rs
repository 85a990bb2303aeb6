use clientdb_core::db::migrations::latest_version;
use clientdb_core::{
    Database, DbConfig, DbError, Migration, MigrationConfig, MigrationSet, MigrationState,
    Migrator,
};
use rusqlite::Connection;
use std::fs;

#[test]
fn migrate_applies_embedded_migrations() {
    let db = Database::open_in_memory().unwrap();

    let report = Migrator::embedded().migrate(&db).unwrap();

    assert_eq!(report.applied, vec![1]);
    assert_eq!(report.schema_version, latest_version());
    let conn = db.acquire().unwrap();
    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "client");
    assert_table_exists(&conn, "schema_history");
}

#[test]
fn migrate_twice_is_a_noop() {
    let db = Database::open_in_memory().unwrap();
    let migrator = Migrator::embedded();

    migrator.migrate(&db).unwrap();
    let before = schema_snapshot(&db.acquire().unwrap());

    let second = migrator.migrate(&db).unwrap();
    assert!(second.is_noop());
    assert_eq!(second.schema_version, latest_version());
    assert_eq!(schema_snapshot(&db.acquire().unwrap()), before);
    assert_eq!(history_versions(&db.acquire().unwrap()), vec![1]);
}

#[test]
fn reopening_file_database_keeps_applied_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("clientdb.sqlite3");

    let first = Database::open(DbConfig::file(&path)).unwrap();
    Migrator::embedded().migrate(&first).unwrap();
    first.shutdown();
    drop(first);

    let second = Database::open(DbConfig::file(&path)).unwrap();
    let report = Migrator::embedded().migrate(&second).unwrap();
    assert!(report.is_noop());
    assert_table_exists(&second.acquire().unwrap(), "client");
}

#[test]
fn pending_migrations_apply_in_ascending_order() {
    let db = Database::open_in_memory().unwrap();
    let v1 = Migration::new(1, "create client", CLIENT_DDL);
    let v2 = Migration::new(
        2,
        "add client index",
        "CREATE INDEX idx_client_name ON client(name);",
    );
    let v3 = Migration::new(3, "seed marker", "CREATE TABLE marker (id INTEGER);");

    let partial = MigrationSet::new(vec![v1.clone()]).unwrap();
    Migrator::new(partial, MigrationConfig::default())
        .migrate(&db)
        .unwrap();

    let full = MigrationSet::new(vec![v3, v1, v2]).unwrap();
    let report = Migrator::new(full, MigrationConfig::default())
        .migrate(&db)
        .unwrap();

    assert_eq!(report.applied, vec![2, 3]);
    assert_eq!(report.schema_version, 3);
    let conn = db.acquire().unwrap();
    assert_eq!(history_versions(&conn), vec![1, 2, 3]);
    assert_eq!(schema_version(&conn), 3);
}

#[test]
fn failing_migration_keeps_earlier_ones_and_records_nothing_for_itself() {
    let db = Database::open_in_memory().unwrap();
    let set = MigrationSet::new(vec![
        Migration::new(1, "create client", CLIENT_DDL),
        Migration::new(
            2,
            "broken",
            "CREATE TABLE partial (id INTEGER); INSERT INTO missing_table VALUES (1);",
        ),
        Migration::new(3, "never reached", "CREATE TABLE unreachable (id INTEGER);"),
    ])
    .unwrap();

    let err = Migrator::new(set, MigrationConfig::default())
        .migrate(&db)
        .unwrap_err();

    match err {
        DbError::MigrationFailed {
            version,
            description,
            ..
        } => {
            assert_eq!(version, 2);
            assert_eq!(description, "broken");
        }
        other => panic!("unexpected error: {other}"),
    }

    let conn = db.acquire().unwrap();
    assert_eq!(history_versions(&conn), vec![1]);
    assert_eq!(schema_version(&conn), 1);
    assert_table_exists(&conn, "client");
    assert_table_missing(&conn, "partial");
    assert_table_missing(&conn, "unreachable");
}

#[test]
fn edited_applied_script_is_rejected() {
    let db = Database::open_in_memory().unwrap();
    Migrator::embedded().migrate(&db).unwrap();

    let edited = MigrationSet::new(vec![Migration::new(
        1,
        "create client",
        "CREATE TABLE client (id INTEGER PRIMARY KEY, name TEXT);",
    )])
    .unwrap();
    let migrator = Migrator::new(edited, MigrationConfig::default());

    let err = migrator.migrate(&db).unwrap_err();
    assert!(matches!(err, DbError::ChecksumMismatch { version: 1, .. }));

    let info = migrator.info(&db).unwrap();
    assert_eq!(info[0].state, MigrationState::ChecksumMismatch);
}

#[test]
fn database_newer_than_binary_is_rejected() {
    let db = Database::open_in_memory().unwrap();
    let newer = MigrationSet::new(vec![
        Migration::new(1, "create client", CLIENT_DDL),
        Migration::new(2, "future table", "CREATE TABLE future (id INTEGER);"),
    ])
    .unwrap();
    Migrator::new(newer, MigrationConfig::default())
        .migrate(&db)
        .unwrap();

    let older = MigrationSet::new(vec![Migration::new(1, "create client", CLIENT_DDL)]).unwrap();
    let migrator = Migrator::new(older, MigrationConfig::default());
    let err = migrator.migrate(&db).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 2);
            assert_eq!(latest_supported, 1);
        }
        other => panic!("unexpected error: {other}"),
    }

    let states: Vec<MigrationState> = migrator
        .info(&db)
        .unwrap()
        .into_iter()
        .map(|info| info.state)
        .collect();
    assert_eq!(states, vec![MigrationState::Applied, MigrationState::Future]);
}

#[test]
fn applied_version_absent_from_scripts_is_rejected() {
    let db = Database::open_in_memory().unwrap();
    let original = MigrationSet::new(vec![
        Migration::new(1, "create client", CLIENT_DDL),
        Migration::new(2, "audit table", "CREATE TABLE audit (id INTEGER);"),
    ])
    .unwrap();
    Migrator::new(original, MigrationConfig::default())
        .migrate(&db)
        .unwrap();

    let renumbered = MigrationSet::new(vec![
        Migration::new(1, "create client", CLIENT_DDL),
        Migration::new(3, "audit table", "CREATE TABLE audit (id INTEGER);"),
    ])
    .unwrap();
    let migrator = Migrator::new(renumbered, MigrationConfig::default());

    let err = migrator.migrate(&db).unwrap_err();
    assert!(matches!(err, DbError::InvalidMigrationSet(message) if message.contains("missing")));
    assert_eq!(history_versions(&db.acquire().unwrap()), vec![1, 2]);

    let states: Vec<(u32, MigrationState)> = migrator
        .info(&db)
        .unwrap()
        .into_iter()
        .map(|info| (info.version, info.state))
        .collect();
    assert_eq!(
        states,
        vec![
            (1, MigrationState::Applied),
            (2, MigrationState::Missing),
            (3, MigrationState::Pending),
        ]
    );
}

#[test]
fn pending_version_below_applied_head_is_rejected() {
    let db = Database::open_in_memory().unwrap();
    let sparse = MigrationSet::new(vec![
        Migration::new(1, "create client", CLIENT_DDL),
        Migration::new(3, "audit table", "CREATE TABLE audit (id INTEGER);"),
    ])
    .unwrap();
    Migrator::new(sparse, MigrationConfig::default())
        .migrate(&db)
        .unwrap();

    let backfilled = MigrationSet::new(vec![
        Migration::new(1, "create client", CLIENT_DDL),
        Migration::new(2, "late index", "CREATE INDEX idx_client_name ON client(name);"),
        Migration::new(3, "audit table", "CREATE TABLE audit (id INTEGER);"),
    ])
    .unwrap();

    let err = Migrator::new(backfilled, MigrationConfig::default())
        .migrate(&db)
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidMigrationSet(message) if message.contains("older")));
    assert_eq!(history_versions(&db.acquire().unwrap()), vec![1, 3]);
}

#[test]
fn clean_is_refused_unless_enabled() {
    let db = Database::open_in_memory().unwrap();
    let migrator = Migrator::embedded();
    migrator.migrate(&db).unwrap();
    db.acquire()
        .unwrap()
        .execute("INSERT INTO client (name) VALUES ('Keep Me');", [])
        .unwrap();

    let err = migrator.clean_and_migrate(&db).unwrap_err();
    assert!(matches!(err, DbError::CleanDisabled));

    let rows: i64 = db
        .acquire()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM client;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn clean_and_migrate_rebuilds_from_empty_state() {
    let db = Database::open_in_memory().unwrap();
    let migrator = Migrator::new(
        MigrationSet::embedded(),
        MigrationConfig {
            clean_enabled: true,
            scripts_dir: None,
        },
    );
    migrator.migrate(&db).unwrap();
    {
        let conn = db.acquire().unwrap();
        conn.execute("INSERT INTO client (name) VALUES ('Wiped');", [])
            .unwrap();
        conn.execute_batch("CREATE TABLE stray (id INTEGER); CREATE VIEW stray_view AS SELECT id FROM stray;")
            .unwrap();
    }

    let report = migrator.clean_and_migrate(&db).unwrap();

    assert_eq!(report.applied, vec![1]);
    let conn = db.acquire().unwrap();
    assert_table_missing(&conn, "stray");
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM client;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 0);
    assert_eq!(history_versions(&conn), vec![1]);

    conn.execute("INSERT INTO client (name) VALUES ('Fresh');", [])
        .unwrap();
    assert_eq!(conn.last_insert_rowid(), 1);
}

#[test]
fn scripts_load_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("0001_create_client.sql"), CLIENT_DDL).unwrap();
    fs::write(
        dir.path().join("0002_add_client_index.sql"),
        "CREATE INDEX idx_client_name ON client(name);",
    )
    .unwrap();
    fs::write(dir.path().join("README.md"), "not a migration").unwrap();

    let migrator = Migrator::from_config(MigrationConfig {
        clean_enabled: false,
        scripts_dir: Some(dir.path().to_path_buf()),
    })
    .unwrap();
    assert_eq!(migrator.set().len(), 2);

    let db = Database::open_in_memory().unwrap();
    let info = migrator.info(&db).unwrap();
    assert!(info.iter().all(|entry| entry.state == MigrationState::Pending));

    let report = migrator.migrate(&db).unwrap();
    assert_eq!(report.applied, vec![1, 2]);

    let info = migrator.info(&db).unwrap();
    assert_eq!(info[1].description, "add client index");
    assert_eq!(info[1].state, MigrationState::Applied);
    assert!(info[1].installed_on.is_some());
}

#[test]
fn directory_with_malformed_script_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("1a_create_client.sql"), CLIENT_DDL).unwrap();

    let err = MigrationSet::from_dir(dir.path()).unwrap_err();
    assert!(matches!(err, DbError::InvalidMigrationSet(_)));
}

#[test]
fn migrate_on_closed_database_fails() {
    let db = Database::open_in_memory().unwrap();
    db.check_connection().unwrap();
    db.shutdown();

    assert!(matches!(db.check_connection(), Err(DbError::Closed)));
    let err = Migrator::embedded().migrate(&db).unwrap_err();
    assert!(matches!(err, DbError::Closed));
}

const CLIENT_DDL: &str = "CREATE TABLE client (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL
);";

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn history_versions(conn: &Connection) -> Vec<u32> {
    let mut stmt = conn
        .prepare("SELECT version FROM schema_history ORDER BY version;")
        .unwrap();
    let rows = stmt.query_map([], |row| row.get(0)).unwrap();
    rows.map(|row| row.unwrap()).collect()
}

fn schema_snapshot(conn: &Connection) -> Vec<(String, String)> {
    let mut stmt = conn
        .prepare("SELECT name, COALESCE(sql, '') FROM sqlite_master ORDER BY name;")
        .unwrap();
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap();
    rows.map(|row| row.unwrap()).collect()
}

fn table_exists(conn: &Connection, table_name: &str) -> bool {
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
    exists == 1
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    assert!(table_exists(conn, table_name), "table {table_name} does not exist");
}

fn assert_table_missing(conn: &Connection, table_name: &str) {
    assert!(!table_exists(conn, table_name), "table {table_name} should not exist");
}
