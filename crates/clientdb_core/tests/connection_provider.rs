use clientdb_core::{
    shared_database, shared_database_if_initialized, ClientRepository, DbConfig, DbError,
    Migrator, SqliteClientRepository,
};
use std::sync::{Arc, Barrier};
use std::time::Duration;

// The provider is process-global, so every scenario lives in one test.
#[test]
fn shared_database_is_constructed_once() {
    assert!(shared_database_if_initialized().is_none());

    let config = DbConfig::in_memory().with_busy_timeout(Duration::from_millis(750));
    let barrier = Arc::new(Barrier::new(6));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let config = config.clone();
            std::thread::spawn(move || {
                barrier.wait();
                shared_database(&config).unwrap()
            })
        })
        .collect();
    let databases: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    let first = &databases[0];
    assert!(databases.iter().all(|db| Arc::ptr_eq(db, first)));
    assert!(Arc::ptr_eq(&shared_database_if_initialized().unwrap(), first));
    assert_eq!(first.config(), &config);

    Migrator::embedded().migrate(first).unwrap();
    let id = SqliteClientRepository::try_new(first)
        .unwrap()
        .create("Shared")
        .unwrap();

    let again = shared_database(&config).unwrap();
    assert_eq!(
        SqliteClientRepository::try_new(&again)
            .unwrap()
            .get_by_id(id)
            .unwrap(),
        "Shared"
    );

    let err = shared_database(&DbConfig::file("elsewhere.sqlite3")).unwrap_err();
    assert!(matches!(err, DbError::ProviderConflict(_)));
}
