//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Own the process-lifetime handle to one embedded database.
//! - Hand out configured connections scoped to a single operation.
//!
//! # Invariants
//! - Handed-out connections have `foreign_keys=ON` and the configured busy timeout.
//! - A connection is released when its `DbConnection` guard drops, on every exit path.
//! - After `shutdown`, no new connection is handed out.
//! - Waiting for the shared memory connection is bounded by the busy timeout.

use super::{DbError, DbResult};
use crate::config::{DbConfig, DbLocation};
use log::{error, info, warn};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use rusqlite::Connection;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Handle to the embedded database.
///
/// File databases open one fresh connection per [`Database::acquire`] call.
/// Memory databases only exist as long as their connection, so the handle keeps
/// exactly one and serializes access to it. The slot is emptied by `shutdown`.
#[derive(Debug)]
pub struct Database {
    config: DbConfig,
    shared: Option<Mutex<Option<Connection>>>,
    closed: AtomicBool,
}

/// Connection borrowed from a [`Database`] for the duration of one operation.
pub struct DbConnection<'db> {
    inner: ConnectionSlot<'db>,
}

enum ConnectionSlot<'db> {
    Dedicated(Connection),
    Shared(MappedMutexGuard<'db, Connection>),
}

impl Deref for DbConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match &self.inner {
            ConnectionSlot::Dedicated(conn) => conn,
            ConnectionSlot::Shared(guard) => guard,
        }
    }
}

impl Database {
    /// Opens the database described by `config` and verifies it is reachable.
    ///
    /// Does not apply migrations; callers run [`super::migrations::Migrator`]
    /// before constructing repositories.
    ///
    /// # Side effects
    /// - Creates the parent directory of a file database when missing.
    /// - Emits `db_open` logging events with duration and status.
    pub fn open(config: DbConfig) -> DbResult<Self> {
        let started_at = Instant::now();
        let mode = config.mode();
        info!("event=db_open module=db status=start mode={mode}");

        match Self::open_inner(config) {
            Ok(database) => {
                info!(
                    "event=db_open module=db status=ok mode={mode} duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(database)
            }
            Err(err) => {
                error!(
                    "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Shorthand for a private in-memory database.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::open(DbConfig::in_memory())
    }

    fn open_inner(config: DbConfig) -> DbResult<Self> {
        config.validate()?;

        let shared = match &config.location {
            DbLocation::File(path) => {
                if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                // Probe once so a bad path fails here instead of on first use.
                drop(connect_file(&config)?);
                None
            }
            DbLocation::Memory => Some(Mutex::new(Some(connect_memory(&config)?))),
        };

        Ok(Self {
            config,
            shared,
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the configuration this handle was opened with.
    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Acquires a connection for one operation.
    ///
    /// A memory database waits at most `busy_timeout` for the shared
    /// connection, including when the current thread already holds it.
    ///
    /// # Errors
    /// - [`DbError::Closed`] after [`Database::shutdown`].
    /// - [`DbError::Busy`] when the shared connection is not released in time.
    /// - [`DbError::Sqlite`] when a file connection cannot be opened.
    pub fn acquire(&self) -> DbResult<DbConnection<'_>> {
        if self.is_closed() {
            return Err(DbError::Closed);
        }

        let inner = match &self.shared {
            Some(shared) => {
                let guard = shared
                    .try_lock_for(self.config.busy_timeout)
                    .ok_or(DbError::Busy(self.config.busy_timeout))?;
                if self.is_closed() {
                    return Err(DbError::Closed);
                }
                let conn =
                    MutexGuard::try_map(guard, Option::as_mut).map_err(|_| DbError::Closed)?;
                ConnectionSlot::Shared(conn)
            }
            None => ConnectionSlot::Dedicated(connect_file(&self.config)?),
        };

        Ok(DbConnection { inner })
    }

    /// Verifies a connection can be acquired and answers a trivial query.
    pub fn check_connection(&self) -> DbResult<()> {
        let result = self.acquire().and_then(|conn| {
            conn.query_row("SELECT 1;", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        });

        match &result {
            Ok(()) => info!(
                "event=db_check module=db status=ok mode={}",
                self.config.mode()
            ),
            Err(err) => error!(
                "event=db_check module=db status=error mode={} error_code=db_unreachable error={}",
                self.config.mode(),
                err
            ),
        }
        result
    }

    /// Stops handing out connections. Calling it again is a no-op.
    ///
    /// A memory database closes its connection here; if a caller still holds
    /// it past `busy_timeout`, it is closed when the handle drops instead.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let released = match &self.shared {
            Some(shared) => match shared.try_lock_for(self.config.busy_timeout) {
                Some(mut slot) => {
                    drop(slot.take());
                    true
                }
                None => false,
            },
            None => true,
        };

        if released {
            info!(
                "event=db_shutdown module=db status=ok mode={}",
                self.config.mode()
            );
        } else {
            warn!(
                "event=db_shutdown module=db status=deferred mode={} error_code=db_busy",
                self.config.mode()
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if !self.is_closed() {
            warn!(
                "event=db_shutdown module=db status=implicit mode={}",
                self.config.mode()
            );
        }
    }
}

fn connect_file(config: &DbConfig) -> DbResult<Connection> {
    let DbLocation::File(path) = &config.location else {
        return Err(DbError::InvalidConfig(
            "file connection requested for a memory database".to_string(),
        ));
    };
    let conn = Connection::open(path)?;
    configure_connection(&conn, config.busy_timeout)?;
    Ok(conn)
}

fn connect_memory(config: &DbConfig) -> DbResult<Connection> {
    let conn = Connection::open_in_memory()?;
    configure_connection(&conn, config.busy_timeout)?;
    Ok(conn)
}

fn configure_connection(conn: &Connection, busy_timeout: Duration) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::config::DbConfig;
    use crate::db::DbError;
    use std::time::{Duration, Instant};

    #[test]
    fn shutdown_releases_shared_memory_connection() {
        let db = Database::open_in_memory().unwrap();
        db.acquire().unwrap();

        db.shutdown();

        let slot = db.shared.as_ref().unwrap().lock();
        assert!(slot.is_none());
        drop(slot);
        assert!(matches!(db.acquire(), Err(DbError::Closed)));
    }

    #[test]
    fn shutdown_while_connection_is_held_defers_release() {
        let config = DbConfig::in_memory().with_busy_timeout(Duration::from_millis(20));
        let db = Database::open(config).unwrap();
        let held = db.acquire().unwrap();

        let started_at = Instant::now();
        db.shutdown();
        assert!(started_at.elapsed() < Duration::from_secs(2));

        drop(held);
        assert!(db.is_closed());
        assert!(matches!(db.acquire(), Err(DbError::Closed)));
    }
}
