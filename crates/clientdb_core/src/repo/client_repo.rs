//! Client repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide stable CRUD APIs over the `client` table.
//! - Keep SQL and transaction handling inside the persistence boundary.
//!
//! # Invariants
//! - Write paths validate names before touching the database.
//! - Every write runs in its own `BEGIN IMMEDIATE` transaction that is
//!   committed on success and rolled back on any error, including "no rows
//!   affected".
//! - Every operation acquires its own connection and releases it before
//!   returning, whatever the outcome.
//! - Missing ids surface as `RepoError::NotFound`, never as a generic
//!   database failure.

use crate::db::{Database, DbError};
use crate::model::client::{validate_client_name, Client, ClientId, ClientValidationError};
use log::{debug, error, info, warn};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

const CLIENT_TABLE: &str = "client";
const CLIENT_COLUMNS: [&str; 2] = ["id", "name"];

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors from client repository operations.
#[derive(Debug)]
pub enum RepoError {
    /// Input rejected before any I/O.
    Validation(ClientValidationError),
    /// No client row with this id.
    NotFound(ClientId),
    /// A write statement changed nothing and was rolled back.
    NoRowsAffected(&'static str),
    /// Insert succeeded but no generated key was returned; rolled back.
    MissingGeneratedKey,
    /// A statement failed inside a write transaction; rolled back.
    Transaction {
        operation: &'static str,
        source: DbError,
    },
    /// Connection could not be acquired or a read query failed.
    Db(DbError),
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

/// Coarse classification of [`RepoError`] for caller branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoErrorKind {
    Validation,
    NotFound,
    TransactionFailure,
    Connectivity,
    SchemaMissing,
}

impl RepoError {
    pub fn kind(&self) -> RepoErrorKind {
        match self {
            Self::Validation(_) => RepoErrorKind::Validation,
            Self::NotFound(_) => RepoErrorKind::NotFound,
            Self::NoRowsAffected(_)
            | Self::MissingGeneratedKey
            | Self::Transaction { .. }
            | Self::InvalidData(_) => RepoErrorKind::TransactionFailure,
            Self::Db(_) => RepoErrorKind::Connectivity,
            Self::MissingRequiredTable(_) | Self::MissingRequiredColumn { .. } => {
                RepoErrorKind::SchemaMissing
            }
        }
    }

    /// Whether the caller can retry with different input.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            RepoErrorKind::Validation | RepoErrorKind::NotFound
        )
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::NoRowsAffected(_) => "no_rows_affected",
            Self::MissingGeneratedKey => "missing_generated_key",
            Self::Transaction { .. } => "transaction_failed",
            Self::Db(_) => "db_unavailable",
            Self::MissingRequiredTable(_) | Self::MissingRequiredColumn { .. } => {
                "schema_missing"
            }
            Self::InvalidData(_) => "invalid_data",
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "client with id {id} does not exist"),
            Self::NoRowsAffected(operation) => {
                write!(f, "{operation} client failed, no rows affected")
            }
            Self::MissingGeneratedKey => write!(f, "create client failed, no id obtained"),
            Self::Transaction { operation, source } => {
                write!(f, "{operation} client transaction rolled back: {source}")
            }
            Self::Db(err) => write!(f, "{err}"),
            Self::MissingRequiredTable(table) => {
                write!(f, "client repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "client repository requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted client data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Transaction { source, .. } => Some(source),
            Self::Db(err) => Some(err),
            Self::NotFound(_)
            | Self::NoRowsAffected(_)
            | Self::MissingGeneratedKey
            | Self::MissingRequiredTable(_)
            | Self::MissingRequiredColumn { .. }
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<ClientValidationError> for RepoError {
    fn from(value: ClientValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for client CRUD operations.
pub trait ClientRepository {
    /// Inserts a client and returns its generated id.
    fn create(&self, name: &str) -> RepoResult<ClientId>;
    /// Returns the name of one client.
    fn get_by_id(&self, id: ClientId) -> RepoResult<String>;
    /// Returns one full client row.
    fn get_client(&self, id: ClientId) -> RepoResult<Client>;
    /// Renames one client; the id is unchanged.
    fn set_name(&self, id: ClientId, name: &str) -> RepoResult<()>;
    /// Physically deletes one client. Deleting twice fails with `NotFound`.
    fn delete_by_id(&self, id: ClientId) -> RepoResult<()>;
    /// Lists every client in storage order.
    fn list_all(&self) -> RepoResult<Vec<Client>>;
    /// Counts stored clients.
    fn count(&self) -> RepoResult<u64>;
}

/// SQLite-backed client repository.
pub struct SqliteClientRepository<'db> {
    db: &'db Database,
}

impl<'db> SqliteClientRepository<'db> {
    /// Creates repository over a migrated database.
    ///
    /// # Errors
    /// - `MissingRequiredTable` / `MissingRequiredColumn` when migrations have
    ///   not created the `client` table; the repository is unusable then.
    pub fn try_new(db: &'db Database) -> RepoResult<Self> {
        let result = db
            .acquire()
            .map_err(RepoError::from)
            .and_then(|conn| ensure_client_table_ready(&conn));

        match result {
            Ok(()) => {
                info!("event=client_repo_init module=repo status=ok table={CLIENT_TABLE}");
                Ok(Self { db })
            }
            Err(err) => {
                error!(
                    "event=client_repo_init module=repo status=error table={CLIENT_TABLE} error_code={} error={}",
                    err.code(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Runs `work` in an immediate transaction on a freshly acquired connection.
    ///
    /// Commits when `work` succeeds and rolls back otherwise. SQL failures are
    /// reported as `RepoError::Transaction`.
    fn in_transaction<T>(
        &self,
        operation: &'static str,
        work: impl FnOnce(&Transaction<'_>) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let conn = self.db.acquire()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)
            .map_err(|err| transaction_error(operation, err.into()))?;

        match work(&tx) {
            Ok(value) => {
                tx.commit()
                    .map_err(|err| transaction_error(operation, err.into()))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    error!(
                        "event=client_{operation} module=repo status=rollback_failed error={rollback_err}"
                    );
                } else {
                    debug!("event=client_{operation} module=repo status=rolled_back");
                }
                Err(match err {
                    RepoError::Db(source) => transaction_error(operation, source),
                    other => other,
                })
            }
        }
    }
}

impl ClientRepository for SqliteClientRepository<'_> {
    fn create(&self, name: &str) -> RepoResult<ClientId> {
        let started_at = Instant::now();
        let result = validate_client_name(name)
            .map_err(RepoError::from)
            .and_then(|()| {
                self.in_transaction("create", |tx| {
                    let changed = tx.execute("INSERT INTO client (name) VALUES (?1);", [name])?;
                    if changed == 0 {
                        return Err(RepoError::NoRowsAffected("create"));
                    }

                    let id = tx.last_insert_rowid();
                    if id <= 0 {
                        return Err(RepoError::MissingGeneratedKey);
                    }
                    Ok(id)
                })
            });

        let id = result.as_ref().ok().copied();
        log_outcome("create", id, name_len(name), started_at, result.as_ref().map(|_| ()));
        result
    }

    fn get_by_id(&self, id: ClientId) -> RepoResult<String> {
        self.get_client(id).map(|client| client.name)
    }

    fn get_client(&self, id: ClientId) -> RepoResult<Client> {
        let started_at = Instant::now();
        let result = self.db.acquire().map_err(RepoError::from).and_then(|conn| {
            conn.query_row(
                "SELECT id, name FROM client WHERE id = ?1;",
                [id],
                |row| Ok(Client::new(row.get("id")?, row.get::<_, String>("name")?)),
            )
            .optional()?
            .ok_or(RepoError::NotFound(id))
        });

        log_outcome("get", Some(id), None, started_at, result.as_ref().map(|_| ()));
        result
    }

    fn set_name(&self, id: ClientId, name: &str) -> RepoResult<()> {
        let started_at = Instant::now();
        let result = validate_client_name(name)
            .map_err(RepoError::from)
            .and_then(|()| {
                self.in_transaction("update", |tx| {
                    let changed = tx.execute(
                        "UPDATE client SET name = ?1 WHERE id = ?2;",
                        rusqlite::params![name, id],
                    )?;
                    if changed == 0 {
                        return Err(RepoError::NotFound(id));
                    }
                    Ok(())
                })
            });

        log_outcome("update", Some(id), name_len(name), started_at, result.as_ref().map(|_| ()));
        result
    }

    fn delete_by_id(&self, id: ClientId) -> RepoResult<()> {
        let started_at = Instant::now();
        let result = self.in_transaction("delete", |tx| {
            let changed = tx.execute("DELETE FROM client WHERE id = ?1;", [id])?;
            if changed == 0 {
                return Err(RepoError::NotFound(id));
            }
            Ok(())
        });

        log_outcome("delete", Some(id), None, started_at, result.as_ref().map(|_| ()));
        result
    }

    fn list_all(&self) -> RepoResult<Vec<Client>> {
        let started_at = Instant::now();
        let result = self.db.acquire().map_err(RepoError::from).and_then(|conn| {
            let mut stmt = conn.prepare("SELECT id, name FROM client;")?;
            let mut rows = stmt.query([])?;
            let mut clients = Vec::new();

            while let Some(row) = rows.next()? {
                clients.push(Client::new(row.get("id")?, row.get::<_, String>("name")?));
            }
            Ok(clients)
        });

        match &result {
            Ok(clients) => debug!(
                "event=client_list module=repo status=ok count={} duration_ms={}",
                clients.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => log_outcome("list", None, None, started_at, Err(err)),
        }
        result
    }

    fn count(&self) -> RepoResult<u64> {
        let started_at = Instant::now();
        let result = self.db.acquire().map_err(RepoError::from).and_then(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM client;", [], |row| row.get(0))?;
            u64::try_from(count)
                .map_err(|_| RepoError::InvalidData(format!("negative client count `{count}`")))
        });

        log_outcome("count", None, None, started_at, result.as_ref().map(|_| ()));
        result
    }
}

fn transaction_error(operation: &'static str, source: DbError) -> RepoError {
    RepoError::Transaction { operation, source }
}

fn name_len(name: &str) -> Option<usize> {
    Some(name.chars().count())
}

/// Emits one `client_<operation>` event. Names are never logged, only lengths.
fn log_outcome(
    operation: &str,
    id: Option<ClientId>,
    name_len: Option<usize>,
    started_at: Instant,
    outcome: Result<(), &RepoError>,
) {
    let id = id.map_or_else(|| "-".to_string(), |id| id.to_string());
    let name_len = name_len.map_or_else(|| "-".to_string(), |len| len.to_string());
    let duration_ms = started_at.elapsed().as_millis();

    match outcome {
        Ok(()) => debug!(
            "event=client_{operation} module=repo status=ok client_id={id} name_len={name_len} duration_ms={duration_ms}"
        ),
        Err(err) if err.is_recoverable() => warn!(
            "event=client_{operation} module=repo status=rejected client_id={id} name_len={name_len} duration_ms={duration_ms} error_code={} error={err}",
            err.code()
        ),
        Err(err) => error!(
            "event=client_{operation} module=repo status=error client_id={id} name_len={name_len} duration_ms={duration_ms} error_code={} error={err}",
            err.code()
        ),
    }
}

fn ensure_client_table_ready(conn: &Connection) -> RepoResult<()> {
    if !table_exists(conn, CLIENT_TABLE)? {
        return Err(RepoError::MissingRequiredTable(CLIENT_TABLE));
    }

    for column in CLIENT_COLUMNS {
        if !table_has_column(conn, CLIENT_TABLE, column)? {
            return Err(RepoError::MissingRequiredColumn {
                table: CLIENT_TABLE,
                column,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
