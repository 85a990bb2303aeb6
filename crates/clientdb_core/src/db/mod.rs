//! SQLite storage bootstrap and schema migration entry points.
//!
//! # Responsibility
//! - Own the database handle every component acquires connections from.
//! - Apply versioned schema migrations in deterministic order.
//!
//! # Invariants
//! - Applied migrations are recorded in `schema_history`; the latest applied
//!   version is mirrored to `PRAGMA user_version`.
//! - Core code must not read/write application data before migrations succeed.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub mod migrations;
mod open;
pub mod provider;

pub use open::{Database, DbConnection};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    /// The handle was shut down; no further connections are handed out.
    Closed,
    /// The shared memory connection was not released within the busy timeout.
    Busy(Duration),
    /// The shared handle already exists with another configuration.
    ProviderConflict(String),
    InvalidConfig(String),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    InvalidMigrationSet(String),
    ChecksumMismatch {
        version: u32,
        applied: String,
        resolved: String,
    },
    MigrationFailed {
        version: u32,
        description: String,
        source: rusqlite::Error,
    },
    CleanDisabled,
}

impl DbError {
    /// Stable identifier used as `error_code=` in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite_error",
            Self::Io(_) => "io_error",
            Self::Closed => "db_closed",
            Self::Busy(_) => "db_busy",
            Self::ProviderConflict(_) => "provider_conflict",
            Self::InvalidConfig(_) => "invalid_config",
            Self::UnsupportedSchemaVersion { .. } => "unsupported_schema_version",
            Self::InvalidMigrationSet(_) => "invalid_migration_set",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::MigrationFailed { .. } => "migration_failed",
            Self::CleanDisabled => "clean_disabled",
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
            Self::Closed => write!(f, "database handle has been shut down"),
            Self::Busy(waited) => write!(
                f,
                "database connection still in use after {} ms",
                waited.as_millis()
            ),
            Self::ProviderConflict(message) => write!(f, "{message}"),
            Self::InvalidConfig(message) => write!(f, "invalid database config: {message}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::InvalidMigrationSet(message) => write!(f, "invalid migration set: {message}"),
            Self::ChecksumMismatch {
                version,
                applied,
                resolved,
            } => write!(
                f,
                "migration {version} checksum mismatch: applied {applied}, resolved {resolved}"
            ),
            Self::MigrationFailed {
                version,
                description,
                source,
            } => write!(f, "migration {version} ({description}) failed: {source}"),
            Self::CleanDisabled => write!(
                f,
                "clean is disabled; enable it explicitly before wiping the database"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::MigrationFailed { source, .. } => Some(source),
            Self::Closed
            | Self::Busy(_)
            | Self::ProviderConflict(_)
            | Self::InvalidConfig(_)
            | Self::UnsupportedSchemaVersion { .. }
            | Self::InvalidMigrationSet(_)
            | Self::ChecksumMismatch { .. }
            | Self::CleanDisabled => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<std::io::Error> for DbError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
