//! Storage and migration configuration.
//!
//! # Responsibility
//! - Describe where the database lives and how connections are tuned.
//! - Gate destructive migration operations behind an explicit opt-in.
//!
//! # Invariants
//! - `clean_enabled` defaults to `false`.
//! - Environment overrides are parsed strictly; malformed values are errors,
//!   never silently replaced by defaults.

use crate::db::{DbError, DbResult};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DB_PATH: &str = "CLIENTDB_PATH";
pub const ENV_BUSY_TIMEOUT_MS: &str = "CLIENTDB_BUSY_TIMEOUT_MS";
pub const ENV_CLEAN_ENABLED: &str = "CLIENTDB_CLEAN_ENABLED";
pub const ENV_MIGRATIONS_DIR: &str = "CLIENTDB_MIGRATIONS_DIR";

const DEFAULT_DB_FILE_NAME: &str = "clientdb.sqlite3";
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MEMORY_LOCATION: &str = ":memory:";

/// Physical location of the embedded database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    /// SQLite database file; created on first open.
    File(PathBuf),
    /// Private in-memory database living as long as its handle.
    Memory,
}

/// Connection parameters for [`crate::db::Database`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub location: DbLocation,
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::file(DEFAULT_DB_FILE_NAME)
    }
}

impl DbConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: DbLocation::File(path.into()),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            location: DbLocation::Memory,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// Builds config from `CLIENTDB_PATH` and `CLIENTDB_BUSY_TIMEOUT_MS`.
    ///
    /// Unset variables fall back to [`DbConfig::default`] values.
    pub fn from_env() -> DbResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DbResult<Self> {
        let mut config = match lookup(ENV_DB_PATH) {
            Some(value) => Self::parse_location(&value)?,
            None => Self::default(),
        };

        if let Some(value) = lookup(ENV_BUSY_TIMEOUT_MS) {
            let millis = value.trim().parse::<u64>().map_err(|_| {
                DbError::InvalidConfig(format!(
                    "{ENV_BUSY_TIMEOUT_MS} must be a non-negative integer, got `{value}`"
                ))
            })?;
            config.busy_timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }

    /// Parses a location string: `:memory:` or a file path.
    pub fn parse_location(value: &str) -> DbResult<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DbError::InvalidConfig(
                "database location cannot be empty".to_string(),
            ));
        }
        if trimmed == MEMORY_LOCATION {
            return Ok(Self::in_memory());
        }
        Ok(Self::file(trimmed))
    }

    /// Replaces only the location, keeping every other setting.
    pub fn with_location(mut self, value: &str) -> DbResult<Self> {
        self.location = Self::parse_location(value)?.location;
        Ok(self)
    }

    /// Checks values that cannot be expressed by the type alone.
    pub fn validate(&self) -> DbResult<()> {
        if let DbLocation::File(path) = &self.location {
            if path.as_os_str().is_empty() {
                return Err(DbError::InvalidConfig(
                    "database path cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn mode(&self) -> &'static str {
        match self.location {
            DbLocation::File(_) => "file",
            DbLocation::Memory => "memory",
        }
    }
}

/// Migration runner options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Allows `clean` / `clean_and_migrate` to drop every table.
    pub clean_enabled: bool,
    /// Loads scripts from this directory instead of the embedded bundle.
    pub scripts_dir: Option<PathBuf>,
}

impl MigrationConfig {
    /// Builds config from `CLIENTDB_CLEAN_ENABLED` and `CLIENTDB_MIGRATIONS_DIR`.
    pub fn from_env() -> DbResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DbResult<Self> {
        let clean_enabled = match lookup(ENV_CLEAN_ENABLED) {
            Some(value) => parse_bool(ENV_CLEAN_ENABLED, &value)?,
            None => false,
        };
        let scripts_dir = lookup(ENV_MIGRATIONS_DIR)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            clean_enabled,
            scripts_dir,
        })
    }
}

fn parse_bool(key: &str, value: &str) -> DbResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(DbError::InvalidConfig(format!(
            "{key} must be a boolean, got `{other}`"
        ))),
    }
}
