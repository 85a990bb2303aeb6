//! Process-wide shared database handle.
//!
//! # Responsibility
//! - Construct one [`Database`] lazily for callers that need global access.
//!
//! # Invariants
//! - At most one handle is ever constructed per process, even under concurrent
//!   first access.
//! - Requests with a configuration different from the active one are rejected.
//!
//! Prefer passing an explicitly opened [`Database`] by reference; this module
//! exists for entry points that cannot thread a handle through.

use super::{Database, DbError, DbResult};
use crate::config::DbConfig;
use log::info;
use once_cell::sync::OnceCell;
use std::sync::Arc;

static SHARED_DATABASE: OnceCell<Arc<Database>> = OnceCell::new();

/// Returns the shared handle, opening it with `config` on first use.
///
/// # Errors
/// - Propagates open failures; a failed first attempt leaves the slot empty so
///   a later call may retry.
/// - [`DbError::ProviderConflict`] when the active handle uses another config.
pub fn shared_database(config: &DbConfig) -> DbResult<Arc<Database>> {
    let database = SHARED_DATABASE.get_or_try_init(|| -> DbResult<Arc<Database>> {
        let database = Database::open(config.clone())?;
        info!(
            "event=db_provider_init module=db status=ok mode={}",
            config.mode()
        );
        Ok(Arc::new(database))
    })?;

    if database.config() != config {
        return Err(DbError::ProviderConflict(format!(
            "shared database already initialized with {:?}; refusing to switch to {:?}",
            database.config().location,
            config.location
        )));
    }

    Ok(Arc::clone(database))
}

/// Returns the shared handle when it has already been initialized.
pub fn shared_database_if_initialized() -> Option<Arc<Database>> {
    SHARED_DATABASE.get().map(Arc::clone)
}
