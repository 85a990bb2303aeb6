//! Core data-access layer for clientdb.
//! This crate is the single source of truth for client storage invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{DbConfig, DbLocation, MigrationConfig};
pub use db::migrations::{
    Migration, MigrationInfo, MigrationReport, MigrationSet, MigrationState, Migrator,
};
pub use db::provider::{shared_database, shared_database_if_initialized};
pub use db::{Database, DbConnection, DbError, DbResult};
pub use logging::{default_log_level, init_logging, init_logging_with, LoggingOptions};
pub use model::client::{validate_client_name, Client, ClientId, ClientValidationError};
pub use repo::client_repo::{
    ClientRepository, RepoError, RepoErrorKind, RepoResult, SqliteClientRepository,
};
pub use service::client_service::ClientService;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
