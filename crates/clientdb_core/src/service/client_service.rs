//! Client use-case service.
//!
//! # Responsibility
//! - Provide stable CRUD entry points for core callers.
//! - Delegate persistence to repository implementations.
//!
//! # Invariants
//! - Service APIs never bypass repository validation/persistence contracts.
//! - Service layer remains storage-agnostic.

use crate::model::client::{Client, ClientId};
use crate::repo::client_repo::{ClientRepository, RepoResult};

/// Use-case service wrapper for client CRUD operations.
pub struct ClientService<R: ClientRepository> {
    repo: R,
}

impl<R: ClientRepository> ClientService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Returns the underlying repository.
    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Creates a new client and returns its generated id.
    pub fn create(&self, name: &str) -> RepoResult<ClientId> {
        self.repo.create(name)
    }

    pub fn get_by_id(&self, id: ClientId) -> RepoResult<String> {
        self.repo.get_by_id(id)
    }

    pub fn get_client(&self, id: ClientId) -> RepoResult<Client> {
        self.repo.get_client(id)
    }

    /// Renames a client; the id never changes.
    ///
    /// Returns repository-level not-found or validation errors unchanged.
    pub fn set_name(&self, id: ClientId, name: &str) -> RepoResult<()> {
        self.repo.set_name(id, name)
    }

    /// Renames a client and returns the stored record.
    pub fn rename_and_fetch(&self, id: ClientId, name: &str) -> RepoResult<Client> {
        self.repo.set_name(id, name)?;
        self.repo.get_client(id)
    }

    pub fn delete_by_id(&self, id: ClientId) -> RepoResult<()> {
        self.repo.delete_by_id(id)
    }

    pub fn list_all(&self) -> RepoResult<Vec<Client>> {
        self.repo.list_all()
    }

    pub fn count(&self) -> RepoResult<u64> {
        self.repo.count()
    }
}
