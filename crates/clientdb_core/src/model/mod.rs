//! Domain model for client records.
//!
//! # Responsibility
//! - Define the canonical client record exposed to callers.
//! - Own input validation rules shared by every write path.
//!
//! # Invariants
//! - Every client is identified by a database-generated `ClientId`.
//! - Deletion is physical; there are no tombstones.

pub mod client;
