//! Client domain model.
//!
//! # Responsibility
//! - Define the `(id, name)` record returned by repository reads.
//! - Validate client names before any storage interaction.
//!
//! # Invariants
//! - `id` is assigned by the database and never changes.
//! - A valid name is not blank and has 2..=100 characters.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Database-generated client identifier.
pub type ClientId = i64;

/// Minimum accepted name length, in characters.
pub const NAME_MIN_CHARS: usize = 2;
/// Maximum accepted name length, in characters.
pub const NAME_MAX_CHARS: usize = 100;

/// Fully populated client row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
}

impl Client {
    pub fn new(id: ClientId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Rejection reasons for a client name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientValidationError {
    /// Empty or whitespace-only.
    Empty,
    TooShort { len: usize },
    TooLong { len: usize },
}

impl Display for ClientValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "client name must not be empty"),
            Self::TooShort { len } => write!(
                f,
                "client name must be between {NAME_MIN_CHARS} and {NAME_MAX_CHARS} characters, got {len}"
            ),
            Self::TooLong { len } => write!(
                f,
                "client name must be between {NAME_MIN_CHARS} and {NAME_MAX_CHARS} characters, got {len}"
            ),
        }
    }
}

impl Error for ClientValidationError {}

/// Checks a client name against length and blankness rules.
///
/// Length is counted in Unicode scalar values. The name is not trimmed; a
/// valid name is stored exactly as given.
pub fn validate_client_name(name: &str) -> Result<(), ClientValidationError> {
    if name.trim().is_empty() {
        return Err(ClientValidationError::Empty);
    }

    let len = name.chars().count();
    if len < NAME_MIN_CHARS {
        return Err(ClientValidationError::TooShort { len });
    }
    if len > NAME_MAX_CHARS {
        return Err(ClientValidationError::TooLong { len });
    }

    Ok(())
}
