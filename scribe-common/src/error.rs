//! Common error types for the scribe services

use thiserror::Error;

use crate::db::models::{BatchErrors, Disqualification};

/// Common result type for scribe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the store, the allocator and the session manager.
///
/// Domain conditions (`NoWorkAvailable`, `Conflict`, `UnknownBatch`, ...) are
/// expected outcomes and get their own variants so the API layer can map each
/// one to a distinct response. Infrastructure failures wrap the driver error.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// External cache error
    #[cfg(feature = "redis-sessions")]
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding of stored state
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No unclaimed work matches the request
    #[error("No work available: {0}")]
    NoWorkAvailable(String),

    /// A claim lost against a concurrent claim or an already finished item
    #[error("Conflict on item {id}: {reason}")]
    Conflict { id: i64, reason: Disqualification },

    /// Transition attempted from a state that does not allow it
    #[error("Invalid state for item {id}: expected in_progress, found {found}")]
    InvalidState { id: i64, found: &'static str },

    /// A batch transition was refused as a whole; nothing was written
    #[error("Batch rejected: {0}")]
    BatchRejected(BatchErrors),

    /// Training session selected zero items
    #[error("Dataset is empty, nothing to train on")]
    EmptyDataset,

    /// Batch was never served by this session
    #[error("Unknown batch: epoch {epoch}, batch {batch_id}")]
    UnknownBatch { epoch: u64, batch_id: usize },

    /// Session id does not exist (never created, ended, or expired)
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A scoped transaction was opened while another one is active on the same task
    #[error("Nested transaction: '{inner}' started inside '{outer}'")]
    NestedTransaction {
        outer: &'static str,
        inner: &'static str,
    },

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Expected steady-state outcomes that should not be logged as failures
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Error::NoWorkAvailable(_) | Error::EmptyDataset)
    }
}
