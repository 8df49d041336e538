//! Error types for authtrie

use thiserror::Error;

/// Result type alias for authtrie operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in authtrie operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A referenced node is missing or its record is malformed
    #[error("Storage corruption: {0}")]
    StorageCorruption(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The backing store does not hold a usable trie (or already holds one)
    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Proof verification failed: {0}")]
    ProofVerification(String),

    /// Failure reported by the storage backend
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Write attempted in a read-only transaction")]
    ReadOnly,

    #[error("Database is closed")]
    Closed,
}

impl Error {
    /// Wrap a backend error
    pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
        Error::Storage(err.to_string())
    }
}
