//! Error types for the record store.

use crate::types::RecordId;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record not found: {0}")]
    NotFound(RecordId),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Store unavailable at {}: {source}", path.display())]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Transaction aborted: {0}")]
    TransactionAborted(#[source] Box<StoreError>),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),
}

impl StoreError {
    /// Wrap an inner failure as an aborted transaction.
    ///
    /// Already-aborted errors are passed through so nesting never stacks.
    pub fn aborted(inner: StoreError) -> Self {
        match inner {
            StoreError::TransactionAborted(_) => inner,
            other => StoreError::TransactionAborted(Box::new(other)),
        }
    }

    /// Wrap a failure hit while opening the store at `path`.
    pub fn unavailable(path: impl Into<PathBuf>, inner: StoreError) -> Self {
        match inner {
            StoreError::StoreUnavailable { .. } => inner,
            other => StoreError::StoreUnavailable {
                path: path.into(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost cause, looking through abort and unavailable wrappers.
    pub fn root_cause(&self) -> &StoreError {
        match self {
            StoreError::TransactionAborted(inner) => inner.root_cause(),
            StoreError::StoreUnavailable { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
