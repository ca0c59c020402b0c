//! Storage errors.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a [`StorageBackend`](crate::StorageBackend).
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying medium failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read range extends past the end of the log.
    #[error("read past end of log: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Log size at the time of the read.
        size: u64,
    },

    /// A truncate target lies past the end of the log.
    #[error("cannot truncate log of {size} bytes to {requested} bytes")]
    TruncatePastEnd {
        /// Requested size.
        requested: u64,
        /// Current size.
        size: u64,
    },

    /// The medium holds bytes that cannot be right.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The backend was closed.
    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    /// Returns true when the error came from the operating system.
    pub fn is_io(&self) -> bool {
        matches!(self, StorageError::Io(_))
    }
}
