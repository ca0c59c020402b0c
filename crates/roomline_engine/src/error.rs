//! Error types for the engine.

use crate::crypto::CryptoError;
use crate::transport::TransportError;
use roomline_store::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the sync loop, the decryption coordinator and commands.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The request is malformed; nothing was done.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Local state forbids the action; nothing was done.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Network or server failure.
    #[error("transport error: {message}")]
    Transport {
        /// HTTP-like status, when there was a response.
        status: Option<u16>,
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// An event could not be decrypted.
    #[error("decryption failed: {message}")]
    Decryption {
        /// Why.
        message: String,
        /// False while retries remain.
        permanent: bool,
    },

    /// Outgoing content could not be encrypted.
    #[error(transparent)]
    Encryption(#[from] CryptoError),

    /// Local persistence failed.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Ordering conflict resolved by position; never fatal.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller stopped waiting. An issued operation keeps running.
    #[error("operation timed out")]
    TimedOut,

    /// The engine is shut down.
    #[error("engine is shut down")]
    Shutdown,

    /// A background task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),
}

impl EngineError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a precondition error.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Transport { retryable, .. } => *retryable,
            EngineError::Decryption { permanent, .. } => !permanent,
            EngineError::TimedOut => true,
            _ => false,
        }
    }

    /// Returns true for failures that must stop the sync loop.
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::Transport { retryable, .. } => !retryable,
            EngineError::Storage(_) | EngineError::Shutdown | EngineError::Task(_) => true,
            _ => false,
        }
    }

    /// Short kind name for notifications and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Precondition(_) => "precondition",
            EngineError::Transport { .. } => "transport",
            EngineError::Decryption { .. } => "decryption",
            EngineError::Encryption(_) => "encryption",
            EngineError::Storage(_) => "storage",
            EngineError::Conflict(_) => "conflict",
            EngineError::TimedOut => "timed_out",
            EngineError::Shutdown => "shutdown",
            EngineError::Task(_) => "task",
        }
    }
}

impl From<TransportError> for EngineError {
    fn from(error: TransportError) -> Self {
        EngineError::Transport {
            retryable: error.is_retryable(),
            status: error.status,
            message: error.message,
        }
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(error: tokio::task::JoinError) -> Self {
        EngineError::Task(error.to_string())
    }
}
