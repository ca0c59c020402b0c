//! Protocol transport abstraction.

use async_trait::async_trait;
use roomline_protocol::{Operation, OperationAck, RoomId, SyncBatch, SyncCursor};
use std::time::Duration;
use thiserror::Error;

/// Result type for transport calls.
pub type TransportResult<T> = Result<T, TransportError>;

/// A failed request, classified by its HTTP-like status.
///
/// No status means the request never got a response (timeout, connection
/// reset, DNS failure).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", describe(.status, .message))]
pub struct TransportError {
    /// Response status, if any.
    pub status: Option<u16>,
    /// Error message.
    pub message: String,
}

impl TransportError {
    /// A failure with a response status.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// A failure without a response.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Timeouts, connection errors, 408, 429 and 5xx can be retried.
    pub fn is_retryable(&self) -> bool {
        match self.status {
            None => true,
            Some(408) | Some(429) => true,
            Some(s) => (500..600).contains(&s),
        }
    }

    /// 401 and 403: the session is no longer valid.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status, Some(401) | Some(403))
    }
}

fn describe(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(s) => format!("status {s}: {message}"),
        None => message.to_string(),
    }
}

/// One sync response.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResponse {
    /// Deltas since the requested cursor.
    pub batch: SyncBatch,
    /// Cursor to request next.
    pub next_cursor: SyncCursor,
}

impl SyncResponse {
    /// Creates a response.
    pub fn new(batch: SyncBatch, next_cursor: SyncCursor) -> Self {
        Self { batch, next_cursor }
    }
}

/// Network access to the homeserver.
///
/// Implementations handle authentication, serialization and HTTP; the
/// engine only sees batches and acknowledgements.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Long-polls for deltas after `cursor` (from the beginning when
    /// `None`), waiting at most `timeout` for new data.
    async fn request_sync(
        &self,
        cursor: Option<&SyncCursor>,
        timeout: Duration,
    ) -> TransportResult<SyncResponse>;

    /// Issues one operation. `room_id` is `None` only for room creation.
    async fn send_operation(
        &self,
        room_id: Option<&RoomId>,
        operation: &Operation,
    ) -> TransportResult<OperationAck>;
}
