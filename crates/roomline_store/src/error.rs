//! Error types for the event store.

use roomline_protocol::{EventId, RoomId};
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the event store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The journal backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] roomline_storage::StorageError),

    /// A journal payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] roomline_protocol::CodecError),

    /// Filesystem error outside the journal itself.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The journal holds a frame that cannot be parsed.
    #[error("journal corruption at offset {offset}: {message}")]
    JournalCorruption {
        /// Offset of the bad frame.
        offset: u64,
        /// What was wrong.
        message: String,
    },

    /// A complete journal frame failed its checksum.
    #[error("journal checksum mismatch at offset {offset}: expected {expected:#010x}, found {actual:#010x}")]
    ChecksumMismatch {
        /// Offset of the bad frame.
        offset: u64,
        /// Checksum stored in the frame.
        expected: u32,
        /// Checksum computed over the frame.
        actual: u32,
    },

    /// Another process holds the store directory.
    #[error("store locked: another process has the account open")]
    StoreLocked,

    /// The store directory is missing and creation was not requested.
    #[error("store directory does not exist: {0}")]
    MissingDirectory(String),

    /// The room has never been seen.
    #[error("unknown room: {0}")]
    UnknownRoom(RoomId),

    /// The event is not stored in the room.
    #[error("unknown event {event_id} in {room_id}")]
    UnknownEvent {
        /// Room searched.
        room_id: RoomId,
        /// Missing event.
        event_id: EventId,
    },

    /// An event handed to the store failed validation.
    #[error("invalid event: {0}")]
    InvalidEvent(#[from] roomline_protocol::EventValidationError),

    /// The store was closed.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Creates a journal corruption error.
    pub fn journal_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an unknown event error.
    pub fn unknown_event(room_id: &RoomId, event_id: &EventId) -> Self {
        Self::UnknownEvent {
            room_id: room_id.clone(),
            event_id: event_id.clone(),
        }
    }

    /// True when the failure came from the journal medium or its contents,
    /// as opposed to a bad argument.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            StoreError::Storage(_)
                | StoreError::Codec(_)
                | StoreError::Io(_)
                | StoreError::JournalCorruption { .. }
                | StoreError::ChecksumMismatch { .. }
                | StoreError::Closed
        )
    }
}
