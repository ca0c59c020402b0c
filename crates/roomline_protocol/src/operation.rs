//! Outgoing operations.

use crate::ids::{EventId, RoomId, TransactionId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One network operation issued on behalf of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// `PUT /rooms/{room}/send/{type}/{txn}`.
    SendEvent {
        /// Event type actually sent (`m.room.encrypted` for encrypted rooms).
        event_type: String,
        /// Content actually sent.
        content: Value,
        /// Client transaction id.
        txn_id: TransactionId,
    },
    /// `PUT /rooms/{room}/state/{type}/{key}`.
    SetState {
        /// State event type.
        event_type: String,
        /// State key.
        state_key: String,
        /// Content.
        content: Value,
    },
    /// `POST /join/{room}`.
    Join,
    /// `POST /rooms/{room}/leave`.
    Leave,
    /// `POST /createRoom`.
    CreateRoom {
        /// Initial name.
        name: Option<String>,
        /// Whether to add an `m.room.encryption` initial state event.
        encrypted: bool,
        /// Users to invite.
        invite: Vec<UserId>,
    },
    /// `POST /rooms/{room}/read_markers`.
    ReadMarker {
        /// New fully-read event.
        event_id: EventId,
    },
    /// `PUT /rooms/{room}/typing/{user}`.
    Typing {
        /// Whether the user is typing.
        typing: bool,
        /// Server-side expiry.
        timeout_ms: u64,
    },
}

impl Operation {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::SendEvent { .. } => "send_event",
            Operation::SetState { .. } => "set_state",
            Operation::Join => "join",
            Operation::Leave => "leave",
            Operation::CreateRoom { .. } => "create_room",
            Operation::ReadMarker { .. } => "read_marker",
            Operation::Typing { .. } => "typing",
        }
    }
}

/// What the server returned for an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationAck {
    /// Id of the event the operation created, if any.
    pub event_id: Option<EventId>,
    /// Room the operation created or joined, if any.
    pub room_id: Option<RoomId>,
}

impl OperationAck {
    /// Acknowledgement carrying an event id.
    pub fn event(event_id: EventId) -> Self {
        Self {
            event_id: Some(event_id),
            room_id: None,
        }
    }

    /// Acknowledgement carrying a room id.
    pub fn room(room_id: RoomId) -> Self {
        Self {
            event_id: None,
            room_id: Some(room_id),
        }
    }
}
