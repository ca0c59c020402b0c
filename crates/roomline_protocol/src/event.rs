//! The event envelope.

use crate::ids::{EventId, RoomId, SessionRef, TransactionId, UserId};
use crate::types;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// An event exactly as the server delivered it.
///
/// Envelopes are immutable once stored. Decryption output and redaction are
/// layered on at read time by the store; they never overwrite these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Server-assigned id, unique within the room.
    pub event_id: EventId,
    /// Room the event belongs to.
    pub room_id: RoomId,
    /// Sending user.
    pub sender: UserId,
    /// Type tag, e.g. `m.room.message`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Server timestamp in milliseconds.
    #[serde(default)]
    pub origin_server_ts: u64,
    /// Raw content object.
    pub content: Value,
    /// Present on state events only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    /// Target of a redaction event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacts: Option<EventId>,
    /// Transaction id echoed back to the sending device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn_id: Option<TransactionId>,
}

/// Why an event envelope was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventValidationError {
    /// A required envelope field is empty.
    #[error("event is missing `{0}`")]
    MissingField(&'static str),

    /// `content` is not a JSON object.
    #[error("event content is not an object")]
    ContentNotObject,

    /// A redaction names no target.
    #[error("redaction has no target")]
    RedactionWithoutTarget,

    /// The event claims a different room than the delta carrying it.
    #[error("event belongs to {found}, delivered for {expected}")]
    RoomMismatch {
        /// Room of the delta.
        expected: RoomId,
        /// Room named by the event.
        found: RoomId,
    },
}

impl Event {
    /// Creates a timeline event with a zero timestamp.
    pub fn new(
        event_id: EventId,
        room_id: RoomId,
        sender: UserId,
        event_type: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            event_id,
            room_id,
            sender,
            event_type: event_type.into(),
            origin_server_ts: 0,
            content,
            state_key: None,
            redacts: None,
            txn_id: None,
        }
    }

    /// Sets the server timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, ts: u64) -> Self {
        self.origin_server_ts = ts;
        self
    }

    /// Turns the event into a state event with the given key.
    #[must_use]
    pub fn with_state_key(mut self, key: impl Into<String>) -> Self {
        self.state_key = Some(key.into());
        self
    }

    /// Sets the redaction target.
    #[must_use]
    pub fn with_redacts(mut self, target: EventId) -> Self {
        self.redacts = Some(target);
        self
    }

    /// Sets the echoed transaction id.
    #[must_use]
    pub fn with_txn_id(mut self, txn_id: TransactionId) -> Self {
        self.txn_id = Some(txn_id);
        self
    }

    /// True when the event carries a state key.
    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }

    /// True for `m.room.encrypted`.
    pub fn is_encrypted(&self) -> bool {
        self.event_type == types::ROOM_ENCRYPTED
    }

    /// The redaction target, from the envelope or (newer room versions)
    /// from `content.redacts`.
    pub fn redaction_target(&self) -> Option<EventId> {
        if self.event_type != types::ROOM_REDACTION {
            return None;
        }
        self.redacts.clone().or_else(|| {
            self.content
                .get("redacts")
                .and_then(Value::as_str)
                .map(EventId::from)
        })
    }

    /// `content.body` when it is a string.
    pub fn body(&self) -> Option<&str> {
        self.content.get("body").and_then(Value::as_str)
    }

    /// The megolm session an encrypted event was sent with.
    pub fn session_ref(&self) -> Option<SessionRef> {
        if !self.is_encrypted() {
            return None;
        }
        let session = self.content.get("session_id")?.as_str()?;
        Some(SessionRef::new(self.room_id.clone(), session))
    }

    /// Checks the envelope fields every stored event must have.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), EventValidationError> {
        if self.event_id.is_empty() {
            return Err(EventValidationError::MissingField("event_id"));
        }
        if self.room_id.is_empty() {
            return Err(EventValidationError::MissingField("room_id"));
        }
        if self.sender.is_empty() {
            return Err(EventValidationError::MissingField("sender"));
        }
        if self.event_type.is_empty() {
            return Err(EventValidationError::MissingField("type"));
        }
        if !self.content.is_object() {
            return Err(EventValidationError::ContentNotObject);
        }
        if self.event_type == types::ROOM_REDACTION && self.redaction_target().is_none() {
            return Err(EventValidationError::RedactionWithoutTarget);
        }
        Ok(())
    }

    /// A copy whose content keeps only `preserved` keys.
    pub fn redacted(&self, preserved: &[&str]) -> Event {
        let mut kept = Map::new();
        if let Some(content) = self.content.as_object() {
            for key in preserved {
                if let Some(value) = content.get(*key) {
                    kept.insert((*key).to_string(), value.clone());
                }
            }
        }
        Event {
            content: Value::Object(kept),
            ..self.clone()
        }
    }
}

/// Outcome of decrypting an `m.room.encrypted` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecryptionResult {
    /// Plaintext recovered.
    Decrypted {
        /// Inner event type, e.g. `m.room.message`.
        event_type: String,
        /// Inner content.
        content: Value,
    },
    /// Decryption will never succeed for this event.
    Failed {
        /// Human-readable cause.
        reason: String,
    },
}

impl DecryptionResult {
    /// True for [`DecryptionResult::Decrypted`].
    pub fn is_decrypted(&self) -> bool {
        matches!(self, DecryptionResult::Decrypted { .. })
    }
}
