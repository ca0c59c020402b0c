//! Crypto engine abstraction.
//!
//! Key agreement, session storage and device trust live behind
//! [`CryptoEngine`]; the engine only asks for plaintext and ciphertext and
//! listens for newly arrived room keys.

use async_trait::async_trait;
use roomline_protocol::{Event, RoomId, SessionRef};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Plaintext recovered from an `m.room.encrypted` event.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedPayload {
    /// Inner event type.
    pub event_type: String,
    /// Inner content.
    pub content: Value,
}

impl DecryptedPayload {
    /// Creates a payload.
    pub fn new(event_type: impl Into<String>, content: Value) -> Self {
        Self {
            event_type: event_type.into(),
            content,
        }
    }
}

/// Why an event could not be decrypted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecryptFailure {
    /// The room key for this session has not arrived (yet).
    #[error("room key missing for session {0}")]
    KeyMissing(SessionRef),

    /// Corrupt ciphertext, ratchet violation, unparseable envelope.
    #[error("{0}")]
    Permanent(String),
}

/// Outgoing content could not be encrypted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("encryption failed: {0}")]
pub struct CryptoError(pub String);

/// Receives room-key arrival notifications.
pub trait KeyArrivalListener: Send + Sync {
    /// A key for `session` is now available.
    fn key_arrived(&self, session: &SessionRef);
}

/// End-to-end encryption for one device.
#[async_trait]
pub trait CryptoEngine: Send + Sync {
    /// Decrypts an `m.room.encrypted` event.
    async fn decrypt(&self, event: &Event) -> Result<DecryptedPayload, DecryptFailure>;

    /// Encrypts `content` of `event_type` for `room_id`, creating an
    /// outbound session if none exists. Returns `m.room.encrypted` content.
    async fn encrypt(
        &self,
        room_id: &RoomId,
        event_type: &str,
        content: &Value,
    ) -> Result<Value, CryptoError>;

    /// Registers a listener woken whenever a room key arrives.
    fn register_key_listener(&self, listener: Arc<dyn KeyArrivalListener>);
}
