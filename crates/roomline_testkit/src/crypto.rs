//! A crypto engine with scripted keys.

use async_trait::async_trait;
use parking_lot::Mutex;
use roomline_engine::{
    CryptoEngine, CryptoError, DecryptFailure, DecryptedPayload, KeyArrivalListener,
};
use roomline_protocol::{types, Event, EventId, RoomId, SessionRef};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Decrypts events whose session it has been given the key for.
///
/// Ciphertext produced by [`encrypt`](CryptoEngine::encrypt) is the JSON
/// of the plaintext event, so it decrypts back to the original. Any other
/// ciphertext decrypts to a text message `"plaintext of <ciphertext>"`.
#[derive(Default)]
pub struct FakeCrypto {
    known: Mutex<HashSet<SessionRef>>,
    broken: Mutex<HashSet<EventId>>,
    listeners: Mutex<Vec<Arc<dyn KeyArrivalListener>>>,
    decrypt_calls: AtomicUsize,
    encrypt_fails: AtomicBool,
}

impl FakeCrypto {
    /// No keys known.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the key of `session` available and tells every listener.
    pub fn release_key(&self, room_id: &RoomId, session: &str) {
        let session = SessionRef::new(room_id.clone(), session);
        self.known.lock().insert(session.clone());
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener.key_arrived(&session);
        }
    }

    /// Makes the key of `session` available without telling anyone.
    pub fn know(&self, room_id: &RoomId, session: &str) {
        self.known
            .lock()
            .insert(SessionRef::new(room_id.clone(), session));
    }

    /// Makes decryption of `event_id` fail permanently.
    pub fn break_event(&self, event_id: &EventId) {
        self.broken.lock().insert(event_id.clone());
    }

    /// Makes every following encryption fail.
    pub fn fail_encryption(&self) {
        self.encrypt_fails.store(true, Ordering::SeqCst);
    }

    /// Decryption attempts so far.
    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    /// Registered key listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn outbound_session(room_id: &RoomId) -> String {
        format!("outbound-{}", room_id.as_str().trim_start_matches('!'))
    }
}

impl std::fmt::Debug for FakeCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeCrypto")
            .field("known", &self.known.lock().len())
            .field("decrypt_calls", &self.decrypt_calls())
            .finish()
    }
}

#[async_trait]
impl CryptoEngine for FakeCrypto {
    async fn decrypt(&self, event: &Event) -> Result<DecryptedPayload, DecryptFailure> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        if self.broken.lock().contains(&event.event_id) {
            return Err(DecryptFailure::Permanent("bad message authentication code".into()));
        }
        let session = event
            .session_ref()
            .ok_or_else(|| DecryptFailure::Permanent("missing session_id".into()))?;
        if !self.known.lock().contains(&session) {
            return Err(DecryptFailure::KeyMissing(session));
        }

        let ciphertext = event
            .content
            .get("ciphertext")
            .and_then(Value::as_str)
            .ok_or_else(|| DecryptFailure::Permanent("missing ciphertext".into()))?;
        if let Ok(inner) = serde_json::from_str::<Value>(ciphertext) {
            if let (Some(event_type), Some(content)) =
                (inner.get("type").and_then(Value::as_str), inner.get("content"))
            {
                return Ok(DecryptedPayload::new(event_type, content.clone()));
            }
        }
        Ok(DecryptedPayload::new(
            types::ROOM_MESSAGE,
            json!({"msgtype": "m.text", "body": format!("plaintext of {ciphertext}")}),
        ))
    }

    async fn encrypt(
        &self,
        room_id: &RoomId,
        event_type: &str,
        content: &Value,
    ) -> Result<Value, CryptoError> {
        if self.encrypt_fails.load(Ordering::SeqCst) {
            return Err(CryptoError("no devices to share the session with".into()));
        }
        let session = Self::outbound_session(room_id);
        self.know(room_id, &session);
        let plaintext = json!({"type": event_type, "content": content});
        Ok(json!({
            "algorithm": "m.megolm.v1.aes-sha2",
            "sender_key": "fake-curve-key",
            "session_id": session,
            "ciphertext": plaintext.to_string(),
        }))
    }

    fn register_key_listener(&self, listener: Arc<dyn KeyArrivalListener>) {
        self.listeners.lock().push(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::RoomFixture;

    struct Recorder(Mutex<Vec<SessionRef>>);

    impl KeyArrivalListener for Recorder {
        fn key_arrived(&self, session: &SessionRef) {
            self.0.lock().push(session.clone());
        }
    }

    #[tokio::test]
    async fn key_missing_until_released() {
        let crypto = FakeCrypto::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        crypto.register_key_listener(recorder.clone());
        let mut room = RoomFixture::new("!r:test");
        let event = room.encrypted("@bob:test", "s1");

        let missing = crypto.decrypt(&event).await.unwrap_err();
        assert_eq!(missing, DecryptFailure::KeyMissing(SessionRef::new(room.id.clone(), "s1")));

        crypto.release_key(&room.id, "s1");
        let plain = crypto.decrypt(&event).await.unwrap();
        assert_eq!(plain.event_type, types::ROOM_MESSAGE);
        assert_eq!(recorder.0.lock().len(), 1);
        assert_eq!(crypto.decrypt_calls(), 2);
    }

    #[tokio::test]
    async fn own_ciphertext_decrypts_to_original() {
        let crypto = FakeCrypto::new();
        let room = RoomId::from("!r:test");
        let content = json!({"msgtype": "m.text", "body": "secret"});
        let wire = crypto.encrypt(&room, types::ROOM_MESSAGE, &content).await.unwrap();

        let event = Event::new(
            EventId::from("$e"),
            room.clone(),
            "@me:test".into(),
            types::ROOM_ENCRYPTED,
            wire,
        );
        let plain = crypto.decrypt(&event).await.unwrap();
        assert_eq!(plain.content, content);
    }

    #[tokio::test]
    async fn broken_events_fail_permanently() {
        let crypto = FakeCrypto::new();
        let mut room = RoomFixture::new("!r:test");
        let event = room.encrypted("@bob:test", "s1");
        crypto.know(&room.id, "s1");
        crypto.break_event(&event.event_id);
        assert!(matches!(
            crypto.decrypt(&event).await,
            Err(DecryptFailure::Permanent(_))
        ));
    }
}
