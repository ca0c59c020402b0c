//! Event, batch and store fixtures.

use roomline_protocol::{
    types, Event, EventId, Membership, RoomDelta, RoomId, SyncBatch, SyncCursor, TransactionId,
    UserId,
};
use roomline_store::{EventStore, StoreConfig};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Mints events for one room with unique ids and rising timestamps.
#[derive(Debug, Clone)]
pub struct RoomFixture {
    /// Room the events belong to.
    pub id: RoomId,
    counter: u64,
}

impl RoomFixture {
    /// Fixture for `room_id`.
    pub fn new(room_id: &str) -> Self {
        Self {
            id: RoomId::from(room_id),
            counter: 0,
        }
    }

    fn next(&mut self, sender: &str, event_type: &str, content: Value) -> Event {
        self.counter += 1;
        let local = self.id.as_str().trim_start_matches('!');
        Event::new(
            EventId::new(format!("${}-{}", local, self.counter)),
            self.id.clone(),
            UserId::from(sender),
            event_type,
            content,
        )
        .with_timestamp(1_700_000_000_000 + self.counter * 1_000)
    }

    /// `m.room.message` text message.
    pub fn message(&mut self, sender: &str, body: &str) -> Event {
        self.next(
            sender,
            types::ROOM_MESSAGE,
            json!({"msgtype": "m.text", "body": body}),
        )
    }

    /// `m.room.encrypted` event using megolm session `session`.
    pub fn encrypted(&mut self, sender: &str, session: &str) -> Event {
        let n = self.counter + 1;
        self.next(
            sender,
            types::ROOM_ENCRYPTED,
            json!({
                "algorithm": "m.megolm.v1.aes-sha2",
                "sender_key": "curve-key",
                "session_id": session,
                "ciphertext": format!("ciphertext-{n}"),
            }),
        )
    }

    /// `m.room.create` by `creator`.
    pub fn create(&mut self, creator: &str) -> Event {
        self.next(
            creator,
            types::ROOM_CREATE,
            json!({"creator": creator, "room_version": "10"}),
        )
        .with_state_key("")
    }

    /// `m.room.member` for `user`.
    pub fn member(&mut self, user: &str, membership: Membership) -> Event {
        self.next(
            user,
            types::ROOM_MEMBER,
            json!({"membership": membership.as_content(), "displayname": user}),
        )
        .with_state_key(user)
    }

    /// `m.room.name`.
    pub fn name(&mut self, sender: &str, name: &str) -> Event {
        self.next(sender, types::ROOM_NAME, json!({"name": name}))
            .with_state_key("")
    }

    /// `m.room.encryption` enabling megolm.
    pub fn encryption(&mut self, sender: &str) -> Event {
        self.next(
            sender,
            types::ROOM_ENCRYPTION,
            json!({"algorithm": "m.megolm.v1.aes-sha2"}),
        )
        .with_state_key("")
    }

    /// `m.room.redaction` of `target`.
    pub fn redaction(&mut self, sender: &str, target: &EventId) -> Event {
        self.next(
            sender,
            types::ROOM_REDACTION,
            json!({"redacts": target.as_str(), "reason": "spam"}),
        )
        .with_redacts(target.clone())
    }

    /// `m.reaction` annotating `target`.
    pub fn reaction(&mut self, sender: &str, target: &EventId, key: &str) -> Event {
        self.next(
            sender,
            types::REACTION,
            json!({"m.relates_to": {"rel_type": "m.annotation", "event_id": target.as_str(), "key": key}}),
        )
    }

    /// The server copy of a message this device sent with `txn_id`.
    pub fn sent_message(&mut self, sender: &str, body: &str, txn_id: &str) -> Event {
        self.message(sender, body)
            .with_txn_id(TransactionId::from(txn_id))
    }
}

/// A joined-room delta carrying `timeline`.
pub fn joined(room_id: &RoomId, timeline: Vec<Event>) -> RoomDelta {
    let mut delta = RoomDelta::new(room_id.clone(), Membership::Joined);
    delta.timeline = timeline;
    delta
}

/// A joined-room delta with separate state and timeline sections.
pub fn joined_with_state(room_id: &RoomId, state: Vec<Event>, timeline: Vec<Event>) -> RoomDelta {
    let mut delta = joined(room_id, timeline);
    delta.state = state;
    delta
}

/// A batch of deltas.
pub fn batch(rooms: Vec<RoomDelta>) -> SyncBatch {
    SyncBatch { rooms }
}

/// A sync cursor.
pub fn cursor(token: &str) -> SyncCursor {
    SyncCursor::new(token)
}

/// A store plus whatever keeps it alive, cleaned up on drop.
pub struct TestStore {
    /// The store.
    pub store: Arc<EventStore>,
    user: UserId,
    dir: Option<TempDir>,
}

impl TestStore {
    /// In-memory store for `user`.
    pub fn memory(user: &str) -> Self {
        Self {
            store: Arc::new(
                EventStore::open_in_memory(UserId::from(user)).expect("in-memory store"),
            ),
            user: UserId::from(user),
            dir: None,
        }
    }

    /// Store in a fresh temp directory.
    pub fn file(user: &str) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let store = EventStore::open(
            &dir.path().join("store"),
            UserId::from(user),
            StoreConfig::default(),
        )
        .expect("file store");
        Self {
            store: Arc::new(store),
            user: UserId::from(user),
            dir: Some(dir),
        }
    }

    /// Directory of a file store.
    pub fn path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.path().join("store"))
    }

    /// Closes and reopens a file store from its journal.
    ///
    /// Panics for in-memory stores or if other handles to the store are
    /// still alive.
    pub fn reopen(self) -> Self {
        let path = self.path().expect("only file stores can be reopened");
        let Self { store, user, dir } = self;
        store.close().expect("close");
        drop(Arc::try_unwrap(store).expect("store still shared"));
        let store = EventStore::open(&path, user.clone(), StoreConfig::default()).expect("reopen");
        Self {
            store: Arc::new(store),
            user,
            dir,
        }
    }

    /// Shared handle to the store.
    pub fn handle(&self) -> Arc<EventStore> {
        Arc::clone(&self.store)
    }
}

impl std::ops::Deref for TestStore {
    type Target = EventStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Opens `path` as a store for `user` with default config.
pub fn open_store(path: &Path, user: &str) -> EventStore {
    EventStore::open(path, UserId::from(user), StoreConfig::default()).expect("open store")
}
