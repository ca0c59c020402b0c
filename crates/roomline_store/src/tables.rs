//! In-memory tables and the mutations that change them.
//!
//! Every change to a room goes through [`RoomTables::apply`], which returns
//! the mutation that undoes it. The same mutations are what the journal
//! stores, so replaying a journal rebuilds the tables exactly.

use crate::timeline::TimelinePosition;
use roomline_protocol::{
    DecryptionResult, Event, EventId, Membership, RoomId, RoomSummary, SyncCursor, TransactionId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Local echo status of an event this device sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EchoStatus {
    /// Stored from the send acknowledgement; the sync copy has not arrived.
    Pending(TransactionId),
    /// The server's copy arrived and replaced the echo.
    Confirmed(TransactionId),
}

impl EchoStatus {
    /// The transaction id either way.
    pub fn txn_id(&self) -> &TransactionId {
        match self {
            EchoStatus::Pending(t) | EchoStatus::Confirmed(t) => t,
        }
    }

    /// True while waiting for the server's copy.
    pub fn is_pending(&self) -> bool {
        matches!(self, EchoStatus::Pending(_))
    }
}

/// One row of the events table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// The envelope as received.
    pub event: Event,
    /// Slot in the room timeline.
    pub position: TimelinePosition,
    /// Attached decryption outcome, for encrypted events.
    pub decryption: Option<DecryptionResult>,
    /// Set for events this device sent.
    pub echo: Option<EchoStatus>,
}

impl StoredEvent {
    /// True for encrypted events that still need a decryption pass.
    pub fn needs_decryption(&self) -> bool {
        self.event.is_encrypted() && self.decryption.is_none()
    }

    /// Event type after decryption, when plaintext is available.
    pub fn effective_type(&self) -> &str {
        match &self.decryption {
            Some(DecryptionResult::Decrypted { event_type, .. }) => event_type,
            _ => &self.event.event_type,
        }
    }

    /// Content after decryption, when plaintext is available.
    pub fn effective_content(&self) -> &serde_json::Value {
        match &self.decryption {
            Some(DecryptionResult::Decrypted { content, .. }) => content,
            _ => &self.event.content,
        }
    }
}

/// A single keyed change to one room. Every variant sets one key to a new
/// value (`None` deletes), so the undo of a mutation is a mutation too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RoomMutation {
    /// Sets or removes an events-table row.
    Event {
        /// Row key.
        event_id: EventId,
        /// New row.
        row: Option<StoredEvent>,
    },
    /// Sets or clears a timeline slot.
    Slot {
        /// Slot.
        position: TimelinePosition,
        /// Occupant.
        event_id: Option<EventId>,
    },
    /// Advances the next free position.
    NextPosition(TimelinePosition),
    /// Points a current-state key at an event.
    State {
        /// State event type.
        event_type: String,
        /// State key.
        state_key: String,
        /// Current event.
        event_id: Option<EventId>,
    },
    /// Records which redaction applies to a target.
    Redaction {
        /// Redacted event.
        target: EventId,
        /// Winning redaction.
        redaction: Option<EventId>,
    },
    /// Indexes a local echo by transaction id.
    Echo {
        /// Transaction id.
        txn_id: TransactionId,
        /// Event carrying it.
        event_id: Option<EventId>,
    },
    /// Moves the read marker.
    ReadMarker(Option<EventId>),
    /// Records the account's membership section.
    Membership(Option<Membership>),
    /// Stores the token for events older than the oldest stored one.
    PrevBatch(Option<String>),
    /// Replaces the cached summary.
    Summary(Option<RoomSummary>),
}

/// One entry of a journal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// A change to one room.
    Room {
        /// Room changed.
        room_id: RoomId,
        /// Change.
        change: RoomMutation,
    },
    /// The sync cursor moved.
    Cursor(SyncCursor),
}

/// Everything stored about one room.
#[derive(Debug, Clone, Default)]
pub struct RoomTables {
    pub(crate) events: HashMap<EventId, StoredEvent>,
    pub(crate) slots: BTreeMap<TimelinePosition, EventId>,
    pub(crate) next_position: TimelinePosition,
    pub(crate) state: BTreeMap<(String, String), EventId>,
    pub(crate) redactions: HashMap<EventId, EventId>,
    pub(crate) echoes: HashMap<TransactionId, EventId>,
    pub(crate) read_marker: Option<EventId>,
    pub(crate) membership: Option<Membership>,
    pub(crate) prev_batch: Option<String>,
    pub(crate) summary: Option<RoomSummary>,
}

impl RoomTables {
    /// Applies `change` and returns its undo.
    pub fn apply(&mut self, change: RoomMutation) -> RoomMutation {
        match change {
            RoomMutation::Event { event_id, row } => {
                let old = set(&mut self.events, event_id.clone(), row);
                RoomMutation::Event { event_id, row: old }
            }
            RoomMutation::Slot { position, event_id } => {
                let old = set(&mut self.slots, position, event_id);
                RoomMutation::Slot {
                    position,
                    event_id: old,
                }
            }
            RoomMutation::NextPosition(next) => {
                RoomMutation::NextPosition(std::mem::replace(&mut self.next_position, next))
            }
            RoomMutation::State {
                event_type,
                state_key,
                event_id,
            } => {
                let key = (event_type, state_key);
                let old = set(&mut self.state, key.clone(), event_id);
                RoomMutation::State {
                    event_type: key.0,
                    state_key: key.1,
                    event_id: old,
                }
            }
            RoomMutation::Redaction { target, redaction } => {
                let old = set(&mut self.redactions, target.clone(), redaction);
                RoomMutation::Redaction {
                    target,
                    redaction: old,
                }
            }
            RoomMutation::Echo { txn_id, event_id } => {
                let old = set(&mut self.echoes, txn_id.clone(), event_id);
                RoomMutation::Echo {
                    txn_id,
                    event_id: old,
                }
            }
            RoomMutation::ReadMarker(marker) => {
                RoomMutation::ReadMarker(std::mem::replace(&mut self.read_marker, marker))
            }
            RoomMutation::Membership(m) => {
                RoomMutation::Membership(std::mem::replace(&mut self.membership, m))
            }
            RoomMutation::PrevBatch(token) => {
                RoomMutation::PrevBatch(std::mem::replace(&mut self.prev_batch, token))
            }
            RoomMutation::Summary(summary) => {
                RoomMutation::Summary(std::mem::replace(&mut self.summary, summary))
            }
        }
    }

    /// True when nothing has ever been stored for the room.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.membership.is_none()
            && self.read_marker.is_none()
            && self.summary.is_none()
    }

    /// Row stored under `event_id`.
    pub fn event(&self, event_id: &EventId) -> Option<&StoredEvent> {
        self.events.get(event_id)
    }

    /// Position an event would get if inserted now.
    pub fn allocate_position(&self) -> TimelinePosition {
        self.next_position.max(TimelinePosition::FIRST)
    }

    /// Highest occupied slot.
    pub fn last_position(&self) -> Option<TimelinePosition> {
        self.slots.keys().next_back().copied()
    }

    /// Current state event id for a key.
    pub fn state_event_id(&self, event_type: &str, state_key: &str) -> Option<&EventId> {
        self.state
            .get(&(event_type.to_string(), state_key.to_string()))
    }

    /// Redaction that applies to `event_id`, if any.
    pub fn redaction_of(&self, event_id: &EventId) -> Option<&EventId> {
        self.redactions.get(event_id)
    }

    /// Position of the read marker event.
    pub fn read_marker_position(&self) -> Option<TimelinePosition> {
        self.read_marker
            .as_ref()
            .and_then(|id| self.events.get(id))
            .map(|row| row.position)
    }
}

fn set<K, V, M: MapLike<K, V>>(
    map: &mut M,
    key: K,
    value: Option<V>,
) -> Option<V> {
    match value {
        Some(v) => map.put(key, v),
        None => map.remove_key(&key),
    }
}

trait MapLike<K, V> {
    fn put(&mut self, key: K, value: V) -> Option<V>;
    fn remove_key(&mut self, key: &K) -> Option<V>;
}

impl<K: std::hash::Hash + Eq, V> MapLike<K, V> for HashMap<K, V> {
    fn put(&mut self, key: K, value: V) -> Option<V> {
        self.insert(key, value)
    }
    fn remove_key(&mut self, key: &K) -> Option<V> {
        self.remove(key)
    }
}

impl<K: Ord, V> MapLike<K, V> for BTreeMap<K, V> {
    fn put(&mut self, key: K, value: V) -> Option<V> {
        self.insert(key, value)
    }
    fn remove_key(&mut self, key: &K) -> Option<V> {
        self.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: &str, pos: u64) -> StoredEvent {
        StoredEvent {
            event: Event::new(
                EventId::from(id),
                RoomId::from("!r:x"),
                roomline_protocol::UserId::from("@a:x"),
                "m.room.message",
                json!({"body": id}),
            ),
            position: TimelinePosition(pos),
            decryption: None,
            echo: None,
        }
    }

    #[test]
    fn undo_restores_previous_value() {
        let mut room = RoomTables::default();
        let undo = room.apply(RoomMutation::Event {
            event_id: EventId::from("$a"),
            row: Some(row("$a", 1)),
        });
        assert!(room.event(&EventId::from("$a")).is_some());
        assert_eq!(
            undo,
            RoomMutation::Event {
                event_id: EventId::from("$a"),
                row: None
            }
        );

        room.apply(undo);
        assert!(room.event(&EventId::from("$a")).is_none());
    }

    #[test]
    fn undo_chain_reverts_in_reverse_order() {
        let mut room = RoomTables::default();
        let changes = vec![
            RoomMutation::Slot {
                position: TimelinePosition(1),
                event_id: Some(EventId::from("$a")),
            },
            RoomMutation::NextPosition(TimelinePosition(2)),
            RoomMutation::State {
                event_type: "m.room.name".into(),
                state_key: String::new(),
                event_id: Some(EventId::from("$a")),
            },
            RoomMutation::ReadMarker(Some(EventId::from("$a"))),
        ];
        let undos: Vec<_> = changes.into_iter().map(|c| room.apply(c)).collect();
        assert_eq!(room.allocate_position(), TimelinePosition(2));
        assert_eq!(
            room.state_event_id("m.room.name", ""),
            Some(&EventId::from("$a"))
        );

        for undo in undos.into_iter().rev() {
            room.apply(undo);
        }
        assert!(room.slots.is_empty());
        assert!(room.state.is_empty());
        assert_eq!(room.read_marker, None);
        assert_eq!(room.allocate_position(), TimelinePosition::FIRST);
    }

    #[test]
    fn effective_view_prefers_plaintext() {
        let mut enc = row("$e", 1);
        enc.event.event_type = "m.room.encrypted".into();
        assert!(enc.needs_decryption());
        assert_eq!(enc.effective_type(), "m.room.encrypted");

        enc.decryption = Some(DecryptionResult::Decrypted {
            event_type: "m.room.message".into(),
            content: json!({"body": "plain"}),
        });
        assert!(!enc.needs_decryption());
        assert_eq!(enc.effective_type(), "m.room.message");
        assert_eq!(enc.effective_content()["body"], "plain");
    }
}
