//! Sync deltas as delivered by the server.

use crate::event::Event;
use crate::ids::{EventId, RoomId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque position in the server's sync stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(String);

impl SyncCursor {
    /// Wraps a server `next_batch` token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The account's membership in a room, as far as one delta tells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Membership {
    /// Joined.
    Joined,
    /// Invited but not joined.
    Invited,
    /// Left, kicked or never joined.
    Left,
    /// Banned.
    Banned,
}

impl Membership {
    /// Parses the `membership` field of an `m.room.member` event.
    pub fn from_content(value: &str) -> Option<Self> {
        match value {
            "join" => Some(Membership::Joined),
            "invite" => Some(Membership::Invited),
            "leave" => Some(Membership::Left),
            "ban" => Some(Membership::Banned),
            _ => None,
        }
    }

    /// The wire form.
    pub fn as_content(&self) -> &'static str {
        match self {
            Membership::Joined => "join",
            Membership::Invited => "invite",
            Membership::Left => "leave",
            Membership::Banned => "ban",
        }
    }
}

/// Everything one sync response says about one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDelta {
    /// The room.
    pub room_id: RoomId,
    /// Which section of the response the room came in.
    pub membership: Membership,
    /// State events preceding the timeline slice.
    #[serde(default)]
    pub state: Vec<Event>,
    /// Timeline events in server order.
    #[serde(default)]
    pub timeline: Vec<Event>,
    /// True when the server skipped events before `timeline`.
    #[serde(default)]
    pub limited: bool,
    /// Token for fetching events older than `timeline`.
    #[serde(default)]
    pub prev_batch: Option<String>,
    /// Fully-read marker from room account data.
    #[serde(default)]
    pub fully_read: Option<EventId>,
}

impl RoomDelta {
    /// An empty delta for `room_id`.
    pub fn new(room_id: RoomId, membership: Membership) -> Self {
        Self {
            room_id,
            membership,
            state: Vec::new(),
            timeline: Vec::new(),
            limited: false,
            prev_batch: None,
            fully_read: None,
        }
    }

    /// Number of events carried.
    pub fn event_count(&self) -> usize {
        self.state.len() + self.timeline.len()
    }
}

/// One sync response: a set of room deltas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncBatch {
    /// Per-room deltas.
    pub rooms: Vec<RoomDelta>,
}

impl SyncBatch {
    /// A batch with no rooms.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when no room has anything to apply.
    pub fn is_empty(&self) -> bool {
        self.rooms.iter().all(|r| r.event_count() == 0 && r.fully_read.is_none())
    }

    /// Total number of events in the batch.
    pub fn event_count(&self) -> usize {
        self.rooms.iter().map(RoomDelta::event_count).sum()
    }
}
