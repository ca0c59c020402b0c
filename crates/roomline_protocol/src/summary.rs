//! Computed per-room summary.

use crate::ids::{EventId, RoomId};
use crate::sync::Membership;
use serde::{Deserialize, Serialize};

/// What a room list shows for one room.
///
/// Always derived from stored events; never edited directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    /// The room.
    pub room_id: RoomId,
    /// Countable events after the read marker.
    pub unread_count: u64,
    /// Unread events that mention the account.
    pub highlight_count: u64,
    /// Most recent countable event.
    pub last_message: Option<EventId>,
    /// True once `m.room.encryption` is in state.
    pub is_encrypted: bool,
    /// Members whose current membership is `join`.
    pub joined_member_count: u64,
    /// Timestamp of the newest stored event.
    pub last_activity_ts: u64,
    /// `m.room.name`, if set.
    pub name: Option<String>,
    /// The account's own membership.
    pub own_membership: Option<Membership>,
}

impl RoomSummary {
    /// An empty summary.
    pub fn empty(room_id: RoomId) -> Self {
        Self {
            room_id,
            unread_count: 0,
            highlight_count: 0,
            last_message: None,
            is_encrypted: false,
            joined_member_count: 0,
            last_activity_ts: 0,
            name: None,
            own_membership: None,
        }
    }
}
