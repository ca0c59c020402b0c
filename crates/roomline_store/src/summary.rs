//! Room summary computation.

use crate::registry::EventTypeRegistry;
use crate::tables::{RoomTables, StoredEvent};
use roomline_protocol::{types, Membership, RoomId, RoomSummary, UserId};
use serde_json::Value;

/// Derives a [`RoomSummary`] from a room's tables.
///
/// The result depends only on table contents, so computing it twice gives
/// the same summary.
pub struct SummaryBuilder<'a> {
    own_user: &'a UserId,
    registry: &'a EventTypeRegistry,
}

impl<'a> SummaryBuilder<'a> {
    /// Builder for the account `own_user`.
    pub fn new(own_user: &'a UserId, registry: &'a EventTypeRegistry) -> Self {
        Self { own_user, registry }
    }

    /// Computes the summary of `room`.
    pub fn compute(&self, room_id: &RoomId, room: &RoomTables) -> RoomSummary {
        let mut summary = RoomSummary::empty(room_id.clone());
        let marker = room.read_marker_position();

        summary.last_activity_ts = room
            .last_position()
            .and_then(|pos| room.slots.get(&pos))
            .and_then(|id| room.event(id))
            .map_or(0, |row| row.event.origin_server_ts);

        for (position, event_id) in room.slots.iter().rev() {
            let Some(row) = room.event(event_id) else {
                continue;
            };
            let countable = self.is_countable(room, row);
            if countable && summary.last_message.is_none() {
                summary.last_message = Some(event_id.clone());
            }

            let already_read = marker.is_some_and(|m| *position <= m);
            if already_read {
                if summary.last_message.is_some() {
                    break;
                }
                continue;
            }

            if countable && &row.event.sender != self.own_user {
                summary.unread_count += 1;
                if self.mentions_me(row) {
                    summary.highlight_count += 1;
                }
            }
        }

        summary.is_encrypted = room.state_event_id(types::ROOM_ENCRYPTION, "").is_some();
        summary.name = room
            .state_event_id(types::ROOM_NAME, "")
            .filter(|id| room.redaction_of(id).is_none())
            .and_then(|id| room.event(id))
            .and_then(|row| row.event.content.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let members = room
            .state
            .range((types::ROOM_MEMBER.to_string(), String::new())..)
            .take_while(|((event_type, _), _)| event_type == types::ROOM_MEMBER);
        for ((_, state_key), event_id) in members {
            let membership = room.event(event_id).and_then(membership_of);
            if membership == Some(Membership::Joined) {
                summary.joined_member_count += 1;
            }
            if state_key == self.own_user.as_str() {
                summary.own_membership = membership;
            }
        }
        if summary.own_membership.is_none() {
            summary.own_membership = room.membership;
        }

        summary
    }

    fn is_countable(&self, room: &RoomTables, row: &StoredEvent) -> bool {
        room.redaction_of(&row.event.event_id).is_none()
            && self.registry.handler(row.effective_type()).is_countable()
    }

    fn mentions_me(&self, row: &StoredEvent) -> bool {
        let content = row.effective_content();
        let listed = content
            .pointer("/m.mentions/user_ids")
            .and_then(Value::as_array)
            .is_some_and(|ids| ids.iter().any(|id| id.as_str() == Some(self.own_user.as_str())));
        if listed {
            return true;
        }
        let Some(body) = content.get("body").and_then(Value::as_str) else {
            return false;
        };
        let body = body.to_lowercase();
        mentions(&body, &self.own_user.as_str().to_lowercase())
            || mentions(&body, &self.own_user.localpart().to_lowercase())
    }
}

/// True when `name` appears in `body` as a whole word.
fn mentions(body: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    body.match_indices(name).any(|(at, _)| {
        let before = body[..at].chars().next_back();
        let after = body[at + name.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

fn membership_of(row: &StoredEvent) -> Option<Membership> {
    row.event
        .content
        .get("membership")
        .and_then(Value::as_str)
        .and_then(Membership::from_content)
}
