//! Proptest strategies for sync batches.
//!
//! Generated events come from a small pool of ids so that batches overlap,
//! repeat events and redact each other.

use proptest::prelude::*;
use roomline_protocol::{types, Event, EventId, Membership, RoomDelta, RoomId, SyncBatch, UserId};
use serde_json::json;

/// Rooms generated events may belong to.
pub const ROOMS: &[&str] = &["!alpha:example.org", "!beta:example.org"];

/// Senders of generated events.
pub const SENDERS: &[&str] = &["@alice:example.org", "@bob:example.org", "@me:example.org"];

/// Size of the event id pool per room.
pub const EVENT_POOL: usize = 24;

/// Pool event `index` of `room`.
///
/// Every index always yields the same event: every sixth one redacts the
/// event at half its index, every sixth (offset four) renames the room, the
/// rest are messages.
pub fn pool_event(room: &RoomId, index: usize) -> Event {
    let event_id = EventId::new(format!("${}-{}", room.as_str().trim_start_matches('!'), index));
    let sender = UserId::from(SENDERS[index % SENDERS.len()]);
    let ts = 1_700_000_000_000 + index as u64;
    match index % 6 {
        5 => {
            let target = EventId::new(format!(
                "${}-{}",
                room.as_str().trim_start_matches('!'),
                index / 2
            ));
            Event::new(
                event_id,
                room.clone(),
                sender,
                types::ROOM_REDACTION,
                json!({"redacts": target.as_str()}),
            )
            .with_redacts(target)
            .with_timestamp(ts)
        }
        4 => Event::new(
            event_id,
            room.clone(),
            sender,
            types::ROOM_NAME,
            json!({"name": format!("name {index}")}),
        )
        .with_state_key("")
        .with_timestamp(ts),
        _ => Event::new(
            event_id,
            room.clone(),
            sender,
            types::ROOM_MESSAGE,
            json!({"msgtype": "m.text", "body": format!("message {index}")}),
        )
        .with_timestamp(ts),
    }
}

/// Strategy for one pool event of `room`.
pub fn arb_pool_event(room: RoomId) -> impl Strategy<Value = Event> {
    (0..EVENT_POOL).prop_map(move |index| pool_event(&room, index))
}

/// Strategy for a joined-room delta of up to `max_events` pool events.
pub fn arb_room_delta(max_events: usize) -> impl Strategy<Value = RoomDelta> {
    (0..ROOMS.len())
        .prop_flat_map(move |room| {
            let room_id = RoomId::from(ROOMS[room]);
            (
                Just(room_id.clone()),
                prop::collection::vec(arb_pool_event(room_id), 0..=max_events),
            )
        })
        .prop_map(|(room_id, timeline)| {
            let mut delta = RoomDelta::new(room_id, Membership::Joined);
            delta.timeline = timeline;
            delta
        })
}

/// Strategy for a batch of up to `max_rooms` deltas.
pub fn arb_sync_batch(max_rooms: usize, max_events: usize) -> impl Strategy<Value = SyncBatch> {
    prop::collection::vec(arb_room_delta(max_events), 0..=max_rooms)
        .prop_map(|rooms| SyncBatch { rooms })
}

/// Strategy for a sequence of batches.
pub fn arb_batches(max_batches: usize) -> impl Strategy<Value = Vec<SyncBatch>> {
    prop::collection::vec(arb_sync_batch(2, 8), 1..=max_batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_events_are_valid_and_stable() {
        let room = RoomId::from(ROOMS[0]);
        for index in 0..EVENT_POOL {
            let a = pool_event(&room, index);
            let b = pool_event(&room, index);
            assert_eq!(a, b);
            assert!(a.validate().is_ok(), "{index}: {:?}", a.validate());
        }
    }

    proptest! {
        #[test]
        fn generated_batches_stay_in_their_rooms(batch in arb_sync_batch(3, 6)) {
            for delta in &batch.rooms {
                for event in &delta.timeline {
                    prop_assert_eq!(&event.room_id, &delta.room_id);
                }
            }
        }
    }
}
