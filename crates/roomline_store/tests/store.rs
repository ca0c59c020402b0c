//! Integration tests for batch application and the read APIs.

use roomline_protocol::{
    types, DecryptionResult, Event, EventId, Membership, RoomId, UserId,
};
use roomline_store::{StoreError, TimelineEnd, TimelinePosition};
use roomline_testkit::prelude::*;
use serde_json::json;

const ME: &str = "@me:example.org";
const BOB: &str = "@bob:example.org";

#[test]
fn applying_a_batch_twice_stores_nothing_new() {
    init_test_tracing();
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    let events = vec![
        room.create(BOB),
        room.member(BOB, Membership::Joined),
        room.message(BOB, "one"),
        room.message(BOB, "two"),
    ];
    let batch = batch(vec![joined(&room.id, events)]);

    let first = store.apply_sync_batch(&batch, &cursor("s1")).unwrap();
    assert_eq!(first.inserted, 4);
    let before = store.get_timeline(&room.id, None, 50).unwrap();

    let second = store.apply_sync_batch(&batch, &cursor("s2")).unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 4);
    assert!(second.rooms.is_empty());
    assert_eq!(store.get_timeline(&room.id, None, 50).unwrap(), before);
    assert_eq!(store.sync_cursor(), Some(cursor("s2")));
}

#[test]
fn positions_increase_with_insertion_and_reads_are_stable() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");

    for n in 0..3 {
        let events = vec![room.message(BOB, &format!("a{n}")), room.message(BOB, &format!("b{n}"))];
        store
            .apply_sync_batch(&batch(vec![joined(&room.id, events)]), &cursor(&format!("s{n}")))
            .unwrap();
    }

    let page = store.get_timeline(&room.id, None, 100).unwrap();
    assert_eq!(page.events.len(), 6);
    let positions: Vec<u64> = page.events.iter().map(|e| e.position.0).collect();
    assert_eq!(positions, vec![6, 5, 4, 3, 2, 1]);
    assert_eq!(page.events[0].body(), Some("b2"));

    let again = store.get_timeline(&room.id, None, 100).unwrap();
    assert_eq!(page, again);
}

#[test]
fn pagination_walks_back_to_the_create_event() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    let mut events = vec![room.create(BOB)];
    for n in 0..5 {
        events.push(room.message(BOB, &format!("m{n}")));
    }
    store
        .apply_sync_batch(&batch(vec![joined(&room.id, events)]), &cursor("s1"))
        .unwrap();

    let mut before = None;
    let mut seen = Vec::new();
    loop {
        let page = store.get_timeline(&room.id, before, 2).unwrap();
        seen.extend(page.events.iter().map(|e| e.position));
        match page.end {
            TimelineEnd::More { next_before } => before = Some(next_before),
            TimelineEnd::StartOfHistory => break,
            TimelineEnd::NeedsBackfill { .. } => panic!("room starts with its create event"),
        }
    }
    let expected: Vec<TimelinePosition> = (1..=6).rev().map(TimelinePosition).collect();
    assert_eq!(seen, expected);
}

#[test]
fn truncated_history_asks_for_backfill() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    let mut delta = joined(&room.id.clone(), vec![room.message(BOB, "late joiner")]);
    delta.limited = true;
    delta.prev_batch = Some("t-older".into());
    store.apply_sync_batch(&batch(vec![delta]), &cursor("s1")).unwrap();

    let page = store.get_timeline(&room.id, None, 10).unwrap();
    assert_eq!(page.events.len(), 1);
    assert_eq!(
        page.end,
        TimelineEnd::NeedsBackfill {
            prev_batch: Some("t-older".into())
        }
    );
}

#[test]
fn unknown_room_reads() {
    let store = TestStore::memory(ME);
    let missing = RoomId::from("!nowhere:example.org");
    assert!(matches!(
        store.get_timeline(&missing, None, 10),
        Err(StoreError::UnknownRoom(_))
    ));
    assert!(store.get_room_summary(&missing).is_none());
    assert!(store.rooms().is_empty());
}

#[test]
fn current_state_follows_the_newest_event() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    let first = room.name(BOB, "Lobby");
    let second = room.name(BOB, "Hangout");
    store
        .apply_sync_batch(
            &batch(vec![joined_with_state(&room.id, vec![first], vec![second.clone()])]),
            &cursor("s1"),
        )
        .unwrap();

    let current = store
        .get_current_state(&room.id, types::ROOM_NAME, "")
        .unwrap()
        .unwrap();
    assert_eq!(current.event_id(), &second.event_id);
    assert_eq!(
        store.get_room_summary(&room.id).unwrap().name.as_deref(),
        Some("Hangout")
    );
    assert!(store
        .get_current_state(&room.id, "m.room.topic", "")
        .unwrap()
        .is_none());
}

#[test]
fn membership_state_feeds_the_summary() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    let state = vec![
        room.create(BOB),
        room.member(BOB, Membership::Joined),
        room.member(ME, Membership::Joined),
        room.member("@carol:example.org", Membership::Left),
    ];
    store
        .apply_sync_batch(&batch(vec![joined_with_state(&room.id, state, vec![])]), &cursor("s1"))
        .unwrap();

    let summary = store.get_room_summary(&room.id).unwrap();
    assert_eq!(summary.joined_member_count, 2);
    assert_eq!(summary.own_membership, Some(Membership::Joined));
    assert_eq!(store.own_membership(&room.id), Some(Membership::Joined));
}

#[test]
fn redaction_before_its_target_still_applies() {
    let mut room = RoomFixture::new("!room:example.org");
    let target = room.message(BOB, "oops");
    let redaction = room.redaction(BOB, &target.event_id);

    let in_order = TestStore::memory(ME);
    in_order
        .apply_sync_batch(&batch(vec![joined(&room.id, vec![target.clone()])]), &cursor("s1"))
        .unwrap();
    in_order
        .apply_sync_batch(&batch(vec![joined(&room.id, vec![redaction.clone()])]), &cursor("s2"))
        .unwrap();

    let reversed = TestStore::memory(ME);
    reversed
        .apply_sync_batch(&batch(vec![joined(&room.id, vec![redaction.clone()])]), &cursor("s1"))
        .unwrap();
    reversed
        .apply_sync_batch(&batch(vec![joined(&room.id, vec![target.clone()])]), &cursor("s2"))
        .unwrap();

    for store in [&in_order, &reversed] {
        let view = store.get_event(&room.id, &target.event_id).unwrap();
        assert_eq!(view.redacted_by.as_ref(), Some(&redaction.event_id));
        assert_eq!(view.event.content, json!({}));
        assert_eq!(view.body(), None);
    }
}

#[test]
fn competing_redactions_keep_the_later_one() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    let target = room.message(BOB, "spam");
    let early = room.redaction(BOB, &target.event_id);
    let late = room.redaction("@mod:example.org", &target.event_id);

    let report = store
        .apply_sync_batch(
            &batch(vec![joined(&room.id, vec![target.clone(), early.clone(), late.clone()])]),
            &cursor("s1"),
        )
        .unwrap();

    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].kept, late.event_id);
    assert_eq!(report.conflicts[0].superseded, early.event_id);
    let view = store.get_event(&room.id, &target.event_id).unwrap();
    assert_eq!(view.redacted_by, Some(late.event_id));
}

#[test]
fn redacted_state_keeps_preserved_keys() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    let create = room.create(BOB);
    let name = room.name(BOB, "Secret plans");
    let redact_create = room.redaction(BOB, &create.event_id);
    let redact_name = room.redaction(BOB, &name.event_id);
    store
        .apply_sync_batch(
            &batch(vec![joined(
                &room.id,
                vec![create.clone(), name, redact_create, redact_name],
            )]),
            &cursor("s1"),
        )
        .unwrap();

    let create_view = store.get_event(&room.id, &create.event_id).unwrap();
    assert_eq!(create_view.event.content, json!({"creator": BOB, "room_version": "10"}));
    assert_eq!(store.get_room_summary(&room.id).unwrap().name, None);
}

#[test]
fn malformed_events_are_skipped_not_fatal() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    let good = room.message(BOB, "fine");
    let no_sender = Event::new(
        EventId::from("$nosender"),
        room.id.clone(),
        UserId::from(""),
        types::ROOM_MESSAGE,
        json!({"body": "who?"}),
    );
    let mut elsewhere = RoomFixture::new("!other:example.org");
    let stray = elsewhere.message(BOB, "wrong room");

    let report = store
        .apply_sync_batch(
            &batch(vec![joined(&room.id, vec![no_sender, good.clone(), stray])]),
            &cursor("s1"),
        )
        .unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(report.skipped[0].event_id, EventId::from("$nosender"));
    assert!(store.get_event(&room.id, &good.event_id).is_some());
    assert_eq!(store.sync_cursor(), Some(cursor("s1")));
}

#[test]
fn read_marker_moves_forward_only() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    let m1 = room.message(BOB, "one");
    let m2 = room.message(BOB, "two");
    let mine = room.message(ME, "mine");
    let m3 = room.message(BOB, "three");
    store
        .apply_sync_batch(
            &batch(vec![joined(&room.id, vec![m1.clone(), m2.clone(), mine, m3.clone()])]),
            &cursor("s1"),
        )
        .unwrap();
    assert_eq!(store.get_room_summary(&room.id).unwrap().unread_count, 3);

    let summary = store.set_read_marker(&room.id, &m2.event_id).unwrap();
    assert_eq!(summary.unread_count, 1);
    assert_eq!(summary.last_message, Some(m3.event_id.clone()));

    let summary = store.set_read_marker(&room.id, &m1.event_id).unwrap();
    assert_eq!(summary.unread_count, 1);

    assert!(matches!(
        store.set_read_marker(&room.id, &EventId::from("$missing")),
        Err(StoreError::UnknownEvent { .. })
    ));
}

#[test]
fn fully_read_from_sync_updates_unread() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    let m1 = room.message(BOB, "one");
    let m2 = room.message(BOB, "two");
    let mut delta = joined(&room.id, vec![m1.clone(), m2]);
    delta.fully_read = Some(m1.event_id.clone());
    store.apply_sync_batch(&batch(vec![delta]), &cursor("s1")).unwrap();

    assert_eq!(store.get_room_summary(&room.id).unwrap().unread_count, 1);
}

#[test]
fn mentions_count_as_highlights() {
    let store = TestStore::memory("@carol:example.org");
    let mut room = RoomFixture::new("!room:example.org");
    let plain = room.message(BOB, "lunch?");
    let by_name = room.message(BOB, "Carol, lunch?");
    let mut listed = room.message(BOB, "ping");
    listed.content["m.mentions"] = json!({"user_ids": ["@carol:example.org"]});
    store
        .apply_sync_batch(&batch(vec![joined(&room.id, vec![plain, by_name, listed])]), &cursor("s1"))
        .unwrap();

    let summary = store.get_room_summary(&room.id).unwrap();
    assert_eq!(summary.unread_count, 3);
    assert_eq!(summary.highlight_count, 2);
}

#[test]
fn short_localpart_inside_a_word_is_not_a_mention() {
    let store = TestStore::memory("@al:example.org");
    let mut room = RoomFixture::new("!room:example.org");
    let inside = room.message(BOB, "totally normal message");
    let named = room.message(BOB, "thanks, Al!");
    let handle = room.message(BOB, "cc @al:example.org.");
    store
        .apply_sync_batch(&batch(vec![joined(&room.id, vec![inside, named, handle])]), &cursor("s1"))
        .unwrap();

    let summary = store.get_room_summary(&room.id).unwrap();
    assert_eq!(summary.unread_count, 3);
    assert_eq!(summary.highlight_count, 2);
}

#[test]
fn decryption_results_attach_once() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    let encrypted = room.encrypted(BOB, "sess-1");
    let report = store
        .apply_sync_batch(
            &batch(vec![joined(&room.id.clone(), vec![room.encryption(BOB), encrypted.clone()])]),
            &cursor("s1"),
        )
        .unwrap();
    assert_eq!(report.encrypted, vec![(room.id.clone(), encrypted.event_id.clone())]);
    assert!(store.is_encrypted(&room.id));
    assert_eq!(store.undecrypted_events(), vec![encrypted.clone()]);
    assert_eq!(store.get_room_summary(&room.id).unwrap().unread_count, 0);

    let plaintext = DecryptionResult::Decrypted {
        event_type: types::ROOM_MESSAGE.into(),
        content: json!({"msgtype": "m.text", "body": "secret"}),
    };
    assert!(store
        .attach_decryption(&room.id, &encrypted.event_id, plaintext.clone())
        .unwrap());
    assert!(!store
        .attach_decryption(&room.id, &encrypted.event_id, plaintext.clone())
        .unwrap());

    let view = store.get_event(&room.id, &encrypted.event_id).unwrap();
    assert_eq!(view.decryption, Some(plaintext));
    assert_eq!(view.body(), Some("secret"));
    assert!(store.undecrypted_events().is_empty());
    let summary = store.get_room_summary(&room.id).unwrap();
    assert_eq!(summary.unread_count, 1);
    assert_eq!(summary.last_message, Some(encrypted.event_id));
    assert_eq!(store.stats().decryptions_attached, 1);
}

#[test]
fn permanent_failure_can_be_replaced_by_plaintext() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    let encrypted = room.encrypted(BOB, "sess-1");
    let plain = room.message(BOB, "not encrypted");
    store
        .apply_sync_batch(
            &batch(vec![joined(&room.id, vec![encrypted.clone(), plain.clone()])]),
            &cursor("s1"),
        )
        .unwrap();

    let failed = DecryptionResult::Failed {
        reason: "unknown session".into(),
    };
    let report = store
        .attach_decryptions(vec![
            (room.id.clone(), encrypted.event_id.clone(), failed.clone()),
            (room.id.clone(), plain.event_id.clone(), failed.clone()),
            (room.id.clone(), EventId::from("$missing"), failed.clone()),
        ])
        .unwrap();
    assert_eq!(report.attached, vec![(room.id.clone(), encrypted.event_id.clone())]);
    assert_eq!(report.skipped.len(), 2);
    assert!(!store
        .attach_decryption(&room.id, &encrypted.event_id, failed)
        .unwrap());

    let plaintext = DecryptionResult::Decrypted {
        event_type: types::ROOM_MESSAGE.into(),
        content: json!({"body": "late key"}),
    };
    assert!(store
        .attach_decryption(&room.id, &encrypted.event_id, plaintext)
        .unwrap());
}

#[test]
fn closed_store_refuses_writes() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    store.close().unwrap();
    assert!(store.is_closed());
    let result = store.apply_sync_batch(
        &batch(vec![joined(&room.id.clone(), vec![room.message(BOB, "late")])]),
        &cursor("s1"),
    );
    assert!(matches!(result, Err(StoreError::Closed)));
    assert_eq!(store.sync_cursor(), None);
}
