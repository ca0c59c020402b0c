//! Decryption coordinator behavior with a scripted crypto engine.

use roomline_engine::{DecryptionConfig, EngineConfig, Notification, KEY_NEVER_ARRIVED};
use roomline_protocol::{DecryptionResult, UserId};
use roomline_store::EventStore;
use roomline_testkit::prelude::*;
use std::sync::Arc;

const ME: &str = "@me:example.org";
const BOB: &str = "@bob:example.org";

fn is_decrypted_batch(n: &Notification) -> bool {
    matches!(n, Notification::EventsDecrypted { .. })
}

#[tokio::test]
async fn key_arrival_decrypts_exactly_once() {
    init_test_tracing();
    let mut h = EngineHarness::start(ME, EngineConfig::default()).await;
    let mut room = RoomFixture::new("!room:example.org");
    let sealed = room.encrypted(BOB, "session-a");

    h.sync(batch(vec![joined(&room.id, vec![sealed.clone()])]), cursor("s1"))
        .await;
    let crypto = Arc::clone(&h.crypto);
    eventually(|| crypto.decrypt_calls() >= 1).await;
    eventually(|| h.engine.waiting_for_keys() == 1).await;
    assert_eq!(h.engine.pending_decryptions(), 1);
    let before = h.store().get_event(&room.id, &sealed.event_id).unwrap();
    assert!(before.decryption.is_none());

    h.crypto.release_key(&room.id, "session-a");
    match h.wait_for(is_decrypted_batch).await {
        Notification::EventsDecrypted {
            events,
            failed,
            summaries,
        } => {
            assert_eq!(events, vec![(room.id.clone(), sealed.event_id.clone())]);
            assert!(failed.is_empty());
            assert_eq!(summaries.len(), 1);
        }
        other => panic!("unexpected {other:?}"),
    }
    let after = h.store().get_event(&room.id, &sealed.event_id).unwrap();
    assert!(after.body().unwrap().starts_with("plaintext of ciphertext-"));
    assert_eq!(h.engine.pending_decryptions(), 0);
    assert_eq!(h.engine.waiting_for_keys(), 0);

    // The same event again, plus a second key notice: nothing new.
    h.crypto.release_key(&room.id, "session-a");
    h.transport
        .push_sync(batch(vec![joined(&room.id, vec![sealed])]), cursor("s2"));
    h.transport.push_sync(batch(vec![]), cursor("s3"));
    let mut later = Vec::new();
    loop {
        let n = h.wait_for(|_| true).await;
        if matches!(&n, Notification::SyncComplete { cursor: c, .. } if *c == cursor("s3")) {
            break;
        }
        later.push(n);
    }
    assert!(!later.iter().any(is_decrypted_batch));
    assert_eq!(h.crypto.decrypt_calls(), 2);
}

#[tokio::test]
async fn known_keys_decrypt_without_waiting() {
    let mut h = EngineHarness::start(ME, EngineConfig::default()).await;
    let mut room = RoomFixture::new("!room:example.org");
    h.crypto.know(&room.id, "session-a");
    let first = room.encrypted(BOB, "session-a");
    let second = room.encrypted(BOB, "session-a");

    h.transport.push_sync(
        batch(vec![joined(&room.id, vec![first.clone(), second.clone()])]),
        cursor("s1"),
    );
    let mut seen = Vec::new();
    while seen.len() < 2 {
        if let Notification::EventsDecrypted { events, .. } = h.wait_for(is_decrypted_batch).await {
            seen.extend(events);
        }
    }
    seen.sort();
    let mut expected = vec![
        (room.id.clone(), first.event_id),
        (room.id.clone(), second.event_id),
    ];
    expected.sort();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn corrupt_events_are_marked_undecryptable() {
    let mut h = EngineHarness::start(ME, EngineConfig::default()).await;
    let mut room = RoomFixture::new("!room:example.org");
    let bad = room.encrypted(BOB, "session-a");
    h.crypto.know(&room.id, "session-a");
    h.crypto.break_event(&bad.event_id);

    h.transport
        .push_sync(batch(vec![joined(&room.id, vec![bad.clone()])]), cursor("s1"));
    match h.wait_for(is_decrypted_batch).await {
        Notification::EventsDecrypted { events, failed, .. } => {
            assert!(events.is_empty());
            assert_eq!(failed, vec![(room.id.clone(), bad.event_id.clone())]);
        }
        other => panic!("unexpected {other:?}"),
    }
    let stored = h.store().get_event(&room.id, &bad.event_id).unwrap();
    assert!(matches!(
        stored.decryption,
        Some(DecryptionResult::Failed { ref reason }) if reason.contains("authentication")
    ));
}

#[tokio::test]
async fn missing_key_gives_up_after_retries() {
    let config = EngineConfig::new().with_decryption(
        DecryptionConfig::new()
            .with_retry_after_cycles(1)
            .with_max_key_attempts(2),
    );
    let mut h = EngineHarness::start(ME, config).await;
    let mut room = RoomFixture::new("!room:example.org");
    let sealed = room.encrypted(BOB, "never");

    h.sync(batch(vec![joined(&room.id, vec![sealed.clone()])]), cursor("s1"))
        .await;
    let crypto = Arc::clone(&h.crypto);
    eventually(|| crypto.decrypt_calls() >= 1).await;

    let store = Arc::clone(h.store());
    let gave_up = || {
        matches!(
            store.get_event(&room.id, &sealed.event_id).and_then(|e| e.decryption),
            Some(DecryptionResult::Failed { reason }) if reason == KEY_NEVER_ARRIVED
        )
    };
    assert!(!gave_up());
    h.sync(batch(vec![]), cursor("s2")).await;
    eventually(gave_up).await;
    assert_eq!(h.crypto.decrypt_calls(), 2);
    assert_eq!(h.engine.pending_decryptions(), 0);
}

#[tokio::test]
async fn undecrypted_events_are_recovered_on_start() {
    let store = Arc::new(EventStore::open_in_memory(UserId::from(ME)).unwrap());
    let mut room = RoomFixture::new("!room:example.org");
    let sealed = room.encrypted(BOB, "session-a");
    store
        .apply_sync_batch(&batch(vec![joined(&room.id, vec![sealed.clone()])]), &cursor("s1"))
        .unwrap();

    let mut h = EngineHarness::start_with_store(store, EngineConfig::default()).await;
    assert_eq!(h.engine.pending_decryptions(), 1);
    assert_eq!(h.crypto.listener_count(), 1);

    h.crypto.release_key(&room.id, "session-a");
    match h.wait_for(is_decrypted_batch).await {
        Notification::EventsDecrypted { events, .. } => {
            assert_eq!(events, vec![(room.id.clone(), sealed.event_id)]);
        }
        other => panic!("unexpected {other:?}"),
    }
}
