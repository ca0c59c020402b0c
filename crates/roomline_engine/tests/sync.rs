//! Sync loop behavior against a scripted transport.

use roomline_engine::{
    AccountContext, EngineConfig, EngineError, Notification, RetryConfig, SyncConfig, SyncState,
    TransportError,
};
use roomline_protocol::{DeviceId, UserId};
use roomline_store::{EventStore, StoreConfig};
use roomline_testkit::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const ME: &str = "@me:example.org";
const BOB: &str = "@bob:example.org";

fn fast_retries() -> EngineConfig {
    EngineConfig::new().with_sync(SyncConfig::new().with_retry(
        RetryConfig::new(Duration::from_millis(10), Duration::from_millis(40)).with_jitter(false),
    ))
}

fn is_status(n: &Notification, want: SyncState) -> bool {
    matches!(n, Notification::SyncStatus { state, .. } if *state == want)
}

#[tokio::test]
async fn batches_are_applied_and_cursor_advances() {
    init_test_tracing();
    let mut h = EngineHarness::start(ME, fast_retries()).await;
    let mut room = RoomFixture::new("!room:example.org");

    h.transport.push_sync(
        batch(vec![joined(
            &room.id.clone(),
            vec![
                room.create(BOB),
                room.member(ME, roomline_protocol::Membership::Joined),
                room.message(BOB, "hello"),
            ],
        )]),
        cursor("s1"),
    );
    let done = h
        .wait_for(|n| matches!(n, Notification::SyncComplete { .. }))
        .await;
    match done {
        Notification::SyncComplete { cursor: c, rooms } => {
            assert_eq!(c, cursor("s1"));
            assert_eq!(rooms.len(), 1);
            assert_eq!(rooms[0].room_id, room.id);
            assert_eq!(rooms[0].unread_count, 1);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.store().sync_cursor(), Some(cursor("s1")));

    h.sync(batch(vec![joined(&room.id.clone(), vec![room.message(BOB, "again")])]), cursor("s2"))
        .await;
    assert_eq!(h.store().get_timeline(&room.id, None, 10).unwrap().events.len(), 4);

    let requests = h.transport.sync_requests();
    assert_eq!(requests[0], None);
    assert_eq!(requests[1], Some(cursor("s1")));

    let stats = h.engine.stats();
    assert_eq!(stats.cycles_completed, 2);
    assert_eq!(stats.events_applied, 4);
    assert!(stats.last_sync_time.is_some());
}

#[tokio::test]
async fn resumes_from_the_stored_cursor() {
    let store = Arc::new(EventStore::open_in_memory(UserId::from(ME)).unwrap());
    let mut room = RoomFixture::new("!room:example.org");
    store
        .apply_sync_batch(&batch(vec![joined(&room.id.clone(), vec![room.message(BOB, "old")])]), &cursor("s7"))
        .unwrap();

    let mut h = EngineHarness::start_with_store(store, fast_retries()).await;
    h.sync(batch(vec![]), cursor("s8")).await;
    assert_eq!(h.transport.sync_requests()[0], Some(cursor("s7")));
}

#[tokio::test]
async fn retryable_failures_back_off_and_recover() {
    let mut h = EngineHarness::start(ME, fast_retries()).await;
    h.transport
        .push_sync_error(TransportError::status(503, "unavailable"));
    h.transport.push_sync_error(TransportError::status(429, "slow down"));
    h.transport.push_sync_error(TransportError::network("connection reset"));

    let backoff = h.wait_for(|n| is_status(n, SyncState::Backoff)).await;
    match backoff {
        Notification::SyncStatus { error, .. } => {
            assert!(error.unwrap().contains("unavailable"));
        }
        other => panic!("unexpected {other:?}"),
    }

    h.sync(batch(vec![]), cursor("s1")).await;
    let stats = h.engine.stats();
    assert_eq!(stats.retries, 3);
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.last_error, None);
    assert_ne!(h.engine.sync_state(), SyncState::Failed);
}

#[tokio::test]
async fn auth_failure_halts_until_restarted() {
    let mut h = EngineHarness::start(ME, fast_retries()).await;
    h.transport
        .push_sync_error(TransportError::status(401, "unknown token"));

    let failed = h.wait_for(|n| is_status(n, SyncState::Failed)).await;
    match failed {
        Notification::SyncStatus { error, .. } => assert!(error.unwrap().contains("unknown token")),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.engine.sync_state(), SyncState::Failed);
    assert_eq!(h.engine.stats().failures, 1);

    // Halted: a queued batch is not requested until restart.
    h.transport.push_sync(batch(vec![]), cursor("s1"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.transport.pending_syncs(), 1);

    assert!(h.engine.restart_sync());
    h.wait_for(|n| matches!(n, Notification::SyncComplete { .. }))
        .await;
    assert_eq!(h.store().sync_cursor(), Some(cursor("s1")));
    assert!(!h.engine.restart_sync());
}

#[tokio::test]
async fn storage_failure_halts_and_keeps_cursor() {
    init_test_tracing();
    let (backend, switch) = FailingBackend::new();
    let store = Arc::new(
        EventStore::open_with_backend(UserId::from(ME), StoreConfig::default(), Box::new(backend))
            .unwrap(),
    );
    let mut h = EngineHarness::start_with_store(store, fast_retries()).await;
    let mut room = RoomFixture::new("!room:example.org");

    h.sync(batch(vec![joined(&room.id.clone(), vec![room.message(BOB, "first")])]), cursor("s1"))
        .await;

    let doomed = batch(vec![joined(&room.id.clone(), vec![room.message(BOB, "second")])]);
    switch.fail_now();
    h.transport.push_sync(doomed.clone(), cursor("s2"));
    h.wait_for(|n| is_status(n, SyncState::Failed)).await;
    assert_eq!(h.store().sync_cursor(), Some(cursor("s1")));
    assert_eq!(h.store().get_timeline(&room.id, None, 10).unwrap().events.len(), 1);

    // The server replays the same range after restart.
    switch.heal();
    h.transport.push_sync(doomed, cursor("s2"));
    assert!(h.engine.restart_sync());
    h.wait_for(|n| matches!(n, Notification::SyncComplete { cursor: c, .. } if *c == cursor("s2")))
        .await;

    let requests = h.transport.sync_requests();
    assert!(requests.iter().filter(|c| **c == Some(cursor("s1"))).count() >= 2);
    let bodies: Vec<_> = h
        .store()
        .get_timeline(&room.id, None, 10)
        .unwrap()
        .events
        .iter()
        .map(|e| e.body().unwrap().to_string())
        .collect();
    assert_eq!(bodies, vec!["second", "first"]);
}

#[tokio::test]
async fn shutdown_closes_the_store() {
    let h = EngineHarness::start(ME, fast_retries()).await;
    let store = Arc::clone(h.store());
    let dispatcher = h.engine.dispatcher().clone();

    h.engine.shutdown().await.unwrap();
    assert!(store.is_closed());

    let again = AccountContext::new(
        UserId::from(ME),
        DeviceId::from("OTHER"),
        Arc::clone(&store),
        EngineConfig::default(),
    );
    assert!(matches!(again, Err(EngineError::Shutdown)));

    let room = roomline_protocol::RoomId::from("!room:example.org");
    let err = dispatcher
        .send_message(roomline_engine::SendMessage::new(room, "too late"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Shutdown));
}
