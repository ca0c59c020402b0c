//! Local echo reconciliation.

use roomline_protocol::{types, DecryptionResult, TransactionId};
use roomline_store::EchoStatus;
use roomline_testkit::prelude::*;

const ME: &str = "@me:example.org";
const BOB: &str = "@bob:example.org";

#[test]
fn server_copy_confirms_the_echo_in_place() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    let sent = room.sent_message(ME, "hello", "txn-1");

    let echo = store
        .insert_local_event(sent.clone(), TransactionId::from("txn-1"))
        .unwrap();
    assert_eq!(echo.echo, Some(EchoStatus::Pending(TransactionId::from("txn-1"))));

    let report = store
        .apply_sync_batch(&batch(vec![joined(&room.id, vec![sent.clone()])]), &cursor("s1"))
        .unwrap();
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.inserted, 0);

    let page = store.get_timeline(&room.id, None, 10).unwrap();
    assert_eq!(page.events.len(), 1);
    assert_eq!(page.events[0].position, echo.position);
    assert_eq!(
        page.events[0].echo,
        Some(EchoStatus::Confirmed(TransactionId::from("txn-1")))
    );
}

#[test]
fn echo_moves_behind_events_that_arrived_first() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    let sent = room.sent_message(ME, "mine", "txn-1");
    store
        .insert_local_event(sent.clone(), TransactionId::from("txn-1"))
        .unwrap();

    let other = room.message(BOB, "theirs");
    store
        .apply_sync_batch(
            &batch(vec![joined(&room.id, vec![other.clone(), sent.clone()])]),
            &cursor("s1"),
        )
        .unwrap();

    let page = store.get_timeline(&room.id, None, 10).unwrap();
    let ids: Vec<_> = page.events.iter().map(|e| e.event_id().clone()).collect();
    assert_eq!(ids, vec![sent.event_id.clone(), other.event_id.clone()]);
    assert!(page.events[0].position > page.events[1].position);
}

#[test]
fn echo_matched_by_transaction_id_when_ids_differ() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    let local = room.message(ME, "draft");
    store
        .insert_local_event(local.clone(), TransactionId::from("txn-9"))
        .unwrap();

    let server = room.sent_message(ME, "draft", "txn-9");
    let report = store
        .apply_sync_batch(&batch(vec![joined(&room.id, vec![server.clone()])]), &cursor("s1"))
        .unwrap();
    assert_eq!(report.reconciled, 1);

    assert!(store.get_event(&room.id, &local.event_id).is_none());
    let page = store.get_timeline(&room.id, None, 10).unwrap();
    assert_eq!(page.events.len(), 1);
    assert_eq!(page.events[0].event_id(), &server.event_id);
}

#[test]
fn sync_first_makes_the_echo_a_no_op() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    let sent = room.sent_message(ME, "raced", "txn-2");
    store
        .apply_sync_batch(&batch(vec![joined(&room.id, vec![sent.clone()])]), &cursor("s1"))
        .unwrap();

    let row = store
        .insert_local_event(sent.clone(), TransactionId::from("txn-2"))
        .unwrap();
    assert_eq!(row.echo, None);
    assert_eq!(store.get_timeline(&room.id, None, 10).unwrap().events.len(), 1);
}

#[test]
fn repeated_local_insert_is_idempotent() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    let sent = room.message(ME, "twice");
    let first = store
        .insert_local_event(sent.clone(), TransactionId::from("txn-3"))
        .unwrap();
    let second = store
        .insert_local_event(sent, TransactionId::from("txn-3"))
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(store.get_timeline(&room.id, None, 10).unwrap().events.len(), 1);
}

#[test]
fn encrypted_server_copy_keeps_the_echo_plaintext() {
    let store = TestStore::memory(ME);
    let mut room = RoomFixture::new("!room:example.org");
    let plaintext = room.message(ME, "for your eyes");
    store
        .insert_local_event(plaintext.clone(), TransactionId::from("txn-4"))
        .unwrap();

    let mut server = room.encrypted(ME, "sess-mine");
    server.event_id = plaintext.event_id.clone();
    server.txn_id = Some(TransactionId::from("txn-4"));
    let report = store
        .apply_sync_batch(&batch(vec![joined(&room.id, vec![server.clone()])]), &cursor("s1"))
        .unwrap();
    assert!(report.encrypted.is_empty());

    let view = store.get_event(&room.id, &server.event_id).unwrap();
    assert_eq!(view.event.event_type, types::ROOM_ENCRYPTED);
    assert!(matches!(
        view.decryption,
        Some(DecryptionResult::Decrypted { ref event_type, .. }) if event_type == types::ROOM_MESSAGE
    ));
    assert_eq!(view.body(), Some("for your eyes"));
    assert!(store.undecrypted_events().is_empty());
}
