//! Property tests over generated batch sequences.

use proptest::prelude::*;
use roomline_protocol::{EventId, RoomId, SyncBatch};
use roomline_store::EventStore;
use roomline_testkit::prelude::*;
use std::collections::BTreeMap;

fn apply_all(store: &EventStore, batches: &[SyncBatch]) {
    for (n, batch) in batches.iter().enumerate() {
        store
            .apply_sync_batch(batch, &cursor(&format!("s{n}")))
            .unwrap();
    }
}

/// Every stored event id with its redaction flag, per room.
fn contents(store: &EventStore) -> BTreeMap<RoomId, BTreeMap<EventId, bool>> {
    store
        .rooms()
        .into_iter()
        .map(|room_id| {
            let page = store.get_timeline(&room_id, None, usize::MAX).unwrap();
            let events = page
                .events
                .into_iter()
                .map(|e| (e.event_id().clone(), e.is_redacted()))
                .collect();
            (room_id, events)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn reapplying_changes_nothing(batches in arb_batches(4)) {
        let store = TestStore::memory("@me:example.org");
        apply_all(&store, &batches);
        let before = contents(&store);

        for batch in &batches {
            let report = store.apply_sync_batch(batch, &cursor("again")).unwrap();
            prop_assert_eq!(report.inserted, 0);
            prop_assert_eq!(report.duplicates, batch.event_count());
        }
        prop_assert_eq!(contents(&store), before);
    }

    #[test]
    fn positions_are_unique_and_descending(batches in arb_batches(4)) {
        let store = TestStore::memory("@me:example.org");
        apply_all(&store, &batches);

        for room_id in store.rooms() {
            let page = store.get_timeline(&room_id, None, usize::MAX).unwrap();
            for pair in page.events.windows(2) {
                prop_assert!(pair[0].position > pair[1].position);
            }
        }
    }

    #[test]
    fn redactions_apply_regardless_of_arrival_order(batches in arb_batches(4)) {
        let forward = TestStore::memory("@me:example.org");
        apply_all(&forward, &batches);

        let mut reversed_batches = batches.clone();
        reversed_batches.reverse();
        for batch in &mut reversed_batches {
            for delta in &mut batch.rooms {
                delta.timeline.reverse();
            }
        }
        let backward = TestStore::memory("@me:example.org");
        apply_all(&backward, &reversed_batches);

        prop_assert_eq!(contents(&forward), contents(&backward));
    }
}
