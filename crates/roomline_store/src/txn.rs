//! Write transactions.
//!
//! A transaction holds the write sections of every room it touches, taken in
//! lexicographic room order. Changes are applied to the tables as they are
//! made and remembered together with their undo, so a commit only has to
//! write the journal. A transaction dropped without
//! [`mark_committed`](WriteTxn::mark_committed) restores the tables exactly.

use crate::error::{StoreError, StoreResult};
use crate::tables::{Mutation, RoomMutation, RoomTables};
use parking_lot::{RwLock, RwLockWriteGuard};
use roomline_protocol::{RoomId, SyncCursor};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Room handles locked by one transaction, sorted by room id.
pub(crate) type RoomHandles = Vec<(RoomId, Arc<RwLock<RoomTables>>)>;

pub(crate) struct WriteTxn<'a> {
    rooms: BTreeMap<RoomId, RwLockWriteGuard<'a, RoomTables>>,
    log: Vec<Mutation>,
    undo: Vec<(RoomId, RoomMutation)>,
    touched: BTreeSet<RoomId>,
    cursor: Option<SyncCursor>,
    committed: bool,
}

impl<'a> WriteTxn<'a> {
    /// Locks every handle in order.
    pub fn begin(handles: &'a RoomHandles) -> Self {
        let mut rooms = BTreeMap::new();
        for (room_id, handle) in handles {
            rooms.insert(room_id.clone(), handle.write());
        }
        Self {
            rooms,
            log: Vec::new(),
            undo: Vec::new(),
            touched: BTreeSet::new(),
            cursor: None,
            committed: false,
        }
    }

    /// Read access to a locked room, including this transaction's changes.
    pub fn room(&self, room_id: &RoomId) -> StoreResult<&RoomTables> {
        self.rooms
            .get(room_id)
            .map(|guard| &**guard)
            .ok_or_else(|| StoreError::UnknownRoom(room_id.clone()))
    }

    /// Applies a change to a locked room.
    pub fn apply(&mut self, room_id: &RoomId, change: RoomMutation) -> StoreResult<()> {
        let guard = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| StoreError::UnknownRoom(room_id.clone()))?;
        let undo = guard.apply(change.clone());
        self.undo.push((room_id.clone(), undo));
        self.log.push(Mutation::Room {
            room_id: room_id.clone(),
            change,
        });
        self.touched.insert(room_id.clone());
        Ok(())
    }

    /// Moves the sync cursor as part of this transaction.
    pub fn set_cursor(&mut self, cursor: SyncCursor) {
        self.log.push(Mutation::Cursor(cursor.clone()));
        self.cursor = Some(cursor);
    }

    /// Rooms changed so far, in order.
    pub fn touched(&self) -> Vec<RoomId> {
        self.touched.iter().cloned().collect()
    }

    /// Everything to write to the journal.
    pub fn mutations(&self) -> &[Mutation] {
        &self.log
    }

    /// New cursor, if the transaction moves it.
    pub fn cursor(&self) -> Option<&SyncCursor> {
        self.cursor.as_ref()
    }

    /// True when nothing changed.
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Keeps the changes once the journal holds them.
    pub fn mark_committed(&mut self) {
        self.committed = true;
        self.undo.clear();
    }

    /// Restores every room to its state at `begin`.
    pub fn rollback(self) {
        drop(self);
    }

    fn undo_all(&mut self) {
        while let Some((room_id, undo)) = self.undo.pop() {
            if let Some(guard) = self.rooms.get_mut(&room_id) {
                guard.apply(undo);
            }
        }
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.undo_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::TimelinePosition;
    use roomline_protocol::EventId;

    fn handles(ids: &[&str]) -> RoomHandles {
        ids.iter()
            .map(|id| (RoomId::from(*id), Arc::new(RwLock::new(RoomTables::default()))))
            .collect()
    }

    #[test]
    fn rollback_restores_all_rooms() {
        let handles = handles(&["!a:x", "!b:x"]);
        let mut txn = WriteTxn::begin(&handles);
        for (room_id, _) in &handles {
            txn.apply(
                room_id,
                RoomMutation::Slot {
                    position: TimelinePosition(1),
                    event_id: Some(EventId::from("$e")),
                },
            )
            .unwrap();
        }
        txn.set_cursor(SyncCursor::new("s9"));
        assert_eq!(txn.mutations().len(), 3);
        assert_eq!(txn.touched().len(), 2);
        txn.rollback();

        for (_, handle) in &handles {
            assert!(handle.read().slots.is_empty());
        }
    }

    fn slot(txn: &mut WriteTxn<'_>, room_id: &RoomId) {
        txn.apply(
            room_id,
            RoomMutation::Slot {
                position: TimelinePosition(1),
                event_id: Some(EventId::from("$e")),
            },
        )
        .unwrap();
    }

    #[test]
    fn dropping_without_commit_rolls_back() {
        let handles = handles(&["!a:x"]);
        let room_id = RoomId::from("!a:x");
        let failing = |handles: &RoomHandles| -> StoreResult<()> {
            let mut txn = WriteTxn::begin(handles);
            slot(&mut txn, &room_id);
            txn.room(&RoomId::from("!missing:x"))?;
            txn.mark_committed();
            Ok(())
        };
        assert!(matches!(failing(&handles), Err(StoreError::UnknownRoom(_))));
        assert!(handles[0].1.read().slots.is_empty());
    }

    #[test]
    fn committed_changes_survive_drop() {
        let handles = handles(&["!a:x"]);
        {
            let mut txn = WriteTxn::begin(&handles);
            slot(&mut txn, &RoomId::from("!a:x"));
            txn.mark_committed();
        }
        assert_eq!(handles[0].1.read().slots.len(), 1);
    }

    #[test]
    fn unlocked_room_is_rejected() {
        let handles = handles(&["!a:x"]);
        let mut txn = WriteTxn::begin(&handles);
        let result = txn.apply(&RoomId::from("!zzz:x"), RoomMutation::ReadMarker(None));
        assert!(matches!(result, Err(StoreError::UnknownRoom(_))));
        assert!(txn.is_empty());
        assert!(txn.cursor().is_none());
    }
}
