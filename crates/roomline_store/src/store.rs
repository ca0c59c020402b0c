//! The event store.

use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::error::{StoreError, StoreResult};
use crate::journal::Journal;
use crate::registry::EventTypeRegistry;
use crate::report::{ApplyReport, DecryptionReport, RedactionConflict, SkippedEvent};
use crate::stats::{StoreCounters, StoreStats};
use crate::summary::SummaryBuilder;
use crate::tables::{EchoStatus, Mutation, RoomMutation, RoomTables, StoredEvent};
use crate::timeline::{TimelineEnd, TimelineEvent, TimelinePage, TimelinePosition};
use crate::txn::{RoomHandles, WriteTxn};
use parking_lot::{Mutex, RwLock};
use roomline_protocol::{
    types, DecryptionResult, Event, EventId, EventValidationError, Membership, RoomDelta, RoomId,
    RoomSummary, SyncBatch, SyncCursor, TransactionId, UserId,
};
use roomline_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Persistent, transactional store of one account's events.
///
/// Owns every persisted entity: events, per-room timelines, current state,
/// redactions, local echoes, read markers, summaries and the sync cursor.
/// Other components only propose writes through its methods.
///
/// All methods take `&self`; the store is meant to be shared in an `Arc`.
/// Mutations of one room are serialized by that room's write section;
/// mutations of different rooms proceed in parallel up to the journal
/// append.
pub struct EventStore {
    own_user: UserId,
    registry: EventTypeRegistry,
    rooms: RwLock<HashMap<RoomId, Arc<RwLock<RoomTables>>>>,
    journal: Mutex<Journal>,
    cursor: RwLock<Option<SyncCursor>>,
    counters: StoreCounters,
    closed: AtomicBool,
    _dir: Option<StoreDir>,
}

impl EventStore {
    /// Opens the store in `path`, replaying its journal.
    ///
    /// # Errors
    ///
    /// Fails when the directory is locked or missing, or when the journal is
    /// corrupt.
    pub fn open(path: &Path, own_user: UserId, config: StoreConfig) -> StoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let backend = FileBackend::open(&dir.journal_path())?;
        let mut store = Self::open_with_backend(own_user, config, Box::new(backend))?;
        info!(path = %dir.path().display(), "event store opened");
        store._dir = Some(dir);
        Ok(store)
    }

    /// Opens a store that keeps its journal in memory.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other openers.
    pub fn open_in_memory(own_user: UserId) -> StoreResult<Self> {
        Self::open_with_backend(
            own_user,
            StoreConfig::default(),
            Box::new(InMemoryBackend::new()),
        )
    }

    /// Opens a store over any journal backend.
    ///
    /// # Errors
    ///
    /// Fails when the existing journal cannot be replayed.
    pub fn open_with_backend(
        own_user: UserId,
        config: StoreConfig,
        backend: Box<dyn StorageBackend>,
    ) -> StoreResult<Self> {
        let (journal, records) = Journal::open(backend, config.sync_on_commit)?;

        let mut rooms: HashMap<RoomId, RoomTables> = HashMap::new();
        let mut cursor = None;
        for record in &records {
            for mutation in &record.mutations {
                match mutation {
                    Mutation::Room { room_id, change } => {
                        rooms
                            .entry(room_id.clone())
                            .or_default()
                            .apply(change.clone());
                    }
                    Mutation::Cursor(c) => cursor = Some(c.clone()),
                }
            }
        }
        debug!(
            commits = records.len(),
            rooms = rooms.len(),
            "journal replayed"
        );

        Ok(Self {
            own_user,
            registry: config.registry,
            rooms: RwLock::new(
                rooms
                    .into_iter()
                    .map(|(id, tables)| (id, Arc::new(RwLock::new(tables))))
                    .collect(),
            ),
            journal: Mutex::new(journal),
            cursor: RwLock::new(cursor),
            counters: StoreCounters::default(),
            closed: AtomicBool::new(false),
            _dir: None,
        })
    }

    /// The account this store belongs to.
    pub fn own_user(&self) -> &UserId {
        &self.own_user
    }

    /// The event type registry in use.
    pub fn registry(&self) -> &EventTypeRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Applies one sync batch and moves the cursor to `next_cursor`, all in
    /// one transaction.
    ///
    /// Known events are left untouched, so applying the same batch twice
    /// stores nothing new. Malformed events are skipped and listed in the
    /// report. If the journal write fails nothing changes, including the
    /// cursor.
    ///
    /// # Errors
    ///
    /// Fails only on storage failure or when the store is closed.
    pub fn apply_sync_batch(
        &self,
        batch: &SyncBatch,
        next_cursor: &SyncCursor,
    ) -> StoreResult<ApplyReport> {
        self.ensure_open()?;
        let ids: BTreeSet<RoomId> = batch.rooms.iter().map(|d| d.room_id.clone()).collect();
        let handles = self.room_handles(&ids);
        let mut txn = WriteTxn::begin(&handles);
        let mut report = ApplyReport::default();

        for delta in &batch.rooms {
            self.apply_delta(&mut txn, delta, &mut report)?;
        }
        for room_id in txn.touched() {
            report.rooms.push(self.refresh_summary(&mut txn, &room_id)?);
        }
        txn.set_cursor(next_cursor.clone());

        self.commit(txn)?;
        self.counters
            .record_batch(report.inserted, report.duplicates, report.skipped.len());
        debug!(
            cursor = %next_cursor,
            inserted = report.inserted,
            duplicates = report.duplicates,
            reconciled = report.reconciled,
            skipped = report.skipped.len(),
            "sync batch applied"
        );
        Ok(report)
    }

    /// Stores an event this device sent, marked as a pending local echo.
    ///
    /// Returns the stored row. If the server's copy already arrived, or an
    /// echo with the same transaction id exists, nothing is written and the
    /// existing row is returned.
    ///
    /// # Errors
    ///
    /// Fails when the event is malformed, on storage failure, or when the
    /// store is closed.
    pub fn insert_local_event(
        &self,
        event: Event,
        txn_id: TransactionId,
    ) -> StoreResult<TimelineEvent> {
        self.ensure_open()?;
        self.registry.validate(&event)?;
        let room_id = event.room_id.clone();
        let handles = self.room_handles(&BTreeSet::from([room_id.clone()]));
        let mut txn = WriteTxn::begin(&handles);

        {
            let room = txn.room(&room_id)?;
            let existing = room
                .event(&event.event_id)
                .or_else(|| room.echoes.get(&txn_id).and_then(|id| room.event(id)));
            if let Some(row) = existing {
                debug!(room_id = %room_id, txn_id = %txn_id, "local echo already stored");
                return Ok(self.view(room, row));
            }
        }

        let event_id = event.event_id.clone();
        let mut conflicts = Vec::new();
        self.insert_row(
            &mut txn,
            &room_id,
            event,
            None,
            Some(EchoStatus::Pending(txn_id.clone())),
            &mut conflicts,
        )?;
        txn.apply(
            &room_id,
            RoomMutation::Echo {
                txn_id,
                event_id: Some(event_id.clone()),
            },
        )?;
        self.refresh_summary(&mut txn, &room_id)?;

        let view = {
            let room = txn.room(&room_id)?;
            let row = room
                .event(&event_id)
                .ok_or_else(|| StoreError::unknown_event(&room_id, &event_id))?;
            self.view(room, row)
        };
        self.commit(txn)?;
        Ok(view)
    }

    /// Attaches a decryption result to one stored encrypted event.
    ///
    /// Returns false when the event already has plaintext (or the same
    /// permanent failure) and nothing was written.
    ///
    /// # Errors
    ///
    /// Fails on storage failure or when the store is closed.
    pub fn attach_decryption(
        &self,
        room_id: &RoomId,
        event_id: &EventId,
        result: DecryptionResult,
    ) -> StoreResult<bool> {
        let report =
            self.attach_decryptions(vec![(room_id.clone(), event_id.clone(), result)])?;
        Ok(!report.attached.is_empty())
    }

    /// Attaches many decryption results in one transaction.
    ///
    /// This is the only way a stored event changes after insertion.
    /// Already-decrypted events are skipped, so repeating a call is
    /// harmless. A permanent failure can later be replaced by plaintext.
    ///
    /// # Errors
    ///
    /// Fails on storage failure or when the store is closed.
    pub fn attach_decryptions(
        &self,
        results: Vec<(RoomId, EventId, DecryptionResult)>,
    ) -> StoreResult<DecryptionReport> {
        self.ensure_open()?;
        let ids: BTreeSet<RoomId> = results.iter().map(|(r, _, _)| r.clone()).collect();
        let handles = self.room_handles(&ids);
        let mut txn = WriteTxn::begin(&handles);
        let mut report = DecryptionReport::default();

        for (room_id, event_id, result) in results {
            let row = txn.room(&room_id)?.event(&event_id).cloned();
            let Some(row) = row else {
                warn!(room_id = %room_id, event_id = %event_id, "decryption result for unknown event");
                report.skipped.push((room_id, event_id));
                continue;
            };
            let already_resolved = match (&row.decryption, &result) {
                (Some(DecryptionResult::Decrypted { .. }), _) => true,
                (Some(DecryptionResult::Failed { .. }), DecryptionResult::Failed { .. }) => true,
                _ => !row.event.is_encrypted(),
            };
            if already_resolved {
                report.skipped.push((room_id, event_id));
                continue;
            }

            txn.apply(
                &room_id,
                RoomMutation::Event {
                    event_id: event_id.clone(),
                    row: Some(StoredEvent {
                        decryption: Some(result),
                        ..row
                    }),
                },
            )?;
            report.attached.push((room_id, event_id));
        }

        for room_id in txn.touched() {
            report.summaries.push(self.refresh_summary(&mut txn, &room_id)?);
        }
        self.commit(txn)?;
        self.counters.record_decryptions(report.attached.len());
        Ok(report)
    }

    /// Moves the read marker of `room_id` to `event_id`.
    ///
    /// The marker never moves backwards; an older event leaves it where it
    /// is. Returns the room summary afterwards.
    ///
    /// # Errors
    ///
    /// Fails when the event is not stored, on storage failure, or when the
    /// store is closed.
    pub fn set_read_marker(&self, room_id: &RoomId, event_id: &EventId) -> StoreResult<RoomSummary> {
        self.ensure_open()?;
        let handle = self.room_handle(room_id)?;
        let handles: RoomHandles = vec![(room_id.clone(), handle)];
        let mut txn = WriteTxn::begin(&handles);

        if txn.room(room_id)?.event(event_id).is_none() {
            return Err(StoreError::unknown_event(room_id, event_id));
        }
        self.move_read_marker(&mut txn, room_id, event_id)?;
        let summary = self.refresh_summary(&mut txn, room_id)?;
        self.commit(txn)?;
        Ok(summary)
    }

    /// Flushes the journal and refuses further writes.
    ///
    /// # Errors
    ///
    /// Fails when the final sync fails.
    pub fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.journal.lock().close()?;
        info!(user = %self.own_user, "event store closed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Up to `limit` events strictly before `before` (or from the newest),
    /// newest first.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::UnknownRoom`] for rooms never seen.
    pub fn get_timeline(
        &self,
        room_id: &RoomId,
        before: Option<TimelinePosition>,
        limit: usize,
    ) -> StoreResult<TimelinePage> {
        let handle = self.room_handle(room_id)?;
        let room = handle.read();

        let upper = before.map_or(Bound::Unbounded, Bound::Excluded);
        let mut slots = room.slots.range((Bound::Unbounded, upper)).rev();
        let mut events = Vec::with_capacity(limit.min(room.slots.len()));
        for (_, event_id) in slots.by_ref().take(limit) {
            if let Some(row) = room.event(event_id) {
                events.push(self.view(&room, row));
            }
        }

        let end = if slots.next().is_some() {
            let next_before = events
                .last()
                .map(|e| e.position)
                .or(before)
                .or_else(|| room.last_position().map(TimelinePosition::next))
                .unwrap_or(TimelinePosition::FIRST);
            TimelineEnd::More { next_before }
        } else if self.starts_with_create(&room) {
            TimelineEnd::StartOfHistory
        } else {
            TimelineEnd::NeedsBackfill {
                prev_batch: room.prev_batch.clone(),
            }
        };

        Ok(TimelinePage { events, end })
    }

    /// Current state event for `(event_type, state_key)`.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::UnknownRoom`] for rooms never seen.
    pub fn get_current_state(
        &self,
        room_id: &RoomId,
        event_type: &str,
        state_key: &str,
    ) -> StoreResult<Option<TimelineEvent>> {
        let handle = self.room_handle(room_id)?;
        let room = handle.read();
        Ok(room
            .state_event_id(event_type, state_key)
            .and_then(|id| room.event(id))
            .map(|row| self.view(&room, row)))
    }

    /// Cached summary of `room_id`, if the room is known.
    pub fn get_room_summary(&self, room_id: &RoomId) -> Option<RoomSummary> {
        let handle = self.rooms.read().get(room_id).cloned()?;
        let room = handle.read();
        room.summary.clone()
    }

    /// One stored event, with redaction and decryption applied.
    pub fn get_event(&self, room_id: &RoomId, event_id: &EventId) -> Option<TimelineEvent> {
        let handle = self.rooms.read().get(room_id).cloned()?;
        let room = handle.read();
        room.event(event_id).map(|row| self.view(&room, row))
    }

    /// The persisted sync cursor.
    pub fn sync_cursor(&self) -> Option<SyncCursor> {
        self.cursor.read().clone()
    }

    /// Every known room, sorted.
    pub fn rooms(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self
            .rooms
            .read()
            .iter()
            .filter(|(_, handle)| !handle.read().is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Summaries of every known room, sorted by room id.
    pub fn room_summaries(&self) -> Vec<RoomSummary> {
        self.rooms()
            .iter()
            .filter_map(|id| self.get_room_summary(id))
            .collect()
    }

    /// The account's membership in `room_id`.
    pub fn own_membership(&self, room_id: &RoomId) -> Option<Membership> {
        self.get_room_summary(room_id)
            .and_then(|s| s.own_membership)
    }

    /// True once the room has `m.room.encryption` in its state.
    pub fn is_encrypted(&self, room_id: &RoomId) -> bool {
        self.get_room_summary(room_id)
            .is_some_and(|s| s.is_encrypted)
    }

    /// Stored encrypted events without a decryption result, oldest first
    /// per room.
    pub fn undecrypted_events(&self) -> Vec<Event> {
        let handles: Vec<_> = self.rooms.read().values().cloned().collect();
        let mut pending = Vec::new();
        for handle in handles {
            let room = handle.read();
            for event_id in room.slots.values() {
                if let Some(row) = room.event(event_id) {
                    if row.needs_decryption() && room.redaction_of(event_id).is_none() {
                        pending.push(row.event.clone());
                    }
                }
            }
        }
        pending.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        pending
    }

    /// Counter snapshot.
    pub fn stats(&self) -> StoreStats {
        self.counters.snapshot()
    }

    /// Journal length in bytes.
    ///
    /// # Errors
    ///
    /// Fails when the backend cannot report its size.
    pub fn journal_size(&self) -> StoreResult<u64> {
        self.journal.lock().size()
    }

    /// True after [`close`](Self::close).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn room_handle(&self, room_id: &RoomId) -> StoreResult<Arc<RwLock<RoomTables>>> {
        self.rooms
            .read()
            .get(room_id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownRoom(room_id.clone()))
    }

    /// Handles for `ids`, created when missing, in lexicographic order.
    fn room_handles(&self, ids: &BTreeSet<RoomId>) -> RoomHandles {
        let mut rooms = self.rooms.write();
        ids.iter()
            .map(|id| {
                let handle = rooms.entry(id.clone()).or_default().clone();
                (id.clone(), handle)
            })
            .collect()
    }

    fn commit(&self, mut txn: WriteTxn<'_>) -> StoreResult<()> {
        if txn.is_empty() {
            txn.mark_committed();
            return Ok(());
        }
        let mut journal = self.journal.lock();
        match journal.commit(txn.mutations()) {
            Ok(_) => {
                txn.mark_committed();
                if let Some(cursor) = txn.cursor() {
                    *self.cursor.write() = Some(cursor.clone());
                }
                self.counters.record_commit();
                Ok(())
            }
            Err(e) => {
                error!(error = %e, mutations = txn.mutations().len(), "journal commit failed, rolling back");
                txn.rollback();
                self.counters.record_rollback();
                drop(journal);
                self.drop_empty_rooms();
                Err(e)
            }
        }
    }

    fn drop_empty_rooms(&self) {
        self.rooms
            .write()
            .retain(|_, handle| handle.try_read().map_or(true, |room| !room.is_empty()));
    }

    fn view(&self, room: &RoomTables, row: &StoredEvent) -> TimelineEvent {
        let preserved = self
            .registry
            .handler(&row.event.event_type)
            .preserved_keys();
        TimelineEvent::from_row(row, room.redaction_of(&row.event.event_id), preserved)
    }

    fn starts_with_create(&self, room: &RoomTables) -> bool {
        room.slots
            .values()
            .next()
            .and_then(|id| room.event(id))
            .is_some_and(|row| row.event.event_type == types::ROOM_CREATE)
    }

    fn check(&self, room_id: &RoomId, event: &Event) -> Result<(), EventValidationError> {
        if &event.room_id != room_id {
            return Err(EventValidationError::RoomMismatch {
                expected: room_id.clone(),
                found: event.room_id.clone(),
            });
        }
        self.registry.validate(event)
    }

    fn apply_delta(
        &self,
        txn: &mut WriteTxn<'_>,
        delta: &RoomDelta,
        report: &mut ApplyReport,
    ) -> StoreResult<()> {
        let room_id = &delta.room_id;
        let (had_history, membership) = {
            let room = txn.room(room_id)?;
            (room.last_position().is_some(), room.membership)
        };

        if membership != Some(delta.membership) {
            txn.apply(room_id, RoomMutation::Membership(Some(delta.membership)))?;
        }

        for event in delta.state.iter().chain(&delta.timeline) {
            if let Err(reason) = self.check(room_id, event) {
                warn!(
                    room_id = %room_id,
                    event_id = %event.event_id,
                    reason = %reason,
                    "skipping malformed event"
                );
                report.skipped.push(SkippedEvent {
                    room_id: room_id.clone(),
                    event_id: event.event_id.clone(),
                    reason: reason.to_string(),
                });
                continue;
            }
            self.ingest(txn, room_id, event, report)?;
        }

        if !had_history {
            if let Some(token) = &delta.prev_batch {
                txn.apply(room_id, RoomMutation::PrevBatch(Some(token.clone())))?;
            }
        }
        if let Some(marker) = &delta.fully_read {
            self.move_read_marker(txn, room_id, marker)?;
        }
        Ok(())
    }

    fn ingest(
        &self,
        txn: &mut WriteTxn<'_>,
        room_id: &RoomId,
        event: &Event,
        report: &mut ApplyReport,
    ) -> StoreResult<()> {
        let pending_echo = {
            let room = txn.room(room_id)?;
            match room.event(&event.event_id) {
                Some(row) => match &row.echo {
                    Some(EchoStatus::Pending(_)) => Some(row.clone()),
                    _ => {
                        report.duplicates += 1;
                        return Ok(());
                    }
                },
                None => event
                    .txn_id
                    .as_ref()
                    .and_then(|t| room.echoes.get(t))
                    .and_then(|id| room.event(id))
                    .filter(|row| row.echo.as_ref().is_some_and(EchoStatus::is_pending))
                    .cloned(),
            }
        };

        if let Some(echo) = pending_echo {
            self.confirm_echo(txn, room_id, echo, event, &mut report.conflicts)?;
            report.reconciled += 1;
            return Ok(());
        }

        self.insert_row(txn, room_id, event.clone(), None, None, &mut report.conflicts)?;
        report.inserted += 1;
        if event.is_encrypted() {
            report
                .encrypted
                .push((room_id.clone(), event.event_id.clone()));
        }
        Ok(())
    }

    /// Stores a new row at the next free position.
    fn insert_row(
        &self,
        txn: &mut WriteTxn<'_>,
        room_id: &RoomId,
        event: Event,
        decryption: Option<DecryptionResult>,
        echo: Option<EchoStatus>,
        conflicts: &mut Vec<RedactionConflict>,
    ) -> StoreResult<TimelinePosition> {
        let position = txn.room(room_id)?.allocate_position();
        let event_id = event.event_id.clone();

        txn.apply(
            room_id,
            RoomMutation::Slot {
                position,
                event_id: Some(event_id.clone()),
            },
        )?;
        txn.apply(room_id, RoomMutation::NextPosition(position.next()))?;
        self.index_event(txn, room_id, &event, position, None, conflicts)?;
        txn.apply(
            room_id,
            RoomMutation::Event {
                event_id,
                row: Some(StoredEvent {
                    event,
                    position,
                    decryption,
                    echo,
                }),
            },
        )?;
        Ok(position)
    }

    /// Replaces a pending echo with the server's copy.
    ///
    /// The confirmed event keeps the echo's slot when nothing was stored
    /// after it; otherwise it takes a fresh slot at its server order and the
    /// echo's slot is vacated.
    fn confirm_echo(
        &self,
        txn: &mut WriteTxn<'_>,
        room_id: &RoomId,
        echo: StoredEvent,
        server: &Event,
        conflicts: &mut Vec<RedactionConflict>,
    ) -> StoreResult<()> {
        let txn_id = match &echo.echo {
            Some(status) => status.txn_id().clone(),
            None => return Ok(()),
        };
        let is_last = txn.room(room_id)?.last_position() == Some(echo.position);
        let same_id = echo.event.event_id == server.event_id;

        let position = if is_last {
            echo.position
        } else {
            let fresh = txn.room(room_id)?.allocate_position();
            txn.apply(room_id, RoomMutation::NextPosition(fresh.next()))?;
            fresh
        };
        if position != echo.position || !same_id {
            txn.apply(
                room_id,
                RoomMutation::Slot {
                    position: echo.position,
                    event_id: None,
                },
            )?;
            txn.apply(
                room_id,
                RoomMutation::Slot {
                    position,
                    event_id: Some(server.event_id.clone()),
                },
            )?;
        }
        if !same_id {
            txn.apply(
                room_id,
                RoomMutation::Event {
                    event_id: echo.event.event_id.clone(),
                    row: None,
                },
            )?;
        }

        self.index_event(
            txn,
            room_id,
            server,
            position,
            Some(&echo.event.event_id),
            conflicts,
        )?;

        let decryption = echo.decryption.clone().or_else(|| {
            (server.is_encrypted() && !echo.event.is_encrypted()).then(|| {
                DecryptionResult::Decrypted {
                    event_type: echo.event.event_type.clone(),
                    content: echo.event.content.clone(),
                }
            })
        });
        txn.apply(
            room_id,
            RoomMutation::Event {
                event_id: server.event_id.clone(),
                row: Some(StoredEvent {
                    event: server.clone(),
                    position,
                    decryption,
                    echo: Some(EchoStatus::Confirmed(txn_id.clone())),
                }),
            },
        )?;
        txn.apply(
            room_id,
            RoomMutation::Echo {
                txn_id: txn_id.clone(),
                event_id: Some(server.event_id.clone()),
            },
        )?;
        debug!(room_id = %room_id, txn_id = %txn_id, event_id = %server.event_id, moved = !is_last, "local echo confirmed");
        Ok(())
    }

    /// Updates current state and redactions for an event stored at
    /// `position`. `replaces` names a local echo the event supersedes.
    fn index_event(
        &self,
        txn: &mut WriteTxn<'_>,
        room_id: &RoomId,
        event: &Event,
        position: TimelinePosition,
        replaces: Option<&EventId>,
        conflicts: &mut Vec<RedactionConflict>,
    ) -> StoreResult<()> {
        if let Some(state_key) = &event.state_key {
            let room = txn.room(room_id)?;
            let current = room.state_event_id(&event.event_type, state_key);
            let newer = match current {
                None => true,
                Some(id) if Some(id) == replaces || id == &event.event_id => true,
                Some(id) => room.event(id).map_or(true, |row| row.position < position),
            };
            if newer {
                txn.apply(
                    room_id,
                    RoomMutation::State {
                        event_type: event.event_type.clone(),
                        state_key: state_key.clone(),
                        event_id: Some(event.event_id.clone()),
                    },
                )?;
            }
        }

        if let Some(target) = event.redaction_target() {
            let room = txn.room(room_id)?;
            let outcome = match room.redaction_of(&target) {
                None => Some(None),
                Some(existing) if existing == &event.event_id => None,
                Some(existing) if Some(existing) == replaces => Some(None),
                Some(existing) => {
                    let existing_position = room.event(existing).map(|row| row.position);
                    if existing_position.map_or(true, |p| p < position) {
                        Some(Some(RedactionConflict {
                            room_id: room_id.clone(),
                            target: target.clone(),
                            kept: event.event_id.clone(),
                            superseded: existing.clone(),
                        }))
                    } else {
                        conflicts.push(RedactionConflict {
                            room_id: room_id.clone(),
                            target: target.clone(),
                            kept: existing.clone(),
                            superseded: event.event_id.clone(),
                        });
                        None
                    }
                }
            };
            if let Some(conflict) = outcome {
                if let Some(conflict) = conflict {
                    warn!(
                        room_id = %room_id,
                        target = %conflict.target,
                        kept = %conflict.kept,
                        superseded = %conflict.superseded,
                        "competing redactions, later one wins"
                    );
                    conflicts.push(conflict);
                }
                txn.apply(
                    room_id,
                    RoomMutation::Redaction {
                        target,
                        redaction: Some(event.event_id.clone()),
                    },
                )?;
            }
        }
        Ok(())
    }

    fn move_read_marker(
        &self,
        txn: &mut WriteTxn<'_>,
        room_id: &RoomId,
        event_id: &EventId,
    ) -> StoreResult<()> {
        let room = txn.room(room_id)?;
        if room.read_marker.as_ref() == Some(event_id) {
            return Ok(());
        }
        let target = room.event(event_id).map(|row| row.position);
        if let (Some(current), Some(target)) = (room.read_marker_position(), target) {
            if target < current {
                debug!(room_id = %room_id, event_id = %event_id, "ignoring backwards read marker");
                return Ok(());
            }
        }
        txn.apply(room_id, RoomMutation::ReadMarker(Some(event_id.clone())))
    }

    /// Recomputes a room's summary and stores it when it changed.
    fn refresh_summary(&self, txn: &mut WriteTxn<'_>, room_id: &RoomId) -> StoreResult<RoomSummary> {
        let (summary, cached) = {
            let room = txn.room(room_id)?;
            let summary = SummaryBuilder::new(&self.own_user, &self.registry).compute(room_id, room);
            let cached = room.summary.clone();
            (summary, cached)
        };
        if cached.as_ref() != Some(&summary) {
            txn.apply(room_id, RoomMutation::Summary(Some(summary.clone())))?;
        }
        Ok(summary)
    }
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("own_user", &self.own_user)
            .field("rooms", &self.rooms.read().len())
            .field("cursor", &*self.cursor.read())
            .field("closed", &self.is_closed())
            .finish()
    }
}
