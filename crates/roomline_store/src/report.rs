//! What a store transaction did.

use roomline_protocol::{EventId, RoomId, RoomSummary};

/// Two redactions named the same target; the later one was kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionConflict {
    /// Room of the target.
    pub room_id: RoomId,
    /// Redacted event.
    pub target: EventId,
    /// Redaction now in effect.
    pub kept: EventId,
    /// Redaction superseded.
    pub superseded: EventId,
}

/// An event left out of a batch because it failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEvent {
    /// Room of the delta carrying it.
    pub room_id: RoomId,
    /// Its id, possibly empty.
    pub event_id: EventId,
    /// Validation failure.
    pub reason: String,
}

/// Outcome of [`EventStore::apply_sync_batch`](crate::EventStore::apply_sync_batch).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    /// Summaries of rooms the batch changed.
    pub rooms: Vec<RoomSummary>,
    /// Events newly stored.
    pub inserted: usize,
    /// Events already stored and left untouched.
    pub duplicates: usize,
    /// Pending local echoes confirmed by the batch.
    pub reconciled: usize,
    /// Events rejected by validation.
    pub skipped: Vec<SkippedEvent>,
    /// Newly stored encrypted events that need decrypting.
    pub encrypted: Vec<(RoomId, EventId)>,
    /// Competing redactions resolved while applying.
    pub conflicts: Vec<RedactionConflict>,
}

impl ApplyReport {
    /// True when the batch stored or reconciled anything.
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.reconciled > 0 || !self.rooms.is_empty()
    }
}

/// Outcome of [`EventStore::attach_decryptions`](crate::EventStore::attach_decryptions).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecryptionReport {
    /// Events whose result was stored by this call.
    pub attached: Vec<(RoomId, EventId)>,
    /// Events skipped because they were already decrypted or unknown.
    pub skipped: Vec<(RoomId, EventId)>,
    /// Recomputed summaries of affected rooms.
    pub summaries: Vec<RoomSummary>,
}
