//! Store counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Transactions committed to the journal.
    pub commits: u64,
    /// Transactions rolled back after a journal failure.
    pub rollbacks: u64,
    /// Events stored.
    pub events_inserted: u64,
    /// Duplicate deliveries ignored.
    pub duplicates_ignored: u64,
    /// Malformed events skipped.
    pub events_skipped: u64,
    /// Decryption results attached.
    pub decryptions_attached: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StoreCounters {
    commits: AtomicU64,
    rollbacks: AtomicU64,
    events_inserted: AtomicU64,
    duplicates_ignored: AtomicU64,
    events_skipped: AtomicU64,
    decryptions_attached: AtomicU64,
}

impl StoreCounters {
    pub fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, inserted: usize, duplicates: usize, skipped: usize) {
        self.events_inserted
            .fetch_add(inserted as u64, Ordering::Relaxed);
        self.duplicates_ignored
            .fetch_add(duplicates as u64, Ordering::Relaxed);
        self.events_skipped
            .fetch_add(skipped as u64, Ordering::Relaxed);
    }

    pub fn record_decryptions(&self, n: usize) {
        self.decryptions_attached
            .fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StoreStats {
        StoreStats {
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            events_inserted: self.events_inserted.load(Ordering::Relaxed),
            duplicates_ignored: self.duplicates_ignored.load(Ordering::Relaxed),
            events_skipped: self.events_skipped.load(Ordering::Relaxed),
            decryptions_attached: self.decryptions_attached.load(Ordering::Relaxed),
        }
    }
}
