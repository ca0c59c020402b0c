//! Sync loop state.

use std::fmt;
use std::time::Instant;

/// The current state of the sync loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// Between cycles, or stopped.
    #[default]
    Idle,
    /// Waiting on the long-poll.
    Requesting,
    /// Committing a batch.
    Applying,
    /// Waiting before retrying a failed request.
    Backoff,
    /// Halted by a fatal failure until restarted.
    Failed,
}

impl SyncState {
    /// Returns true while a cycle is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Requesting | SyncState::Applying)
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Requesting => "requesting",
            SyncState::Applying => "applying",
            SyncState::Backoff => "backoff",
            SyncState::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Events stored or reconciled by those cycles.
    pub events_applied: u64,
    /// Total number of retries.
    pub retries: u64,
    /// Fatal failures so far.
    pub failures: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_properties() {
        assert_eq!(SyncState::default(), SyncState::Idle);
        assert!(SyncState::Requesting.is_active());
        assert!(SyncState::Applying.is_active());
        assert!(!SyncState::Backoff.is_active());
        assert!(!SyncState::Failed.is_active());
        assert_eq!(SyncState::Backoff.to_string(), "backoff");
    }
}
