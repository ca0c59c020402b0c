//! The sync loop.
//!
//! One long-running task that repeatedly requests deltas since the stored
//! cursor, commits them with [`EventStore::apply_sync_batch`], hands new
//! encrypted events to the decryption coordinator and starts over at once.
//!
//! ```text
//! Idle ─▶ Requesting ─▶ Applying ─▶ Idle
//!             │  ▲           │
//!  retryable  ▼  │           │ storage failure
//!          Backoff           ▼
//!             Requesting ─▶ Failed ── restart() ─▶ Idle
//!               fatal
//! ```
//!
//! [`EventStore::apply_sync_batch`]: roomline_store::EventStore::apply_sync_batch

mod backoff;
mod state;

pub use backoff::Backoff;
pub use state::{SyncState, SyncStats};

use crate::context::AccountContext;
use crate::decryption::DecryptionCoordinator;
use crate::emitter::Notification;
use crate::error::EngineError;
use crate::transport::{SyncResponse, SyncTransport};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

/// Shared view of a running sync loop.
#[derive(Debug, Default)]
pub struct SyncMonitor {
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    restart: Notify,
}

impl SyncMonitor {
    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets a statistics snapshot.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Restarts a loop halted in [`SyncState::Failed`]. Returns false when
    /// the loop is not halted.
    pub fn restart(&self) -> bool {
        if self.state() != SyncState::Failed {
            return false;
        }
        self.restart.notify_one();
        true
    }
}

enum Cycle {
    Applied,
    Retry(EngineError),
    Fatal(EngineError),
    Shutdown,
}

/// The sync loop task.
pub struct SyncLoop {
    ctx: AccountContext,
    transport: Arc<dyn SyncTransport>,
    decryption: Arc<DecryptionCoordinator>,
    monitor: Arc<SyncMonitor>,
}

impl SyncLoop {
    /// Creates a loop reporting through `monitor`.
    pub fn new(
        ctx: AccountContext,
        transport: Arc<dyn SyncTransport>,
        decryption: Arc<DecryptionCoordinator>,
        monitor: Arc<SyncMonitor>,
    ) -> Self {
        Self {
            ctx,
            transport,
            decryption,
            monitor,
        }
    }

    /// Runs until `shutdown` turns true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(user = %self.ctx.user_id(), "sync loop started");
        let mut backoff = Backoff::new(self.ctx.config().sync.retry.clone());

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.cycle(&mut shutdown).await {
                Cycle::Applied => backoff.reset(),
                Cycle::Retry(e) => {
                    let delay = backoff.next_delay();
                    {
                        let mut stats = self.monitor.stats.write();
                        stats.retries += 1;
                        stats.last_error = Some(e.to_string());
                    }
                    warn!(
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "sync request failed, backing off"
                    );
                    self.set_state(SyncState::Backoff, Some(e.to_string()));
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                Cycle::Fatal(e) => {
                    {
                        let mut stats = self.monitor.stats.write();
                        stats.failures += 1;
                        stats.last_error = Some(e.to_string());
                    }
                    error!(error = %e, kind = e.kind(), "sync loop halted");
                    self.set_state(SyncState::Failed, Some(e.to_string()));
                    tokio::select! {
                        _ = self.monitor.restart.notified() => {
                            info!("sync loop restarted");
                            backoff.reset();
                            self.set_state(SyncState::Idle, None);
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                Cycle::Shutdown => break,
            }
        }

        if self.monitor.state() != SyncState::Failed {
            self.set_state(SyncState::Idle, None);
        }
        info!(user = %self.ctx.user_id(), "sync loop stopped");
    }

    async fn cycle(&self, shutdown: &mut watch::Receiver<bool>) -> Cycle {
        self.set_state(SyncState::Requesting, None);
        let cursor = self.ctx.store().sync_cursor();
        let timeout = self.ctx.config().sync.timeout;

        let response = tokio::select! {
            response = self.transport.request_sync(cursor.as_ref(), timeout) => response,
            _ = shutdown.changed() => return Cycle::Shutdown,
        };
        let SyncResponse { batch, next_cursor } = match response {
            Ok(response) => response,
            Err(e) if e.is_retryable() => return Cycle::Retry(e.into()),
            Err(e) => return Cycle::Fatal(e.into()),
        };

        self.set_state(SyncState::Applying, None);
        let store = Arc::clone(self.ctx.store());
        let cursor = next_cursor.clone();
        let applied =
            tokio::task::spawn_blocking(move || store.apply_sync_batch(&batch, &cursor)).await;
        let report = match applied {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => return Cycle::Fatal(e.into()),
            Err(e) => return Cycle::Fatal(e.into()),
        };

        self.decryption.enqueue(report.encrypted.iter().cloned());
        self.decryption.tick_cycle();
        {
            let mut stats = self.monitor.stats.write();
            stats.cycles_completed += 1;
            stats.events_applied += (report.inserted + report.reconciled) as u64;
            stats.last_sync_time = Some(Instant::now());
            stats.last_error = None;
        }
        debug!(
            cursor = %next_cursor,
            inserted = report.inserted,
            reconciled = report.reconciled,
            encrypted = report.encrypted.len(),
            "sync cycle complete"
        );
        self.ctx.emitter().emit(Notification::SyncComplete {
            cursor: next_cursor,
            rooms: report.rooms,
        });
        self.set_state(SyncState::Idle, None);
        Cycle::Applied
    }

    fn set_state(&self, state: SyncState, error: Option<String>) {
        let previous = std::mem::replace(&mut *self.monitor.state.write(), state);
        if previous != state || error.is_some() {
            debug!(from = %previous, to = %state, "sync state changed");
            self.ctx
                .emitter()
                .emit(Notification::SyncStatus { state, error });
        }
    }
}
