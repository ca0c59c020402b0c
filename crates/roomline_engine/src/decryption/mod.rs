//! Decryption coordinator.
//!
//! Keeps one task per stored encrypted event that has no decryption result
//! yet, and drives the crypto engine over them with a pool of workers:
//!
//! - a task whose room key is missing parks on its session and is retried
//!   when the key arrives or after a number of sync cycles
//! - after too many key-missing attempts, or on any other failure, the event
//!   is marked undecryptable for good
//! - each pass commits its results in one store transaction and emits one
//!   [`Notification::EventsDecrypted`]

mod queue;

use crate::config::DecryptionConfig;
use crate::context::AccountContext;
use crate::crypto::{CryptoEngine, DecryptFailure, KeyArrivalListener};
use crate::emitter::Notification;
use crate::error::EngineResult;
use parking_lot::Mutex;
use queue::{Parked, TaskKey, TaskQueue};
use roomline_protocol::{DecryptionResult, EventId, RoomId, SessionRef};
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, warn};

/// Reason stored for events whose key never showed up.
pub const KEY_NEVER_ARRIVED: &str = "room key never arrived";

/// Schedules and runs decryption of stored encrypted events.
pub struct DecryptionCoordinator {
    ctx: AccountContext,
    crypto: Arc<dyn CryptoEngine>,
    config: DecryptionConfig,
    queue: Mutex<TaskQueue>,
    wake: Notify,
}

/// Outcome of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Tasks taken from the queue.
    pub taken: usize,
    /// Events that now have plaintext.
    pub decrypted: usize,
    /// Events marked undecryptable.
    pub failed: usize,
    /// Tasks parked waiting for a key.
    pub parked: usize,
    /// Tasks dropped because the event was already resolved or is gone.
    pub skipped: usize,
}

impl DecryptionCoordinator {
    /// Creates a coordinator with an empty queue.
    pub fn new(ctx: AccountContext, crypto: Arc<dyn CryptoEngine>) -> Self {
        let config = ctx.config().decryption.clone();
        Self {
            ctx,
            crypto,
            config,
            queue: Mutex::new(TaskQueue::default()),
            wake: Notify::new(),
        }
    }

    /// Queues events for decryption. Events already queued are ignored.
    /// Returns how many tasks were created.
    pub fn enqueue(&self, events: impl IntoIterator<Item = (RoomId, EventId)>) -> usize {
        let added = {
            let mut queue = self.queue.lock();
            events
                .into_iter()
                .filter(|key| queue.enqueue(key.clone()))
                .count()
        };
        if added > 0 {
            debug!(added, "decryption tasks queued");
            self.wake.notify_waiters();
        }
        added
    }

    /// Re-queues every stored encrypted event without a result.
    pub fn recover(&self) -> usize {
        let pending = self.ctx.store().undecrypted_events();
        let added = self.enqueue(pending.into_iter().map(|e| (e.room_id, e.event_id)));
        if added > 0 {
            debug!(added, "undecrypted events recovered");
        }
        added
    }

    /// Wakes tasks waiting for `session`.
    pub fn key_arrived(&self, session: &SessionRef) {
        let released = self.queue.lock().key_arrived(session);
        if released > 0 {
            debug!(session = %session, released, "room key arrived");
            self.wake.notify_waiters();
        }
    }

    /// Counts one sync cycle; tasks parked long enough become ready.
    pub fn tick_cycle(&self) {
        let released = self.queue.lock().tick(self.config.retry_after_cycles);
        if released > 0 {
            debug!(released, "retrying tasks after sync cycles");
            self.wake.notify_waiters();
        }
    }

    /// A listener to register with the crypto engine.
    pub fn listener(self: &Arc<Self>) -> Arc<dyn KeyArrivalListener> {
        Arc::new(KeyWaker(Arc::downgrade(self)))
    }

    /// Tasks not yet resolved.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Tasks waiting for a room key.
    pub fn waiting_for_keys(&self) -> usize {
        self.queue.lock().parked_len()
    }

    /// Runs one pass over up to `batch_size` ready tasks.
    ///
    /// # Errors
    ///
    /// Fails when the results cannot be stored. The affected tasks are
    /// dropped; [`recover`](Self::recover) finds them again.
    pub async fn process_batch(&self) -> EngineResult<PassReport> {
        let batch = self.queue.lock().take_batch(self.config.batch_size);
        let mut report = PassReport {
            taken: batch.len(),
            ..PassReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        let mut results: Vec<(RoomId, EventId, DecryptionResult)> = Vec::new();
        for key in batch {
            let (room, event) = key.clone();
            let view = self
                .ctx
                .read_store(move |store| store.get_event(&room, &event))
                .await?;
            let (room_id, event_id) = &key;
            let Some(view) = view else {
                self.queue.lock().complete(&key);
                report.skipped += 1;
                continue;
            };
            if view.decryption.is_some() || view.is_redacted() || !view.event.is_encrypted() {
                self.queue.lock().complete(&key);
                report.skipped += 1;
                continue;
            }

            match self.crypto.decrypt(&view.event).await {
                Ok(payload) => results.push((
                    key.0,
                    key.1,
                    DecryptionResult::Decrypted {
                        event_type: payload.event_type,
                        content: payload.content,
                    },
                )),
                Err(DecryptFailure::KeyMissing(session)) => {
                    let outcome = self.queue.lock().park(
                        &key,
                        session.clone(),
                        self.config.max_key_attempts,
                    );
                    match outcome {
                        Parked::Waiting | Parked::Requeued => {
                            debug!(room_id = %room_id, event_id = %event_id, session = %session, "waiting for room key");
                            report.parked += 1;
                            if outcome == Parked::Requeued {
                                self.wake.notify_waiters();
                            }
                        }
                        Parked::Exhausted => {
                            warn!(room_id = %room_id, event_id = %event_id, session = %session, "giving up on room key");
                            results.push((
                                key.0,
                                key.1,
                                DecryptionResult::Failed {
                                    reason: KEY_NEVER_ARRIVED.to_string(),
                                },
                            ));
                        }
                    }
                }
                Err(DecryptFailure::Permanent(reason)) => {
                    warn!(room_id = %room_id, event_id = %event_id, reason = %reason, "event cannot be decrypted");
                    results.push((key.0, key.1, DecryptionResult::Failed { reason }));
                }
            }
        }

        if results.is_empty() {
            return Ok(report);
        }
        self.commit(results, &mut report).await?;
        Ok(report)
    }

    async fn commit(
        &self,
        results: Vec<(RoomId, EventId, DecryptionResult)>,
        report: &mut PassReport,
    ) -> EngineResult<()> {
        let keys: Vec<TaskKey> = results
            .iter()
            .map(|(room_id, event_id, _)| (room_id.clone(), event_id.clone()))
            .collect();
        let failed: Vec<TaskKey> = results
            .iter()
            .filter(|(_, _, result)| !result.is_decrypted())
            .map(|(room_id, event_id, _)| (room_id.clone(), event_id.clone()))
            .collect();

        let store = Arc::clone(self.ctx.store());
        let stored = tokio::task::spawn_blocking(move || store.attach_decryptions(results)).await;
        {
            let mut queue = self.queue.lock();
            for key in &keys {
                queue.complete(key);
            }
        }
        let stored = stored??;

        let (failed, decrypted): (Vec<_>, Vec<_>) =
            stored.attached.into_iter().partition(|key| failed.contains(key));
        report.decrypted = decrypted.len();
        report.failed = failed.len();
        report.skipped += stored.skipped.len();
        debug!(
            decrypted = report.decrypted,
            failed = report.failed,
            parked = report.parked,
            "decryption pass committed"
        );

        if !decrypted.is_empty() || !failed.is_empty() {
            self.ctx.emitter().emit(Notification::EventsDecrypted {
                events: decrypted,
                failed,
                summaries: stored.summaries,
            });
        }
        Ok(())
    }

    /// Worker loop: runs passes until shutdown, sleeping while there is
    /// nothing ready.
    pub async fn run_worker(self: Arc<Self>, worker: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(worker, "decryption worker started");
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if *shutdown.borrow() {
                break;
            }
            let idle = match self.process_batch().await {
                Ok(report) => report.taken == 0,
                Err(e) => {
                    error!(worker, error = %e, "decryption pass failed");
                    if self.ctx.is_shut_down() {
                        break;
                    }
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = &mut notified => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
        debug!(worker, "decryption worker stopped");
    }
}

impl std::fmt::Debug for DecryptionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.queue.lock();
        f.debug_struct("DecryptionCoordinator")
            .field("pending", &queue.len())
            .field("ready", &queue.ready_len())
            .field("parked", &queue.parked_len())
            .finish()
    }
}

/// Forwards key arrivals to a coordinator without keeping it alive.
struct KeyWaker(Weak<DecryptionCoordinator>);

impl KeyArrivalListener for KeyWaker {
    fn key_arrived(&self, session: &SessionRef) {
        if let Some(coordinator) = self.0.upgrade() {
            coordinator.key_arrived(session);
        }
    }
}
