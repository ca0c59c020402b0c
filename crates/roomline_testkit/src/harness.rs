//! Engine test harness.
//!
//! Wires a running [`Engine`] to a [`ScriptedTransport`] and a
//! [`FakeCrypto`] and subscribes to its feed before anything happens.

use crate::crypto::FakeCrypto;
use crate::transport::ScriptedTransport;
use roomline_engine::{AccountContext, Engine, EngineConfig, EventFeed, Notification};
use roomline_protocol::{DeviceId, SyncBatch, SyncCursor, UserId};
use roomline_store::EventStore;
use std::sync::Arc;
use std::time::Duration;

/// How long [`EngineHarness::wait_for`] waits before failing the test.
pub const WAIT_LIMIT: Duration = Duration::from_secs(10);

/// A running engine and its scripted collaborators.
pub struct EngineHarness {
    /// The engine.
    pub engine: Engine,
    /// The transport it syncs and sends through.
    pub transport: Arc<ScriptedTransport>,
    /// The crypto engine it decrypts with.
    pub crypto: Arc<FakeCrypto>,
    /// Feed subscribed before start-up work.
    pub feed: EventFeed,
}

impl EngineHarness {
    /// Starts an engine for `user` over an in-memory store.
    pub async fn start(user: &str, config: EngineConfig) -> Self {
        let store = EventStore::open_in_memory(UserId::from(user)).expect("open store");
        Self::start_with_store(Arc::new(store), config).await
    }

    /// Starts an engine over `store`.
    pub async fn start_with_store(store: Arc<EventStore>, config: EngineConfig) -> Self {
        let user = store.own_user().clone();
        let ctx = AccountContext::new(user, DeviceId::from("TESTDEVICE"), store, config)
            .expect("account context");
        let feed = ctx.emitter().subscribe();
        let transport = Arc::new(ScriptedTransport::new());
        let crypto = Arc::new(FakeCrypto::new());
        let engine = Engine::start(ctx, transport.clone(), crypto.clone())
            .await
            .expect("engine start");
        Self {
            engine,
            transport,
            crypto,
            feed,
        }
    }

    /// The engine's store.
    pub fn store(&self) -> &Arc<EventStore> {
        self.engine.context().store()
    }

    /// Waits for the first notification matching `predicate`, skipping
    /// the others.
    ///
    /// # Panics
    ///
    /// Panics when none arrives within [`WAIT_LIMIT`].
    pub async fn wait_for(&mut self, predicate: impl Fn(&Notification) -> bool) -> Notification {
        let feed = &mut self.feed;
        tokio::time::timeout(WAIT_LIMIT, async {
            loop {
                let notification = feed.next_notification().await.expect("feed closed");
                if predicate(&notification) {
                    return notification;
                }
            }
        })
        .await
        .expect("notification did not arrive")
    }

    /// Serves `batch` to the sync loop and waits until it is committed.
    pub async fn sync(&mut self, batch: SyncBatch, next_cursor: SyncCursor) {
        self.transport.push_sync(batch, next_cursor.clone());
        self.wait_for(|n| matches!(n, Notification::SyncComplete { cursor, .. } if *cursor == next_cursor))
            .await;
    }

    /// Notifications already buffered, without waiting.
    pub fn drain(&mut self) -> Vec<Notification> {
        let mut seen = Vec::new();
        while let Some(item) = self.feed.try_next() {
            if let roomline_engine::FeedItem::Notification(n) = item {
                seen.push(n);
            }
        }
        seen
    }
}

/// Polls `condition` until it holds.
///
/// # Panics
///
/// Panics when it still fails after [`WAIT_LIMIT`].
pub async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(WAIT_LIMIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}
