//! Engine lifecycle.

use crate::commands::CommandDispatcher;
use crate::context::AccountContext;
use crate::crypto::CryptoEngine;
use crate::decryption::DecryptionCoordinator;
use crate::emitter::EventFeed;
use crate::error::{EngineError, EngineResult};
use crate::sync::{SyncLoop, SyncMonitor, SyncState, SyncStats};
use crate::transport::SyncTransport;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A running engine for one account.
///
/// Created by [`Engine::start`] at login and consumed by
/// [`Engine::shutdown`] at logout.
pub struct Engine {
    ctx: AccountContext,
    dispatcher: CommandDispatcher,
    decryption: Arc<DecryptionCoordinator>,
    monitor: Arc<SyncMonitor>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Starts the sync loop and decryption workers for `ctx`.
    ///
    /// Events stored without a decryption result by an earlier session are
    /// queued again before the first sync request goes out.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Shutdown`] when the store is already closed.
    pub async fn start(
        ctx: AccountContext,
        transport: Arc<dyn SyncTransport>,
        crypto: Arc<dyn CryptoEngine>,
    ) -> EngineResult<Self> {
        if ctx.is_shut_down() {
            return Err(EngineError::Shutdown);
        }
        let (shutdown, signal) = watch::channel(false);

        let decryption = Arc::new(DecryptionCoordinator::new(ctx.clone(), Arc::clone(&crypto)));
        crypto.register_key_listener(decryption.listener());
        let recovered = decryption.recover();

        let workers = ctx.config().decryption.workers;
        let mut tasks = Vec::with_capacity(workers + 1);
        for worker in 0..workers {
            tasks.push(tokio::spawn(
                Arc::clone(&decryption).run_worker(worker, signal.clone()),
            ));
        }

        let monitor = Arc::new(SyncMonitor::default());
        let sync = SyncLoop::new(
            ctx.clone(),
            Arc::clone(&transport),
            Arc::clone(&decryption),
            Arc::clone(&monitor),
        );
        tasks.push(tokio::spawn(sync.run(signal)));

        let dispatcher = CommandDispatcher::new(ctx.clone(), transport, crypto);
        info!(
            user = %ctx.user_id(),
            device = %ctx.device_id(),
            workers,
            recovered,
            "engine started"
        );
        Ok(Self {
            ctx,
            dispatcher,
            decryption,
            monitor,
            shutdown,
            tasks,
        })
    }

    /// The command surface.
    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Subscribes to notifications from now on.
    pub fn subscribe(&self) -> EventFeed {
        self.ctx.emitter().subscribe()
    }

    /// Current sync loop state.
    pub fn sync_state(&self) -> SyncState {
        self.monitor.state()
    }

    /// Sync loop statistics.
    pub fn stats(&self) -> SyncStats {
        self.monitor.stats()
    }

    /// Restarts a sync loop halted in [`SyncState::Failed`]. Returns false
    /// when it was not halted.
    pub fn restart_sync(&self) -> bool {
        self.monitor.restart()
    }

    /// Encrypted events still waiting for a decryption result.
    pub fn pending_decryptions(&self) -> usize {
        self.decryption.pending()
    }

    /// Encrypted events parked until their room key arrives.
    pub fn waiting_for_keys(&self) -> usize {
        self.decryption.waiting_for_keys()
    }

    /// The account context.
    pub fn context(&self) -> &AccountContext {
        &self.ctx
    }

    /// Stops every worker and closes the store.
    ///
    /// Operations already issued by commands keep running but can no longer
    /// record local effects.
    ///
    /// # Errors
    ///
    /// Fails when the store cannot flush its journal.
    pub async fn shutdown(self) -> EngineResult<()> {
        info!(user = %self.ctx.user_id(), "engine shutting down");
        self.shutdown.send_replace(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "engine task ended abnormally");
            }
        }
        let store = Arc::clone(self.ctx.store());
        tokio::task::spawn_blocking(move || store.close()).await??;
        info!(user = %self.ctx.user_id(), "engine stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("user_id", self.ctx.user_id())
            .field("sync_state", &self.monitor.state())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}
