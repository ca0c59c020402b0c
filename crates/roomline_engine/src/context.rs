//! Per-account context.

use crate::config::EngineConfig;
use crate::emitter::Emitter;
use crate::error::{EngineError, EngineResult};
use roomline_protocol::{DeviceId, UserId};
use roomline_store::EventStore;
use std::sync::Arc;

/// Everything tied to one logged-in account and device.
///
/// Created at login and passed explicitly to every component; cloning is
/// cheap and every clone shares the same store and emitter.
#[derive(Debug, Clone)]
pub struct AccountContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    user_id: UserId,
    device_id: DeviceId,
    store: Arc<EventStore>,
    emitter: Emitter,
    config: EngineConfig,
}

impl AccountContext {
    /// Creates the context for `user_id` on `device_id`.
    ///
    /// # Errors
    ///
    /// Fails when the store belongs to another account or is already
    /// closed.
    pub fn new(
        user_id: UserId,
        device_id: DeviceId,
        store: Arc<EventStore>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        if store.own_user() != &user_id {
            return Err(EngineError::validation(format!(
                "store belongs to {}, not {user_id}",
                store.own_user()
            )));
        }
        if store.is_closed() {
            return Err(EngineError::Shutdown);
        }
        let emitter = Emitter::new(config.emitter.capacity);
        Ok(Self {
            inner: Arc::new(ContextInner {
                user_id,
                device_id,
                store,
                emitter,
                config,
            }),
        })
    }

    /// The account.
    pub fn user_id(&self) -> &UserId {
        &self.inner.user_id
    }

    /// This device.
    pub fn device_id(&self) -> &DeviceId {
        &self.inner.device_id
    }

    /// The account's store.
    pub fn store(&self) -> &Arc<EventStore> {
        &self.inner.store
    }

    /// The notification emitter.
    pub fn emitter(&self) -> &Emitter {
        &self.inner.emitter
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Runs a store read on the blocking pool.
    ///
    /// Room reads wait for that room's writer, which holds its lock across
    /// the journal sync.
    ///
    /// # Errors
    ///
    /// [`EngineError::Task`] when the read panics.
    pub async fn read_store<T, F>(&self, read: F) -> EngineResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&EventStore) -> T + Send + 'static,
    {
        let store = Arc::clone(&self.inner.store);
        Ok(tokio::task::spawn_blocking(move || read(&store)).await?)
    }

    /// True once the store has been closed (logout).
    pub fn is_shut_down(&self) -> bool {
        self.inner.store.is_closed()
    }
}
