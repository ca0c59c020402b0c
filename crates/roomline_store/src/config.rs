//! Store configuration.

use crate::registry::EventTypeRegistry;

/// Options for opening an [`EventStore`](crate::EventStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Create the store directory when it does not exist.
    pub create_if_missing: bool,

    /// `fsync` the journal on every commit instead of only flushing it.
    pub sync_on_commit: bool,

    /// Event type handlers used for validation, redaction and summaries.
    pub registry: EventTypeRegistry,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            registry: EventTypeRegistry::default(),
        }
    }
}

impl StoreConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether a missing directory is created.
    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether each commit is synced to disk.
    #[must_use]
    pub fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Replaces the event type registry.
    #[must_use]
    pub fn with_registry(mut self, registry: EventTypeRegistry) -> Self {
        self.registry = registry;
        self
    }
}
