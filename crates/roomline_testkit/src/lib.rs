//! # Roomline Testkit
//!
//! Test utilities for Roomline.
//!
//! This crate provides:
//! - event and batch fixtures ([`RoomFixture`], [`joined`], [`batch`])
//! - [`TestStore`], a store in memory or in a temp directory
//! - [`FailingBackend`] for journal failure injection
//! - [`ScriptedTransport`] and [`FakeCrypto`], scripted collaborators for
//!   engine tests
//! - [`EngineHarness`], a running engine wired to both
//! - proptest strategies in [`generators`]
//! - [`init_test_tracing`] for log output in tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use roomline_testkit::prelude::*;
//!
//! let store = TestStore::memory("@me:example.org");
//! let mut room = RoomFixture::new("!room:example.org");
//! let batch = batch(vec![joined(&room.id, vec![room.message("@bob:example.org", "hi")])]);
//! store.apply_sync_batch(&batch, &cursor("s1")).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod crypto;
pub mod fixtures;
pub mod generators;
pub mod harness;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::*;
    pub use crate::crypto::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
    pub use crate::transport::*;
    pub use crate::init_test_tracing;
}

pub use backend::*;
pub use crypto::*;
pub use fixtures::*;
pub use harness::*;
pub use transport::*;

/// Installs a `fmt` subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
