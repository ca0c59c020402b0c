//! # Roomline Engine
//!
//! Sync, decryption and command processing for one Matrix account.
//!
//! This crate provides:
//! - A long-polling sync loop with backoff and a halting failure state
//! - A decryption coordinator that parks events until their room key arrives
//! - A command dispatcher with per-room ordering and caller deadlines
//! - A non-blocking notification feed
//! - The transport and crypto traits the engine is driven through
//!
//! ## Architecture
//!
//! ```text
//!   SyncTransport ──▶ SyncLoop ──▶ EventStore ◀── CommandDispatcher ◀── callers
//!                        │             ▲                 │
//!                        ▼             │                 ▼
//!              DecryptionCoordinator ──┘           SyncTransport
//!                        │
//!                        ▼
//!                   CryptoEngine
//!
//!   every component ──▶ Emitter ──▶ EventFeed subscribers
//! ```
//!
//! All components share one [`AccountContext`]; [`Engine::start`] wires
//! them together and [`Engine::shutdown`] tears them down.
//!
//! ## Key Invariants
//!
//! - The sync cursor only moves inside a committed batch
//! - A storage failure halts the sync loop instead of skipping data
//! - Each encrypted event is reported decrypted at most once
//! - Commands on one room reach the server in the order they were issued
//! - A caller deadline never cancels an issued network operation
//! - Emitting a notification never blocks

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commands;
mod config;
mod context;
mod crypto;
mod decryption;
mod emitter;
mod engine;
mod error;
mod sync;
mod transport;

pub use commands::{
    Command, CommandDispatcher, CreateRoom, JoinRoom, LaneGuard, LeaveRoom, MarkRead, Paginate,
    RoomLanes, SendEvent, SendMessage, SendReceipt, SetState, SetTyping,
};
pub use config::{
    CommandConfig, DecryptionConfig, EmitterConfig, EngineConfig, RetryConfig, SyncConfig,
};
pub use context::AccountContext;
pub use crypto::{CryptoEngine, CryptoError, DecryptFailure, DecryptedPayload, KeyArrivalListener};
pub use decryption::{DecryptionCoordinator, PassReport, KEY_NEVER_ARRIVED};
pub use emitter::{Emitter, EventFeed, FeedItem, Notification};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use sync::{Backoff, SyncLoop, SyncMonitor, SyncState, SyncStats};
pub use transport::{SyncResponse, SyncTransport, TransportError, TransportResult};
