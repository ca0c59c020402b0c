//! # Roomline Store
//!
//! Event-sourced local store for one Matrix account.
//!
//! This crate provides:
//! - the [`EventStore`]: events, per-room timelines, current state,
//!   redactions, local echoes, read markers and room summaries
//! - an append-only journal that makes every store transaction atomic and
//!   durable
//! - the [`EventTypeRegistry`], which decides per event type how events are
//!   validated, redacted and counted
//!
//! ## Architecture
//!
//! Tables live in memory, one set per room, each behind its own lock (the
//! room's write section). A transaction locks the rooms it touches in room
//! id order, applies its changes while recording how to undo them, and
//! appends the whole change set to the journal as one frame. If the append
//! fails the changes are undone before the locks are released, so no reader
//! ever observes a transaction that did not commit. Opening a store replays
//! the journal.
//!
//! ## Key Invariants
//!
//! - Stored envelopes are never rewritten; only a decryption result may be
//!   attached, and a pending echo replaced by the server's copy
//! - Timeline positions strictly increase per room and are never reused
//! - Current state per key points at the event with the highest position
//! - The sync cursor only moves inside a committed batch
//! - Redactions apply at read time, whatever order events arrived in

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dir;
mod error;
pub mod journal;
mod registry;
mod report;
mod stats;
mod store;
mod summary;
mod tables;
mod timeline;
mod txn;

pub use config::StoreConfig;
pub use dir::StoreDir;
pub use error::{StoreError, StoreResult};
pub use registry::{EventTypeHandler, EventTypeRegistry};
pub use report::{ApplyReport, DecryptionReport, RedactionConflict, SkippedEvent};
pub use stats::StoreStats;
pub use store::EventStore;
pub use summary::SummaryBuilder;
pub use tables::{EchoStatus, Mutation, RoomMutation, RoomTables, StoredEvent};
pub use timeline::{TimelineEnd, TimelineEvent, TimelinePage, TimelinePosition};
