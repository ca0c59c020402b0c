//! # Roomline Protocol
//!
//! Pure data types shared by the Roomline store and engine:
//!
//! - identifiers ([`RoomId`], [`EventId`], [`UserId`], [`TransactionId`],
//!   [`SessionRef`])
//! - the immutable [`Event`] envelope and its [`DecryptionResult`]
//! - sync deltas ([`SyncBatch`], [`RoomDelta`], [`SyncCursor`])
//! - outgoing [`Operation`]s and their [`OperationAck`]
//! - the computed [`RoomSummary`]
//! - CBOR helpers used for everything persisted
//!
//! No I/O happens in this crate.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
mod event;
mod ids;
mod operation;
mod summary;
mod sync;
pub mod types;

pub use codec::{from_cbor, to_cbor, CodecError, CodecResult};
pub use event::{DecryptionResult, Event, EventValidationError};
pub use ids::{DeviceId, EventId, RoomId, SessionRef, TransactionId, UserId};
pub use operation::{Operation, OperationAck};
pub use summary::RoomSummary;
pub use sync::{Membership, RoomDelta, SyncBatch, SyncCursor};
