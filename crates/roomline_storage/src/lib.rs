//! # Roomline Storage
//!
//! Append-only byte storage underneath the Roomline event journal.
//!
//! A backend is a flat byte log: it can append, read back a range, flush and
//! cut its tail. It knows nothing about journal framing, events or rooms;
//! `roomline_store` owns every byte it writes here.
//!
//! ## Backends
//!
//! - [`InMemoryBackend`] keeps the log in a `Vec<u8>` (tests, guest sessions)
//! - [`FileBackend`] keeps the log in a single OS file
//!
//! ## Example
//!
//! ```rust
//! use roomline_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut log = InMemoryBackend::new();
//! let at = log.append(b"frame").unwrap();
//! assert_eq!(log.read_at(at, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
