//! Append-only journal of committed transactions.
//!
//! Each commit is one frame holding the CBOR-encoded [`JournalRecord`].
//! Opening a journal replays every complete frame; a torn tail frame is
//! an uncommitted transaction and is cut off.

mod frame;

pub use frame::{crc32, FrameKind, FrameReader, FRAME_MAGIC, FRAME_VERSION};

use crate::error::StoreResult;
use crate::tables::Mutation;
use roomline_protocol::{from_cbor, to_cbor};
use roomline_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Commit sequence number, starting at 1.
    pub seq: u64,
    /// Changes in application order.
    pub mutations: Vec<Mutation>,
}

/// Writer side of the journal.
pub(crate) struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
    next_seq: u64,
}

impl Journal {
    /// Opens a journal and returns every committed record in it.
    pub fn open(
        mut backend: Box<dyn StorageBackend>,
        sync_on_commit: bool,
    ) -> StoreResult<(Self, Vec<JournalRecord>)> {
        let (records, valid_len, log_len) = {
            let mut reader = FrameReader::new(backend.as_ref())?;
            let mut records = Vec::new();
            for frame in reader.by_ref() {
                let (_kind, payload) = frame?;
                records.push(from_cbor::<JournalRecord>(&payload)?);
            }
            (records, reader.valid_len(), reader.log_len())
        };

        if valid_len < log_len {
            warn!(
                valid_len,
                discarded = log_len - valid_len,
                "discarding torn journal tail"
            );
            backend.truncate(valid_len)?;
        }

        let next_seq = records.last().map_or(1, |r| r.seq + 1);
        debug!(records = records.len(), next_seq, "journal opened");

        Ok((
            Self {
                backend,
                sync_on_commit,
                next_seq,
            },
            records,
        ))
    }

    /// Appends one commit and makes it durable.
    ///
    /// On failure the log is cut back to where it was, so a failed commit
    /// never replays.
    pub fn commit(&mut self, mutations: &[Mutation]) -> StoreResult<u64> {
        let seq = self.next_seq;
        let record = JournalRecordRef { seq, mutations };
        let frame = frame::encode(FrameKind::Commit, &to_cbor(&record)?)?;

        let start = self.backend.size()?;
        if let Err(e) = self.write_durably(&frame) {
            if let Err(cut) = self.backend.truncate(start) {
                warn!(error = %cut, start, "could not cut failed commit from journal");
            }
            return Err(e);
        }

        self.next_seq += 1;
        Ok(seq)
    }

    fn write_durably(&mut self, frame: &[u8]) -> StoreResult<()> {
        self.backend.append(frame)?;
        if self.sync_on_commit {
            self.backend.sync()?;
        } else {
            self.backend.flush()?;
        }
        Ok(())
    }

    /// Current journal length in bytes.
    pub fn size(&self) -> StoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Final flush before the store goes away.
    pub fn close(&mut self) -> StoreResult<()> {
        self.backend.sync()?;
        Ok(())
    }
}

/// Borrowing twin of [`JournalRecord`] so commits encode without cloning.
#[derive(Serialize)]
struct JournalRecordRef<'a> {
    seq: u64,
    mutations: &'a [Mutation],
}
