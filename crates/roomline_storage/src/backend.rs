//! The backend trait shared by every journal medium.

use crate::error::StorageResult;

/// An append-only byte log.
///
/// Offsets are absolute byte positions from the start of the log. The log
/// only grows through [`append`](Self::append) and only shrinks through
/// [`truncate`](Self::truncate), which the journal uses to cut a torn tail
/// left behind by a crash.
///
/// # Invariants
///
/// - `append` returns the offset of the first byte written
/// - bytes read back at an offset equal the bytes appended there
/// - after `flush` returns, appended bytes survive process exit
pub trait StorageBackend: Send + Sync {
    /// Reads exactly `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageError::ReadPastEnd`](crate::StorageError::ReadPastEnd)
    /// when the range is not fully inside the log, or on I/O failure.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Fails on I/O failure.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes appended bytes to durable storage.
    ///
    /// # Errors
    ///
    /// Fails on I/O failure.
    fn flush(&mut self) -> StorageResult<()>;

    /// Current log length, which is also the next append offset.
    ///
    /// # Errors
    ///
    /// Fails when the length cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Like [`flush`](Self::flush), but also persists file metadata.
    ///
    /// # Errors
    ///
    /// Fails on I/O failure.
    fn sync(&mut self) -> StorageResult<()>;

    /// Cuts the log down to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Fails when `new_size` is past the end of the log, or on I/O failure.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
