//! Journal backends that fail on demand.

use roomline_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Shared control for a [`FailingBackend`].
#[derive(Debug, Clone, Default)]
pub struct FailSwitch {
    failing: Arc<AtomicBool>,
    fail_after: Arc<AtomicU64>,
    appends: Arc<AtomicU64>,
}

impl FailSwitch {
    /// Makes every following append fail.
    pub fn fail_now(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Lets appends succeed again.
    pub fn heal(&self) {
        self.failing.store(false, Ordering::SeqCst);
        self.fail_after.store(0, Ordering::SeqCst);
    }

    /// Fails every append after `n` more successful ones.
    pub fn fail_after(&self, n: u64) {
        let seen = self.appends.load(Ordering::SeqCst);
        self.fail_after.store(seen + n + 1, Ordering::SeqCst);
    }

    /// Appends attempted so far.
    pub fn appends(&self) -> u64 {
        self.appends.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        let n = self.appends.fetch_add(1, Ordering::SeqCst) + 1;
        let after = self.fail_after.load(Ordering::SeqCst);
        self.failing.load(Ordering::SeqCst) || (after != 0 && n >= after)
    }
}

/// In-memory backend whose appends fail when its [`FailSwitch`] says so.
///
/// A failing append writes half of the frame first, like a crash mid-write.
#[derive(Debug)]
pub struct FailingBackend {
    inner: InMemoryBackend,
    switch: FailSwitch,
}

impl FailingBackend {
    /// A backend and the switch controlling it.
    pub fn new() -> (Self, FailSwitch) {
        let switch = FailSwitch::default();
        (
            Self {
                inner: InMemoryBackend::new(),
                switch: switch.clone(),
            },
            switch,
        )
    }

    /// A copy of everything written so far.
    pub fn data(&self) -> Vec<u8> {
        self.inner.data()
    }
}

impl StorageBackend for FailingBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.switch.should_fail() {
            self.inner.append(&data[..data.len() / 2])?;
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected append failure",
            )));
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}
