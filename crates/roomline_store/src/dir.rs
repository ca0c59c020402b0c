//! On-disk layout of one account's store.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK          # advisory lock, one process per account
//! └─ journal.log   # committed transactions
//! ```

use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "journal.log";

/// An exclusively locked store directory.
///
/// The lock is released when this value is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock: File,
}

impl StoreDir {
    /// Opens (and optionally creates) the directory and takes its lock.
    ///
    /// # Errors
    ///
    /// - [`StoreError::MissingDirectory`] when absent and `create` is false
    /// - [`StoreError::StoreLocked`] when another process holds the lock
    /// - [`StoreError::Io`] on filesystem failure
    pub fn open(path: &Path, create: bool) -> StoreResult<Self> {
        if !path.exists() {
            if !create {
                return Err(StoreError::MissingDirectory(path.display().to_string()));
            }
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(StoreError::MissingDirectory(path.display().to_string()));
        }

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(StoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock: lock,
        })
    }

    /// The directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the journal file.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_open_is_locked_out() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("acct");

        let first = StoreDir::open(&path, true).unwrap();
        assert!(path.join(LOCK_FILE).exists());
        assert!(matches!(
            StoreDir::open(&path, true),
            Err(StoreError::StoreLocked)
        ));

        drop(first);
        assert!(StoreDir::open(&path, true).is_ok());
    }

    #[test]
    fn missing_directory_without_create() {
        let tmp = tempdir().unwrap();
        let result = StoreDir::open(&tmp.path().join("nope"), false);
        assert!(matches!(result, Err(StoreError::MissingDirectory(_))));
    }

    #[test]
    fn journal_lives_in_directory() {
        let tmp = tempdir().unwrap();
        let dir = StoreDir::open(tmp.path(), false).unwrap();
        assert_eq!(dir.journal_path(), tmp.path().join("journal.log"));
        assert_eq!(dir.path(), tmp.path());
    }
}
