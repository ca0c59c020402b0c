//! File-backed log.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A byte log stored in one OS file.
///
/// `flush` hands buffered bytes to the OS, `sync` forces data and metadata
/// to disk. The cached length avoids a `metadata` call per append.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    len: RwLock<u64>,
}

impl FileBackend {
    /// Opens the file at `path`, creating it when absent.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            len: RwLock::new(len),
        })
    }

    /// Like [`open`](Self::open), creating missing parent directories first.
    ///
    /// # Errors
    ///
    /// Fails when a directory or the file cannot be created.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.len.read();
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        let mut buf = vec![0u8; len];
        if len > 0 {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut len = self.len.write();
        let offset = *len;
        if !data.is_empty() {
            let mut file = self.file.lock();
            file.seek(SeekFrom::End(0))?;
            file.write_all(data)?;
            *len += data.len() as u64;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.lock().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.len.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut len = self.len.write();
        if new_size > *len {
            return Err(StorageError::TruncatePastEnd {
                requested: new_size,
                size: *len,
            });
        }
        let file = self.file.lock();
        file.set_len(new_size)?;
        file.sync_all()?;
        *len = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");

        let log = FileBackend::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(log.size().unwrap(), 0);
        assert_eq!(log.path(), path.as_path());
    }

    #[test]
    fn contents_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");

        {
            let mut log = FileBackend::open(&path).unwrap();
            log.append(b"first").unwrap();
            log.append(b"second").unwrap();
            log.sync().unwrap();
        }

        let log = FileBackend::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), 11);
        assert_eq!(log.read_at(5, 6).unwrap(), b"second");
    }

    #[test]
    fn nested_directories_are_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("accounts").join("@alice").join("journal.log");

        let mut log = FileBackend::open_with_create_dirs(&path).unwrap();
        log.append(b"x").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn truncate_then_append_reuses_offsets() {
        let dir = tempdir().unwrap();
        let mut log = FileBackend::open(&dir.path().join("journal.log")).unwrap();
        log.append(b"keep").unwrap();
        log.append(b"torn").unwrap();

        log.truncate(4).unwrap();
        assert_eq!(log.append(b"next").unwrap(), 4);
        assert_eq!(log.read_at(0, 8).unwrap(), b"keepnext");
        assert!(matches!(
            log.read_at(4, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }
}
