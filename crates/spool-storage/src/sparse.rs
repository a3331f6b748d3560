#![forbid(unsafe_code)]

//! Sparse data file: pre-allocated at total size, read and written at
//! absolute offsets.
//!
//! Handles are opened per operation. Callers serialize access with a
//! per-resource lock; the completer in particular must not keep a handle
//! open across a whole fetch.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::{StorageError, StorageResult};

/// A fixed-size data file with holes for unwritten regions.
#[derive(Debug, Clone)]
pub struct SparseFile {
    path: PathBuf,
    total_size: u64,
}

impl SparseFile {
    /// Create (or adopt) the file at `path` and size it to `total_size`.
    ///
    /// A single truncate call makes the file sparse on filesystems that
    /// support holes. Existing content is kept; resuming after a restart
    /// re-uses whatever bytes were already written.
    pub async fn allocate(path: impl Into<PathBuf>, total_size: u64) -> StorageResult<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;
        file.set_len(total_size).await?;
        Ok(Self { path, total_size })
    }

    /// Wrap an existing data file without resizing it.
    pub async fn open_existing(path: impl Into<PathBuf>, total_size: u64) -> StorageResult<Self> {
        let path = path.into();
        let meta = tokio::fs::metadata(&path).await?;
        if meta.len() != total_size {
            // Size drifted (partial crash during allocate); restore it.
            let file = OpenOptions::new().write(true).open(&path).await?;
            file.set_len(total_size).await?;
        }
        Ok(Self { path, total_size })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    fn check_bounds(&self, offset: u64, len: u64) -> StorageResult<()> {
        if len == 0 || offset.saturating_add(len) > self.total_size {
            return Err(StorageError::InvalidRange {
                start: offset,
                end: offset.saturating_add(len).saturating_sub(1),
                total: self.total_size,
            });
        }
        Ok(())
    }

    /// Read exactly `len` bytes at `offset`.
    pub async fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.check_bounds(offset, len as u64)?;
        let mut file = OpenOptions::new().read(true).open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Write `data` at `offset`.
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.check_bounds(offset, data.len() as u64)?;
        let mut file = OpenOptions::new().write(true).open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }
}
