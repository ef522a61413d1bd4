//! Shared handle to a `.part` file.

use anyhow::{Context, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{alloc, part_path};

/// Scratch file for one download. Clones share the descriptor; every
/// `write_at` is an independent positioned write, so workers never contend
/// on a cursor.
#[derive(Debug, Clone)]
pub struct PartFile {
    file: Arc<File>,
    path: PathBuf,
}

impl PartFile {
    /// Create (truncating) `<final_path>.part`, preallocated to `size` when known.
    pub fn create(final_path: &Path, size: Option<u64>) -> Result<Self> {
        let path = part_path(final_path);
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("failed to create part file: {}", path.display()))?;
        if let Some(size) = size {
            alloc::preallocate(&file, size)?;
        }
        Ok(Self {
            file: Arc::new(file),
            path,
        })
    }

    /// Open an existing `<final_path>.part` for resume (no truncation).
    pub fn open_existing(final_path: &Path) -> Result<Self> {
        let path = part_path(final_path);
        let file = File::options()
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open part file: {}", path.display()))?;
        Ok(Self {
            file: Arc::new(file),
            path,
        })
    }

    /// Write all of `data` at `offset` without touching any shared cursor.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(data, offset)
    }

    #[cfg(windows)]
    pub fn write_at(&self, mut offset: u64, mut data: &[u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !data.is_empty() {
            let n = self.file.seek_write(data, offset)?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            data = &data[n..];
            offset += n as u64;
        }
        Ok(())
    }

    /// Current on-disk length.
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Flush data and metadata to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().context("part file sync failed")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically rename the part file to `final_path`. Sync first for durability.
    /// Fails if `final_path` is on a different filesystem.
    pub fn finalize(self, final_path: &Path) -> Result<()> {
        let PartFile { file, path } = self;
        drop(file);
        std::fs::rename(&path, final_path).with_context(|| {
            format!("failed to rename {} to {}", path.display(), final_path.display())
        })
    }
}
