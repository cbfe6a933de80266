//! Loopback devices: a disk image file exposed as a block device, and an
//! in-memory device for ramdisks and tests.

use super::{BlockDevice, DEFAULT_CACHE_PAGES, Disk};
use crate::error::{VfsError, VfsResult};
use async_trait::async_trait;
use std::io::{self, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

/// How a [`FileDisk`] treats mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Writes stay in the page cache; the image file is never modified.
    /// The cache is critical, so dirty pages are never dropped.
    RamOnly,
    /// Writes reach the image file through normal writeback.
    Standard,
}

/// Block device backed by a disk image file.
pub struct FileDisk {
    file: tokio::sync::Mutex<tokio::fs::File>,
    size: u64,
    mode: AccessMode,
}

impl FileDisk {
    /// Open `path` as a block device and wrap it in a page cache sized at
    /// `capacity_pages` (the default when `None`).
    pub async fn open(
        path: impl AsRef<Path>,
        mode: AccessMode,
        capacity_pages: Option<usize>,
    ) -> VfsResult<Arc<Disk>> {
        let writable = mode == AccessMode::Standard;
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path.as_ref())
            .await?;
        let size = file.metadata().await?.len();
        debug!(path = %path.as_ref().display(), size, ?mode, "opened disk image");
        let dev = Self {
            file: tokio::sync::Mutex::new(file),
            size,
            mode,
        };
        let capacity = capacity_pages.unwrap_or(DEFAULT_CACHE_PAGES);
        Ok(Disk::new(Box::new(dev), capacity, mode == AccessMode::RamOnly))
    }
}

#[async_trait]
impl BlockDevice for FileDisk {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> VfsResult<()> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(buf).await?;
        Ok(())
    }

    async fn write_at(&self, offset: u64, data: &[u8]) -> VfsResult<()> {
        if self.mode == AccessMode::RamOnly {
            // The critical cache never calls this; if it did, the write is
            // ignored so the image stays untouched.
            return Ok(());
        }
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        Ok(())
    }
}

/// Byte-vector block device. The handle is cheaply cloneable and clones
/// share storage, so tests can probe the "medium" behind a cache.
pub struct MemDisk {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemDisk {
    pub fn zeroed(size: u64) -> Self {
        Self {
            data: Arc::new(Mutex::new(vec![0u8; size as usize])),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: Arc::new(Mutex::new(bytes)),
        }
    }

    /// Second handle onto the same storage.
    pub fn clone_handle(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }

    fn check_range(&self, offset: u64, len: usize, total: usize) -> VfsResult<()> {
        let end = offset as usize + len;
        if end > total {
            return Err(VfsError::Device(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {offset}+{len} beyond device end {total}"),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BlockDevice for MemDisk {
    fn size(&self) -> u64 {
        self.data.lock().unwrap().len() as u64
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> VfsResult<()> {
        let data = self.data.lock().unwrap();
        self.check_range(offset, buf.len(), data.len())?;
        let offset = offset as usize;
        buf.copy_from_slice(&data[offset..offset + buf.len()]);
        Ok(())
    }

    async fn write_at(&self, offset: u64, bytes: &[u8]) -> VfsResult<()> {
        let mut data = self.data.lock().unwrap();
        self.check_range(offset, bytes.len(), data.len())?;
        let offset = offset as usize;
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::PAGE_SIZE;
    use std::io::Write as _;

    fn image(size: usize) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&vec![0u8; size]).unwrap();
        f.flush().unwrap();
        f
    }

    #[tokio::test]
    async fn test_standard_mode_persists_writes() {
        let img = image(64 * 1024);
        let disk = FileDisk::open(img.path(), AccessMode::Standard, Some(4))
            .await
            .unwrap();
        assert_eq!(disk.size(), 64 * 1024);

        {
            let page = disk.read(0).await.unwrap();
            page.with_mut(|buf| buf[..4].copy_from_slice(b"pers"));
            disk.write(0).await.unwrap();
        }
        drop(disk);

        let raw = std::fs::read(img.path()).unwrap();
        assert_eq!(&raw[..4], b"pers");
    }

    #[tokio::test]
    async fn test_ram_only_mode_leaves_image_untouched() {
        let img = image(64 * 1024);
        let disk = FileDisk::open(img.path(), AccessMode::RamOnly, Some(4))
            .await
            .unwrap();
        assert!(disk.cache_is_critical());

        let page = disk.read(0).await.unwrap();
        page.with_mut(|buf| buf[..3].copy_from_slice(b"ram"));
        disk.write(0).await.unwrap();
        disk.sync().await.unwrap();

        let raw = std::fs::read(img.path()).unwrap();
        assert!(raw[..3].iter().all(|b| *b == 0));

        // But reads through the cache see the mutation.
        let again = disk.read(0).await.unwrap();
        again.with(|buf| assert_eq!(&buf[..3], b"ram"));
    }

    #[tokio::test]
    async fn test_file_disk_reads_existing_content() {
        let mut img = tempfile::NamedTempFile::new().unwrap();
        let mut content = vec![0u8; 2 * PAGE_SIZE];
        content[PAGE_SIZE..PAGE_SIZE + 5].copy_from_slice(b"hello");
        img.write_all(&content).unwrap();
        img.flush().unwrap();

        let disk = FileDisk::open(img.path(), AccessMode::Standard, None)
            .await
            .unwrap();
        let page = disk.read(PAGE_SIZE as u64).await.unwrap();
        page.with(|buf| assert_eq!(&buf[..5], b"hello"));
    }

    #[tokio::test]
    async fn test_mem_disk_out_of_range() {
        let dev = MemDisk::zeroed(1024);
        let mut buf = [0u8; 16];
        assert!(dev.read_at(1020, &mut buf).await.is_err());
        assert!(dev.write_at(1024, &buf).await.is_err());
        assert!(dev.read_at(0, &mut buf).await.is_ok());
    }
}
