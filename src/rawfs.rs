//! Flat namespace exposing whole block devices as files, so tools can
//! read and write raw media before any filesystem is mounted on them.

use crate::dir::DirCache;
use crate::error::{VfsError, VfsResult};
use crate::file::{File, FileKind, FileRef};
use crate::fs::Filesystem;
use crate::disk::Disk;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

const ROOT_INODE: u64 = 1;

/// One directory of device nodes, one per registered disk. No nesting,
/// no creation through the VFS; devices appear only via [`RawFs::add_disk`].
pub struct RawFs {
    root: OnceLock<FileRef>,
    next_inode: AtomicU64,
}

impl RawFs {
    pub fn new() -> Arc<Self> {
        let fs = Arc::new(Self {
            root: OnceLock::new(),
            next_inode: AtomicU64::new(ROOT_INODE + 1),
        });
        let weak = Arc::downgrade(&(fs.clone() as Arc<dyn Filesystem>));
        let root = File::new(
            "/",
            ROOT_INODE,
            FileKind::Directory(DirCache::new(true)),
            0o755,
            weak,
        );
        root.dir().expect("root is a directory").mark_populated();
        fs.root.set(root).ok();
        fs
    }

    /// Register a disk under `name`. The device file's size tracks the
    /// underlying medium.
    pub fn add_disk(self: &Arc<Self>, name: &str, disk: Arc<Disk>) -> VfsResult<FileRef> {
        let root = self.root();
        let cache = root.dir()?;
        if cache.lookup_cached(name).is_some() {
            return Err(VfsError::AlreadyExists);
        }
        let size = disk.size();
        let node = File::new(
            name,
            self.next_inode.fetch_add(1, Ordering::SeqCst),
            FileKind::Device(disk),
            0o600,
            Arc::downgrade(&(self.clone() as Arc<dyn Filesystem>)),
        );
        node.set_size(size);
        cache.insert(name, node.clone());
        node.set_parent(&root);
        debug!(name, size, "registered raw device");
        Ok(node)
    }
}

#[async_trait]
impl Filesystem for RawFs {
    fn volume_label(&self) -> String {
        "raw".to_string()
    }

    fn root(&self) -> FileRef {
        self.root.get().expect("initialized at construction").clone()
    }

    async fn read(&self, file: &FileRef, offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        let disk = file.as_device().ok_or(VfsError::Unsupported)?;
        if offset >= disk.size() {
            return Ok(0);
        }
        let want = buf.len().min((disk.size() - offset) as usize);
        let block = disk.block_size() as u64;
        let mut done = 0usize;
        while done < want {
            let at = offset + done as u64;
            let aligned = (at / block) * block;
            let page = disk.read(aligned).await?;
            let pos = page.offset() + (at - aligned) as usize;
            let n = (want - done).min(page.len() - pos);
            page.with(|data| buf[done..done + n].copy_from_slice(&data[pos..pos + n]));
            done += n;
        }
        Ok(done)
    }

    async fn write(&self, file: &FileRef, offset: u64, data: &[u8]) -> VfsResult<usize> {
        let disk = file.as_device().ok_or(VfsError::Unsupported)?;
        if offset >= disk.size() {
            return Err(VfsError::Device(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "write past device end",
            )));
        }
        let want = data.len().min((disk.size() - offset) as usize);
        let block = disk.block_size() as u64;
        let mut done = 0usize;
        while done < want {
            let at = offset + done as u64;
            let aligned = (at / block) * block;
            let page = disk.read(aligned).await?;
            let pos = page.offset() + (at - aligned) as usize;
            let n = (want - done).min(page.len() - pos);
            page.with_mut(|buf| buf[pos..pos + n].copy_from_slice(&data[done..done + n]));
            disk.write(aligned).await?;
            done += n;
        }
        Ok(done)
    }

    async fn sync(&self) -> VfsResult<()> {
        let root = self.root();
        let cache = root.dir()?;
        for i in 0..cache.len() {
            if let Some(entry) = cache.entry_at(i) {
                if let Some(file) = entry.resolved() {
                    if let Some(disk) = file.as_device() {
                        disk.sync().await?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{MemDisk, PAGE_SIZE};
    use crate::vfs::Vfs;

    fn raw_with_disk(size: u64) -> (Arc<RawFs>, MemDisk) {
        let dev = MemDisk::zeroed(size);
        let probe = dev.clone_handle();
        let fs = RawFs::new();
        let disk = Disk::new(Box::new(dev), 8, false);
        fs.add_disk("sda", disk).unwrap();
        (fs, probe)
    }

    #[tokio::test]
    async fn test_device_visible_through_vfs() {
        let (fs, _probe) = raw_with_disk(64 * 1024);
        let vfs = Vfs::new();
        vfs.add_alias(fs, "raw");

        let node = vfs.find("raw»/sda").await.unwrap();
        assert_eq!(node.size(), 64 * 1024);
        assert!(node.as_device().is_some());
    }

    #[tokio::test]
    async fn test_unaligned_write_read_roundtrip() {
        let (fs, probe) = raw_with_disk(64 * 1024);
        let vfs = Vfs::new();
        vfs.add_alias(fs, "raw");
        let node = vfs.find("raw»/sda").await.unwrap();

        // Straddles a page boundary and starts mid-block.
        let payload: Vec<u8> = (0..PAGE_SIZE + 777).map(|i| (i % 251) as u8).collect();
        let offset = PAGE_SIZE as u64 - 300;
        assert_eq!(node.write_at(offset, &payload).await.unwrap(), payload.len());

        let mut back = vec![0u8; payload.len()];
        assert_eq!(node.read_at(offset, &mut back).await.unwrap(), payload.len());
        assert_eq!(back, payload);

        // Write-through reached the medium.
        use crate::disk::BlockDevice;
        let mut raw = vec![0u8; payload.len()];
        probe.read_at(offset, &mut raw).await.unwrap();
        assert_eq!(raw, payload);
    }

    #[tokio::test]
    async fn test_read_clamped_at_device_end() {
        let (fs, _probe) = raw_with_disk(4096);
        let node = fs.root();
        let node = node.dir().unwrap().lookup_cached("sda").unwrap().resolved().unwrap();

        let mut buf = vec![0u8; 100];
        assert_eq!(fs.read(&node, 4096 - 40, &mut buf).await.unwrap(), 40);
        assert_eq!(fs.read(&node, 4096, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let (fs, _probe) = raw_with_disk(4096);
        let dev = MemDisk::zeroed(4096);
        let disk = Disk::new(Box::new(dev), 8, false);
        assert!(matches!(
            fs.add_disk("sda", disk),
            Err(VfsError::AlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_no_creation_through_vfs() {
        let (fs, _probe) = raw_with_disk(4096);
        let vfs = Vfs::new();
        vfs.add_alias(fs, "raw");
        assert!(matches!(
            vfs.create_file("raw»/newdev", 0o600).await,
            Err(VfsError::Unsupported)
        ));
    }
}
