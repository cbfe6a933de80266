//! RAM-backed filesystem: the whole tree lives in the directory caches,
//! file contents in an inode-keyed map.

use crate::dir::DirCache;
use crate::error::{VfsError, VfsResult};
use crate::file::{File, FileKind, FileRef};
use crate::fs::Filesystem;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

const ROOT_INODE: u64 = 1;

/// In-memory filesystem. Directories are born populated, so the
/// population hook never fires; consistency between "storage" and cache
/// is trivial because the cache is the storage.
pub struct RamFs {
    label: String,
    root: OnceLock<FileRef>,
    contents: Mutex<HashMap<u64, Vec<u8>>>,
    next_inode: AtomicU64,
}

impl RamFs {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        let fs = Arc::new(Self {
            label: label.into(),
            root: OnceLock::new(),
            contents: Mutex::new(HashMap::new()),
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

    fn alloc_inode(&self) -> u64 {
        self.next_inode.fetch_add(1, Ordering::SeqCst)
    }

    fn attach(parent: &FileRef, file: &FileRef) -> VfsResult<()> {
        parent.dir()?.insert(file.name(), file.clone());
        file.set_parent(parent);
        parent.mark_modified();
        Ok(())
    }
}

#[async_trait]
impl Filesystem for RamFs {
    fn volume_label(&self) -> String {
        self.label.clone()
    }

    fn root(&self) -> FileRef {
        self.root.get().expect("initialized at construction").clone()
    }

    async fn create_file(&self, parent: &FileRef, name: &str, mode: u32) -> VfsResult<FileRef> {
        if parent.dir()?.lookup_cached(name).is_some() {
            return Err(VfsError::AlreadyExists);
        }
        let inode = self.alloc_inode();
        let fs = parent.filesystem().ok_or(VfsError::DoesNotExist)?;
        let file = File::new(name, inode, FileKind::Regular, mode, Arc::downgrade(&fs));
        self.contents.lock().unwrap().insert(inode, Vec::new());
        Self::attach(parent, &file)?;
        Ok(file)
    }

    async fn create_directory(
        &self,
        parent: &FileRef,
        name: &str,
        mode: u32,
    ) -> VfsResult<FileRef> {
        if parent.dir()?.lookup_cached(name).is_some() {
            return Err(VfsError::AlreadyExists);
        }
        let fs = parent.filesystem().ok_or(VfsError::DoesNotExist)?;
        let dir = File::new(
            name,
            self.alloc_inode(),
            FileKind::Directory(DirCache::new(self.is_case_sensitive())),
            mode,
            Arc::downgrade(&fs),
        );
        dir.dir()?.mark_populated();
        Self::attach(parent, &dir)?;
        Ok(dir)
    }

    async fn create_symlink(
        &self,
        parent: &FileRef,
        name: &str,
        target: &str,
    ) -> VfsResult<FileRef> {
        if parent.dir()?.lookup_cached(name).is_some() {
            return Err(VfsError::AlreadyExists);
        }
        let fs = parent.filesystem().ok_or(VfsError::DoesNotExist)?;
        let link = File::new(
            name,
            self.alloc_inode(),
            FileKind::Symlink {
                target: target.to_string(),
            },
            0o777,
            Arc::downgrade(&fs),
        );
        link.set_size(target.len() as u64);
        Self::attach(parent, &link)?;
        Ok(link)
    }

    async fn remove(&self, _parent: &FileRef, file: &FileRef) -> VfsResult<()> {
        if let Some(cache) = file.as_dir() {
            if !cache.is_empty() {
                return Err(VfsError::NotEmpty);
            }
        }
        self.contents.lock().unwrap().remove(&file.inode());
        Ok(())
    }

    async fn read(&self, file: &FileRef, offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        let contents = self.contents.lock().unwrap();
        let data = contents.get(&file.inode()).ok_or(VfsError::DoesNotExist)?;
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    async fn write(&self, file: &FileRef, offset: u64, data: &[u8]) -> VfsResult<usize> {
        let mut contents = self.contents.lock().unwrap();
        let backing = contents
            .get_mut(&file.inode())
            .ok_or(VfsError::DoesNotExist)?;
        let offset = offset as usize;
        let end = offset + data.len();
        if backing.len() < end {
            // Holes between the old end and the write offset read back as
            // zeroes.
            backing.resize(end, 0);
        }
        backing[offset..end].copy_from_slice(data);
        file.set_size(backing.len() as u64);
        Ok(data.len())
    }

    async fn truncate(&self, file: &FileRef, size: u64) -> VfsResult<()> {
        let mut contents = self.contents.lock().unwrap();
        let backing = contents
            .get_mut(&file.inode())
            .ok_or(VfsError::DoesNotExist)?;
        backing.resize(size as usize, 0);
        file.set_size(size);
        Ok(())
    }
}
