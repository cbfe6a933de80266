//! File entities: the closed set of filesystem object kinds and their
//! shared metadata.

use crate::dir::DirCache;
use crate::disk::Disk;
use crate::error::{VfsError, VfsResult};
use crate::fs::Filesystem;
use crate::unixfs::SocketState;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

/// Logical timestamp, nanoseconds since the Unix epoch.
pub type Timestamp = u64;

/// Shared handle to a [`File`]. Directory caches, open descriptors and
/// resolver results all share ownership; the longest holder wins.
pub type FileRef = Arc<File>;

pub fn timestamp_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// What a [`File`] is, with per-kind payload. A tagged variant set instead
/// of an inheritance chain: the resolver matches on this, filesystems
/// construct it.
pub enum FileKind {
    Regular,
    Directory(DirCache),
    Symlink { target: String },
    Socket(SocketState),
    Device(Arc<Disk>),
}

/// Any named, addressable object reachable via a path.
///
/// Lifetime contract: a `File` holds only a weak reference to its owning
/// [`Filesystem`] and to its parent; the filesystem outlives every file it
/// created while mounted, and parents are kept alive by the directory
/// caches that reference their children.
pub struct File {
    name: String,
    inode: u64,
    kind: FileKind,
    size: AtomicU64,
    permissions: AtomicU32,
    accessed: AtomicU64,
    modified: AtomicU64,
    created: AtomicU64,
    fs: Weak<dyn Filesystem>,
    parent: RwLock<Weak<File>>,
}

impl File {
    pub fn new(
        name: impl Into<String>,
        inode: u64,
        kind: FileKind,
        permissions: u32,
        fs: Weak<dyn Filesystem>,
    ) -> FileRef {
        let now = timestamp_now();
        Arc::new(Self {
            name: name.into(),
            inode,
            kind,
            size: AtomicU64::new(0),
            permissions: AtomicU32::new(permissions),
            accessed: AtomicU64::new(now),
            modified: AtomicU64::new(now),
            created: AtomicU64::new(now),
            fs,
            parent: RwLock::new(Weak::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opaque per-filesystem identifier, stable for the object's lifetime.
    pub fn inode(&self) -> u64 {
        self.inode
    }

    pub fn kind(&self) -> &FileKind {
        &self.kind
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, FileKind::Directory(_))
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.kind, FileKind::Symlink { .. })
    }

    pub fn is_regular(&self) -> bool {
        matches!(self.kind, FileKind::Regular)
    }

    pub fn as_dir(&self) -> Option<&DirCache> {
        match &self.kind {
            FileKind::Directory(cache) => Some(cache),
            _ => None,
        }
    }

    /// The directory cache, or `NotADirectory`.
    pub fn dir(&self) -> VfsResult<&DirCache> {
        self.as_dir().ok_or(VfsError::NotADirectory)
    }

    pub fn symlink_target(&self) -> Option<&str> {
        match &self.kind {
            FileKind::Symlink { target } => Some(target),
            _ => None,
        }
    }

    pub fn as_socket(&self) -> Option<&SocketState> {
        match &self.kind {
            FileKind::Socket(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_device(&self) -> Option<&Arc<Disk>> {
        match &self.kind {
            FileKind::Device(disk) => Some(disk),
            _ => None,
        }
    }

    /// Upgraded handle to the owning filesystem. `None` only after the
    /// filesystem has been dropped, at which point the file is orphaned.
    pub fn filesystem(&self) -> Option<Arc<dyn Filesystem>> {
        self.fs.upgrade()
    }

    pub fn parent(&self) -> Option<FileRef> {
        self.parent.read().ok().and_then(|p| p.upgrade())
    }

    pub fn set_parent(&self, parent: &FileRef) {
        if let Ok(mut slot) = self.parent.write() {
            *slot = Arc::downgrade(parent);
        }
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::Release);
    }

    pub fn permissions(&self) -> u32 {
        self.permissions.load(Ordering::Relaxed)
    }

    pub fn set_permissions(&self, mask: u32) {
        self.permissions.store(mask, Ordering::Relaxed);
    }

    pub fn accessed_time(&self) -> Timestamp {
        self.accessed.load(Ordering::Relaxed)
    }

    pub fn modified_time(&self) -> Timestamp {
        self.modified.load(Ordering::Relaxed)
    }

    pub fn created_time(&self) -> Timestamp {
        self.created.load(Ordering::Relaxed)
    }

    pub fn mark_accessed(&self) {
        self.accessed.store(timestamp_now(), Ordering::Relaxed);
    }

    pub fn mark_modified(&self) {
        self.modified.store(timestamp_now(), Ordering::Relaxed);
    }

    /// Read through the owning filesystem. Not valid for directories.
    pub async fn read_at(self: &Arc<Self>, offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        if self.is_directory() {
            return Err(VfsError::IsADirectory);
        }
        let fs = self.filesystem().ok_or(VfsError::DoesNotExist)?;
        let n = fs.read(self, offset, buf).await?;
        self.mark_accessed();
        Ok(n)
    }

    /// Write through the owning filesystem. Not valid for directories.
    pub async fn write_at(self: &Arc<Self>, offset: u64, data: &[u8]) -> VfsResult<usize> {
        if self.is_directory() {
            return Err(VfsError::IsADirectory);
        }
        let fs = self.filesystem().ok_or(VfsError::DoesNotExist)?;
        let n = fs.write(self, offset, data).await?;
        self.mark_modified();
        Ok(n)
    }

    pub async fn truncate(self: &Arc<Self>, size: u64) -> VfsResult<()> {
        if self.is_directory() {
            return Err(VfsError::IsADirectory);
        }
        let fs = self.filesystem().ok_or(VfsError::DoesNotExist)?;
        fs.truncate(self, size).await?;
        self.mark_modified();
        Ok(())
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            FileKind::Regular => "regular",
            FileKind::Directory(_) => "directory",
            FileKind::Symlink { .. } => "symlink",
            FileKind::Socket(_) => "socket",
            FileKind::Device(_) => "device",
        };
        f.debug_struct("File")
            .field("name", &self.name)
            .field("inode", &self.inode)
            .field("kind", &kind)
            .field("size", &self.size())
            .finish()
    }
}
