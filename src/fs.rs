//! The per-mounted-volume filesystem interface.

use crate::dir::DirEntryMeta;
use crate::error::{VfsError, VfsResult};
use crate::file::FileRef;
use async_trait::async_trait;

/// Operations a mounted volume provides to the VFS core.
///
/// One instance per mounted volume. Concrete variants (ramfs, rawfs,
/// iso9660, unixfs) share the [`crate::file::File`] and directory-cache
/// contracts and differ only in backing store. Mutating operations must
/// keep the in-memory directory cache and the backing store consistent:
/// persist first, then insert into the parent's cache.
///
/// Read-only or namespace-only variants keep the default `Unsupported`
/// bodies for the mutations they cannot express.
#[async_trait]
pub trait Filesystem: Send + Sync {
    fn volume_label(&self) -> String;

    /// Fixed at construction; drives the directory cache's name
    /// comparison policy.
    fn is_case_sensitive(&self) -> bool {
        true
    }

    /// The volume root. Always present, usually a directory.
    fn root(&self) -> FileRef;

    async fn create_file(&self, _parent: &FileRef, _name: &str, _mode: u32) -> VfsResult<FileRef> {
        Err(VfsError::Unsupported)
    }

    async fn create_directory(
        &self,
        _parent: &FileRef,
        _name: &str,
        _mode: u32,
    ) -> VfsResult<FileRef> {
        Err(VfsError::Unsupported)
    }

    async fn create_symlink(
        &self,
        _parent: &FileRef,
        _name: &str,
        _target: &str,
    ) -> VfsResult<FileRef> {
        Err(VfsError::Unsupported)
    }

    /// Remove `file` from the backing store. The caller evicts the cache
    /// entry afterwards; file object lifetime is reference-counted
    /// separately.
    async fn remove(&self, _parent: &FileRef, _file: &FileRef) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }

    async fn read(&self, _file: &FileRef, _offset: u64, _buf: &mut [u8]) -> VfsResult<usize> {
        Err(VfsError::Unsupported)
    }

    async fn write(&self, _file: &FileRef, _offset: u64, _data: &[u8]) -> VfsResult<usize> {
        Err(VfsError::Unsupported)
    }

    async fn truncate(&self, _file: &FileRef, _size: u64) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }

    /// Populate `dir`'s child cache from the backing store, atomically
    /// from the caller's point of view: the directory cache runs this
    /// at most once and serializes concurrent first-accessors.
    ///
    /// Variants whose directories are only ever built incrementally in
    /// memory (ramfs, unixfs) mark directories populated at creation and
    /// never see this called.
    async fn cache_directory_contents(&self, _dir: &FileRef) -> VfsResult<()> {
        Ok(())
    }

    /// Materialize a deferred directory entry into a concrete file.
    /// Must-override for filesystems that enumerate with
    /// [`DirEntryMeta`] instead of eagerly building file objects.
    async fn convert_to_file(&self, _dir: &FileRef, _meta: &DirEntryMeta) -> VfsResult<FileRef> {
        Err(VfsError::Unsupported)
    }

    /// Write outstanding dirty state to the backing medium. Used by
    /// unmount with `flush = true`.
    async fn sync(&self) -> VfsResult<()> {
        Ok(())
    }
}
