//! Mount-alias virtual filesystem core.
//!
//! Paths name a mounted filesystem by alias (`ramfs»/etc/motd`, or the
//! ASCII form `ramfs::/etc/motd`) and resolve through per-directory
//! caches that populate from the backing store at most once. Block-backed
//! filesystems sit on a pinning page cache over their disks.

pub mod dir;
pub mod disk;
pub mod error;
pub mod file;
pub mod fs;
pub mod iso9660;
pub mod path;
pub mod ramfs;
pub mod rawfs;
pub mod unixfs;
pub mod vfs;

pub use error::{VfsError, VfsResult};
pub use file::{File, FileKind, FileRef};
pub use fs::Filesystem;
pub use vfs::Vfs;
