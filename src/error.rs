//! Error taxonomy shared by path resolution, directory caching and disk I/O.

use thiserror::Error;

/// Failures surfaced by VFS operations.
///
/// Path resolution and cache population report errors to the immediate
/// caller; nothing in this crate panics on a user-reachable path. Internal
/// invariant violations are reported as [`VfsError::CacheCorruption`] and
/// logged at the detection site.
#[derive(Debug, Error)]
pub enum VfsError {
    /// Unknown mount alias or missing path component.
    #[error("no such file or directory")]
    DoesNotExist,

    /// A mid-path component (or a final component with a trailing slash)
    /// is not traversable.
    #[error("not a directory")]
    NotADirectory,

    /// The operation expected a leaf but resolved a directory.
    #[error("is a directory")]
    IsADirectory,

    /// Creation target (or ephemeral-file name) collides with an existing
    /// child.
    #[error("file already exists")]
    AlreadyExists,

    /// Directory removal attempted while children remain.
    #[error("directory not empty")]
    NotEmpty,

    /// Permission bitmask check failed at the consuming layer.
    #[error("permission denied")]
    PermissionDenied,

    /// Symlink resolution exceeded the hop bound.
    #[error("too many levels of symbolic links")]
    LinkLoop,

    /// The mounted filesystem does not implement this operation.
    #[error("operation not supported")]
    Unsupported,

    /// Propagated from the block device layer.
    #[error("device error: {0}")]
    Device(#[from] std::io::Error),

    /// Internal invariant violation in the page cache or directory cache.
    #[error("cache corruption: {0}")]
    CacheCorruption(String),
}

pub type VfsResult<T> = Result<T, VfsError>;
