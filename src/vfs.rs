//! Top-level coordinator: mount-alias table and path resolution.

use crate::error::{VfsError, VfsResult};
use crate::file::FileRef;
use crate::fs::Filesystem;
use crate::path::VfsPath;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Alias used when a path carries no `alias»` prefix and the caller gave
/// no starting directory.
pub const DEFAULT_ALIAS: &str = "root";

/// Bound on symlink hops during one resolution; exceeding it fails with
/// [`VfsError::LinkLoop`] instead of spinning on a cycle.
const MAX_SYMLINK_HOPS: usize = 12;

/// Bound on reparse-target substitutions, so two directories reparsing to
/// each other cannot wedge the resolver.
const MAX_REPARSE_HOPS: usize = 8;

/// The virtual filesystem: a mapping from mount aliases to mounted
/// [`Filesystem`] instances plus the path resolver that walks across them.
///
/// An explicit instance, not a process-wide singleton: tests and embedders
/// construct as many isolated `Vfs` values as they need.
pub struct Vfs {
    aliases: RwLock<HashMap<String, Arc<dyn Filesystem>>>,
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    pub fn new() -> Self {
        Self {
            aliases: RwLock::new(HashMap::new()),
        }
    }

    /// Register `fs` under `alias`. A filesystem may be mounted under any
    /// number of aliases; re-using an alias re-points it.
    pub fn add_alias(&self, fs: Arc<dyn Filesystem>, alias: impl Into<String>) {
        let alias = alias.into();
        debug!(alias = %alias, volume = %fs.volume_label(), "mounting filesystem");
        if self
            .aliases
            .write()
            .unwrap()
            .insert(alias.clone(), fs)
            .is_some()
        {
            warn!(alias = %alias, "alias re-pointed to a different filesystem");
        }
    }

    /// Drop every alias pointing at `fs`. With `flush`, outstanding dirty
    /// state is written to the backing medium before the filesystem is
    /// considered detached. Subsequent `find` calls against the removed
    /// aliases fail with `DoesNotExist`, and directory caches on the
    /// surviving mounts are scrubbed of references into `fs` (reparse
    /// targets and cross-filesystem cached entries), so nothing elsewhere
    /// in the tree still resolves to a detached file.
    pub async fn remove_all_aliases(
        &self,
        fs: &Arc<dyn Filesystem>,
        flush: bool,
    ) -> VfsResult<()> {
        let (removed, survivors) = {
            let mut table = self.aliases.write().unwrap();
            let keys: Vec<String> = table
                .iter()
                .filter(|(_, mounted)| Arc::ptr_eq(mounted, fs))
                .map(|(alias, _)| alias.clone())
                .collect();
            for alias in &keys {
                table.remove(alias);
            }
            let survivors: Vec<Arc<dyn Filesystem>> = table.values().cloned().collect();
            (keys, survivors)
        };
        for mounted in survivors {
            scrub_detached_refs(&mounted.root(), fs);
        }
        debug!(volume = %fs.volume_label(), aliases = ?removed, "unmounted");
        if flush {
            fs.sync().await?;
        }
        Ok(())
    }

    pub fn lookup_filesystem(&self, alias: &str) -> Option<Arc<dyn Filesystem>> {
        self.aliases.read().unwrap().get(alias).cloned()
    }

    /// Reverse map for introspection: every alias currently pointing at
    /// `fs`.
    pub fn aliases_of(&self, fs: &Arc<dyn Filesystem>) -> Vec<String> {
        let mut out: Vec<String> = self
            .aliases
            .read()
            .unwrap()
            .iter()
            .filter(|(_, mounted)| Arc::ptr_eq(mounted, fs))
            .map(|(alias, _)| alias.clone())
            .collect();
        out.sort();
        out
    }

    /// Current mount table as (alias, volume label) pairs.
    pub fn mount_table(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .aliases
            .read()
            .unwrap()
            .iter()
            .map(|(alias, fs)| (alias.clone(), fs.volume_label()))
            .collect();
        out.sort();
        out
    }

    /// Resolve `path` to a file. A final-component symlink is returned
    /// as-is; mid-path symlinks and reparse targets are followed.
    pub async fn find(&self, path: &str) -> VfsResult<FileRef> {
        self.find_from(path, None).await
    }

    /// As [`Vfs::find`], starting relative resolution at `start` when the
    /// path carries no alias.
    pub async fn find_from(&self, path: &str, start: Option<FileRef>) -> VfsResult<FileRef> {
        let parsed = VfsPath::parse(path);
        let base = self.resolve_base(&parsed, start)?;
        let comps: Vec<String> = parsed.components().map(String::from).collect();
        self.walk(base, comps, parsed.has_trailing_slash()).await
    }

    fn resolve_base(&self, parsed: &VfsPath<'_>, start: Option<FileRef>) -> VfsResult<FileRef> {
        match parsed.alias() {
            Some(alias) => Ok(self
                .lookup_filesystem(alias)
                .ok_or(VfsError::DoesNotExist)?
                .root()),
            None => match start {
                Some(dir) => Ok(dir),
                None => Ok(self
                    .lookup_filesystem(DEFAULT_ALIAS)
                    .ok_or(VfsError::DoesNotExist)?
                    .root()),
            },
        }
    }

    /// Component-by-component walk. Iterative: a mid-path symlink splices
    /// its target's components onto the front of the queue, with the hop
    /// counter bounding total substitutions.
    async fn walk(
        &self,
        base: FileRef,
        comps: Vec<String>,
        trailing_slash: bool,
    ) -> VfsResult<FileRef> {
        let mut current = follow_reparse(base);
        let mut remaining: VecDeque<String> = comps.into();
        let mut hops = 0usize;

        while let Some(comp) = remaining.pop_front() {
            if !current.is_directory() {
                return Err(VfsError::NotADirectory);
            }
            let is_last = remaining.is_empty();
            match comp.as_str() {
                "." => {}
                ".." => {
                    // A mount root's parent is itself.
                    if let Some(parent) = current.parent() {
                        current = follow_reparse(parent);
                    }
                }
                name => {
                    let child = current.lookup(name).await?.ok_or(VfsError::DoesNotExist)?;
                    if child.is_symlink() && !is_last {
                        hops += 1;
                        if hops > MAX_SYMLINK_HOPS {
                            return Err(VfsError::LinkLoop);
                        }
                        current = self.splice_symlink(&child, &current, &mut remaining)?;
                        continue;
                    }
                    current = follow_reparse(child);
                }
            }
        }

        if trailing_slash && !current.is_directory() {
            return Err(VfsError::NotADirectory);
        }
        Ok(current)
    }

    /// Push a symlink target's components onto the front of the walk queue
    /// and hand back the directory resolution continues from: an
    /// alias-prefixed target jumps to that filesystem's root, a
    /// `/`-absolute target restarts at the link's owning filesystem's
    /// root, a relative target continues in place.
    fn splice_symlink(
        &self,
        link: &FileRef,
        current: &FileRef,
        remaining: &mut VecDeque<String>,
    ) -> VfsResult<FileRef> {
        let target = link.symlink_target().unwrap_or_default().to_string();
        let parsed = VfsPath::parse(&target);
        let base = match parsed.alias() {
            Some(alias) => self
                .lookup_filesystem(alias)
                .ok_or(VfsError::DoesNotExist)?
                .root(),
            None if target.starts_with('/') => {
                link.filesystem().ok_or(VfsError::DoesNotExist)?.root()
            }
            None => current.clone(),
        };
        let spliced: Vec<String> = parsed.components().map(String::from).collect();
        for c in spliced.into_iter().rev() {
            remaining.push_front(c);
        }
        Ok(follow_reparse(base))
    }

    /// Create a regular file at `path`. The parent must already exist;
    /// the leaf must not.
    pub async fn create_file(&self, path: &str, mode: u32) -> VfsResult<FileRef> {
        let (parent, leaf) = self.resolve_parent(path).await?;
        if parent.lookup(&leaf).await?.is_some() {
            return Err(VfsError::AlreadyExists);
        }
        let fs = parent.filesystem().ok_or(VfsError::DoesNotExist)?;
        fs.create_file(&parent, &leaf, mode).await
    }

    /// Create a directory at `path`, creating missing intermediate
    /// directories along the way. Existing symlinks along the path are
    /// followed, so creation lands where resolution would. Returns the
    /// final directory, which may already have existed.
    pub async fn create_directory(&self, path: &str, mode: u32) -> VfsResult<FileRef> {
        let parsed = VfsPath::parse(path);
        let mut current = follow_reparse(self.resolve_base(&parsed, None)?);
        let mut remaining: VecDeque<String> = parsed.components().map(String::from).collect();
        let mut hops = 0usize;
        while let Some(comp) = remaining.pop_front() {
            if !current.is_directory() {
                return Err(VfsError::NotADirectory);
            }
            match comp.as_str() {
                "." => {}
                ".." => {
                    if let Some(parent) = current.parent() {
                        current = follow_reparse(parent);
                    }
                }
                name => match current.lookup(name).await? {
                    Some(existing) if existing.is_symlink() => {
                        hops += 1;
                        if hops > MAX_SYMLINK_HOPS {
                            return Err(VfsError::LinkLoop);
                        }
                        current = self.splice_symlink(&existing, &current, &mut remaining)?;
                    }
                    Some(existing) => {
                        if !existing.is_directory() {
                            return Err(VfsError::NotADirectory);
                        }
                        current = follow_reparse(existing);
                    }
                    None => {
                        let fs = current.filesystem().ok_or(VfsError::DoesNotExist)?;
                        current = follow_reparse(fs.create_directory(&current, name, mode).await?);
                    }
                },
            }
        }
        Ok(current)
    }

    /// Create a symlink at `path` pointing at `target`. The target is
    /// stored verbatim and resolved on traversal.
    pub async fn create_symlink(&self, path: &str, target: &str) -> VfsResult<FileRef> {
        let (parent, leaf) = self.resolve_parent(path).await?;
        if parent.lookup(&leaf).await?.is_some() {
            return Err(VfsError::AlreadyExists);
        }
        let fs = parent.filesystem().ok_or(VfsError::DoesNotExist)?;
        fs.create_symlink(&parent, &leaf, target).await
    }

    /// Remove the object at `path`. Directories must be empty. A final
    /// symlink is removed itself, not its target.
    pub async fn remove(&self, path: &str) -> VfsResult<()> {
        let (parent, leaf) = self.resolve_parent(path).await?;
        let victim = parent.lookup(&leaf).await?.ok_or(VfsError::DoesNotExist)?;
        if victim.is_directory() {
            victim.ensure_populated().await?;
            if !victim.dir()?.is_empty() {
                return Err(VfsError::NotEmpty);
            }
        }
        let fs = parent.filesystem().ok_or(VfsError::DoesNotExist)?;
        fs.remove(&parent, &victim).await?;
        parent.dir()?.remove(&leaf);
        Ok(())
    }

    /// Walk to the second-to-last component and hand back (parent, leaf).
    async fn resolve_parent(&self, path: &str) -> VfsResult<(FileRef, String)> {
        let parsed = VfsPath::parse(path);
        let mut comps: Vec<String> = parsed.components().map(String::from).collect();
        let leaf = comps.pop().ok_or(VfsError::DoesNotExist)?;
        if leaf == "." || leaf == ".." {
            return Err(VfsError::Unsupported);
        }
        let base = self.resolve_base(&parsed, None)?;
        let parent = self.walk(base, comps, false).await?;
        if !parent.is_directory() {
            return Err(VfsError::NotADirectory);
        }
        Ok((parent, leaf))
    }
}

/// Purge references into a detached filesystem from the directory caches
/// reachable under `root`: reparse targets pointing into it are cleared
/// and cached entries whose file it owns are evicted. Only already-cached
/// state is touched; nothing is populated or materialized here.
fn scrub_detached_refs(root: &FileRef, detached: &Arc<dyn Filesystem>) {
    let owned_by = |file: &FileRef| {
        file.filesystem()
            .is_some_and(|fs| Arc::ptr_eq(&fs, detached))
    };
    let mut stack = vec![root.clone()];
    while let Some(dir) = stack.pop() {
        let Some(cache) = dir.as_dir() else { continue };
        if let Some(target) = cache.reparse_target() {
            if owned_by(&target) {
                debug!(dir = %dir.name(), "clearing reparse target into unmounted filesystem");
                cache.set_reparse_target(None);
            }
        }
        let mut evict = Vec::new();
        for i in 0..cache.len() {
            let Some(entry) = cache.entry_at(i) else { break };
            let Some(file) = entry.resolved() else { continue };
            if owned_by(&file) {
                evict.push(entry.name().to_string());
            } else if file.is_directory() {
                stack.push(file);
            }
        }
        for name in evict {
            debug!(dir = %dir.name(), name = %name, "evicting entry owned by unmounted filesystem");
            cache.remove(&name);
        }
    }
}

/// Substitute a directory's reparse target, transparently and bounded.
fn follow_reparse(mut file: FileRef) -> FileRef {
    for _ in 0..MAX_REPARSE_HOPS {
        let target = match file.as_dir().and_then(|d| d.reparse_target()) {
            Some(t) => t,
            None => return file,
        };
        file = target;
    }
    warn!(file = %file.name(), "reparse chain exceeded bound; stopping substitution");
    file
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ramfs::RamFs;

    fn mounted_ramfs() -> (Vfs, Arc<dyn Filesystem>) {
        let vfs = Vfs::new();
        let fs = RamFs::new("ramdisk");
        let fs: Arc<dyn Filesystem> = fs;
        vfs.add_alias(fs.clone(), "ramfs");
        (vfs, fs)
    }

    #[tokio::test]
    async fn test_scenario_a_mkdir_p_and_find() {
        let (vfs, _fs) = mounted_ramfs();
        vfs.create_directory("ramfs»/foo/bar", 0o777).await.unwrap();
        let dir = vfs.find("ramfs»/foo/bar").await.unwrap();
        assert!(dir.is_directory());
        assert_eq!(dir.get_num_children().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scenario_b_create_file_and_enumerate() {
        let (vfs, _fs) = mounted_ramfs();
        vfs.create_directory("ramfs»/foo/bar", 0o777).await.unwrap();
        vfs.create_file("ramfs»/foo/bar/baz.txt", 0o644).await.unwrap();
        let dir = vfs.find("ramfs»/foo/bar").await.unwrap();
        assert_eq!(dir.get_num_children().await.unwrap(), 1);
        let child = dir.get_child(0).await.unwrap().unwrap();
        assert_eq!(child.name(), "baz.txt");
    }

    #[tokio::test]
    async fn test_scenario_c_dot_dot_resolution() {
        let (vfs, _fs) = mounted_ramfs();
        vfs.create_directory("ramfs»/foo/bar", 0o777).await.unwrap();
        let direct = vfs.find("ramfs»/foo/bar").await.unwrap();
        let via_dots = vfs.find("ramfs»/foo/../foo/bar").await.unwrap();
        assert!(Arc::ptr_eq(&direct, &via_dots));
        let via_self = vfs.find("ramfs»/./foo/./bar").await.unwrap();
        assert!(Arc::ptr_eq(&direct, &via_self));
    }

    #[tokio::test]
    async fn test_scenario_d_bind_aliases_share_state() {
        let vfs = Vfs::new();
        let fs: Arc<dyn Filesystem> = RamFs::new("bound");
        vfs.add_alias(fs.clone(), "a");
        vfs.add_alias(fs.clone(), "b");
        vfs.create_file("a»/x", 0o644).await.unwrap();
        let via_b = vfs.find("b»/x").await.unwrap();
        assert_eq!(via_b.name(), "x");
        assert_eq!(vfs.aliases_of(&fs), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_alias_isolation_after_unmount() {
        let (vfs, fs) = mounted_ramfs();
        vfs.create_file("ramfs»/keep.txt", 0o644).await.unwrap();
        vfs.remove_all_aliases(&fs, true).await.unwrap();
        assert!(matches!(
            vfs.find("ramfs»/keep.txt").await,
            Err(VfsError::DoesNotExist)
        ));
        assert!(matches!(vfs.find("ramfs»/").await, Err(VfsError::DoesNotExist)));
        assert!(vfs.aliases_of(&fs).is_empty());
    }

    #[tokio::test]
    async fn test_unmount_clears_reparse_targets_into_detached_fs() {
        let vfs = Vfs::new();
        let lower: Arc<dyn Filesystem> = RamFs::new("lower");
        let upper: Arc<dyn Filesystem> = RamFs::new("upper");
        vfs.add_alias(lower.clone(), "lower");
        vfs.add_alias(upper.clone(), "upper");

        vfs.create_directory("lower»/overlaid", 0o777).await.unwrap();
        vfs.create_directory("upper»/real", 0o777).await.unwrap();
        vfs.create_file("upper»/real/inner.txt", 0o644).await.unwrap();
        let overlaid = vfs.find("lower»/overlaid").await.unwrap();
        let real = vfs.find("upper»/real").await.unwrap();
        overlaid.dir().unwrap().set_reparse_target(Some(real));
        assert!(vfs.find("lower»/overlaid/inner.txt").await.is_ok());

        vfs.remove_all_aliases(&upper, true).await.unwrap();

        // Nothing on the surviving mount resolves into the detached tree.
        assert!(matches!(
            vfs.find("lower»/overlaid/inner.txt").await,
            Err(VfsError::DoesNotExist)
        ));
        // The directory itself resolves again, reparse cleared.
        let plain = vfs.find("lower»/overlaid").await.unwrap();
        assert!(Arc::ptr_eq(&plain, &overlaid));
        assert!(overlaid.dir().unwrap().reparse_target().is_none());
    }

    #[tokio::test]
    async fn test_unmount_evicts_cross_filesystem_entries() {
        let vfs = Vfs::new();
        let host: Arc<dyn Filesystem> = RamFs::new("host");
        let guest: Arc<dyn Filesystem> = RamFs::new("guest");
        vfs.add_alias(host.clone(), "host");
        vfs.add_alias(guest.clone(), "guest");

        // A guest-owned file bound into a host directory only via the
        // in-memory cache.
        vfs.create_directory("host»/mnt", 0o777).await.unwrap();
        let foreign = vfs.create_file("guest»/data", 0o644).await.unwrap();
        let mnt = vfs.find("host»/mnt").await.unwrap();
        assert!(mnt.add_ephemeral_file(foreign).await.unwrap());
        assert!(vfs.find("host»/mnt/data").await.is_ok());

        vfs.remove_all_aliases(&guest, false).await.unwrap();

        assert!(matches!(
            vfs.find("host»/mnt/data").await,
            Err(VfsError::DoesNotExist)
        ));
        assert_eq!(mnt.get_num_children().await.unwrap(), 0);
        // Host-owned state is untouched.
        assert!(vfs.find("host»/mnt").await.is_ok());
    }

    #[tokio::test]
    async fn test_alias_root_resolves_with_zero_components() {
        let (vfs, fs) = mounted_ramfs();
        let root = vfs.find("ramfs»/").await.unwrap();
        assert!(Arc::ptr_eq(&root, &fs.root()));
    }

    #[tokio::test]
    async fn test_unknown_alias_and_missing_component() {
        let (vfs, _fs) = mounted_ramfs();
        assert!(matches!(
            vfs.find("nope»/x").await,
            Err(VfsError::DoesNotExist)
        ));
        assert!(matches!(
            vfs.find("ramfs»/missing").await,
            Err(VfsError::DoesNotExist)
        ));
    }

    #[tokio::test]
    async fn test_trailing_slash_on_non_directory() {
        let (vfs, _fs) = mounted_ramfs();
        vfs.create_file("ramfs»/plain.txt", 0o644).await.unwrap();
        assert!(matches!(
            vfs.find("ramfs»/plain.txt/").await,
            Err(VfsError::NotADirectory)
        ));
        // Without the trailing slash it resolves fine.
        assert!(vfs.find("ramfs»/plain.txt").await.is_ok());
        // Mid-path traversal through a file also fails.
        assert!(matches!(
            vfs.find("ramfs»/plain.txt/below").await,
            Err(VfsError::NotADirectory)
        ));
    }

    #[tokio::test]
    async fn test_mid_path_symlink_followed_final_not() {
        let (vfs, _fs) = mounted_ramfs();
        vfs.create_directory("ramfs»/real", 0o777).await.unwrap();
        vfs.create_file("ramfs»/real/data.txt", 0o644).await.unwrap();
        vfs.create_symlink("ramfs»/link", "/real").await.unwrap();

        // Mid-path: the link is traversed.
        let through = vfs.find("ramfs»/link/data.txt").await.unwrap();
        assert_eq!(through.name(), "data.txt");

        // Final component: the link itself comes back.
        let link = vfs.find("ramfs»/link").await.unwrap();
        assert!(link.is_symlink());
    }

    #[tokio::test]
    async fn test_create_directory_through_symlink() {
        let (vfs, _fs) = mounted_ramfs();
        vfs.create_directory("ramfs»/real", 0o777).await.unwrap();
        vfs.create_symlink("ramfs»/lnk", "/real").await.unwrap();

        // Creation through the link lands in the link's target.
        let made = vfs.create_directory("ramfs»/lnk/sub", 0o777).await.unwrap();
        let direct = vfs.find("ramfs»/real/sub").await.unwrap();
        assert!(Arc::ptr_eq(&made, &direct));

        // Matches where plain resolution would land.
        let via_link = vfs.find("ramfs»/lnk/sub").await.unwrap();
        assert!(Arc::ptr_eq(&via_link, &direct));
    }

    #[tokio::test]
    async fn test_relative_symlink_target() {
        let (vfs, _fs) = mounted_ramfs();
        vfs.create_directory("ramfs»/a/b", 0o777).await.unwrap();
        vfs.create_file("ramfs»/a/b/f.txt", 0o644).await.unwrap();
        vfs.create_symlink("ramfs»/a/lnk", "b").await.unwrap();
        let f = vfs.find("ramfs»/a/lnk/f.txt").await.unwrap();
        assert_eq!(f.name(), "f.txt");
    }

    #[tokio::test]
    async fn test_symlink_cycle_detected() {
        let (vfs, _fs) = mounted_ramfs();
        vfs.create_symlink("ramfs»/one", "/two").await.unwrap();
        vfs.create_symlink("ramfs»/two", "/one").await.unwrap();
        assert!(matches!(
            vfs.find("ramfs»/one/stuck").await,
            Err(VfsError::LinkLoop)
        ));
    }

    #[tokio::test]
    async fn test_reparse_target_followed() {
        let vfs = Vfs::new();
        let lower: Arc<dyn Filesystem> = RamFs::new("lower");
        let upper: Arc<dyn Filesystem> = RamFs::new("upper");
        vfs.add_alias(lower.clone(), "lower");
        vfs.add_alias(upper.clone(), "upper");

        vfs.create_directory("lower»/overlaid", 0o777).await.unwrap();
        vfs.create_directory("upper»/real", 0o777).await.unwrap();
        vfs.create_file("upper»/real/inner.txt", 0o644).await.unwrap();

        let overlaid = vfs.find("lower»/overlaid").await.unwrap();
        let real = vfs.find("upper»/real").await.unwrap();
        overlaid.dir().unwrap().set_reparse_target(Some(real.clone()));

        // Resolution through the reparse point lands in the target tree.
        let inner = vfs.find("lower»/overlaid/inner.txt").await.unwrap();
        assert_eq!(inner.name(), "inner.txt");
        let resolved = vfs.find("lower»/overlaid").await.unwrap();
        assert!(Arc::ptr_eq(&resolved, &real));
    }

    #[tokio::test]
    async fn test_create_file_requires_parent_and_rejects_duplicates() {
        let (vfs, _fs) = mounted_ramfs();
        assert!(matches!(
            vfs.create_file("ramfs»/no/such/dir/f", 0o644).await,
            Err(VfsError::DoesNotExist)
        ));
        vfs.create_file("ramfs»/f", 0o644).await.unwrap();
        assert!(matches!(
            vfs.create_file("ramfs»/f", 0o644).await,
            Err(VfsError::AlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_remove_file_and_empty_dir_only() {
        let (vfs, _fs) = mounted_ramfs();
        vfs.create_directory("ramfs»/d", 0o777).await.unwrap();
        vfs.create_file("ramfs»/d/f", 0o644).await.unwrap();

        assert!(matches!(vfs.remove("ramfs»/d").await, Err(VfsError::NotEmpty)));
        vfs.remove("ramfs»/d/f").await.unwrap();
        assert!(matches!(
            vfs.find("ramfs»/d/f").await,
            Err(VfsError::DoesNotExist)
        ));
        vfs.remove("ramfs»/d").await.unwrap();
        assert!(matches!(
            vfs.find("ramfs»/d").await,
            Err(VfsError::DoesNotExist)
        ));
    }

    #[tokio::test]
    async fn test_find_from_relative_start() {
        let (vfs, _fs) = mounted_ramfs();
        vfs.create_directory("ramfs»/base/sub", 0o777).await.unwrap();
        let base = vfs.find("ramfs»/base").await.unwrap();
        let sub = vfs.find_from("sub", Some(base)).await.unwrap();
        assert_eq!(sub.name(), "sub");
    }

    #[tokio::test]
    async fn test_default_alias_used_without_prefix() {
        let vfs = Vfs::new();
        let fs: Arc<dyn Filesystem> = RamFs::new("rootfs");
        vfs.add_alias(fs, DEFAULT_ALIAS);
        vfs.create_file("root»/hello", 0o644).await.unwrap();
        let via_bare = vfs.find("/hello").await.unwrap();
        assert_eq!(via_bare.name(), "hello");
    }

    #[tokio::test]
    async fn test_mount_table_introspection() {
        let (vfs, fs) = mounted_ramfs();
        vfs.add_alias(fs.clone(), "alt");
        let table = vfs.mount_table();
        assert_eq!(table.len(), 2);
        assert!(table.iter().all(|(_, label)| label == "ramdisk"));
    }
}
