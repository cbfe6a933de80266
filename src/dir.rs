//! Directory child cache: hash-keyed lookup plus insertion-ordered
//! enumeration, populated at most once from the backing store.

use crate::error::{VfsError, VfsResult};
use crate::file::{File, FileRef};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OnceCell;

/// Deferred child description: enough to enumerate a directory without
/// building the full file object. Converted on first access via
/// [`crate::fs::Filesystem::convert_to_file`].
#[derive(Debug, Clone)]
pub struct DirEntryMeta {
    pub name: String,
    /// Per-filesystem identifier (e.g. an extent LBA for iso9660).
    pub inode: u64,
    pub size: u64,
    /// Filesystem-private flag bits.
    pub flags: u32,
}

enum EntrySlot {
    Resolved(FileRef),
    Deferred(DirEntryMeta),
}

/// Cache-internal wrapper for one named child: either a resolved file or
/// deferred metadata a filesystem later materializes.
pub struct DirEntry {
    name: String,
    slot: Mutex<EntrySlot>,
}

impl DirEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resolved file, if materialization already happened.
    pub fn resolved(&self) -> Option<FileRef> {
        match &*self.slot.lock().unwrap() {
            EntrySlot::Resolved(f) => Some(f.clone()),
            EntrySlot::Deferred(_) => None,
        }
    }
}

struct DirCacheInner {
    by_name: HashMap<String, Arc<DirEntry>>,
    linear: Vec<Arc<DirEntry>>,
}

/// Per-directory child cache.
///
/// Invariant: either entirely unpopulated or a complete reflection of the
/// directory's children; partial population is never observable. The
/// linear order is insertion order and stays stable across calls that do
/// not mutate the directory.
pub struct DirCache {
    inner: RwLock<DirCacheInner>,
    populated: OnceCell<()>,
    case_sensitive: bool,
    reparse: RwLock<Option<FileRef>>,
}

impl DirCache {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            inner: RwLock::new(DirCacheInner {
                by_name: HashMap::new(),
                linear: Vec::new(),
            }),
            populated: OnceCell::new(),
            case_sensitive,
            reparse: RwLock::new(None),
        }
    }

    fn key(&self, name: &str) -> String {
        if self.case_sensitive {
            name.to_string()
        } else {
            name.to_lowercase()
        }
    }

    pub fn is_populated(&self) -> bool {
        self.populated.initialized()
    }

    /// Directories built incrementally in memory are born populated.
    pub fn mark_populated(&self) {
        let _ = self.populated.set(());
    }

    pub(crate) fn populated_cell(&self) -> &OnceCell<()> {
        &self.populated
    }

    /// Hash lookup against the current cache contents. Does not populate;
    /// returns `None` when the cache is unpopulated or the name is absent.
    pub fn lookup_cached(&self, name: &str) -> Option<Arc<DirEntry>> {
        let inner = self.inner.read().unwrap();
        inner.by_name.get(&self.key(name)).cloned()
    }

    /// Insert a resolved child discovered from (or persisted to) storage.
    /// Replaces any previous entry with the same name.
    pub fn insert(&self, name: &str, file: FileRef) {
        self.insert_entry(Arc::new(DirEntry {
            name: name.to_string(),
            slot: Mutex::new(EntrySlot::Resolved(file)),
        }));
    }

    /// Insert a deferred child for cheap enumeration.
    pub fn insert_deferred(&self, meta: DirEntryMeta) {
        self.insert_entry(Arc::new(DirEntry {
            name: meta.name.clone(),
            slot: Mutex::new(EntrySlot::Deferred(meta)),
        }));
    }

    fn insert_entry(&self, entry: Arc<DirEntry>) {
        let key = self.key(&entry.name);
        let mut inner = self.inner.write().unwrap();
        if let Some(old) = inner.by_name.insert(key, entry.clone()) {
            inner.linear.retain(|e| !Arc::ptr_eq(e, &old));
        }
        inner.linear.push(entry);
        drop(inner);
        self.mark_populated();
    }

    /// Insert an in-memory-only child. Fails without side effect when the
    /// name already exists.
    pub fn add_ephemeral(&self, file: FileRef) -> bool {
        let key = self.key(file.name());
        let name = file.name().to_string();
        let mut inner = self.inner.write().unwrap();
        if inner.by_name.contains_key(&key) {
            return false;
        }
        let entry = Arc::new(DirEntry {
            name,
            slot: Mutex::new(EntrySlot::Resolved(file)),
        });
        inner.by_name.insert(key, entry.clone());
        inner.linear.push(entry);
        true
    }

    /// Evict a child from both the hashed and linear structures. The
    /// underlying file object stays alive for existing holders.
    pub fn remove(&self, name: &str) -> Option<Arc<DirEntry>> {
        let mut inner = self.inner.write().unwrap();
        let entry = inner.by_name.remove(&self.key(name))?;
        inner.linear.retain(|e| !Arc::ptr_eq(e, &entry));
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().linear.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry_at(&self, n: usize) -> Option<Arc<DirEntry>> {
        self.inner.read().unwrap().linear.get(n).cloned()
    }

    /// Substitute directory followed transparently during resolution
    /// (union/overlay-style redirection).
    pub fn reparse_target(&self) -> Option<FileRef> {
        self.reparse.read().unwrap().clone()
    }

    pub fn set_reparse_target(&self, target: Option<FileRef>) {
        *self.reparse.write().unwrap() = target;
    }
}

/// Materialize an entry, keeping file identity stable: the first stored
/// resolution wins even when two callers race on conversion.
async fn resolve_entry(dir: &FileRef, entry: &Arc<DirEntry>) -> VfsResult<FileRef> {
    let meta = {
        match &*entry.slot.lock().unwrap() {
            EntrySlot::Resolved(f) => return Ok(f.clone()),
            EntrySlot::Deferred(m) => m.clone(),
        }
    };
    let fs = dir.filesystem().ok_or(VfsError::DoesNotExist)?;
    let file = fs.convert_to_file(dir, &meta).await?;
    file.set_parent(dir);
    let mut slot = entry.slot.lock().unwrap();
    match &*slot {
        EntrySlot::Resolved(existing) => Ok(existing.clone()),
        EntrySlot::Deferred(_) => {
            *slot = EntrySlot::Resolved(file.clone());
            Ok(file)
        }
    }
}

/// Directory operations that may touch the backing store.
impl File {
    /// Run the owning filesystem's population hook at most once.
    /// Concurrent first-accessors wait for the same population instead of
    /// independently hitting storage.
    pub async fn ensure_populated(self: &Arc<Self>) -> VfsResult<()> {
        let cache = self.dir()?;
        cache
            .populated_cell()
            .get_or_try_init(|| async {
                let fs = self.filesystem().ok_or(VfsError::DoesNotExist)?;
                fs.cache_directory_contents(self).await
            })
            .await?;
        Ok(())
    }

    /// Name lookup, populating the cache on first access. Returns `None`
    /// for an absent name.
    pub async fn lookup(self: &Arc<Self>, name: &str) -> VfsResult<Option<FileRef>> {
        self.ensure_populated().await?;
        let entry = match self.dir()?.lookup_cached(name) {
            Some(e) => e,
            None => return Ok(None),
        };
        let file = resolve_entry(self, &entry).await?;
        if file.parent().is_none() {
            file.set_parent(self);
        }
        Ok(Some(file))
    }

    /// Indexed enumeration in insertion order.
    pub async fn get_child(self: &Arc<Self>, n: usize) -> VfsResult<Option<FileRef>> {
        self.ensure_populated().await?;
        let entry = match self.dir()?.entry_at(n) {
            Some(e) => e,
            None => return Ok(None),
        };
        let file = resolve_entry(self, &entry).await?;
        if file.parent().is_none() {
            file.set_parent(self);
        }
        Ok(Some(file))
    }

    pub async fn get_num_children(self: &Arc<Self>) -> VfsResult<usize> {
        self.ensure_populated().await?;
        Ok(self.dir()?.len())
    }

    /// Bind an in-memory-only child (e.g. a local socket) into this
    /// directory. `false` on name collision, with no side effect.
    pub async fn add_ephemeral_file(self: &Arc<Self>, file: FileRef) -> VfsResult<bool> {
        self.ensure_populated().await?;
        if self.dir()?.add_ephemeral(file.clone()) {
            file.set_parent(self);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
