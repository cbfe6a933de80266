//! Page-granularity cache state: pinned, dirty-tracked pages keyed by
//! align-adjusted page base offsets, with LRU replacement.

use crate::error::{VfsError, VfsResult};
use lru::LruCache;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// 4 KB fits 8 HDD sectors and 2 optical-disc sectors exactly, which makes
/// it a good choice for the page cache granularity.
pub const PAGE_SIZE: usize = 4096;

/// Alignment breakpoints a device may register; registrations beyond this
/// are logged and ignored.
pub const MAX_ALIGN_POINTS: usize = 8;

/// One cached page of device data.
///
/// The backing buffer is stable for the lifetime of the `Arc`, so a pinned
/// page's memory is never reused for another page's data.
#[derive(Debug)]
pub struct Page {
    base: u64,
    len: usize,
    data: Mutex<Box<[u8]>>,
    pins: AtomicUsize,
    dirty: AtomicBool,
}

impl Page {
    /// Build a page from bytes read off the device, zero-padded to
    /// [`PAGE_SIZE`]. A short final page keeps its true `len`.
    pub(crate) fn from_bytes(base: u64, bytes: Vec<u8>) -> VfsResult<Arc<Self>> {
        if bytes.len() > PAGE_SIZE {
            return Err(VfsError::CacheCorruption(format!(
                "page at {base} holds {} bytes, allocation is {PAGE_SIZE}",
                bytes.len()
            )));
        }
        let len = bytes.len();
        let mut buf = vec![0u8; PAGE_SIZE];
        buf[..len].copy_from_slice(&bytes);
        Ok(Arc::new(Self {
            base,
            len,
            data: Mutex::new(buf.into_boxed_slice()),
            pins: AtomicUsize::new(0),
            dirty: AtomicBool::new(false),
        }))
    }

    /// Device offset of the first byte in this page.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Valid bytes in this page (shorter than [`PAGE_SIZE`] only at the
    /// device end).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn pin(&self) {
        self.pins.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn unpin(&self) {
        let _ = self
            .pins
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| p.checked_sub(1));
    }

    pub fn pin_count(&self) -> usize {
        self.pins.load(Ordering::SeqCst)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }

    /// Read access to the valid bytes.
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let data = self.data.lock().unwrap();
        f(&data[..self.len])
    }

    /// In-place mutation of the valid bytes. The mutation only reaches the
    /// medium once the owning disk's `write` or `flush` runs for this
    /// page's range.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = self.data.lock().unwrap();
        f(&mut data[..self.len])
    }

    /// Copy of the valid bytes, for writeback.
    pub(crate) fn snapshot(&self) -> Vec<u8> {
        let data = self.data.lock().unwrap();
        data[..self.len].to_vec()
    }
}

/// Pinned handle to a cached page, returned by `Disk::read`. The page
/// stays resident until every `PageRef` (and explicit `pin`) is gone.
pub struct PageRef {
    page: Arc<Page>,
    offset: usize,
}

impl PageRef {
    pub(crate) fn new(page: Arc<Page>, offset: usize) -> Self {
        Self { page, offset }
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    /// Offset of the requested location within the page.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn base(&self) -> u64 {
        self.page.base()
    }

    pub fn len(&self) -> usize {
        self.page.len()
    }

    pub fn is_empty(&self) -> bool {
        self.page.is_empty()
    }

    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        self.page.with(f)
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.page.with_mut(f)
    }
}

impl Clone for PageRef {
    fn clone(&self) -> Self {
        self.page.pin();
        Self {
            page: self.page.clone(),
            offset: self.offset,
        }
    }
}

impl Drop for PageRef {
    fn drop(&mut self) {
        self.page.unpin();
    }
}

/// Cache bookkeeping guarded by the owning disk's mutex.
pub(crate) struct CacheState {
    pages: LruCache<u64, Arc<Page>>,
    align_points: Vec<u64>,
    capacity: usize,
}

impl CacheState {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            pages: LruCache::unbounded(),
            align_points: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Page-aligned base for `location`, measured from the closest
    /// registered align point at or below it.
    pub(crate) fn page_base(&self, location: u64) -> u64 {
        let point = self
            .align_points
            .iter()
            .copied()
            .filter(|p| *p <= location)
            .max()
            .unwrap_or(0);
        point + ((location - point) / PAGE_SIZE as u64) * PAGE_SIZE as u64
    }

    /// Register an alignment breakpoint. `false` once the fixed budget is
    /// exhausted.
    pub(crate) fn add_align_point(&mut self, location: u64) -> bool {
        if self.align_points.contains(&location) {
            return true;
        }
        if self.align_points.len() >= MAX_ALIGN_POINTS {
            return false;
        }
        self.align_points.push(location);
        true
    }

    pub(crate) fn get(&mut self, base: u64) -> Option<Arc<Page>> {
        self.pages.get(&base).cloned()
    }

    pub(crate) fn insert(&mut self, base: u64, page: Arc<Page>) {
        self.pages.push(base, page);
    }

    pub(crate) fn len(&self) -> usize {
        self.pages.len()
    }

    pub(crate) fn over_budget(&self) -> bool {
        self.pages.len() >= self.capacity
    }

    /// Pop the least-recently-used page with no pins. `None` when every
    /// resident page is pinned.
    pub(crate) fn pop_evictable(&mut self) -> Option<Arc<Page>> {
        // Iteration order is most-recent first; walk it backwards.
        let keys: Vec<u64> = self.pages.iter().map(|(k, _)| *k).collect();
        for key in keys.into_iter().rev() {
            let pinned = self
                .pages
                .peek(&key)
                .map(|p| p.pin_count() > 0)
                .unwrap_or(true);
            if !pinned {
                return self.pages.pop(&key);
            }
        }
        None
    }

    /// Every resident dirty page, for a full sync.
    pub(crate) fn dirty_pages(&self) -> Vec<Arc<Page>> {
        self.pages
            .iter()
            .filter(|(_, p)| p.is_dirty())
            .map(|(_, p)| p.clone())
            .collect()
    }
}
