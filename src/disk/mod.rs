//! Block-addressed device abstraction with a page-granularity cache
//! between filesystem drivers and physical media.

pub mod cache;
pub mod filedisk;

pub use cache::{MAX_ALIGN_POINTS, PAGE_SIZE, Page, PageRef};
pub use filedisk::{AccessMode, FileDisk, MemDisk};

use crate::error::{VfsError, VfsResult};
use async_trait::async_trait;
use cache::CacheState;
use std::io;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// Default page budget for a disk's cache.
pub const DEFAULT_CACHE_PAGES: usize = 64;

/// Raw random-access medium underneath a [`Disk`]. Supplied by device
/// drivers; the cache layer never sees anything but whole-range reads and
/// writes at page-base offsets.
#[async_trait]
pub trait BlockDevice: Send + Sync {
    /// Total size in bytes. Reads and writes beyond this fail.
    fn size(&self) -> u64;

    /// Native block size; all cache locations must be multiples of this.
    fn block_size(&self) -> usize {
        512
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> VfsResult<()>;

    async fn write_at(&self, offset: u64, data: &[u8]) -> VfsResult<()>;
}

/// Page-cache front-end over a [`BlockDevice`].
///
/// A single mutex serializes cache transitions and device I/O; callers
/// doing multi-step read-modify-write hold the returned [`PageRef`] (a
/// pin) across the sequence so the page cannot be evicted mid-flight.
pub struct Disk {
    dev: Box<dyn BlockDevice>,
    critical: bool,
    state: Mutex<CacheState>,
}

impl Disk {
    /// Wrap a device. `critical` marks a cache whose pages back RAM-only
    /// storage: they are never evicted or silently dropped, because doing
    /// so would be permanent data loss.
    pub fn new(dev: Box<dyn BlockDevice>, capacity_pages: usize, critical: bool) -> Arc<Self> {
        Arc::new(Self {
            dev,
            critical,
            state: Mutex::new(CacheState::new(capacity_pages)),
        })
    }

    pub fn size(&self) -> u64 {
        self.dev.size()
    }

    pub fn block_size(&self) -> usize {
        self.dev.block_size()
    }

    pub fn cache_is_critical(&self) -> bool {
        self.critical
    }

    fn check_location(&self, location: u64) -> VfsResult<()> {
        if location % self.dev.block_size() as u64 != 0 {
            return Err(VfsError::Device(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "location {location} not aligned to block size {}",
                    self.dev.block_size()
                ),
            )));
        }
        if location >= self.dev.size() {
            return Err(VfsError::Device(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("location {location} beyond device end {}", self.dev.size()),
            )));
        }
        Ok(())
    }

    /// Return the cached page containing `location`, reading it from the
    /// device on a miss. The page comes back pinned; repeated reads of a
    /// still-pinned location share the same backing memory, so in-place
    /// mutation plus [`Disk::write`] round-trips.
    pub async fn read(&self, location: u64) -> VfsResult<PageRef> {
        self.check_location(location)?;
        let mut state = self.state.lock().await;
        let base = state.page_base(location);
        let page = match state.get(base) {
            Some(page) => page,
            None => self.load_page(&mut state, base).await?,
        };
        page.pin();
        Ok(PageRef::new(page, (location - base) as usize))
    }

    async fn load_page(&self, state: &mut CacheState, base: u64) -> VfsResult<Arc<Page>> {
        if !self.critical {
            while state.over_budget() {
                match state.pop_evictable() {
                    Some(victim) => {
                        if victim.is_dirty() {
                            self.dev.write_at(victim.base(), &victim.snapshot()).await?;
                            victim.clear_dirty();
                        }
                    }
                    None => {
                        warn!(base, resident = state.len(), "all cached pages pinned; exceeding page budget");
                        break;
                    }
                }
            }
        }
        let len = (self.dev.size() - base).min(PAGE_SIZE as u64) as usize;
        let mut buf = vec![0u8; len];
        self.dev.read_at(base, &mut buf).await?;
        let page = Page::from_bytes(base, buf)?;
        state.insert(base, page.clone());
        Ok(page)
    }

    /// Mark the page containing `location` dirty and write it back. A
    /// no-op when the page is not cached; for a critical cache the page
    /// stays dirty in RAM and nothing reaches the device.
    pub async fn write(&self, location: u64) -> VfsResult<()> {
        self.check_location(location)?;
        let mut state = self.state.lock().await;
        let base = state.page_base(location);
        let Some(page) = state.get(base) else {
            return Ok(());
        };
        page.mark_dirty();
        if !self.critical {
            self.dev.write_at(base, &page.snapshot()).await?;
            page.clear_dirty();
        }
        Ok(())
    }

    /// Force writeback of the page containing `location` without evicting
    /// it. A no-op if the page is not cached, not dirty, or the cache is
    /// critical (no medium to write to).
    pub async fn flush(&self, location: u64) -> VfsResult<()> {
        self.check_location(location)?;
        if self.critical {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        let base = state.page_base(location);
        if let Some(page) = state.get(base) {
            if page.is_dirty() {
                self.dev.write_at(base, &page.snapshot()).await?;
                page.clear_dirty();
            }
        }
        Ok(())
    }

    /// Register a page-boundary alignment point, so reads past `location`
    /// get page-aligned cache behavior relative to it (partitions not
    /// aligned to the page granularity). Registrations beyond the fixed
    /// budget are logged and ignored.
    pub async fn align(&self, location: u64) {
        let mut state = self.state.lock().await;
        if !state.add_align_point(location) {
            warn!(location, "align point budget exhausted; registration ignored");
        }
    }

    /// Pin the page containing `location`, loading it if absent. The pin
    /// persists until a matching [`Disk::unpin`].
    pub async fn pin(&self, location: u64) -> VfsResult<()> {
        self.check_location(location)?;
        let mut state = self.state.lock().await;
        let base = state.page_base(location);
        let page = match state.get(base) {
            Some(page) => page,
            None => self.load_page(&mut state, base).await?,
        };
        page.pin();
        Ok(())
    }

    /// Release one pin on the page containing `location`. Unpinning an
    /// uncached location is a no-op.
    pub async fn unpin(&self, location: u64) {
        let mut state = self.state.lock().await;
        let base = state.page_base(location);
        if let Some(page) = state.get(base) {
            page.unpin();
        }
    }

    /// Write back every dirty resident page. No-op for critical caches.
    pub async fn sync(&self) -> VfsResult<()> {
        if self.critical {
            return Ok(());
        }
        let state = self.state.lock().await;
        for page in state.dirty_pages() {
            self.dev.write_at(page.base(), &page.snapshot()).await?;
            page.clear_dirty();
        }
        Ok(())
    }
}
