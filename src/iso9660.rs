//! Read-only ISO 9660 driver over a page-cached disk. Directory contents
//! are cached as deferred entries straight from the extent records and
//! materialized on first access.

use crate::dir::{DirCache, DirEntryMeta};
use crate::disk::Disk;
use crate::error::{VfsError, VfsResult};
use crate::file::{File, FileKind, FileRef};
use crate::fs::Filesystem;
use async_trait::async_trait;
use std::io;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// ISO 9660 logical sector size.
const SECTOR_SIZE: usize = 2048;

/// Volume descriptors start at this LBA.
const DESCRIPTOR_START_LBA: u64 = 16;

const DESCRIPTOR_PRIMARY: u8 = 1;
const DESCRIPTOR_TERMINATOR: u8 = 255;

/// Directory-record flag bit marking a subdirectory.
const FLAG_DIRECTORY: u32 = 0x02;

fn invalid(msg: impl Into<String>) -> VfsError {
    VfsError::Device(io::Error::new(io::ErrorKind::InvalidData, msg.into()))
}

/// One parsed directory record. The on-disk layout stores extent and
/// length in both byte orders; only the little-endian halves are read.
struct DirRecord {
    length: usize,
    extent: u32,
    data_len: u32,
    flags: u8,
    name: String,
    special: bool,
}

fn parse_record(sector: &[u8], off: usize) -> Option<DirRecord> {
    let length = *sector.get(off)? as usize;
    if length == 0 || off + length > sector.len() {
        return None;
    }
    let rec = &sector[off..off + length];
    if rec.len() < 34 {
        return None;
    }
    let extent = u32::from_le_bytes([rec[2], rec[3], rec[4], rec[5]]);
    let data_len = u32::from_le_bytes([rec[10], rec[11], rec[12], rec[13]]);
    let flags = rec[25];
    let name_len = rec[32] as usize;
    if 33 + name_len > rec.len() {
        return None;
    }
    let raw = &rec[33..33 + name_len];
    // 0x00 and 0x01 are the self and parent records.
    let special = name_len == 1 && (raw[0] == 0x00 || raw[0] == 0x01);
    let mut name = String::from_utf8_lossy(raw).to_lowercase();
    // Strip the ";1" version suffix.
    if let Some(semi) = name.find(';') {
        name.truncate(semi);
    }
    Some(DirRecord {
        length,
        extent,
        data_len,
        flags,
        name,
        special,
    })
}

/// Mounted ISO 9660 volume. Everything is immutable; every mutating
/// operation fails with `Unsupported`.
pub struct Iso9660 {
    disk: Arc<Disk>,
    volume_id: String,
    root: OnceLock<FileRef>,
}

impl Iso9660 {
    /// Probe the volume descriptors and build the root directory. Fails
    /// when no primary descriptor is found before the terminator.
    pub async fn mount(disk: Arc<Disk>) -> VfsResult<Arc<Self>> {
        let mut pvd = None;
        for lba in DESCRIPTOR_START_LBA.. {
            let sector = read_sector(&disk, lba).await?;
            if &sector[1..6] != b"CD001" {
                return Err(invalid(format!("bad descriptor magic at lba {lba}")));
            }
            match sector[0] {
                DESCRIPTOR_PRIMARY => {
                    pvd = Some(sector);
                    break;
                }
                DESCRIPTOR_TERMINATOR => break,
                other => debug!(lba, kind = other, "skipping volume descriptor"),
            }
        }
        let pvd = pvd.ok_or_else(|| invalid("no primary volume descriptor"))?;

        let volume_id = String::from_utf8_lossy(&pvd[40..72]).trim_end().to_string();
        let root_rec =
            parse_record(&pvd, 156).ok_or_else(|| invalid("bad root directory record"))?;
        if root_rec.flags as u32 & FLAG_DIRECTORY == 0 {
            return Err(invalid("root record is not a directory"));
        }

        let fs = Arc::new(Self {
            disk,
            volume_id,
            root: OnceLock::new(),
        });
        let weak = Arc::downgrade(&(fs.clone() as Arc<dyn Filesystem>));
        let root = File::new(
            "/",
            root_rec.extent as u64,
            FileKind::Directory(DirCache::new(false)),
            0o555,
            weak,
        );
        // For directories, size is the extent length in bytes.
        root.set_size(root_rec.data_len as u64);
        fs.root.set(root).ok();
        debug!(volume = %fs.volume_id, root_extent = root_rec.extent, "mounted iso9660 volume");
        Ok(fs)
    }
}

async fn read_sector(disk: &Arc<Disk>, lba: u64) -> VfsResult<Vec<u8>> {
    // A logical sector divides the cache page size, so one page read
    // always covers it.
    let location = lba * SECTOR_SIZE as u64;
    let page = disk.read(location).await?;
    let pos = page.offset();
    if page.len() < pos + SECTOR_SIZE {
        return Err(invalid(format!("truncated sector at lba {lba}")));
    }
    Ok(page.with(|data| data[pos..pos + SECTOR_SIZE].to_vec()))
}

#[async_trait]
impl Filesystem for Iso9660 {
    fn volume_label(&self) -> String {
        self.volume_id.clone()
    }

    fn is_case_sensitive(&self) -> bool {
        false
    }

    fn root(&self) -> FileRef {
        self.root.get().expect("initialized at mount").clone()
    }

    async fn cache_directory_contents(&self, dir: &FileRef) -> VfsResult<()> {
        let cache = dir.dir()?;
        let extent = dir.inode();
        let mut remaining = dir.size() as usize;
        let mut lba = extent;
        while remaining > 0 {
            let sector = read_sector(&self.disk, lba).await?;
            let mut off = 0usize;
            while let Some(rec) = parse_record(&sector, off) {
                off += rec.length;
                if rec.special {
                    continue;
                }
                if rec.name.is_empty() {
                    warn!(extent, "skipping unnamed directory record");
                    continue;
                }
                cache.insert_deferred(DirEntryMeta {
                    name: rec.name,
                    inode: rec.extent as u64,
                    size: rec.data_len as u64,
                    flags: rec.flags as u32,
                });
            }
            remaining = remaining.saturating_sub(SECTOR_SIZE);
            lba += 1;
        }
        Ok(())
    }

    async fn convert_to_file(&self, dir: &FileRef, meta: &DirEntryMeta) -> VfsResult<FileRef> {
        let fs = dir.filesystem().ok_or(VfsError::DoesNotExist)?;
        let weak = Arc::downgrade(&fs);
        let file = if meta.flags & FLAG_DIRECTORY != 0 {
            File::new(
                meta.name.clone(),
                meta.inode,
                FileKind::Directory(DirCache::new(false)),
                0o555,
                weak,
            )
        } else {
            File::new(meta.name.clone(), meta.inode, FileKind::Regular, 0o444, weak)
        };
        file.set_size(meta.size);
        Ok(file)
    }

    async fn read(&self, file: &FileRef, offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        let size = file.size();
        if offset >= size {
            return Ok(0);
        }
        let want = buf.len().min((size - offset) as usize);
        let start = file.inode() * SECTOR_SIZE as u64;
        let block = self.disk.block_size() as u64;
        let mut done = 0usize;
        while done < want {
            let at = start + offset + done as u64;
            let aligned = (at / block) * block;
            let page = self.disk.read(aligned).await?;
            let pos = page.offset() + (at - aligned) as usize;
            let n = (want - done).min(page.len() - pos);
            page.with(|data| buf[done..done + n].copy_from_slice(&data[pos..pos + n]));
            done += n;
        }
        Ok(done)
    }
}
