//! Inodes.
//!
//! An inode describes a single unnamed file or directory. The on-disk
//! record fills its home sector exactly: current length, a magic tag, the
//! kind flag, 123 direct sector addresses, one indirect address and one
//! doubly-indirect address, all little-endian.
//!
//! The in-memory side is the open-inode table: the unique map from home
//! sector to open record while any handle exists. `open` finds or inserts
//! and bumps the reference count; `close` drops it and, once the count hits
//! zero, releases the record — and the file's sectors, if it was removed
//! while open. The reference count is guarded by the table lock itself; the
//! per-inode lock guards the deny-write count and the removed flag.
//!
//! Files grow lazily: a write past the current length allocates the missing
//! sectors (zero-filled through the cache) under the free-map lock, walking
//! the direct, indirect and doubly-indirect regions in order. The walk keeps
//! an undo log; if allocation fails midway, every sector taken by that call
//! is released again and the on-disk record is left untouched.

use std::collections::BTreeMap;
use std::convert::TryInto;
use std::sync::Arc;

use log::debug;
use spin::{Mutex, MutexGuard};
use static_assertions::const_assert_eq;

use crate::error::{FsError, Result};
use crate::fs::freemap::SectorAllocator;
use crate::param::{FREE_MAP_SECTOR, MAXFILE, NDIRECT, NINDIRECT, SECTOR_SIZE};
use crate::FileSystem;

/// Tag identifying a valid inode record.
const INODE_MAGIC: u32 = 0x494e_4f44;

// Record layout within the home sector.
const LENGTH_OFFSET: usize = 0;
const MAGIC_OFFSET: usize = 4;
const IS_DIR_OFFSET: usize = 8;
const DIRECT_OFFSET: usize = 12;
const INDIRECT_OFFSET: usize = DIRECT_OFFSET + 4 * NDIRECT;
const DOUBLY_OFFSET: usize = INDIRECT_OFFSET + 4;

// The record must fill its sector exactly.
const_assert_eq!(DOUBLY_OFFSET + 4, SECTOR_SIZE);

/// Decoded on-disk inode record.
///
/// Operations decode the record out of the buffer cache into a stack copy,
/// work on that, and encode it back; the cache holds the authoritative
/// bytes.
pub(crate) struct DiskInode {
    pub length: u32,
    pub is_dir: bool,
    pub direct: [u32; NDIRECT],
    pub indirect: u32,
    pub doubly_indirect: u32,
}

impl DiskInode {
    pub(crate) fn empty(is_dir: bool) -> Self {
        Self {
            length: 0,
            is_dir,
            direct: [0; NDIRECT],
            indirect: 0,
            doubly_indirect: 0,
        }
    }

    pub(crate) fn decode(bytes: &[u8; SECTOR_SIZE]) -> Self {
        assert_eq!(
            read_u32(bytes, MAGIC_OFFSET),
            INODE_MAGIC,
            "bad inode record"
        );
        let mut direct = [0u32; NDIRECT];
        for (i, slot) in direct.iter_mut().enumerate() {
            *slot = read_u32(bytes, DIRECT_OFFSET + 4 * i);
        }
        Self {
            length: read_u32(bytes, LENGTH_OFFSET),
            is_dir: read_u32(bytes, IS_DIR_OFFSET) != 0,
            direct,
            indirect: read_u32(bytes, INDIRECT_OFFSET),
            doubly_indirect: read_u32(bytes, DOUBLY_OFFSET),
        }
    }

    pub(crate) fn encode(&self, bytes: &mut [u8; SECTOR_SIZE]) {
        write_u32(bytes, LENGTH_OFFSET, self.length);
        write_u32(bytes, MAGIC_OFFSET, INODE_MAGIC);
        write_u32(bytes, IS_DIR_OFFSET, self.is_dir as u32);
        for (i, slot) in self.direct.iter().enumerate() {
            write_u32(bytes, DIRECT_OFFSET + 4 * i, *slot);
        }
        write_u32(bytes, INDIRECT_OFFSET, self.indirect);
        write_u32(bytes, DOUBLY_OFFSET, self.doubly_indirect);
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Sectors needed to hold `length` bytes.
fn sectors(length: u32) -> usize {
    (length as usize + SECTOR_SIZE - 1) / SECTOR_SIZE
}

pub(crate) fn read_record(fs: &FileSystem, sector: u32) -> Result<DiskInode> {
    let mut bytes = [0u8; SECTOR_SIZE];
    fs.cache.read(sector, 0, &mut bytes)?;
    Ok(DiskInode::decode(&bytes))
}

pub(crate) fn write_record(fs: &FileSystem, sector: u32, record: &DiskInode) -> Result<()> {
    let mut bytes = [0u8; SECTOR_SIZE];
    record.encode(&mut bytes);
    fs.cache.write(sector, 0, &bytes)?;
    Ok(())
}

fn read_index_block(fs: &FileSystem, sector: u32) -> Result<[u32; NINDIRECT]> {
    let mut bytes = [0u8; SECTOR_SIZE];
    fs.cache.read(sector, 0, &mut bytes)?;
    let mut index = [0u32; NINDIRECT];
    for (i, slot) in index.iter_mut().enumerate() {
        *slot = read_u32(&bytes, 4 * i);
    }
    Ok(index)
}

fn write_index_block(fs: &FileSystem, sector: u32, index: &[u32; NINDIRECT]) -> Result<()> {
    let mut bytes = [0u8; SECTOR_SIZE];
    for (i, slot) in index.iter().enumerate() {
        write_u32(&mut bytes, 4 * i, *slot);
    }
    fs.cache.write(sector, 0, &bytes)?;
    Ok(())
}

/// Map a byte offset to the device sector holding it, or `None` past the
/// end of the file. Only the index blocks of the offset's own region are
/// touched.
pub(crate) fn byte_to_sector(fs: &FileSystem, inode: u32, pos: u64) -> Result<Option<u32>> {
    let record = read_record(fs, inode)?;
    if pos >= record.length as u64 {
        return Ok(None);
    }
    let idx = (pos / SECTOR_SIZE as u64) as usize;
    if idx < NDIRECT {
        return Ok(Some(record.direct[idx]));
    }
    if idx < NDIRECT + NINDIRECT {
        let index = read_index_block(fs, record.indirect)?;
        return Ok(Some(index[idx - NDIRECT]));
    }
    let rel = idx - NDIRECT - NINDIRECT;
    let outer = read_index_block(fs, record.doubly_indirect)?;
    let inner = read_index_block(fs, outer[rel / NINDIRECT])?;
    Ok(Some(inner[rel % NINDIRECT]))
}

fn allocate_one(alloc: &mut SectorAllocator<'_>, undo: &mut Vec<u32>) -> Result<u32> {
    let sector = alloc.allocate().ok_or(FsError::NoSpace)?;
    undo.push(sector);
    Ok(sector)
}

/// Extend `record` to cover `new_length` bytes, allocating and zero-filling
/// the missing sectors. On failure every sector allocated by this call —
/// index blocks included — is released again; the caller must not commit
/// the record.
pub(crate) fn grow(
    fs: &FileSystem,
    alloc: &mut SectorAllocator<'_>,
    record: &mut DiskInode,
    new_length: u32,
) -> Result<()> {
    let current = sectors(record.length);
    let target = sectors(new_length);
    if target <= current {
        return Ok(());
    }
    if target > MAXFILE {
        return Err(FsError::TooLong);
    }
    let mut undo = Vec::new();
    let result = grow_walk(fs, alloc, record, current, target, &mut undo);
    if result.is_err() {
        for &sector in undo.iter().rev() {
            alloc.release(sector);
        }
    }
    result
}

fn grow_walk(
    fs: &FileSystem,
    alloc: &mut SectorAllocator<'_>,
    record: &mut DiskInode,
    current: usize,
    target: usize,
    undo: &mut Vec<u32>,
) -> Result<()> {
    let mut idx = current;

    while idx < target && idx < NDIRECT {
        let sector = allocate_one(alloc, undo)?;
        fs.cache.zero(sector)?;
        record.direct[idx] = sector;
        idx += 1;
    }
    if idx == target {
        return Ok(());
    }

    if idx < NDIRECT + NINDIRECT {
        let mut index = if record.indirect == 0 {
            record.indirect = allocate_one(alloc, undo)?;
            [0u32; NINDIRECT]
        } else {
            read_index_block(fs, record.indirect)?
        };
        while idx < target && idx < NDIRECT + NINDIRECT {
            let sector = allocate_one(alloc, undo)?;
            fs.cache.zero(sector)?;
            index[idx - NDIRECT] = sector;
            idx += 1;
        }
        write_index_block(fs, record.indirect, &index)?;
        if idx == target {
            return Ok(());
        }
    }

    let mut outer = if record.doubly_indirect == 0 {
        record.doubly_indirect = allocate_one(alloc, undo)?;
        [0u32; NINDIRECT]
    } else {
        read_index_block(fs, record.doubly_indirect)?
    };
    while idx < target {
        let outer_idx = (idx - NDIRECT - NINDIRECT) / NINDIRECT;
        let mut inner = if outer[outer_idx] == 0 {
            outer[outer_idx] = allocate_one(alloc, undo)?;
            [0u32; NINDIRECT]
        } else {
            read_index_block(fs, outer[outer_idx])?
        };
        while idx < target {
            let rel = idx - NDIRECT - NINDIRECT;
            if rel / NINDIRECT != outer_idx {
                break;
            }
            let sector = allocate_one(alloc, undo)?;
            fs.cache.zero(sector)?;
            inner[rel % NINDIRECT] = sector;
            idx += 1;
        }
        write_index_block(fs, outer[outer_idx], &inner)?;
    }
    write_index_block(fs, record.doubly_indirect, &outer)?;
    Ok(())
}

/// Initialize the record at `sector` with `length` zero-filled bytes.
/// Growth runs under the free-map lock unless this is the free-map inode
/// itself, which allocates with per-call locking.
pub(crate) fn create(fs: &FileSystem, sector: u32, length: u32, is_dir: bool) -> Result<()> {
    let mut record = DiskInode::empty(is_dir);
    let mut alloc = if sector == FREE_MAP_SECTOR {
        SectorAllocator::Unheld(&fs.freemap)
    } else {
        SectorAllocator::Held(fs.freemap.lock())
    };
    grow(fs, &mut alloc, &mut record, length)?;
    record.length = length;
    write_record(fs, sector, &record)
}

/// Release every data and index sector of the record at `sector`. The home
/// sector itself stays allocated; the caller owns it.
pub(crate) fn free_sectors(fs: &FileSystem, sector: u32) -> Result<()> {
    let record = read_record(fs, sector)?;
    let total = sectors(record.length);
    let mut map = fs.freemap.lock();

    let mut idx = 0;
    while idx < total && idx < NDIRECT {
        map.release(record.direct[idx], 1);
        idx += 1;
    }
    if idx < total {
        let index = read_index_block(fs, record.indirect)?;
        while idx < total && idx < NDIRECT + NINDIRECT {
            map.release(index[idx - NDIRECT], 1);
            idx += 1;
        }
        map.release(record.indirect, 1);
    }
    if idx < total {
        let outer = read_index_block(fs, record.doubly_indirect)?;
        while idx < total {
            let outer_idx = (idx - NDIRECT - NINDIRECT) / NINDIRECT;
            let inner = read_index_block(fs, outer[outer_idx])?;
            while idx < total && (idx - NDIRECT - NINDIRECT) / NINDIRECT == outer_idx {
                map.release(inner[(idx - NDIRECT - NINDIRECT) % NINDIRECT], 1);
                idx += 1;
            }
            map.release(outer[outer_idx], 1);
        }
        map.release(record.doubly_indirect, 1);
    }
    Ok(())
}

struct InodeMeta {
    deny_write_count: u32,
    removed: bool,
}

/// An open inode. Handles hold shared references through the table.
pub struct Inode {
    sector: u32,
    meta: Mutex<InodeMeta>,
    /// Serializes entry mutation when the inode is a directory.
    dir: Mutex<()>,
}

impl Inode {
    fn new(sector: u32) -> Self {
        Self {
            sector,
            meta: Mutex::new(InodeMeta {
                deny_write_count: 0,
                removed: false,
            }),
            dir: Mutex::new(()),
        }
    }

    /// Hold this across a directory-entry scan-and-write so two mutators
    /// cannot claim the same slot.
    pub(crate) fn dir_guard(&self) -> MutexGuard<'_, ()> {
        self.dir.lock()
    }

    /// The inode's home sector; doubles as its number.
    pub fn sector(&self) -> u32 {
        self.sector
    }

    pub(crate) fn len(&self, fs: &FileSystem) -> Result<u64> {
        Ok(read_record(fs, self.sector)?.length as u64)
    }

    pub(crate) fn is_dir(&self, fs: &FileSystem) -> Result<bool> {
        Ok(read_record(fs, self.sector)?.is_dir)
    }

    /// Schedule the inode's sectors for release once the last handle
    /// closes. Open handles keep reading and writing valid data.
    pub(crate) fn mark_removed(&self) {
        self.meta.lock().removed = true;
    }

    pub(crate) fn deny_write(&self, fs: &FileSystem) {
        let mut meta = self.meta.lock();
        meta.deny_write_count += 1;
        debug_assert!(meta.deny_write_count <= fs.itable.open_count(self.sector));
    }

    pub(crate) fn allow_write(&self) {
        let mut meta = self.meta.lock();
        assert!(meta.deny_write_count > 0, "allow_write without deny_write");
        meta.deny_write_count -= 1;
    }

    /// Copy bytes out of the file starting at `offset`. Reads past the end
    /// come back short.
    pub(crate) fn read_at(&self, fs: &FileSystem, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut done = 0;
        let mut pos = offset;
        while done < buf.len() {
            let length = self.len(fs)?;
            if pos >= length {
                break;
            }
            let sector = match byte_to_sector(fs, self.sector, pos)? {
                Some(sector) => sector,
                None => break,
            };
            let sector_ofs = (pos % SECTOR_SIZE as u64) as usize;
            let chunk = (buf.len() - done)
                .min(SECTOR_SIZE - sector_ofs)
                .min((length - pos) as usize);
            fs.cache.read(sector, sector_ofs, &mut buf[done..done + chunk])?;
            done += chunk;
            pos += chunk as u64;
        }
        Ok(done)
    }

    /// Copy bytes into the file starting at `offset`, growing it first if
    /// the write extends past the current length.
    pub(crate) fn write_at(&self, fs: &FileSystem, buf: &[u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.meta.lock().deny_write_count > 0 {
            return Err(FsError::WriteDenied);
        }

        let end = offset + buf.len() as u64;
        // The free-map file is pre-sized at format time and never grows
        // through this path.
        if self.sector != FREE_MAP_SECTOR && self.len(fs)? < end {
            if end > (MAXFILE * SECTOR_SIZE) as u64 {
                return Err(FsError::TooLong);
            }
            let mut alloc = SectorAllocator::Held(fs.freemap.lock());
            // Re-check under the lock; a concurrent writer may have grown
            // the file past us already.
            let mut record = read_record(fs, self.sector)?;
            if (record.length as u64) < end {
                grow(fs, &mut alloc, &mut record, end as u32)?;
                record.length = end as u32;
                write_record(fs, self.sector, &record)?;
                debug!("inode {}: grew to {} bytes", self.sector, record.length);
            }
        }

        let mut done = 0;
        let mut pos = offset;
        while done < buf.len() {
            let length = self.len(fs)?;
            if pos >= length {
                break;
            }
            let sector = match byte_to_sector(fs, self.sector, pos)? {
                Some(sector) => sector,
                None => break,
            };
            let sector_ofs = (pos % SECTOR_SIZE as u64) as usize;
            let chunk = (buf.len() - done)
                .min(SECTOR_SIZE - sector_ofs)
                .min((length - pos) as usize);
            fs.cache
                .write(sector, sector_ofs, &buf[done..done + chunk])?;
            done += chunk;
            pos += chunk as u64;
        }
        Ok(done)
    }
}

struct OpenEntry {
    ip: Arc<Inode>,
    open_count: u32,
}

/// The open-inode table: home sector → open record, reference counted.
/// Opening a sector twice yields the same record.
pub(crate) struct Itable {
    map: Mutex<BTreeMap<u32, OpenEntry>>,
}

impl Itable {
    pub(crate) fn new() -> Self {
        Self {
            map: Mutex::new(BTreeMap::new()),
        }
    }

    /// Find or insert the record for `sector` and take a reference to it.
    pub(crate) fn open(&self, sector: u32) -> Arc<Inode> {
        let mut map = self.map.lock();
        let entry = map.entry(sector).or_insert_with(|| OpenEntry {
            ip: Arc::new(Inode::new(sector)),
            open_count: 0,
        });
        entry.open_count += 1;
        entry.ip.clone()
    }

    /// Take another reference to an already-open record.
    pub(crate) fn reopen(&self, ip: &Arc<Inode>) -> Arc<Inode> {
        let mut map = self.map.lock();
        let entry = map.get_mut(&ip.sector).expect("reopen of a closed inode");
        entry.open_count += 1;
        entry.ip.clone()
    }

    /// Drop one reference. The last close releases the record, and the
    /// file's sectors too if it was removed while open.
    pub(crate) fn close(&self, fs: &FileSystem, ip: Arc<Inode>) -> Result<()> {
        let last = {
            let mut map = self.map.lock();
            let entry = map.get_mut(&ip.sector).expect("close of an unopened inode");
            entry.open_count -= 1;
            if entry.open_count == 0 {
                let _ = map.remove(&ip.sector);
                true
            } else {
                false
            }
        };
        if last {
            let meta = ip.meta.lock();
            debug_assert_eq!(meta.deny_write_count, 0, "deny_write leaked across close");
            let removed = meta.removed;
            drop(meta);
            if removed {
                debug!("inode {}: releasing removed file", ip.sector);
                free_sectors(fs, ip.sector)?;
                fs.freemap.release(ip.sector, 1);
            }
        }
        Ok(())
    }

    /// Outstanding references to `sector`; zero if it is not open.
    pub(crate) fn open_count(&self, sector: u32) -> u32 {
        self.map.lock().get(&sector).map_or(0, |e| e.open_count)
    }
}
