//! Free-sector map.
//!
//! One bit per device sector, set iff the sector is allocated. The bitmap
//! lives in memory behind a single lock and is persisted as the body of the
//! file at `FREE_MAP_SECTOR`: `open` reads it back on mount, `close` writes
//! it out on shutdown.
//!
//! The same lock serializes whole growth walks: a grower holds the guard
//! for the duration and allocates against it through `SectorAllocator`.
//! The free-map file itself is the one exception — its own growth (during
//! format) allocates with per-call locking, keyed off its sector number.

use log::{debug, warn};
use spin::{Mutex, MutexGuard};

use crate::error::Result;
use crate::param::{FREE_MAP_SECTOR, ROOT_DIR_SECTOR};
use crate::FileSystem;

pub(crate) struct Bitmap {
    bits: Vec<u8>,
    sectors: u32,
}

impl Bitmap {
    fn new(sectors: u32) -> Self {
        Self {
            bits: vec![0; (sectors as usize + 7) / 8],
            sectors,
        }
    }

    fn test(&self, sector: u32) -> bool {
        self.bits[sector as usize / 8] & (1 << (sector % 8)) != 0
    }

    fn set(&mut self, sector: u32) {
        self.bits[sector as usize / 8] |= 1 << (sector % 8);
    }

    fn clear(&mut self, sector: u32) {
        self.bits[sector as usize / 8] &= !(1 << (sector % 8));
    }

    /// Reserve the first run of `count` consecutive free sectors and return
    /// the first address.
    pub(crate) fn allocate(&mut self, count: u32) -> Option<u32> {
        if count == 0 || count > self.sectors {
            return None;
        }
        let mut run = 0;
        for sector in 0..self.sectors {
            if self.test(sector) {
                run = 0;
                continue;
            }
            run += 1;
            if run == count {
                let first = sector + 1 - count;
                for s in first..=sector {
                    self.set(s);
                }
                return Some(first);
            }
        }
        None
    }

    pub(crate) fn release(&mut self, sector: u32, count: u32) {
        for s in sector..sector + count {
            assert!(self.test(s), "releasing a free sector: {}", s);
            self.clear(s);
        }
    }

    fn allocated(&self) -> u32 {
        (0..self.sectors).filter(|&s| self.test(s)).count() as u32
    }
}

pub(crate) struct FreeMap {
    inner: Mutex<Bitmap>,
}

impl FreeMap {
    pub(crate) fn new(sectors: u32) -> Self {
        Self {
            inner: Mutex::new(Bitmap::new(sectors)),
        }
    }

    /// Number of bytes the bitmap occupies when persisted.
    pub(crate) fn file_len(&self) -> u32 {
        self.inner.lock().bits.len() as u32
    }

    pub(crate) fn allocate(&self, count: u32) -> Option<u32> {
        let first = self.inner.lock().allocate(count);
        if first.is_none() {
            warn!("freemap: out of sectors (wanted {})", count);
        }
        first
    }

    pub(crate) fn release(&self, sector: u32, count: u32) {
        self.inner.lock().release(sector, count);
    }

    /// Take the growth-serialization guard.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Bitmap> {
        self.inner.lock()
    }

    /// Start from an empty bitmap and reserve the two bootstrap sectors.
    pub(crate) fn format(&self) {
        let mut map = self.inner.lock();
        for byte in map.bits.iter_mut() {
            *byte = 0;
        }
        map.set(FREE_MAP_SECTOR);
        map.set(ROOT_DIR_SECTOR);
    }

    /// Read the persisted bitmap from the free-map file.
    pub(crate) fn open(&self, fs: &FileSystem) -> Result<()> {
        let ip = fs.itable.open(FREE_MAP_SECTOR);
        let mut bits = vec![0; self.file_len() as usize];
        let res = ip.read_at(fs, &mut bits, 0);
        fs.itable.close(fs, ip)?;
        let n = res?;
        debug_assert_eq!(n, bits.len(), "free-map file truncated");
        let mut map = self.inner.lock();
        map.bits = bits;
        debug!("freemap: opened, {} sectors allocated", map.allocated());
        Ok(())
    }

    /// Write the bitmap back through the free-map file.
    pub(crate) fn close(&self, fs: &FileSystem) -> Result<()> {
        let bits = self.inner.lock().bits.clone();
        let ip = fs.itable.open(FREE_MAP_SECTOR);
        let res = ip.write_at(fs, &bits, 0);
        fs.itable.close(fs, ip)?;
        let written = res?;
        debug_assert_eq!(written, bits.len());
        Ok(())
    }

    /// Number of allocated sectors; test observability.
    pub(crate) fn allocated(&self) -> u32 {
        self.inner.lock().allocated()
    }
}

/// Allocation capability handed to the growth walk.
///
/// `Held` carries the free-map guard taken around the entire grow; `Unheld`
/// locks per call and exists only for the free-map inode's own growth, the
/// single non-reentrant path.
pub(crate) enum SectorAllocator<'a> {
    Held(MutexGuard<'a, Bitmap>),
    Unheld(&'a FreeMap),
}

impl SectorAllocator<'_> {
    pub(crate) fn allocate(&mut self) -> Option<u32> {
        match self {
            SectorAllocator::Held(map) => map.allocate(1),
            SectorAllocator::Unheld(freemap) => freemap.allocate(1),
        }
    }

    pub(crate) fn release(&mut self, sector: u32) {
        match self {
            SectorAllocator::Held(map) => map.release(sector, 1),
            SectorAllocator::Unheld(freemap) => freemap.release(sector, 1),
        }
    }
}
