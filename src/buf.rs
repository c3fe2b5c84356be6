//! Buffer-cache slot types.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::Mutex;

use crate::param::SECTOR_SIZE;

/// Cached bytes of one sector.
pub struct BufData {
    inner: [u8; SECTOR_SIZE],
}

impl BufData {
    pub const fn zeroed() -> Self {
        Self {
            inner: [0; SECTOR_SIZE],
        }
    }

    pub fn fill_zero(&mut self) {
        self.inner = [0; SECTOR_SIZE];
    }
}

impl core::ops::Deref for BufData {
    type Target = [u8; SECTOR_SIZE];

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl core::ops::DerefMut for BufData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// One cache slot.
///
/// The metadata fields are atomics so the table-lock holder can scan and
/// claim slots without touching the per-slot lock, which may be held across
/// a device transfer. The bytes themselves live under the slot lock.
///
/// Field discipline:
/// * `sector` and `free` are written only under the cache table lock.
/// * `valid` is cleared at claim time (table lock) and set by the slot-lock
///   holder that populates the data.
/// * `dirty` is written only under the slot lock.
/// * `accessed` is the clock reference bit; racy reads are fine.
pub struct BufSlot {
    pub sector: AtomicU32,
    pub free: AtomicBool,
    pub valid: AtomicBool,
    pub dirty: AtomicBool,
    pub accessed: AtomicBool,
    pub data: Mutex<BufData>,
}

impl BufSlot {
    pub fn new() -> Self {
        Self {
            sector: AtomicU32::new(0),
            free: AtomicBool::new(true),
            valid: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            accessed: AtomicBool::new(false),
            data: Mutex::new(BufData::zeroed()),
        }
    }

    /// Does this slot currently hold `sector`?
    pub fn holds(&self, sector: u32) -> bool {
        !self.free.load(Ordering::Acquire) && self.sector.load(Ordering::Acquire) == sector
    }
}
