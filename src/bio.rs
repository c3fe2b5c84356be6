//! Write-back buffer cache.
//!
//! The cache holds copies of disk sectors in a fixed array of slots.
//! Caching sectors in memory reduces the number of device transfers and
//! provides the synchronization point for sectors used by multiple threads.
//!
//! Interface:
//! * `read`/`write` copy bytes out of/into the cached sector.
//! * `zero` installs an all-zero sector without reading the device.
//! * `flush` writes every dirty slot back.
//!
//! A single table lock protects slot searches, claims and eviction; a
//! per-slot lock protects the bytes during a transfer. Lookup is two-phase:
//! a slot is chosen under the table lock, then locked and revalidated after
//! the table lock is gone, since the slot may have been evicted in between.
//! Eviction runs the clock algorithm: the hand skips and clears referenced
//! slots and reclaims the first unreferenced one, writing it back first if
//! it is dirty.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use array_macro::array;
use spin::{Mutex, MutexGuard};

use crate::buf::{BufData, BufSlot};
use crate::device::{BlockDevice, DeviceError};
use crate::param::{NBUF, SECTOR_SIZE};

/// How a freshly claimed slot gets its contents.
#[derive(Clone, Copy, PartialEq)]
enum Fill {
    /// Read the sector from the device.
    Load,
    /// All zeroes; used when the sector's previous contents are dead.
    Zero,
}

/// Clock-eviction state. Owning it is the capability to scan and claim
/// slot metadata.
struct Clock {
    hand: usize,
}

pub struct Bcache {
    dev: Arc<dyn BlockDevice>,
    slots: [BufSlot; NBUF],
    table: Mutex<Clock>,
    hits: AtomicU64,
    accesses: AtomicU64,
}

/// A locked, populated slot. Dropping it releases the slot lock.
struct SlotRef<'s> {
    slot: &'s BufSlot,
    data: MutexGuard<'s, BufData>,
}

impl Bcache {
    pub fn new(dev: Arc<dyn BlockDevice>) -> Self {
        Self {
            dev,
            slots: array![_ => BufSlot::new(); NBUF],
            table: Mutex::new(Clock { hand: 0 }),
            hits: AtomicU64::new(0),
            accesses: AtomicU64::new(0),
        }
    }

    /// Copy `dst.len()` bytes out of `sector` starting at `offset`.
    pub fn read(&self, sector: u32, offset: usize, dst: &mut [u8]) -> Result<(), DeviceError> {
        debug_assert!(offset + dst.len() <= SECTOR_SIZE);
        let slot = self.acquire(sector, Fill::Load)?;
        dst.copy_from_slice(&slot.data[offset..offset + dst.len()]);
        Ok(())
    }

    /// Copy `src` into `sector` starting at `offset`, marking the slot
    /// dirty. The device is not touched until eviction or `flush`.
    pub fn write(&self, sector: u32, offset: usize, src: &[u8]) -> Result<(), DeviceError> {
        debug_assert!(offset + src.len() <= SECTOR_SIZE);
        let mut slot = self.acquire(sector, Fill::Load)?;
        slot.data[offset..offset + src.len()].copy_from_slice(src);
        slot.slot.dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Install `sector` as all zeroes without reading the device.
    pub fn zero(&self, sector: u32) -> Result<(), DeviceError> {
        let _ = self.acquire(sector, Fill::Zero)?;
        Ok(())
    }

    /// Write every dirty slot back to the device and clear its dirty bit.
    pub fn flush(&self) -> Result<(), DeviceError> {
        let _clock = self.table.lock();
        for slot in self.slots.iter() {
            if !slot.free.load(Ordering::Acquire) && slot.dirty.load(Ordering::Acquire) {
                let data = slot.data.lock();
                self.dev.write(slot.sector.load(Ordering::Acquire), &data)?;
                slot.dirty.store(false, Ordering::Release);
            }
        }
        Ok(())
    }

    /// Total lookups served.
    pub fn accesses(&self) -> u64 {
        self.accesses.load(Ordering::Relaxed)
    }

    /// Lookups that found their sector already resident.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Find or claim a slot for `sector`, lock it and make its contents
    /// valid.
    ///
    /// Phase one, under the table lock: find a resident slot, or claim a
    /// free one (evicting if necessary) and record the sector in it so a
    /// concurrent miss on the same sector becomes a hit on this slot.
    /// Phase two, under the slot lock only: check that the slot still holds
    /// the sector — eviction may have raced us between the phases — and
    /// retry from phase one if not. The first slot-lock holder to see the
    /// claim populates the data.
    fn acquire(&self, sector: u32, fill: Fill) -> Result<SlotRef<'_>, DeviceError> {
        loop {
            let idx = {
                let mut clock = self.table.lock();
                self.accesses.fetch_add(1, Ordering::Relaxed);
                match self.slots.iter().position(|s| s.holds(sector)) {
                    Some(idx) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        idx
                    }
                    None => {
                        let idx = match self
                            .slots
                            .iter()
                            .position(|s| s.free.load(Ordering::Acquire))
                        {
                            Some(idx) => idx,
                            None => self.evict(&mut clock)?,
                        };
                        let slot = &self.slots[idx];
                        slot.sector.store(sector, Ordering::Release);
                        slot.valid.store(false, Ordering::Release);
                        slot.free.store(false, Ordering::Release);
                        // A grace round on the clock while the claim is
                        // still being populated.
                        slot.accessed.store(true, Ordering::Relaxed);
                        idx
                    }
                }
            };

            let slot = &self.slots[idx];
            let mut data = slot.data.lock();
            if !slot.holds(sector) {
                // Lost the slot to eviction between the phases.
                continue;
            }
            if !slot.valid.load(Ordering::Acquire) {
                match fill {
                    Fill::Load => self.dev.read(sector, &mut data)?,
                    Fill::Zero => {
                        data.fill_zero();
                        slot.dirty.store(true, Ordering::Release);
                    }
                }
                slot.valid.store(true, Ordering::Release);
            } else if fill == Fill::Zero {
                data.fill_zero();
                slot.dirty.store(true, Ordering::Release);
            }
            slot.accessed.store(true, Ordering::Relaxed);
            return Ok(SlotRef { slot, data });
        }
    }

    /// Reclaim one slot and return its index. Called with the table lock
    /// held, with no free slot available.
    fn evict(&self, clock: &mut Clock) -> Result<usize, DeviceError> {
        loop {
            let idx = clock.hand;
            let slot = &self.slots[idx];
            if slot.accessed.swap(false, Ordering::Relaxed) {
                clock.hand = (clock.hand + 1) % NBUF;
                continue;
            }
            let mut data = slot.data.lock();
            if slot.dirty.load(Ordering::Acquire) {
                self.dev.write(slot.sector.load(Ordering::Acquire), &data)?;
                slot.dirty.store(false, Ordering::Release);
            }
            slot.free.store(true, Ordering::Release);
            slot.sector.store(0, Ordering::Release);
            slot.valid.store(false, Ordering::Release);
            data.fill_zero();
            return Ok(idx);
        }
    }
}
