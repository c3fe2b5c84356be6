//! Block device adapter.
//!
//! The filesystem sees the disk as an array of 512-byte sectors addressed
//! by a 32-bit index. Everything above this trait goes through the buffer
//! cache; nothing else in the crate talks to the device directly.

use std::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;
use thiserror::Error;

use crate::param::SECTOR_SIZE;

/// An I/O failure reported by the device. The core treats these as fatal
/// and propagates them to the caller unchanged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("sector {0} out of range")]
    OutOfRange(u32),
}

/// A fixed-capacity array of sectors with sector-granular transfers.
///
/// `write_count` is a monotonically increasing count of sector writes,
/// exposed so tests can observe how often the cache really touches the
/// device.
pub trait BlockDevice: Send + Sync {
    fn sector_count(&self) -> u32;
    fn read(&self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), DeviceError>;
    fn write(&self, sector: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), DeviceError>;
    fn write_count(&self) -> u64;
}

/// An in-memory block device.
pub struct MemDisk {
    data: Mutex<Box<[u8]>>,
    sectors: u32,
    writes: AtomicU64,
}

impl MemDisk {
    pub fn new(sectors: u32) -> Self {
        Self {
            data: Mutex::new(vec![0; sectors as usize * SECTOR_SIZE].into_boxed_slice()),
            sectors,
            writes: AtomicU64::new(0),
        }
    }

    fn range(&self, sector: u32) -> Result<usize, DeviceError> {
        if sector < self.sectors {
            Ok(sector as usize * SECTOR_SIZE)
        } else {
            Err(DeviceError::OutOfRange(sector))
        }
    }
}

impl BlockDevice for MemDisk {
    fn sector_count(&self) -> u32 {
        self.sectors
    }

    fn read(&self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), DeviceError> {
        let start = self.range(sector)?;
        buf.copy_from_slice(&self.data.lock()[start..start + SECTOR_SIZE]);
        Ok(())
    }

    fn write(&self, sector: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), DeviceError> {
        let start = self.range(sector)?;
        self.data.lock()[start..start + SECTOR_SIZE].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}
