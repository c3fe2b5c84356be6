//! tinyfs: an educational on-disk filesystem.
//!
//! The crate runs above any fixed-size block device with 512-byte sectors
//! and provides three tightly-coupled subsystems: a bounded write-back
//! buffer cache with clock eviction, an inode layer with direct, indirect
//! and doubly-indirect indexing and on-demand growth, and a hierarchical
//! directory layer with per-caller working directories.
//!
//! ```
//! use std::sync::Arc;
//! use tinyfs::{FileSystem, MemDisk};
//!
//! let fs = FileSystem::mount(Arc::new(MemDisk::new(1024)), true).unwrap();
//! let cwd = fs.root_cwd();
//! fs.create(&cwd, "/hello.txt", 0, false).unwrap();
//! let mut f = fs.open(&cwd, "/hello.txt").unwrap();
//! f.write(&fs, b"hi").unwrap();
//! f.close(&fs).unwrap();
//! cwd.close(&fs).unwrap();
//! fs.shutdown().unwrap();
//! ```

mod bio;
mod buf;
mod device;
mod error;
mod file;
mod fs;
mod param;

pub use device::{BlockDevice, DeviceError, MemDisk};
pub use error::{FsError, Result};
pub use file::{Cwd, File};
pub use fs::FileSystem;
pub use param::{DIRSIZ, SECTOR_SIZE};
