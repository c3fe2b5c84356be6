//! File system implementation. Five layers:
//!   + Device: sector-granular reads and writes.
//!   + Cache: write-back buffering with clock eviction.
//!   + Inodes: variable-length files over a multi-level sector index.
//!   + Directories: inodes with special contents (lists of other inodes!).
//!   + Names: paths like /usr/doc/notes.txt for convenient naming.
//!
//! This module holds the façade tying the layers together: mounting and
//! formatting, creating, opening and removing by path, and the shutdown
//! flush. Layout on disk: sector 0 is the free-map inode, sector 1 the root
//! directory inode, everything past that is allocated on demand.

use std::sync::Arc;

use log::debug;
use scopeguard::ScopeGuard;

use crate::bio::Bcache;
use crate::device::BlockDevice;
use crate::error::{FsError, Result};
use crate::file::{Cwd, File};
use crate::param::{FREE_MAP_SECTOR, ROOT_DIR_ENTRIES, ROOT_DIR_SECTOR};

pub(crate) mod dir;
pub(crate) mod freemap;
pub(crate) mod inode;
pub(crate) mod path;

use self::dir::DIRENT_SIZE;
use self::freemap::FreeMap;
use self::inode::Itable;
use self::path::{FileName, Path};

pub struct FileSystem {
    dev: Arc<dyn BlockDevice>,
    pub(crate) cache: Bcache,
    pub(crate) freemap: FreeMap,
    pub(crate) itable: Itable,
}

impl FileSystem {
    /// Bring the filesystem up on `dev`. With `format`, lay down a fresh
    /// free map and an empty root directory first; otherwise the device
    /// must already hold a formatted filesystem.
    pub fn mount(dev: Arc<dyn BlockDevice>, format: bool) -> Result<Self> {
        let fs = Self {
            cache: Bcache::new(dev.clone()),
            freemap: FreeMap::new(dev.sector_count()),
            itable: Itable::new(),
            dev,
        };
        if format {
            fs.format()?;
        }
        fs.freemap.open(&fs)?;
        debug!("fs: mounted, {} sectors", fs.dev.sector_count());
        Ok(fs)
    }

    fn format(&self) -> Result<()> {
        debug!("fs: formatting");
        self.freemap.format();
        inode::create(self, FREE_MAP_SECTOR, self.freemap.file_len(), false)?;
        dir::create(
            self,
            ROOT_DIR_SECTOR,
            ROOT_DIR_ENTRIES * DIRENT_SIZE as u32,
        )?;
        self.freemap.close(self)
    }

    /// Persist the free map and write every dirty cached sector back.
    pub fn shutdown(&self) -> Result<()> {
        debug!("fs: shutdown");
        self.freemap.close(self)?;
        self.cache.flush()?;
        Ok(())
    }

    /// A working directory positioned at the root.
    pub fn root_cwd(&self) -> Cwd {
        Cwd::new(self.itable.open(ROOT_DIR_SECTOR))
    }

    /// Create a file or directory of `initial_size` bytes at `path`.
    /// On any failure the allocated sectors are released and the parent
    /// directory is left unchanged.
    pub fn create(&self, cwd: &Cwd, path: &str, initial_size: u32, is_dir: bool) -> Result<()> {
        let (parent, name) = path::resolve_parent(self, cwd, Path::new(path))?;
        let result = self.create_in(&parent, name, initial_size, is_dir);
        self.itable.close(self, parent)?;
        result
    }

    fn create_in(
        &self,
        parent: &Arc<inode::Inode>,
        name: &FileName,
        initial_size: u32,
        is_dir: bool,
    ) -> Result<()> {
        match dir::lookup(self, parent, name) {
            Ok(_) => return Err(FsError::AlreadyExists),
            Err(FsError::NotFound) => {}
            Err(e) => return Err(e),
        }
        let sector = self.freemap.allocate(1).ok_or(FsError::NoSpace)?;
        let home = scopeguard::guard((), |()| self.freemap.release(sector, 1));

        if is_dir {
            dir::create(self, sector, initial_size)?;
        } else {
            inode::create(self, sector, initial_size, false)?;
        }
        // The record exists from here on: a failure now must give back its
        // data sectors as well as the home sector.
        let attach = (|| {
            dir::add(self, parent, name, sector, is_dir)?;
            if is_dir {
                dir::set_parent(self, sector, parent.sector())?;
            }
            Ok(())
        })();
        match attach {
            Ok(()) => {
                ScopeGuard::into_inner(home);
                debug!("fs: created {:?} at sector {}", name.as_str(), sector);
                Ok(())
            }
            Err(e) => {
                inode::free_sectors(self, sector)?;
                Err(e)
            }
        }
    }

    /// Create an empty directory at `path`.
    pub fn mkdir(&self, cwd: &Cwd, path: &str) -> Result<()> {
        self.create(cwd, path, 0, true)
    }

    /// Open the file or directory at `path`.
    pub fn open(&self, cwd: &Cwd, path: &str) -> Result<File> {
        let ip = path::resolve(self, cwd, Path::new(path))?;
        Ok(File::new(ip))
    }

    /// Remove the entry at `path`. Open handles keep working; the sectors
    /// are released when the last one closes. Populated directories are
    /// refused.
    pub fn remove(&self, cwd: &Cwd, path: &str) -> Result<()> {
        let (parent, name) = path::resolve_parent(self, cwd, Path::new(path))?;
        let result = dir::remove(self, &parent, name);
        self.itable.close(self, parent)?;
        result
    }

    /// Re-point `cwd` at the directory named by `path`.
    pub fn chdir(&self, cwd: &mut Cwd, path: &str) -> Result<()> {
        let ip = path::resolve(self, cwd, Path::new(path))?;
        match ip.is_dir(self) {
            Ok(true) => {}
            Ok(false) => return Err(path::close_and(self, ip, FsError::NotADirectory)),
            Err(e) => return Err(path::close_and(self, ip, e)),
        }
        let old = cwd.replace(ip);
        self.itable.close(self, old)
    }

    /// Buffer-cache lookups that found their sector resident.
    pub fn buffer_hits(&self) -> u64 {
        self.cache.hits()
    }

    /// Total buffer-cache lookups.
    pub fn buffer_accesses(&self) -> u64 {
        self.cache.accesses()
    }

    /// Sector writes that reached the device.
    pub fn device_writes(&self) -> u64 {
        self.dev.write_count()
    }
}
