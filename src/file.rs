//! File and working-directory handles.
//!
//! A `File` owns one reference to an open inode plus the byte position the
//! next read or write starts at. Directory handles use the same type; their
//! position doubles as the `readdir` cursor, and plain reads and writes on
//! them are refused. Handles are closed explicitly — a handle that is never
//! closed keeps its inode open.

use core::fmt;
use std::sync::Arc;

use arrayvec::ArrayString;

use crate::error::{FsError, Result};
use crate::fs::dir;
use crate::fs::inode::Inode;
use crate::param::DIRSIZ;
use crate::FileSystem;

/// A caller's current working directory. Holds its directory open so
/// relative resolution always has a live starting point.
pub struct Cwd {
    dir: Arc<Inode>,
}

impl Cwd {
    pub(crate) fn new(dir: Arc<Inode>) -> Self {
        Self { dir }
    }

    pub(crate) fn dir(&self) -> &Arc<Inode> {
        &self.dir
    }

    pub(crate) fn replace(&mut self, dir: Arc<Inode>) -> Arc<Inode> {
        core::mem::replace(&mut self.dir, dir)
    }

    /// The working directory's inode number.
    pub fn inumber(&self) -> u32 {
        self.dir.sector()
    }

    pub fn close(self, fs: &FileSystem) -> Result<()> {
        fs.itable.close(fs, self.dir)
    }
}

/// An open file or directory handle.
pub struct File {
    ip: Arc<Inode>,
    pos: u64,
    deny_write: bool,
}

impl File {
    pub(crate) fn new(ip: Arc<Inode>) -> Self {
        Self {
            ip,
            pos: 0,
            deny_write: false,
        }
    }

    /// Read from the current position, advancing it. Short at end of file.
    pub fn read(&mut self, fs: &FileSystem, buf: &mut [u8]) -> Result<usize> {
        if self.is_dir(fs)? {
            return Err(FsError::IsADirectory);
        }
        let n = self.ip.read_at(fs, buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Write at the current position, advancing it; grows the file when the
    /// write runs past the end.
    pub fn write(&mut self, fs: &FileSystem, buf: &[u8]) -> Result<usize> {
        if self.is_dir(fs)? {
            return Err(FsError::IsADirectory);
        }
        let n = self.ip.write_at(fs, buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }

    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    pub fn tell(&self) -> u64 {
        self.pos
    }

    pub fn len(&self, fs: &FileSystem) -> Result<u64> {
        self.ip.len(fs)
    }

    pub fn is_dir(&self, fs: &FileSystem) -> Result<bool> {
        self.ip.is_dir(fs)
    }

    /// The inode number: the file's home sector.
    pub fn inumber(&self) -> u32 {
        self.ip.sector()
    }

    /// Next entry name of a directory handle, skipping `.` and `..`.
    /// `None` once the directory is exhausted.
    pub fn readdir(&mut self, fs: &FileSystem) -> Result<Option<ArrayString<DIRSIZ>>> {
        if !self.is_dir(fs)? {
            return Err(FsError::NotADirectory);
        }
        dir::read_next(fs, &self.ip, &mut self.pos)
    }

    /// Block writes to the underlying inode through any handle. At most one
    /// deny per handle; closing re-allows automatically.
    pub fn deny_write(&mut self, fs: &FileSystem) {
        if !self.deny_write {
            self.ip.deny_write(fs);
            self.deny_write = true;
        }
    }

    /// Undo this handle's `deny_write`.
    pub fn allow_write(&mut self) {
        if self.deny_write {
            self.ip.allow_write();
            self.deny_write = false;
        }
    }

    pub fn close(mut self, fs: &FileSystem) -> Result<()> {
        self.allow_write();
        fs.itable.close(fs, self.ip)
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("inumber", &self.ip.sector())
            .field("pos", &self.pos)
            .field("deny_write", &self.deny_write)
            .finish()
    }
}

impl fmt::Debug for Cwd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cwd")
            .field("inumber", &self.dir.sector())
            .finish()
    }
}
