//! Path resolution.
//!
//! Paths are `/`-separated component lists. An absolute path starts at the
//! root directory's sector; a relative path starts at the caller's working
//! directory. `.` and `..` are ordinary entries installed in every
//! directory, so the walk needs no special cases for them. Repeated and
//! trailing slashes are ignored.

use std::sync::Arc;

use crate::error::{FsError, Result};
use crate::file::Cwd;
use crate::fs::{dir, inode::Inode};
use crate::param::{DIRSIZ, ROOT_DIR_SECTOR};
use crate::FileSystem;

/// A borrowed path.
#[repr(transparent)]
pub struct Path {
    inner: str,
}

impl Path {
    pub fn new(path: &str) -> &Self {
        // SAFETY: `&Path` is layout-compatible with `str` because of its
        // attribute `#[repr(transparent)]`.
        unsafe { &*(path as *const str as *const Self) }
    }

    pub fn is_absolute(&self) -> bool {
        self.inner.starts_with('/')
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Split off the first path element.
    ///
    /// Returns `Some((rest, name))` where `name` is the next element and
    /// `rest` is the remainder with its leading slashes removed, so
    /// `rest.is_empty()` tells the caller the name was the last one.
    /// Returns `None` for an empty or all-slash path.
    pub fn skipelem(&self) -> Option<(&Self, &str)> {
        let s = self.inner.trim_start_matches('/');
        if s.is_empty() {
            return None;
        }
        let (name, rest) = match s.find('/') {
            Some(i) => (&s[..i], &s[i..]),
            None => (s, ""),
        };
        Some((Self::new(rest.trim_start_matches('/')), name))
    }
}

/// A single directory-entry name: non-empty, slash-free, at most `DIRSIZ`
/// bytes.
#[repr(transparent)]
#[derive(Debug)]
pub struct FileName {
    inner: str,
}

impl FileName {
    pub fn new(name: &str) -> Result<&Self> {
        if name.is_empty() || name.contains('/') {
            return Err(FsError::InvalidName);
        }
        if name.len() > DIRSIZ {
            return Err(FsError::TooLong);
        }
        // SAFETY: `&FileName` is layout-compatible with `str` because of
        // its attribute `#[repr(transparent)]`.
        Ok(unsafe { &*(name as *const str as *const Self) })
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.inner.as_bytes()
    }
}

/// Close `ip` and surface `err` — unless the close itself hits a device
/// failure, which wins.
pub(crate) fn close_and(fs: &FileSystem, ip: Arc<Inode>, err: FsError) -> FsError {
    match fs.itable.close(fs, ip) {
        Ok(()) => err,
        Err(e) => e,
    }
}

/// Resolve a path all the way to its inode.
pub(crate) fn resolve(fs: &FileSystem, cwd: &Cwd, path: &Path) -> Result<Arc<Inode>> {
    Ok(namex(fs, cwd, path, false)?.0)
}

/// Resolve a path to the directory containing its last component, and hand
/// that component back for `lookup`/`add`/`remove`.
pub(crate) fn resolve_parent<'p>(
    fs: &FileSystem,
    cwd: &Cwd,
    path: &'p Path,
) -> Result<(Arc<Inode>, &'p FileName)> {
    let (ip, name) = namex(fs, cwd, path, true)?;
    Ok((ip, name.expect("parent resolution always yields a name")))
}

fn namex<'p>(
    fs: &FileSystem,
    cwd: &Cwd,
    path: &'p Path,
    parent: bool,
) -> Result<(Arc<Inode>, Option<&'p FileName>)> {
    if path.is_empty() {
        return Err(FsError::NotFound);
    }
    let mut cur = if path.is_absolute() {
        fs.itable.open(ROOT_DIR_SECTOR)
    } else {
        fs.itable.reopen(cwd.dir())
    };
    let mut rest = path;

    while let Some((next_rest, component)) = rest.skipelem() {
        rest = next_rest;
        match cur.is_dir(fs) {
            Ok(true) => {}
            Ok(false) => return Err(close_and(fs, cur, FsError::NotADirectory)),
            Err(e) => return Err(close_and(fs, cur, e)),
        }
        if parent && rest.is_empty() {
            // Stop one level early.
            let name = match FileName::new(component) {
                Ok(name) => name,
                Err(e) => return Err(close_and(fs, cur, e)),
            };
            return Ok((cur, Some(name)));
        }
        let name = match FileName::new(component) {
            Ok(name) => name,
            // An over-long component cannot name any existing entry.
            Err(_) => return Err(close_and(fs, cur, FsError::NotFound)),
        };
        let next_sector = match dir::lookup(fs, &cur, name) {
            Ok((sector, _, _)) => sector,
            Err(e) => return Err(close_and(fs, cur, e)),
        };
        let next = fs.itable.open(next_sector);
        fs.itable.close(fs, cur)?;
        cur = next;
    }

    if parent {
        // "/" and slash-only paths have no last component to hand out.
        return Err(close_and(fs, cur, FsError::NotFound));
    }
    Ok((cur, None))
}
