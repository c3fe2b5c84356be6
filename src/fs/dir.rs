//! Directories.
//!
//! A directory is a file whose contents are an array of fixed-width
//! entries. Entries 0 and 1 are `.` and `..`, installed at creation; `..`
//! is rewritten when the directory is attached to its parent. Removal
//! clears an entry's `in_use` byte and leaves the slot for reuse.

use arrayvec::ArrayString;
use static_assertions::const_assert_eq;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::error::{FsError, Result};
use crate::fs::inode::{self, Inode};
use crate::fs::path::FileName;
use crate::param::DIRSIZ;
use crate::FileSystem;

/// On-disk directory entry.
#[repr(C)]
#[derive(AsBytes, FromBytes, Unaligned)]
pub(crate) struct Dirent {
    inode_sector: U32<LittleEndian>,
    name: [u8; DIRSIZ],
    in_use: u8,
    is_dir: u8,
}

pub(crate) const DIRENT_SIZE: usize = core::mem::size_of::<Dirent>();
const_assert_eq!(DIRENT_SIZE, 20);

impl Default for Dirent {
    fn default() -> Self {
        Self {
            inode_sector: U32::new(0),
            name: [0; DIRSIZ],
            in_use: 0,
            is_dir: 0,
        }
    }
}

impl Dirent {
    fn new(name: &FileName, sector: u32, is_dir: bool) -> Self {
        let mut entry = Self {
            inode_sector: U32::new(sector),
            name: [0; DIRSIZ],
            in_use: 1,
            is_dir: is_dir as u8,
        };
        entry.name[..name.as_bytes().len()].copy_from_slice(name.as_bytes());
        entry
    }

    /// The stored name, without the NUL padding.
    fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(DIRSIZ);
        &self.name[..len]
    }

    fn matches(&self, name: &FileName) -> bool {
        self.in_use != 0 && self.name_bytes() == name.as_bytes()
    }
}

fn read_entry(fs: &FileSystem, dp: &Inode, offset: u64) -> Result<Dirent> {
    let mut entry = Dirent::default();
    let n = dp.read_at(fs, entry.as_bytes_mut(), offset)?;
    debug_assert_eq!(n, DIRENT_SIZE, "truncated directory");
    Ok(entry)
}

fn write_entry(fs: &FileSystem, dp: &Inode, offset: u64, entry: &Dirent) -> Result<()> {
    let n = dp.write_at(fs, entry.as_bytes(), offset)?;
    debug_assert_eq!(n, DIRENT_SIZE);
    Ok(())
}

/// Initialize a directory inode at `sector` sized for `data_len` bytes of
/// entries, plus the two reserved slots, and install self-pointing `.` and
/// `..`.
pub(crate) fn create(fs: &FileSystem, sector: u32, data_len: u32) -> Result<()> {
    inode::create(fs, sector, data_len + 2 * DIRENT_SIZE as u32, true)?;
    let dp = fs.itable.open(sector);
    let result = (|| {
        let dot = FileName::new(".").unwrap();
        let dotdot = FileName::new("..").unwrap();
        write_entry(fs, &dp, 0, &Dirent::new(dot, sector, true))?;
        write_entry(fs, &dp, DIRENT_SIZE as u64, &Dirent::new(dotdot, sector, true))
    })();
    fs.itable.close(fs, dp)?;
    result
}

/// Point a freshly created directory's `..` at its parent.
pub(crate) fn set_parent(fs: &FileSystem, sector: u32, parent: u32) -> Result<()> {
    let dp = fs.itable.open(sector);
    let dotdot = FileName::new("..").unwrap();
    let result = write_entry(
        fs,
        &dp,
        DIRENT_SIZE as u64,
        &Dirent::new(dotdot, parent, true),
    );
    fs.itable.close(fs, dp)?;
    result
}

/// Linear scan for `name`. Returns the entry's target sector, the entry's
/// byte offset and its directory flag.
pub(crate) fn lookup(fs: &FileSystem, dp: &Inode, name: &FileName) -> Result<(u32, u64, bool)> {
    let len = dp.len(fs)?;
    let mut offset = 0;
    while offset + DIRENT_SIZE as u64 <= len {
        let entry = read_entry(fs, dp, offset)?;
        if entry.matches(name) {
            return Ok((entry.inode_sector.get(), offset, entry.is_dir != 0));
        }
        offset += DIRENT_SIZE as u64;
    }
    Err(FsError::NotFound)
}

/// Write a new entry into the first free slot, growing the directory by
/// one entry if every slot is taken.
pub(crate) fn add(
    fs: &FileSystem,
    dp: &Inode,
    name: &FileName,
    sector: u32,
    is_dir: bool,
) -> Result<()> {
    let _guard = dp.dir_guard();
    match lookup(fs, dp, name) {
        Ok(_) => return Err(FsError::AlreadyExists),
        Err(FsError::NotFound) => {}
        Err(e) => return Err(e),
    }
    let len = dp.len(fs)?;
    let mut slot = len;
    let mut offset = 0;
    while offset + DIRENT_SIZE as u64 <= len {
        if read_entry(fs, dp, offset)?.in_use == 0 {
            slot = offset;
            break;
        }
        offset += DIRENT_SIZE as u64;
    }
    write_entry(fs, dp, slot, &Dirent::new(name, sector, is_dir))
}

/// Is the directory empty apart from `.` and `..`?
fn is_empty(fs: &FileSystem, dp: &Inode) -> Result<bool> {
    let len = dp.len(fs)?;
    let mut offset = 2 * DIRENT_SIZE as u64;
    while offset + DIRENT_SIZE as u64 <= len {
        if read_entry(fs, dp, offset)?.in_use != 0 {
            return Ok(false);
        }
        offset += DIRENT_SIZE as u64;
    }
    Ok(true)
}

/// Clear `name`'s entry and schedule its inode's sectors for release once
/// the last open handle goes away. Refuses `.` and `..`, and refuses
/// directories that still have entries.
pub(crate) fn remove(fs: &FileSystem, dp: &Inode, name: &FileName) -> Result<()> {
    if name.as_str() == "." || name.as_str() == ".." {
        return Err(FsError::InvalidName);
    }
    let _guard = dp.dir_guard();
    let (sector, offset, entry_is_dir) = lookup(fs, dp, name)?;
    let ip = fs.itable.open(sector);
    let result = (|| {
        if entry_is_dir && !is_empty(fs, &ip)? {
            return Err(FsError::NotEmpty);
        }
        write_entry(fs, dp, offset, &Dirent::default())?;
        ip.mark_removed();
        Ok(())
    })();
    fs.itable.close(fs, ip)?;
    result
}

/// Yield the name of the next in-use entry at or after `*pos`, skipping
/// `.` and `..`, and advance the cursor past it.
pub(crate) fn read_next(
    fs: &FileSystem,
    dp: &Inode,
    pos: &mut u64,
) -> Result<Option<ArrayString<DIRSIZ>>> {
    let len = dp.len(fs)?;
    while *pos + DIRENT_SIZE as u64 <= len {
        let entry = read_entry(fs, dp, *pos)?;
        *pos += DIRENT_SIZE as u64;
        if entry.in_use == 0 {
            continue;
        }
        let name = core::str::from_utf8(entry.name_bytes()).map_err(|_| FsError::InvalidName)?;
        if name == "." || name == ".." {
            continue;
        }
        let mut out = ArrayString::new();
        out.push_str(name);
        return Ok(Some(out));
    }
    Ok(None)
}
