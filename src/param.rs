/// Size of a device sector in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Size of the disk block cache, in slots.
pub const NBUF: usize = 64;

/// Direct sector addresses held in an inode record.
pub const NDIRECT: usize = 123;

/// Sector addresses held in one indirect block.
pub const NINDIRECT: usize = SECTOR_SIZE / core::mem::size_of::<u32>();

/// Maximum sectors addressable by one inode:
/// direct + indirect + doubly indirect.
pub const MAXFILE: usize = NDIRECT + NINDIRECT + NINDIRECT * NINDIRECT;

/// Maximum length of a directory-entry name.
pub const DIRSIZ: usize = 14;

/// Sector holding the free-map inode.
pub const FREE_MAP_SECTOR: u32 = 0;

/// Sector holding the root directory inode.
pub const ROOT_DIR_SECTOR: u32 = 1;

/// Entry slots given to the root directory at format time.
pub const ROOT_DIR_ENTRIES: u32 = 16;
