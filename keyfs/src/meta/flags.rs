//! Inode flags as exposed by `FS_IOC_GETFLAGS` / `FS_IOC_SETFLAGS`.
//!
//! Values follow the `FS_*_FL` constants in `include/uapi/linux/fs.h`.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InodeFlags: u32 {
        /// Secure deletion
        const SECURE_RM = 0x0000_0001;
        const UNDELETE = 0x0000_0002;
        /// Compress file
        const COMPRESS = 0x0000_0004;
        /// Synchronous updates
        const SYNC = 0x0000_0008;
        const IMMUTABLE = 0x0000_0010;
        /// Writes may only append
        const APPEND = 0x0000_0020;
        const NO_DUMP = 0x0000_0040;
        /// Do not update the access time
        const NO_ATIME = 0x0000_0080;
        const DIRTY = 0x0000_0100;
        /// One or more compressed clusters
        const COMPRESS_BLK = 0x0000_0200;
        const NO_COMPRESS = 0x0000_0400;
        const ENCRYPT = 0x0000_0800;
        /// btree format dir; shares its bit with the hash-indexed directory flag
        const BTREE = 0x0000_1000;
        /// AFS directory
        const IMAGIC = 0x0000_2000;
        const JOURNAL_DATA = 0x0000_4000;
        /// File tail should not be merged
        const NO_TAIL = 0x0000_8000;
        /// dirsync behaviour (directories only)
        const DIR_SYNC = 0x0001_0000;
        /// Top of directory hierarchies
        const TOP_DIR = 0x0002_0000;
        const HUGE_FILE = 0x0004_0000;
        const EXTENT = 0x0008_0000;
        const VERITY = 0x0010_0000;
        /// Inode used for large extended attributes
        const EA_INODE = 0x0020_0000;
        const EOF_BLOCKS = 0x0040_0000;
        const NO_COW = 0x0080_0000;
        const DAX = 0x0200_0000;
        const INLINE_DATA = 0x1000_0000;
        /// Create with parent's project id
        const PROJ_INHERIT = 0x2000_0000;
        const CASE_FOLD = 0x4000_0000;
        const RESERVED = 0x8000_0000;
    }
}

/// Flags a user may observe.
pub const USER_VISIBLE_FLAGS: u32 = 0x0003_dfff;
/// Flags a user may change.
pub const USER_MODIFIABLE_FLAGS: u32 = 0x0003_80ff;

impl InodeFlags {
    /// Subset of `self` a user may observe.
    pub fn user_visible(self) -> Self {
        Self::from_bits_retain(self.bits() & USER_VISIBLE_FLAGS)
    }

    /// Apply a user-requested flag change, keeping bits the user may not touch.
    pub fn apply_user_change(self, requested: u32) -> Self {
        let kept = self.bits() & !USER_MODIFIABLE_FLAGS;
        Self::from_bits_retain(kept | (requested & USER_MODIFIABLE_FLAGS))
    }
}
