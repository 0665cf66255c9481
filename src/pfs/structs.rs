//! PFS image binary structures.
//!
//! PFS stores all fields little-endian. The image starts with a 0x50-byte
//! header in block 0; the inode table follows from block 1.

use std::fmt;

use zerocopy::byteorder::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Expected value of the header magic field.
pub const PFS_MAGIC: u64 = 0x2013_0315;

/// Number of direct block slots in an inode.
pub const DIRECT_BLOCKS: usize = 12;

/// `db[1]` value marking a contiguous extent.
pub const CONTIGUOUS_SENTINEL: u32 = u32::MAX;

// =============================================================================
// Directory Entry Types
// =============================================================================

/// End of the directory block.
pub const DIRENT_TYPE_TERMINATOR: u32 = 0;
/// Regular file.
pub const DIRENT_TYPE_FILE: u32 = 2;
/// Directory.
pub const DIRENT_TYPE_DIRECTORY: u32 = 3;
/// Self link (`.`).
pub const DIRENT_TYPE_DOT: u32 = 4;
/// Parent link (`..`).
pub const DIRENT_TYPE_DOTDOT: u32 = 5;

// =============================================================================
// Header
// =============================================================================

/// The PFS header at offset 0 (0x50 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct PfsHeader {
    /// Format version
    pub version: U64,
    /// Magic (`PFS_MAGIC`)
    pub magic: U64,
    /// Image id
    pub id: [U32; 2],
    /// Format mode
    pub fmode: u8,
    /// Clean flag
    pub clean: u8,
    /// Read-only flag
    pub ronly: u8,
    /// Reserved
    pub rsv: u8,
    /// Mode flags
    pub mode: U16,
    /// Unknown
    pub unk1: U16,
    /// Block size in bytes
    pub blocksz: U32,
    /// Number of backup blocks
    pub nbackup: U32,
    /// Total number of blocks
    pub nblock: U64,
    /// Number of inodes
    pub ndinode: U64,
    /// Number of data blocks
    pub ndblock: U64,
    /// Number of blocks holding the inode table
    pub ndinodeblock: U64,
    /// Inode number of the super-root directory
    pub superroot_ino: U64,
}

impl PfsHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 0x50;

    /// Returns true if the magic matches.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic.get() == PFS_MAGIC
    }

    /// Returns the block size.
    #[inline]
    pub fn block_size(&self) -> u64 {
        self.blocksz.get() as u64
    }

    /// Returns the number of inodes stored per inode-table block.
    #[inline]
    pub fn inodes_per_block(&self) -> u64 {
        self.block_size() / PfsInode::SIZE as u64
    }
}

// =============================================================================
// Inode
// =============================================================================

/// An on-disk inode (`di_d32`, 0xA8 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct PfsInode {
    /// Mode and type bits
    pub mode: U16,
    /// Link count
    pub nlink: U16,
    /// Inode flags
    pub flags: U32,
    /// Size in bytes
    pub size: U64,
    /// Compressed size in bytes
    pub size_compressed: U64,
    /// Access, modification, change and birth times (seconds)
    pub times: [U64; 4],
    /// Nanosecond parts of `times`
    pub times_nsec: [U32; 4],
    /// Owner id
    pub uid: U32,
    /// Group id
    pub gid: U32,
    /// Unknown
    pub unk1: U64,
    /// Unknown
    pub unk2: U64,
    /// Number of data blocks
    pub blocks: U32,
    /// Direct block indices
    pub db: [U32; DIRECT_BLOCKS],
    /// Indirect block indices
    pub ib: [U32; 5],
}

impl PfsInode {
    /// Size of an inode record in bytes.
    pub const SIZE: usize = 0xA8;

    /// Returns the size in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size.get()
    }

    /// Returns the first data block.
    #[inline]
    pub fn first_block(&self) -> u32 {
        self.db[0].get()
    }

    /// Decodes the data block addressing of this inode.
    ///
    /// `db[1] == CONTIGUOUS_SENTINEL`, or a block count beyond the direct
    /// array, means the blocks run contiguously from `db[0]`.
    pub fn block_list(&self) -> BlockList {
        let count = self.blocks.get();
        if self.db[1].get() == CONTIGUOUS_SENTINEL || count as usize > DIRECT_BLOCKS {
            BlockList::Contiguous {
                start: self.first_block(),
                count,
            }
        } else {
            let mut blocks = [0u32; DIRECT_BLOCKS];
            for (dst, src) in blocks.iter_mut().zip(self.db.iter()) {
                *dst = src.get();
            }
            BlockList::Explicit { blocks, count }
        }
    }
}

/// Data block addressing of an inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockList {
    /// Up to 12 block indices listed in the inode.
    Explicit {
        /// Direct block slots
        blocks: [u32; DIRECT_BLOCKS],
        /// Number of used slots
        count: u32,
    },
    /// `count` blocks starting at `start`.
    Contiguous {
        /// First block
        start: u32,
        /// Number of blocks
        count: u32,
    },
}

impl BlockList {
    /// Returns the number of blocks.
    pub fn len(&self) -> usize {
        match *self {
            BlockList::Explicit { count, .. } => (count as usize).min(DIRECT_BLOCKS),
            BlockList::Contiguous { count, .. } => count as usize,
        }
    }

    /// Returns true if there are no blocks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Limits a contiguous run to the first `block_count` blocks of the image.
    ///
    /// Explicit lists hold at most 12 entries and are returned unchanged.
    pub fn clamp_to(&self, block_count: u64) -> BlockList {
        match *self {
            BlockList::Contiguous { start, count } => {
                let room = block_count.saturating_sub(start as u64);
                BlockList::Contiguous {
                    start,
                    count: count.min(room.min(u32::MAX as u64) as u32),
                }
            }
            explicit => explicit,
        }
    }

    /// Iterates the block indices in order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len()).map(move |i| match self {
            BlockList::Explicit { blocks, .. } => blocks[i] as u64,
            BlockList::Contiguous { start, .. } => *start as u64 + i as u64,
        })
    }
}

// =============================================================================
// Directory Entry
// =============================================================================

/// Fixed part of a directory record (16 bytes); the name follows.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct PfsDirent {
    /// Target inode
    pub ino: U32,
    /// Entry type
    pub entry_type: U32,
    /// Length of the name
    pub namelen: U32,
    /// Total size of the record including padding
    pub entsize: U32,
}

impl PfsDirent {
    /// Size of the fixed part in bytes.
    pub const SIZE: usize = 0x10;
}

// =============================================================================
// Display Implementations
// =============================================================================

impl fmt::Display for PfsHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pfs {{ version: {}, magic: {:#x}, mode: {:#x}, blocksz: {:#x}, nblock: {}, ndinode: {}, ndinodeblock: {}, superroot: {} }}",
            self.version.get(),
            self.magic.get(),
            self.mode.get(),
            self.blocksz.get(),
            self.nblock.get(),
            self.ndinode.get(),
            self.ndinodeblock.get(),
            self.superroot_ino.get()
        )
    }
}

impl fmt::Display for PfsInode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mode {:#06x} size {:#x} blocks {} db0 {:#x} uid {:#x} gid {:#x}",
            self.mode.get(),
            self.size(),
            self.blocks.get(),
            self.first_block(),
            self.uid.get(),
            self.gid.get()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::FromZeros;

    #[test]
    fn test_struct_sizes() {
        assert_eq!(std::mem::size_of::<PfsHeader>(), PfsHeader::SIZE);
        assert_eq!(std::mem::size_of::<PfsInode>(), PfsInode::SIZE);
        assert_eq!(std::mem::size_of::<PfsDirent>(), PfsDirent::SIZE);
    }

    #[test]
    fn test_field_offsets() {
        use std::mem::offset_of;
        assert_eq!(offset_of!(PfsHeader, blocksz), 0x20);
        assert_eq!(offset_of!(PfsHeader, nblock), 0x28);
        assert_eq!(offset_of!(PfsHeader, ndinode), 0x30);
        assert_eq!(offset_of!(PfsHeader, ndinodeblock), 0x40);
        assert_eq!(offset_of!(PfsHeader, superroot_ino), 0x48);
        assert_eq!(offset_of!(PfsInode, size), 0x08);
        assert_eq!(offset_of!(PfsInode, uid), 0x48);
        assert_eq!(offset_of!(PfsInode, blocks), 0x60);
        assert_eq!(offset_of!(PfsInode, db), 0x64);
        assert_eq!(offset_of!(PfsInode, ib), 0x94);
    }

    #[test]
    fn test_block_list_explicit() {
        let mut inode = PfsInode::new_zeroed();
        inode.blocks = U32::new(3);
        inode.db[0] = U32::new(7);
        inode.db[1] = U32::new(2);
        inode.db[2] = U32::new(9);

        let list = inode.block_list();
        assert!(matches!(list, BlockList::Explicit { count: 3, .. }));
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![7, 2, 9]);
    }

    #[test]
    fn test_block_list_contiguous() {
        let mut inode = PfsInode::new_zeroed();
        inode.blocks = U32::new(3);
        inode.db[0] = U32::new(10);
        inode.db[1] = U32::new(CONTIGUOUS_SENTINEL);
        assert_eq!(
            inode.block_list(),
            BlockList::Contiguous { start: 10, count: 3 }
        );
        assert_eq!(inode.block_list().iter().collect::<Vec<_>>(), vec![10, 11, 12]);

        // More blocks than direct slots
        inode.db[1] = U32::new(11);
        inode.blocks = U32::new(20);
        let list = inode.block_list();
        assert_eq!(list.len(), 20);
        assert_eq!(list.iter().last(), Some(29));
    }

    #[test]
    fn test_contiguous_run_clamped_to_image() {
        let list = BlockList::Contiguous {
            start: 4,
            count: u32::MAX,
        };
        assert_eq!(list.clamp_to(10).len(), 6);
        assert_eq!(list.clamp_to(10).iter().last(), Some(9));
        assert!(list.clamp_to(3).is_empty());

        let short = BlockList::Contiguous { start: 4, count: 2 };
        assert_eq!(short.clamp_to(10), short);

        let explicit = BlockList::Explicit {
            blocks: [100; DIRECT_BLOCKS],
            count: 3,
        };
        assert_eq!(explicit.clamp_to(10), explicit);
    }

    #[test]
    fn test_empty_inode_has_no_blocks() {
        let inode = PfsInode::new_zeroed();
        assert!(inode.block_list().is_empty());
    }
}
