//! PKG archive binary structures.
//!
//! All PKG header fields are stored big-endian. The structures use
//! `zerocopy`'s big-endian integer wrappers so they can be read directly from
//! the mapped archive.

use std::fmt;

use bitflags::bitflags;
use zerocopy::byteorder::big_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::util::c_string;

/// PKG magic (`"\x7FCNT"` read as a big-endian u32).
pub const PKG_MAGIC: u32 = 0x7F43_4E54;

/// Absolute offset of the content header.
pub const PKG_CONTENT_HEADER_OFFSET: u64 = 0x400;

// =============================================================================
// Entry Types
// =============================================================================

/// Digest table.
pub const ENTRY_TYPE_DIGEST_TABLE: u32 = 0x0001;
/// Entry keys.
pub const ENTRY_TYPE_ENTRY_KEYS: u32 = 0x0010;
/// Image key.
pub const ENTRY_TYPE_IMAGE_KEY: u32 = 0x0020;
/// General digests.
pub const ENTRY_TYPE_GENERAL_DIGESTS: u32 = 0x0080;
/// Metadata table.
pub const ENTRY_TYPE_META_TABLE: u32 = 0x0100;
/// Name table holding NUL-terminated file names.
pub const ENTRY_TYPE_NAME_TABLE: u32 = 0x0200;
/// License entry.
pub const ENTRY_TYPE_LICENSE: u32 = 0x0400;
/// First "is a file" mask.
pub const ENTRY_TYPE_FILE1: u32 = 0x1000;
/// Second "is a file" mask.
pub const ENTRY_TYPE_FILE2: u32 = 0x1200;

/// Returns true if the entry type denotes a file payload.
#[inline]
pub fn is_file_type(entry_type: u32) -> bool {
    (entry_type & ENTRY_TYPE_FILE1) == ENTRY_TYPE_FILE1
        || (entry_type & ENTRY_TYPE_FILE2) == ENTRY_TYPE_FILE2
}

// =============================================================================
// Header Structures
// =============================================================================

/// The PKG main header at offset 0 (0x180 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct PkgMainHeader {
    /// Magic (`PKG_MAGIC`)
    pub magic: U32,
    /// Archive type
    pub pkg_type: U32,
    /// Unknown
    pub unk_0x08: U32,
    /// Number of files
    pub file_count: U32,
    /// High half of the entry count
    pub entry_count_high: U16,
    /// Number of entries in the entry table
    pub table_entries_num: U16,
    /// Number of system entries
    pub system_entries_num: U16,
    /// Secondary entry count
    pub entry_count_2: U16,
    /// File offset of the entry table
    pub file_table_offset: U32,
    /// Size of the main entries data
    pub main_entries_data_size: U32,
    /// Body offset
    pub body_offset: U64,
    /// Body size
    pub body_size: U64,
    /// Content offset
    pub content_offset: U64,
    /// Content size
    pub content_size: U64,
    /// Content id, NUL padded
    pub content_id: [u8; 0x24],
    /// Padding
    pub padding: [u8; 0x0C],
    /// DRM type
    pub drm_type: U32,
    /// Content type
    pub content_type: U32,
    /// Content flags
    pub content_flags: U32,
    /// Promote size
    pub promote_size: U32,
    /// Version date
    pub version_date: U32,
    /// Version hash
    pub version_hash: U32,
    /// Unknown / reserved
    pub reserved: [u8; 0x78],
    /// Header digests
    pub digests: [u8; 0x80],
}

impl PkgMainHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 0x180;

    /// Returns true if the magic matches.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic.get() == PKG_MAGIC
    }

    /// Returns the content id as a string.
    pub fn content_id(&self) -> String {
        c_string(&self.content_id)
    }
}

/// The PKG content header at offset 0x400 (0x80 bytes).
///
/// Only used for diagnostics.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct PkgContentHeader {
    /// Unknown
    pub unk_0x00: [u8; 0x10],
    /// Offset of the content region
    pub content_offset: U64,
    /// Size of the content region
    pub content_size: U64,
    /// Unknown / digests
    pub unk_0x20: [u8; 0x60],
}

impl PkgContentHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 0x80;
}

// =============================================================================
// Entry Table
// =============================================================================

/// A raw entry table record (0x20 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct PkgTableEntry {
    /// Entry type
    pub entry_type: U32,
    /// Offset of the entry name in the name table
    pub name_offset: U32,
    /// First flags word
    pub flags1: U32,
    /// Second flags word
    pub flags2: U32,
    /// File offset of the entry data
    pub offset: U32,
    /// Size of the entry data
    pub size: U32,
    /// Padding
    pub padding: [u8; 8],
}

impl PkgTableEntry {
    /// Size of an entry record in bytes.
    pub const SIZE: usize = 0x20;
}

bitflags! {
    /// Flags in the first flags word of an entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        /// Entry data is encrypted
        const ENCRYPTED = 1 << 31;
    }
}

/// A parsed entry table record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgEntry {
    /// Position in the entry table
    pub index: usize,
    /// Entry type code
    pub entry_type: u32,
    /// File offset of the entry data
    pub offset: u64,
    /// Size of the entry data
    pub size: u64,
    /// Entry flags
    pub flags: EntryFlags,
}

impl PkgEntry {
    /// Creates an entry from a raw table record.
    pub fn from_raw(index: usize, raw: &PkgTableEntry) -> Self {
        Self {
            index,
            entry_type: raw.entry_type.get(),
            offset: raw.offset.get() as u64,
            size: raw.size.get() as u64,
            flags: EntryFlags::from_bits_retain(raw.flags1.get()),
        }
    }

    /// Returns true if this entry holds the name table.
    #[inline]
    pub fn is_name_table(&self) -> bool {
        self.entry_type == ENTRY_TYPE_NAME_TABLE
    }

    /// Returns true if this entry is a file payload.
    #[inline]
    pub fn is_file(&self) -> bool {
        is_file_type(self.entry_type)
    }

    /// Returns true if the entry data is encrypted.
    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.flags.contains(EntryFlags::ENCRYPTED)
    }

    /// Returns the end offset of the entry data.
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

// =============================================================================
// Display Implementations
// =============================================================================

impl fmt::Display for PkgMainHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pkg {{ magic: {:#010x}, type: {:#x}, entries: {}, system entries: {}, table: {:#x}, content id: {}, drm: {:#x}, content type: {:#x} }}",
            self.magic.get(),
            self.pkg_type.get(),
            self.table_entries_num.get(),
            self.system_entries_num.get(),
            self.file_table_offset.get(),
            self.content_id(),
            self.drm_type.get(),
            self.content_type.get()
        )
    }
}

impl fmt::Display for PkgContentHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Content {{ offset: {:#x}, size: {:#x} }}",
            self.content_offset.get(),
            self.content_size.get()
        )
    }
}

impl fmt::Display for PkgEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:<3} type {:#06x} offset {:#010x} size {:#010x}{}",
            self.index,
            self.entry_type,
            self.offset,
            self.size,
            if self.is_encrypted() { " [enc]" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_sizes() {
        assert_eq!(std::mem::size_of::<PkgMainHeader>(), PkgMainHeader::SIZE);
        assert_eq!(std::mem::size_of::<PkgContentHeader>(), PkgContentHeader::SIZE);
        assert_eq!(std::mem::size_of::<PkgTableEntry>(), PkgTableEntry::SIZE);
    }

    #[test]
    fn test_field_offsets() {
        use std::mem::offset_of;
        assert_eq!(offset_of!(PkgMainHeader, table_entries_num), 0x12);
        assert_eq!(offset_of!(PkgMainHeader, system_entries_num), 0x14);
        assert_eq!(offset_of!(PkgMainHeader, file_table_offset), 0x18);
        assert_eq!(offset_of!(PkgMainHeader, content_id), 0x40);
        assert_eq!(offset_of!(PkgMainHeader, drm_type), 0x70);
        assert_eq!(offset_of!(PkgContentHeader, content_offset), 0x10);
        assert_eq!(offset_of!(PkgTableEntry, offset), 0x10);
    }

    #[test]
    fn test_is_file_type() {
        assert!(is_file_type(0x1000));
        assert!(is_file_type(0x1200));
        assert!(is_file_type(0x1403));
        assert!(!is_file_type(ENTRY_TYPE_NAME_TABLE));
        assert!(!is_file_type(ENTRY_TYPE_LICENSE));
        assert!(!is_file_type(ENTRY_TYPE_DIGEST_TABLE));
    }

    #[test]
    fn test_entry_from_raw() {
        let raw = PkgTableEntry {
            entry_type: U32::new(0x1000),
            name_offset: U32::new(0),
            flags1: U32::new(0x8000_0000),
            flags2: U32::new(0),
            offset: U32::new(0x2000),
            size: U32::new(0x30),
            padding: [0; 8],
        };
        let entry = PkgEntry::from_raw(3, &raw);
        assert_eq!(entry.index, 3);
        assert_eq!(entry.entry_type, 0x1000);
        assert_eq!(entry.end(), 0x2030);
        assert!(entry.is_encrypted());
        assert!(entry.is_file());
        assert!(!entry.is_name_table());
    }
}
