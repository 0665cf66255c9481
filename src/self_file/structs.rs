//! SELF container binary structures.
//!
//! A SELF starts with a 0x20-byte header, followed by `segment_count`
//! 0x20-byte segment descriptors and then the wrapped ELF header.

use std::fmt;

use bitflags::bitflags;
use zerocopy::byteorder::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// SELF magic (`4F 15 3D 1D` read as a little-endian u32).
pub const SELF_MAGIC: u32 = 0x1D3D_154F;

/// The SELF header (0x20 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct SelfHeader {
    /// Magic (`SELF_MAGIC`)
    pub magic: U32,
    /// Format version
    pub version: u8,
    /// Mode
    pub mode: u8,
    /// Endianness
    pub endian: u8,
    /// Attributes
    pub attribs: u8,
    /// Key type
    pub key_type: U32,
    /// Size of the header area
    pub header_size: U16,
    /// Size of the metadata area
    pub meta_size: U16,
    /// Size of the wrapped file
    pub file_size: U64,
    /// Number of segment descriptors
    pub segment_count: U16,
    /// Flags
    pub flags: U16,
    /// Reserved
    pub reserved: U32,
}

impl SelfHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 0x20;

    /// Returns true if the magic matches.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic.get() == SELF_MAGIC
    }

    /// Returns the offset of the wrapped ELF header.
    #[inline]
    pub fn elf_offset(&self) -> usize {
        Self::SIZE + self.segment_count.get() as usize * SelfSegmentEntry::SIZE
    }
}

bitflags! {
    /// Properties word of a segment descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentProps: u64 {
        /// Segment is ordered
        const ORDERED = 0x1;
        /// Segment is encrypted
        const ENCRYPTED = 0x2;
        /// Segment is signed
        const SIGNED = 0x4;
        /// Segment is compressed
        const COMPRESSED = 0x8;
        /// Segment is split into blocks
        const BLOCKED = 0x800;
    }
}

/// A segment descriptor (0x20 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct SelfSegmentEntry {
    /// Properties word
    pub props: U64,
    /// Offset of the stored data in the container
    pub offset: U64,
    /// Stored (possibly encrypted or compressed) size
    pub encrypted_size: U64,
    /// Plaintext size
    pub decrypted_size: U64,
}

impl SelfSegmentEntry {
    /// Size of a descriptor in bytes.
    pub const SIZE: usize = 0x20;

    /// Returns the decoded property flags.
    #[inline]
    pub fn props(&self) -> SegmentProps {
        SegmentProps::from_bits_retain(self.props.get())
    }

    /// Returns the program header index this descriptor belongs to.
    #[inline]
    pub fn id(&self) -> u32 {
        ((self.props.get() >> 20) & 0xFFF) as u32
    }

    /// Returns true if the stored data is encrypted.
    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.props().contains(SegmentProps::ENCRYPTED)
    }

    /// Returns true if the stored data is compressed.
    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.props().contains(SegmentProps::COMPRESSED)
    }

    /// Returns true if the stored data is signed.
    #[inline]
    pub fn is_signed(&self) -> bool {
        self.props().contains(SegmentProps::SIGNED)
    }

    /// Returns true if the segment is split into blocks.
    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.props().contains(SegmentProps::BLOCKED)
    }
}

// =============================================================================
// Display Implementations
// =============================================================================

impl fmt::Display for SelfHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Self {{ magic: {:#010x}, version: {}, mode: {:#x}, key type: {:#x}, file size: {:#x}, segments: {} }}",
            self.magic.get(),
            self.version,
            self.mode,
            self.key_type.get(),
            self.file_size.get(),
            self.segment_count.get()
        )
    }
}

impl fmt::Display for SelfSegmentEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let props = self.props();
        write!(
            f,
            "id {:<3} offset {:#010x} stored {:#010x} plain {:#010x} [{}{}{}{}]",
            self.id(),
            self.offset.get(),
            self.encrypted_size.get(),
            self.decrypted_size.get(),
            if props.contains(SegmentProps::ENCRYPTED) { "E" } else { "-" },
            if props.contains(SegmentProps::COMPRESSED) { "C" } else { "-" },
            if props.contains(SegmentProps::SIGNED) { "S" } else { "-" },
            if props.contains(SegmentProps::BLOCKED) { "B" } else { "-" }
        )
    }
}
