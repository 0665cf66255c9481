//! ELF64 binary structures.
//!
//! Only the file header and program headers are modelled; section headers are
//! not reconstructed from SELF containers.

use std::fmt;

use zerocopy::byteorder::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::constants::*;

/// ELF64 file header (64 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct Elf64Header {
    /// Identification bytes
    pub e_ident: [u8; 16],
    /// Object file type
    pub e_type: U16,
    /// Machine
    pub e_machine: U16,
    /// Version
    pub e_version: U32,
    /// Entry point
    pub e_entry: U64,
    /// Program header table offset
    pub e_phoff: U64,
    /// Section header table offset
    pub e_shoff: U64,
    /// Flags
    pub e_flags: U32,
    /// Header size
    pub e_ehsize: U16,
    /// Program header entry size
    pub e_phentsize: U16,
    /// Number of program headers
    pub e_phnum: U16,
    /// Section header entry size
    pub e_shentsize: U16,
    /// Number of section headers
    pub e_shnum: U16,
    /// Section name string table index
    pub e_shstrndx: U16,
}

impl Elf64Header {
    /// Size of the header in bytes.
    pub const SIZE: usize = 0x40;

    /// Returns the magic as a little-endian u32.
    #[inline]
    pub fn magic(&self) -> u32 {
        u32::from_le_bytes([self.e_ident[0], self.e_ident[1], self.e_ident[2], self.e_ident[3]])
    }

    /// Returns true if the magic matches.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic() == ELF_MAGIC
    }

    /// Clears the section header fields.
    ///
    /// Section headers are not carried over, so the fields must not point
    /// into the rebuilt file.
    pub fn clear_section_headers(&mut self) {
        self.e_shoff = U64::new(0);
        self.e_shentsize = U16::new(0);
        self.e_shnum = U16::new(0);
        self.e_shstrndx = U16::new(0);
    }

    /// Returns a short name for the object file type.
    pub fn type_name(&self) -> &'static str {
        match self.e_type.get() {
            ET_EXEC => "EXEC",
            ET_DYN => "DYN",
            ET_SCE_EXEC => "SCE_EXEC",
            ET_SCE_REPLAY_EXEC => "SCE_REPLAY_EXEC",
            ET_SCE_DYNEXEC => "SCE_DYNEXEC",
            ET_SCE_DYNAMIC => "SCE_DYNAMIC",
            _ => "UNKNOWN",
        }
    }
}

/// ELF64 program header (56 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct Elf64Phdr {
    /// Segment type
    pub p_type: U32,
    /// Segment flags
    pub p_flags: U32,
    /// File offset
    pub p_offset: U64,
    /// Virtual address
    pub p_vaddr: U64,
    /// Physical address
    pub p_paddr: U64,
    /// Size in the file
    pub p_filesz: U64,
    /// Size in memory
    pub p_memsz: U64,
    /// Alignment
    pub p_align: U64,
}

impl Elf64Phdr {
    /// Size of a program header in bytes.
    pub const SIZE: usize = 0x38;

    /// Returns the file range end.
    #[inline]
    pub fn file_end(&self) -> u64 {
        self.p_offset.get().saturating_add(self.p_filesz.get())
    }

    /// Returns true if this segment's file range lies within `other`'s.
    #[inline]
    pub fn is_within(&self, other: &Elf64Phdr) -> bool {
        self.p_offset.get() >= other.p_offset.get() && self.file_end() <= other.file_end()
    }

    /// Returns the segment flags.
    #[inline]
    pub fn flags(&self) -> PhdrFlags {
        PhdrFlags::from_bits_retain(self.p_flags.get())
    }
}

// =============================================================================
// Display Implementations
// =============================================================================

impl fmt::Display for Elf64Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Elf64 {{ type: {}, entry: {:#x}, phnum: {}, shoff: {:#x}, shnum: {} }}",
            self.type_name(),
            self.e_entry.get(),
            self.e_phnum.get(),
            self.e_shoff.get(),
            self.e_shnum.get()
        )
    }
}

impl fmt::Display for Elf64Phdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<16} {} offset {:#010x} filesz {:#010x} vaddr {:#012x} memsz {:#010x} align {:#x}",
            segment_type_name(self.p_type.get()),
            self.flags().perms(),
            self.p_offset.get(),
            self.p_filesz.get(),
            self.p_vaddr.get(),
            self.p_memsz.get(),
            self.p_align.get()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::FromZeros;

    fn phdr(offset: u64, filesz: u64) -> Elf64Phdr {
        let mut p = Elf64Phdr::new_zeroed();
        p.p_offset = U64::new(offset);
        p.p_filesz = U64::new(filesz);
        p
    }

    #[test]
    fn test_struct_sizes() {
        assert_eq!(std::mem::size_of::<Elf64Header>(), Elf64Header::SIZE);
        assert_eq!(std::mem::size_of::<Elf64Phdr>(), Elf64Phdr::SIZE);
    }

    #[test]
    fn test_section_header_offsets() {
        use std::mem::offset_of;
        assert_eq!(offset_of!(Elf64Header, e_shoff), 0x28);
        assert_eq!(offset_of!(Elf64Header, e_shentsize), 0x3A);
        assert_eq!(offset_of!(Elf64Header, e_shnum), 0x3C);
        assert_eq!(offset_of!(Elf64Header, e_shstrndx), 0x3E);
    }

    #[test]
    fn test_clear_section_headers() {
        let mut header = Elf64Header::new_zeroed();
        header.e_ident[..4].copy_from_slice(b"\x7FELF");
        header.e_shoff = U64::new(0x1234);
        header.e_shentsize = U16::new(0x40);
        header.e_shnum = U16::new(12);
        header.e_shstrndx = U16::new(11);
        header.e_phnum = U16::new(3);

        header.clear_section_headers();
        assert!(header.is_valid());
        assert_eq!(header.e_shoff.get(), 0);
        assert_eq!(header.e_shnum.get(), 0);
        assert_eq!(header.e_shstrndx.get(), 0);
        assert_eq!(header.e_phnum.get(), 3);
    }

    #[test]
    fn test_is_within() {
        let outer = phdr(0x1000, 0x4000);
        assert!(phdr(0x2000, 0x100).is_within(&outer));
        assert!(phdr(0x1000, 0x4000).is_within(&outer));
        assert!(!phdr(0x4F00, 0x200).is_within(&outer));
        assert!(!outer.is_within(&phdr(0x2000, 0x100)));
    }

    #[test]
    fn test_phdr_flags() {
        assert_eq!(PhdrFlags::from_bits_retain(0x5).perms(), "r-x");
        assert_eq!(PhdrFlags::from_bits_retain(0x6).perms(), "rw-");
        assert_eq!(segment_type_name(PT_SCE_VERSION), "SCE_VERSION");
        assert_eq!(segment_type_name(0x1234), "UNKNOWN");
    }
}
