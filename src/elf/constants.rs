//! ELF constants and flags.

use bitflags::bitflags;

// =============================================================================
// Identification
// =============================================================================

/// ELF magic (`"\x7FELF"` read as a little-endian u32)
pub const ELF_MAGIC: u32 = 0x464C_457F;

/// 64-bit class
pub const ELFCLASS64: u8 = 2;

/// Little-endian data encoding
pub const ELFDATA2LSB: u8 = 1;

// =============================================================================
// Object File Types
// =============================================================================

/// Executable
pub const ET_EXEC: u16 = 0x2;
/// Shared object
pub const ET_DYN: u16 = 0x3;
/// SCE executable
pub const ET_SCE_EXEC: u16 = 0xFE00;
/// SCE relocatable executable
pub const ET_SCE_REPLAY_EXEC: u16 = 0xFE01;
/// SCE dynamic executable
pub const ET_SCE_DYNEXEC: u16 = 0xFE10;
/// SCE dynamic library (PRX)
pub const ET_SCE_DYNAMIC: u16 = 0xFE18;

// =============================================================================
// Segment Types
// =============================================================================

/// Unused entry
pub const PT_NULL: u32 = 0x0;
/// Loadable segment
pub const PT_LOAD: u32 = 0x1;
/// Dynamic linking information
pub const PT_DYNAMIC: u32 = 0x2;
/// Interpreter path
pub const PT_INTERP: u32 = 0x3;
/// Auxiliary information
pub const PT_NOTE: u32 = 0x4;
/// Reserved
pub const PT_SHLIB: u32 = 0x5;
/// Program header table
pub const PT_PHDR: u32 = 0x6;
/// Thread-local storage template
pub const PT_TLS: u32 = 0x7;
/// Exception handling frame table
pub const PT_GNU_EH_FRAME: u32 = 0x6474_E550;
/// Stack permissions
pub const PT_GNU_STACK: u32 = 0x6474_E551;
/// Relocation table for SCE dynamic linking
pub const PT_SCE_RELA: u32 = 0x6000_0000;
/// SCE dynamic linking data
pub const PT_SCE_DYNLIBDATA: u32 = 0x6100_0000;
/// Process parameters
pub const PT_SCE_PROCPARAM: u32 = 0x6100_0001;
/// Module parameters
pub const PT_SCE_MODULE_PARAM: u32 = 0x6100_0002;
/// Relocatable executable data
pub const PT_SCE_RELRO: u32 = 0x6100_0010;
/// Comment segment
pub const PT_SCE_COMMENT: u32 = 0x6FFF_FF00;
/// Version and signature metadata, stored at the end of the container
pub const PT_SCE_VERSION: u32 = 0x6FFF_FF01;

/// Returns a human-readable name for a segment type.
pub fn segment_type_name(p_type: u32) -> &'static str {
    match p_type {
        PT_NULL => "NULL",
        PT_LOAD => "LOAD",
        PT_DYNAMIC => "DYNAMIC",
        PT_INTERP => "INTERP",
        PT_NOTE => "NOTE",
        PT_SHLIB => "SHLIB",
        PT_PHDR => "PHDR",
        PT_TLS => "TLS",
        PT_GNU_EH_FRAME => "GNU_EH_FRAME",
        PT_GNU_STACK => "GNU_STACK",
        PT_SCE_RELA => "SCE_RELA",
        PT_SCE_DYNLIBDATA => "SCE_DYNLIBDATA",
        PT_SCE_PROCPARAM => "SCE_PROCPARAM",
        PT_SCE_MODULE_PARAM => "SCE_MODULE_PARAM",
        PT_SCE_RELRO => "SCE_RELRO",
        PT_SCE_COMMENT => "SCE_COMMENT",
        PT_SCE_VERSION => "SCE_VERSION",
        _ => "UNKNOWN",
    }
}

bitflags! {
    /// Program header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PhdrFlags: u32 {
        /// Executable
        const X = 0x1;
        /// Writable
        const W = 0x2;
        /// Readable
        const R = 0x4;
    }
}

impl PhdrFlags {
    /// Returns the `rwx` permission string.
    pub fn perms(&self) -> String {
        format!(
            "{}{}{}",
            if self.contains(PhdrFlags::R) { 'r' } else { '-' },
            if self.contains(PhdrFlags::W) { 'w' } else { '-' },
            if self.contains(PhdrFlags::X) { 'x' } else { '-' }
        )
    }
}
