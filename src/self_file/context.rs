//! SELF container context.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::debug;
use zerocopy::{FromBytes, IntoBytes};

use super::structs::*;
use crate::elf::{Elf64Header, Elf64Phdr, ELF_MAGIC};
use crate::error::{Error, Result};
use crate::util::read_u32_le_at;

/// Main context for working with a SELF container.
#[derive(Debug)]
pub struct SelfContext {
    /// Container file (memory-mapped)
    pub mmap: Mmap,
    /// Path to the container
    pub path: PathBuf,
    /// Parsed SELF header
    pub header: SelfHeader,
    /// Segment descriptors
    pub segments: Vec<SelfSegmentEntry>,
    /// Offset of the wrapped ELF header
    pub elf_offset: usize,
    /// Wrapped ELF header, as stored
    pub elf_header: Elf64Header,
    /// Program headers following the ELF header
    pub phdrs: Vec<Elf64Phdr>,
}

impl SelfContext {
    /// Opens a SELF container and parses its headers.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mmap = Self::map(&path)?;

        let elf_offset = Self::check_magics(&mmap, &path)?;
        let header = SelfHeader::read_from_prefix(&mmap)
            .map_err(|_| Error::buffer_too_small(SelfHeader::SIZE as u64, mmap.len() as u64))?
            .0;
        debug!("{}", header);

        let segments: Vec<SelfSegmentEntry> = mmap[SelfHeader::SIZE..elf_offset]
            .chunks_exact(SelfSegmentEntry::SIZE)
            .filter_map(|chunk| SelfSegmentEntry::read_from_bytes(chunk).ok())
            .collect();
        for entry in &segments {
            debug!("{}", entry);
        }

        let elf_header = Elf64Header::read_from_prefix(&mmap[elf_offset..])
            .map_err(|_| {
                Error::buffer_too_small((elf_offset + Elf64Header::SIZE) as u64, mmap.len() as u64)
            })?
            .0;
        debug!("{}", elf_header);

        let phdr_offset = elf_offset + Elf64Header::SIZE;
        let phnum = elf_header.e_phnum.get() as usize;
        let phdr_end = phdr_offset + phnum * Elf64Phdr::SIZE;
        let table = mmap
            .get(phdr_offset..phdr_end)
            .ok_or_else(|| Error::buffer_too_small(phdr_end as u64, mmap.len() as u64))?;

        let phdrs: Vec<Elf64Phdr> = table
            .chunks_exact(Elf64Phdr::SIZE)
            .filter_map(|chunk| Elf64Phdr::read_from_bytes(chunk).ok())
            .collect();

        Ok(Self {
            mmap,
            path,
            header,
            segments,
            elf_offset,
            elf_header,
            phdrs,
        })
    }

    /// Returns true if `path` looks like a SELF-wrapped ELF.
    ///
    /// Only the SELF magic and the ELF magic after the descriptors are
    /// checked; unreadable files are not SELFs.
    pub fn probe<P: AsRef<Path>>(path: P) -> bool {
        let path = path.as_ref();
        match Self::map(path) {
            Ok(mmap) => Self::check_magics(&mmap, path).is_ok(),
            Err(_) => false,
        }
    }

    fn map(path: &Path) -> Result<Mmap> {
        let file = File::open(path).map_err(|e| Error::FileOpen {
            path: path.to_path_buf(),
            source: e,
        })?;

        // SAFETY: the container is opened read-only and never modified while
        // mapped.
        unsafe { Mmap::map(&file) }.map_err(|e| Error::MemoryMap {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Validates both magics and returns the ELF header offset.
    fn check_magics(data: &[u8], path: &Path) -> Result<usize> {
        let magic = read_u32_le_at(data, 0)
            .ok_or_else(|| Error::buffer_too_small(4, data.len() as u64))?;
        if magic != SELF_MAGIC {
            return Err(Error::InvalidSelfMagic {
                path: path.to_path_buf(),
                expected: SELF_MAGIC,
                actual: magic,
            });
        }

        let header = SelfHeader::read_from_prefix(data)
            .map_err(|_| Error::buffer_too_small(SelfHeader::SIZE as u64, data.len() as u64))?
            .0;
        let elf_offset = header.elf_offset();

        let elf_magic = read_u32_le_at(data, elf_offset)
            .ok_or_else(|| Error::buffer_too_small(elf_offset as u64 + 4, data.len() as u64))?;
        if elf_magic != ELF_MAGIC {
            return Err(Error::InvalidElfMagic {
                path: path.to_path_buf(),
                offset: elf_offset as u64,
                actual: elf_magic,
            });
        }

        Ok(elf_offset)
    }

    /// Returns the container size in bytes.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Returns the file name of the container.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Returns the ELF header and program headers as they appear at the start
    /// of the rebuilt file, with the section header fields cleared.
    pub fn output_header(&self) -> Vec<u8> {
        let mut header = self.elf_header;
        header.clear_section_headers();

        let mut out = Vec::with_capacity(Elf64Header::SIZE + self.phdrs.len() * Elf64Phdr::SIZE);
        out.extend_from_slice(header.as_bytes());
        for phdr in &self.phdrs {
            out.extend_from_slice(phdr.as_bytes());
        }
        out
    }

    /// Returns the last `size` bytes of the container.
    pub fn tail(&self, size: u64) -> Option<&[u8]> {
        let start = self.file_size().checked_sub(size)?;
        self.mmap.get(start as usize..)
    }

    /// Returns the descriptor whose id matches a program header index.
    pub fn segment_for_phdr(&self, index: u32) -> Option<&SelfSegmentEntry> {
        self.segments.iter().find(|s| s.id() == index)
    }
}
