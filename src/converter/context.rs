//! Conversion context that holds state while rebuilding an ELF.

use tracing::{info, warn};

use crate::self_file::SelfContext;
use crate::util::{clamp_chunk_size, MAX_CHUNK_SIZE};

/// Context for one SELF to ELF conversion.
#[derive(Debug)]
pub struct ConversionContext<'a> {
    /// The container being converted
    pub source: &'a SelfContext,
    /// Largest single decryption request and copy chunk
    pub chunk_size: usize,
    /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
    pub verbosity: u8,
}

impl<'a> ConversionContext<'a> {
    /// Creates a conversion context for the given container.
    pub fn new(source: &'a SelfContext) -> Self {
        Self {
            source,
            chunk_size: MAX_CHUNK_SIZE,
            verbosity: 1,
        }
    }

    /// Sets the verbosity level.
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Sets the chunk size, clamped to the supported range.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = clamp_chunk_size(chunk_size);
        self
    }

    /// Returns the file name of the container.
    pub fn image_name(&self) -> String {
        self.source.name()
    }

    /// Logs a warning message if verbosity is high enough.
    pub fn warn(&self, message: &str) {
        if self.verbosity >= 1 {
            warn!("{}: {}", self.image_name(), message);
        }
    }

    /// Logs an info message if verbosity is high enough.
    pub fn info(&self, message: &str) {
        if self.verbosity >= 2 {
            info!("{}: {}", self.image_name(), message);
        }
    }
}

/// Write procedure for assembling the output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteProcedure {
    /// Offset in the output file
    pub write_offset: u64,
    /// Offset in the source (container offset for the tail, segment offset
    /// for decrypted data)
    pub read_offset: u64,
    /// Number of bytes to copy
    pub size: u64,
    /// Size the output region is zero-padded to
    pub pad_to: u64,
    /// Where the bytes come from
    pub source: WriteSource,
}

/// Source of data for a write procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteSource {
    /// ELF header and program headers, section fields cleared
    Header,
    /// Plaintext of a program segment from the decryptor
    Decrypted { segment: u32 },
    /// Bytes of a program segment stored at the end of the container
    ContainerTail { segment: u32 },
}

impl WriteProcedure {
    /// Creates a write procedure for the ELF headers.
    pub fn from_header(size: u64) -> Self {
        Self {
            write_offset: 0,
            read_offset: 0,
            size,
            pad_to: size,
            source: WriteSource::Header,
        }
    }

    /// Creates a write procedure for a decrypted segment.
    pub fn from_decrypted(segment: u32, write_offset: u64, size: u64, pad_to: u64) -> Self {
        Self {
            write_offset,
            read_offset: 0,
            size,
            pad_to: pad_to.max(size),
            source: WriteSource::Decrypted { segment },
        }
    }

    /// Creates a write procedure for bytes at the end of the container.
    pub fn from_tail(segment: u32, write_offset: u64, read_offset: u64, size: u64) -> Self {
        Self {
            write_offset,
            read_offset,
            size,
            pad_to: size,
            source: WriteSource::ContainerTail { segment },
        }
    }

    /// Returns the end of the written bytes.
    #[inline]
    pub fn end(&self) -> u64 {
        self.write_offset.saturating_add(self.size)
    }

    /// Returns the end of the region including padding.
    #[inline]
    pub fn padded_end(&self) -> u64 {
        self.write_offset.saturating_add(self.pad_to)
    }
}

/// Summary of a conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionReport {
    /// Program segments written, by index
    pub written: Vec<u32>,
    /// Program segments skipped (empty or contained in another segment)
    pub skipped: Vec<u32>,
    /// Size of the output file
    pub output_size: u64,
}
