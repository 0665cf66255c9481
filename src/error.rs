//! Error types for the PKG, PFS and SELF extractors.
//!
//! Every variant carries enough context (path, offset, expected vs. found value)
//! to diagnose a malformed container without re-running with extra logging.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for extraction operations.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open file '{path}': {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to memory map file '{path}': {source}")]
    MemoryMap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {len:#x} bytes at offset {offset:#x} from '{path}': {source}")]
    FileRead {
        path: PathBuf,
        offset: u64,
        len: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write output file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ==================== PKG Errors ====================
    #[error("invalid PKG magic in '{path}': expected {expected:#010x}, got {actual:#010x}")]
    InvalidPkgMagic {
        path: PathBuf,
        expected: u32,
        actual: u32,
    },

    #[error("PKG entry table in '{path}' ({count} entries at {offset:#x}) extends beyond end of file ({file_size:#x})")]
    EntryTableOverflow {
        path: PathBuf,
        offset: u64,
        count: usize,
        file_size: u64,
    },

    #[error("PKG entry {index} (type {entry_type:#06x}) range {offset:#x}+{size:#x} exceeds file size {file_size:#x}")]
    EntryOutOfBounds {
        index: usize,
        entry_type: u32,
        offset: u64,
        size: u64,
        file_size: u64,
    },

    #[error("refusing unsafe output name '{name}'")]
    UnsafeName { name: String },

    // ==================== PFS Errors ====================
    #[error("invalid PFS block size {block_size:#x} in '{path}'")]
    InvalidBlockSize { path: PathBuf, block_size: u32 },

    #[error("PFS inode table in '{path}' ({blocks} blocks of {block_size:#x}) extends beyond end of file ({file_size:#x})")]
    InodeTableOverflow {
        path: PathBuf,
        blocks: u64,
        block_size: u32,
        file_size: u64,
    },

    #[error("inode {ino} out of range (inode count: {count})")]
    InodeOutOfRange { ino: u64, count: usize },

    #[error("malformed directory entry at offset {offset:#x}: {reason}")]
    InvalidDirent { offset: u64, reason: String },

    #[error("directory inode {ino} was already walked")]
    DirectoryCycle { ino: u64 },

    // ==================== SELF / ELF Errors ====================
    #[error("invalid SELF magic in '{path}': expected {expected:#010x}, got {actual:#010x}")]
    InvalidSelfMagic {
        path: PathBuf,
        expected: u32,
        actual: u32,
    },

    #[error("ELF header not found in '{path}' at offset {offset:#x} (got {actual:#010x})")]
    InvalidElfMagic {
        path: PathBuf,
        offset: u64,
        actual: u32,
    },

    #[error("failed to decrypt segment {segment} range {offset:#x}+{len:#x}: {source}")]
    Decryption {
        segment: u32,
        offset: u64,
        len: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("decryptor returned {actual:#x} bytes for segment {segment} at {offset:#x}, expected {expected:#x}")]
    ShortDecryption {
        segment: u32,
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("metadata segment {segment} ({size:#x} bytes) is larger than the container ({file_size:#x})")]
    MetadataOutOfBounds {
        segment: u32,
        size: u64,
        file_size: u64,
    },

    // ==================== Parse Errors ====================
    #[error("parse error at offset {offset:#x}: {reason}")]
    Parse { offset: u64, reason: String },

    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: u64, available: u64 },
}

/// A specialized Result type for extraction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure classes shared by all three extractors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Structural validation failed.
    InvalidFormat,
    /// The underlying storage failed while reading.
    Io,
    /// The decryption capability refused or failed a request.
    DecryptionFailed,
    /// A single output entry could not be written.
    WriteFailed,
}

impl Error {
    /// Returns the failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::FileOpen { .. } | Error::MemoryMap { .. } | Error::FileRead { .. } => {
                ErrorKind::Io
            }
            Error::FileWrite { .. } | Error::CreateDir { .. } | Error::UnsafeName { .. } => {
                ErrorKind::WriteFailed
            }
            Error::Decryption { .. } | Error::ShortDecryption { .. } => ErrorKind::DecryptionFailed,
            _ => ErrorKind::InvalidFormat,
        }
    }

    /// Returns true if this error only affects a single entry.
    ///
    /// The PKG extractor records these in its report and moves on to the next
    /// entry; any other error ends the extraction.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::FileWrite { .. }
                | Error::CreateDir { .. }
                | Error::UnsafeName { .. }
                | Error::EntryOutOfBounds { .. }
                | Error::InodeOutOfRange { .. }
                | Error::InvalidDirent { .. }
                | Error::DirectoryCycle { .. }
        )
    }

    /// Creates a parse error with a formatted message.
    #[inline]
    pub fn parse(offset: u64, reason: impl Into<String>) -> Self {
        Error::Parse {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a buffer too small error.
    #[inline]
    pub fn buffer_too_small(needed: u64, available: u64) -> Self {
        Error::BufferTooSmall { needed, available }
    }
}
