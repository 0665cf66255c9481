//! scedump - Reconstructs plaintext application bundles from console containers.
//!
//! This library parses three container formats and turns each back into
//! ordinary files:
//!
//! - **PKG** archives: system entries are written under `sce_sys/`, named from
//!   a static type table or the archive's own name table
//! - **PFS** images: the directory tree below the super-root is recreated and
//!   file contents are streamed out through a bounded buffer
//! - **SELF** executables: the wrapped ELF is rebuilt from its program headers,
//!   with segment plaintext supplied by a [`SegmentDecryptor`]
//!
//! # Example
//!
//! ```no_run
//! use scedump::{extract_image, extract_package, extract_self, PlaintextSegmentReader, SelfContext};
//!
//! fn main() -> scedump::Result<()> {
//!     let report = extract_package("/path/to/game.pkg", "out")?;
//!     println!("{} system files", report.written.len());
//!
//!     let stats = extract_image("/path/to/pfs_image.dat", "out")?;
//!     println!("{} files, {} bytes", stats.files, stats.bytes);
//!
//!     // Only works for containers whose segments are stored in the clear
//!     let source = SelfContext::open("/path/to/eboot.bin")?;
//!     let mut reader = PlaintextSegmentReader::new(&source);
//!     extract_self("/path/to/eboot.bin", "out/eboot.elf", &mut reader)?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod converter;
pub mod elf;
pub mod error;
pub mod pfs;
pub mod pkg;
pub mod self_file;
pub mod util;

// Re-export main types
pub use converter::ConversionReport;
pub use error::{Error, ErrorKind, Result};
pub use pfs::{ImageStats, PfsContext};
pub use pkg::{PackageReport, PkgContext};
pub use self_file::{PlaintextSegmentReader, SegmentDecryptor, SelfContext};

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use tracing::{debug, warn};

use converter::{build_procedures, plan_segments, write_elf, ConversionContext};
use util::{read_u32_be_at, read_u32_le_at, MAX_CHUNK_SIZE};

/// Options shared by the extractors.
#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
    pub verbosity: u8,
    /// Largest single read, write or decryption request, in bytes
    pub chunk_size: usize,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            verbosity: 1,
            chunk_size: MAX_CHUNK_SIZE,
        }
    }
}

// =============================================================================
// PKG
// =============================================================================

/// Extracts the system entries of a PKG archive into `dest/sce_sys/`.
///
/// Per-entry failures are collected in the report; only a bad header or
/// entry table fails the whole call.
pub fn extract_package<P: AsRef<Path>, Q: AsRef<Path>>(path: P, dest: Q) -> Result<PackageReport> {
    PkgContext::open(path)?.extract(dest)
}

// =============================================================================
// PFS
// =============================================================================

/// Extracts the directory tree of a PFS image into `dest`.
pub fn extract_image<P: AsRef<Path>, Q: AsRef<Path>>(path: P, dest: Q) -> Result<ImageStats> {
    extract_image_with_options(path, dest, &ExtractionOptions::default(), None)
}

/// Extracts the directory tree of a PFS image with custom options.
///
/// `progress` receives the number of bytes copied after every chunk; its
/// total matches the `bytes` of a [`PfsContext::dry_run`] over the same image.
pub fn extract_image_with_options<P: AsRef<Path>, Q: AsRef<Path>>(
    path: P,
    dest: Q,
    options: &ExtractionOptions,
    progress: Option<&mut dyn FnMut(u64)>,
) -> Result<ImageStats> {
    PfsContext::open(path)?.extract(dest, options.chunk_size, progress)
}

// =============================================================================
// SELF
// =============================================================================

/// Rebuilds the ELF wrapped by an open SELF container.
///
/// Segments are requested from `decryptor` by program header index. The
/// version segment is copied from the end of the container instead. If the
/// conversion fails the partially written output file is removed.
pub fn convert_self<P: AsRef<Path>>(
    source: &SelfContext,
    output_path: P,
    decryptor: &mut dyn SegmentDecryptor,
    options: &ExtractionOptions,
) -> Result<ConversionReport> {
    let ctx = ConversionContext::new(source)
        .with_verbosity(options.verbosity)
        .with_chunk_size(options.chunk_size);

    let output_path = output_path.as_ref();
    let plans = plan_segments(&source.phdrs);
    let procedures = build_procedures(&ctx, &plans)?;
    let output_size = match write_elf(&ctx, &procedures, decryptor, output_path) {
        Ok(size) => size,
        Err(e) => {
            discard_partial(output_path);
            return Err(e);
        }
    };

    let written: Vec<u32> = plans.iter().map(|p| p.index).collect();
    let skipped = (0..source.phdrs.len() as u32)
        .filter(|i| !written.contains(i))
        .collect();

    Ok(ConversionReport {
        written,
        skipped,
        output_size,
    })
}

fn discard_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("removed partial output {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove partial output {}: {}", path.display(), e),
    }
}

/// Opens a SELF container and rebuilds its ELF.
pub fn extract_self<P: AsRef<Path>, Q: AsRef<Path>>(
    path: P,
    output_path: Q,
    decryptor: &mut dyn SegmentDecryptor,
) -> Result<ConversionReport> {
    extract_self_with_options(path, output_path, decryptor, &ExtractionOptions::default())
}

/// Opens a SELF container and rebuilds its ELF with custom options.
pub fn extract_self_with_options<P: AsRef<Path>, Q: AsRef<Path>>(
    path: P,
    output_path: Q,
    decryptor: &mut dyn SegmentDecryptor,
    options: &ExtractionOptions,
) -> Result<ConversionReport> {
    let source = SelfContext::open(path)?;
    convert_self(&source, output_path, decryptor, options)
}

// =============================================================================
// Format Detection
// =============================================================================

/// Container formats recognised by [`detect_format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// PKG archive
    Package,
    /// PFS image
    Image,
    /// SELF executable
    SelfExecutable,
    /// Plain ELF
    Elf,
}

/// Identifies a container by its leading magic bytes.
///
/// Returns `None` for files that match none of the known formats.
pub fn detect_format<P: AsRef<Path>>(path: P) -> Result<Option<Format>> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|e| Error::FileOpen {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut head = Vec::with_capacity(0x10);
    file.by_ref()
        .take(0x10)
        .read_to_end(&mut head)
        .map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            offset: 0,
            len: 0x10,
            source: e,
        })?;

    Ok(format_from_magic(&head))
}

fn format_from_magic(head: &[u8]) -> Option<Format> {
    if read_u32_be_at(head, 0) == Some(pkg::PKG_MAGIC) {
        return Some(Format::Package);
    }
    match read_u32_le_at(head, 0) {
        Some(self_file::SELF_MAGIC) => return Some(Format::SelfExecutable),
        Some(elf::ELF_MAGIC) => return Some(Format::Elf),
        _ => {}
    }
    let pfs_magic = (read_u32_le_at(head, 8)?, read_u32_le_at(head, 12)?);
    (pfs_magic == (pfs::PFS_MAGIC as u32, (pfs::PFS_MAGIC >> 32) as u32)).then_some(Format::Image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::PT_LOAD;
    use crate::self_file::test_support::build_self;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_options() {
        let options = ExtractionOptions::default();
        assert_eq!(options.verbosity, 1);
        assert_eq!(options.chunk_size, 0x10_0000);
    }

    #[test]
    fn test_format_from_magic() {
        assert_eq!(format_from_magic(&[0x7F, b'C', b'N', b'T', 0, 0, 0, 0]), Some(Format::Package));
        assert_eq!(format_from_magic(&[0x4F, 0x15, 0x3D, 0x1D]), Some(Format::SelfExecutable));
        assert_eq!(format_from_magic(b"\x7FELF\x02\x01\x01\x00"), Some(Format::Elf));

        let mut pfs = [0u8; 0x10];
        pfs[8..12].copy_from_slice(&0x2013_0315u32.to_le_bytes());
        assert_eq!(format_from_magic(&pfs), Some(Format::Image));

        assert_eq!(format_from_magic(&[0u8; 0x10]), None);
        assert_eq!(format_from_magic(&[0u8; 3]), None);
    }

    #[test]
    fn test_detect_format_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("eboot.bin");
        fs::write(&path, build_self(&[(PT_LOAD, 0x100, 0x10, 0x10)], &[0u8; 0x110], &[])).unwrap();
        assert_eq!(detect_format(&path).unwrap(), Some(Format::SelfExecutable));

        let err = detect_format(tmp.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_extract_self_with_plaintext_segments() {
        let tmp = TempDir::new().unwrap();
        let phdrs = [
            (PT_LOAD, 0x100, 0x80, 0x100),
            (PT_LOAD, 0x120, 0x10, 0x10),
            (PT_LOAD, 0x200, 0, 0x10),
        ];
        let plain: Vec<u8> = (0..0x200u32).map(|i| (i ^ 0x5A) as u8).collect();
        let path = tmp.path().join("eboot.bin");
        fs::write(&path, build_self(&phdrs, &plain, &[])).unwrap();

        let source = SelfContext::open(&path).unwrap();
        let mut reader = PlaintextSegmentReader::new(&source);
        let out = tmp.path().join("eboot.elf");
        let report = convert_self(&source, &out, &mut reader, &ExtractionOptions::default()).unwrap();

        assert_eq!(report.written, vec![0]);
        assert_eq!(report.skipped, vec![1, 2]);
        assert_eq!(report.output_size, 0x200);

        let output = fs::read(&out).unwrap();
        assert_eq!(output.len(), 0x200);
        assert_eq!(&output[0x100..0x180], &plain[0x100..0x180]);
    }

    #[test]
    fn test_failed_conversion_removes_output() {
        let tmp = TempDir::new().unwrap();
        let phdrs = [(PT_LOAD, 0x100, 0x80, 0x10), (PT_LOAD, 0x200, 0x80, 0x10)];
        let path = tmp.path().join("eboot.bin");
        fs::write(&path, build_self(&phdrs, &[0x11u8; 0x280], &[])).unwrap();
        let out = tmp.path().join("eboot.elf");

        // The first segment succeeds, the second fails after the header is on disk
        let mut decryptor = |segment: u32, _: u64, len: usize| -> std::io::Result<Vec<u8>> {
            match segment {
                0 => Ok(vec![0x11; len]),
                _ => Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no key")),
            }
        };
        let err = extract_self(&path, &out, &mut decryptor).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DecryptionFailed);
        assert!(!out.exists());
    }

    #[test]
    fn test_extract_self_missing_file() {
        let tmp = TempDir::new().unwrap();
        let mut decryptor = |_: u32, _: u64, len: usize| -> std::io::Result<Vec<u8>> { Ok(vec![0; len]) };
        let err = extract_self(tmp.path().join("nope.bin"), tmp.path().join("out.elf"), &mut decryptor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
