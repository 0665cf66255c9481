//! Conversion of SELF containers back into plain ELF files.
//!
//! A SELF stores the program headers of the image it wraps, but not the image
//! layout itself. The converter rebuilds that layout from the program headers
//! and pulls segment contents from a [`SegmentDecryptor`](crate::self_file::SegmentDecryptor).
//!
//! # Conversion Pipeline
//!
//! 1. **Planning** - Drops empty segments and segments contained in another
//!    one; the version segment is always kept and read from the container tail
//! 2. **Procedures** - Turns the plan into write procedures, headers first
//! 3. **Writing** - Streams each procedure into the output file, padding every
//!    segment to its alignment

mod context;
mod plan;
mod writer;

pub use context::*;
pub use plan::*;
pub use writer::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::{Elf64Header, Elf64Phdr, PT_LOAD, PT_SCE_VERSION};
    use crate::error::{Error, ErrorKind};
    use crate::self_file::test_support::{build_self, build_self_with, PhdrSpec};
    use crate::self_file::{PlaintextSegmentReader, SegmentDecryptor, SelfContext};
    use std::fs;
    use std::io;
    use std::path::Path;
    use tempfile::TempDir;
    use zerocopy::FromBytes;

    fn open(tmp: &TempDir, data: &[u8]) -> SelfContext {
        let path = tmp.path().join("eboot.bin");
        fs::write(&path, data).unwrap();
        SelfContext::open(&path).unwrap()
    }

    fn convert(ctx: &ConversionContext, decryptor: &mut dyn SegmentDecryptor, out: &Path) -> Result<u64, Error> {
        let plans = plan_segments(&ctx.source.phdrs);
        let procedures = build_procedures(ctx, &plans)?;
        write_elf(ctx, &procedures, decryptor, out)
    }

    /// Program headers of the image shape used by most tests: two loadable
    /// segments after the headers.
    fn image_phdrs() -> Vec<PhdrSpec> {
        vec![(PT_LOAD, 0x200, 0x180, 0x100), (PT_LOAD, 0x400, 0x100, 0x10)]
    }

    fn image(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    /// Checks that a rebuilt ELF starts with the source headers, section
    /// fields cleared.
    fn headers_match(output: &[u8], source: &SelfContext) {
        let header = source.output_header();
        assert_eq!(&output[..header.len()], &header[..]);
        let ehdr = Elf64Header::read_from_prefix(output).unwrap().0;
        assert_eq!(ehdr.e_shoff.get(), 0);
        assert_eq!(ehdr.e_shnum.get(), 0);
        assert_eq!(ehdr.e_shentsize.get(), 0);
        assert_eq!(ehdr.e_shstrndx.get(), 0);
    }

    #[test]
    fn test_identity_decryptor_reproduces_image() {
        let tmp = TempDir::new().unwrap();
        let plain = image(0x500);
        let source = open(&tmp, &build_self(&image_phdrs(), &plain, &[]));
        let ctx = ConversionContext::new(&source);

        let mut decryptor = |segment: u32, offset: u64, len: usize| -> io::Result<Vec<u8>> {
            let phdr = &source.phdrs[segment as usize];
            let start = (phdr.p_offset.get() + offset) as usize;
            Ok(plain[start..start + len].to_vec())
        };

        let out = tmp.path().join("out/eboot.elf");
        let size = convert(&ctx, &mut decryptor, &out).unwrap();
        let output = fs::read(&out).unwrap();

        assert_eq!(size, 0x500);
        assert_eq!(output.len(), 0x500);
        headers_match(&output, &source);
        assert_eq!(&output[0x200..0x380], &plain[0x200..0x380]);
        assert_eq!(&output[0x400..0x500], &plain[0x400..0x500]);
        // Padding between the first segment and its aligned end
        assert!(output[0x380..0x400].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_contained_segment_is_not_requested() {
        let tmp = TempDir::new().unwrap();
        let phdrs = [(PT_LOAD, 0x200, 0x200, 0x10), (PT_LOAD, 0x280, 0x40, 0x10)];
        let plain = image(0x400);
        let source = open(&tmp, &build_self_with(1, &phdrs, &plain, &[]));
        let ctx = ConversionContext::new(&source);

        let mut requested = Vec::new();
        let mut decryptor = |segment: u32, offset: u64, len: usize| -> io::Result<Vec<u8>> {
            requested.push(segment);
            let start = (0x200 + offset) as usize;
            Ok(plain[start..start + len].to_vec())
        };

        let out = tmp.path().join("contained.elf");
        convert(&ctx, &mut decryptor, &out).unwrap();
        drop(decryptor);

        assert_eq!(requested, vec![0]);
        let output = fs::read(&out).unwrap();
        assert_eq!(&output[0x280..0x2C0], &plain[0x280..0x2C0]);
    }

    #[test]
    fn test_version_segment_comes_from_tail() {
        let tmp = TempDir::new().unwrap();
        let tail = b"version-segment-bytes".to_vec();
        let phdrs = [
            (PT_LOAD, 0x200, 0x100, 0x10),
            (PT_SCE_VERSION, 0x220, tail.len() as u64, 0x10),
        ];
        let plain = image(0x300);
        let source = open(&tmp, &build_self_with(1, &phdrs, &plain, &tail));
        let ctx = ConversionContext::new(&source);

        let mut decryptor = |segment: u32, offset: u64, len: usize| -> io::Result<Vec<u8>> {
            assert_eq!(segment, 0, "version segment must not be decrypted");
            let start = (0x200 + offset) as usize;
            Ok(plain[start..start + len].to_vec())
        };

        let out = tmp.path().join("version.elf");
        convert(&ctx, &mut decryptor, &out).unwrap();
        let output = fs::read(&out).unwrap();

        // Written after the segment that contains it
        assert_eq!(&output[0x220..0x220 + tail.len()], &tail[..]);
        assert_eq!(&output[0x200..0x220], &plain[0x200..0x220]);
    }

    #[test]
    fn test_version_segment_larger_than_file() {
        let tmp = TempDir::new().unwrap();
        let phdrs = [(PT_SCE_VERSION, 0x200, 0x10_0000, 0x10)];
        let source = open(&tmp, &build_self_with(0, &phdrs, &[], &[]));
        let ctx = ConversionContext::new(&source);

        let plans = plan_segments(&source.phdrs);
        let err = build_procedures(&ctx, &plans).unwrap_err();
        assert!(matches!(err, Error::MetadataOutOfBounds { segment: 0, .. }));
    }

    #[test]
    fn test_decryptor_failure_is_reported() {
        let tmp = TempDir::new().unwrap();
        let source = open(&tmp, &build_self(&image_phdrs(), &image(0x500), &[]));
        let ctx = ConversionContext::new(&source);

        let mut decryptor = |_: u32, _: u64, _: usize| -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "no key"))
        };

        let err = convert(&ctx, &mut decryptor, &tmp.path().join("fail.elf")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecryptionFailed);
        assert!(matches!(err, Error::Decryption { segment: 0, offset: 0, .. }));
    }

    #[test]
    fn test_short_decryption_is_reported() {
        let tmp = TempDir::new().unwrap();
        let source = open(&tmp, &build_self(&image_phdrs(), &image(0x500), &[]));
        let ctx = ConversionContext::new(&source);

        let mut decryptor = |_: u32, _: u64, len: usize| -> io::Result<Vec<u8>> { Ok(vec![0; len - 1]) };

        let err = convert(&ctx, &mut decryptor, &tmp.path().join("short.elf")).unwrap_err();
        assert!(matches!(
            err,
            Error::ShortDecryption {
                segment: 0,
                expected: 0x180,
                actual: 0x17F,
                ..
            }
        ));
    }

    #[test]
    fn test_requests_respect_chunk_size() {
        let tmp = TempDir::new().unwrap();
        let phdrs = [(PT_LOAD, 0x1000, 0x2_8000, 0x1000)];
        let plain = image(0x2_9000);
        let source = open(&tmp, &build_self(&phdrs, &plain, &[]));
        let ctx = ConversionContext::new(&source).with_chunk_size(0x1_0000);

        let mut requests = Vec::new();
        let mut decryptor = |_: u32, offset: u64, len: usize| -> io::Result<Vec<u8>> {
            requests.push((offset, len));
            let start = (0x1000 + offset) as usize;
            Ok(plain[start..start + len].to_vec())
        };

        let out = tmp.path().join("chunked.elf");
        convert(&ctx, &mut decryptor, &out).unwrap();
        drop(decryptor);

        assert_eq!(requests, vec![(0, 0x1_0000), (0x1_0000, 0x1_0000), (0x2_0000, 0x8000)]);
        assert_eq!(fs::read(&out).unwrap()[0x1000..0x2_9000], plain[0x1000..0x2_9000]);
    }

    #[test]
    fn test_padding_does_not_clobber_following_segment() {
        let tmp = TempDir::new().unwrap();
        // The first segment's aligned end overlaps the second segment
        let phdrs = [(PT_LOAD, 0x200, 0x10, 0x1000), (PT_LOAD, 0x300, 0x10, 0x10)];
        let plain = image(0x310);
        let source = open(&tmp, &build_self(&phdrs, &plain, &[]));
        let ctx = ConversionContext::new(&source);

        let out = tmp.path().join("pad.elf");
        let size = convert(&ctx, &mut PlaintextSegmentReader::new(&source), &out).unwrap();
        let output = fs::read(&out).unwrap();

        assert_eq!(size, 0x1200);
        assert_eq!(output.len(), 0x1200);
        assert_eq!(&output[0x300..0x310], &plain[0x300..0x310]);
        assert!(output[0x310..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_headers_restamped_after_overlapping_segment() {
        let tmp = TempDir::new().unwrap();
        // A segment starting at zero covers the ELF headers
        let phdrs = [(PT_LOAD, 0, 0x200, 0x10)];
        let plain = vec![0xAAu8; 0x200];
        let source = open(&tmp, &build_self(&phdrs, &plain, &[]));
        let ctx = ConversionContext::new(&source).with_verbosity(0);

        let out = tmp.path().join("restamp.elf");
        convert(&ctx, &mut PlaintextSegmentReader::new(&source), &out).unwrap();
        let output = fs::read(&out).unwrap();

        let header_len = Elf64Header::SIZE + Elf64Phdr::SIZE;
        headers_match(&output, &source);
        assert!(output[header_len..0x200].iter().all(|&b| b == 0xAA));
    }
}
