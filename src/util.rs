//! Utility functions for binary data processing.
//!
//! This module provides small primitives shared by the extractors:
//! - Unaligned integer reads (using byteorder)
//! - NUL-terminated string scanning (via memchr)
//! - Alignment helpers for program header padding
//! - Bounded, fixed-buffer copies between files
//! - Validation of relative output paths taken from untrusted containers

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Smallest chunk size used for streaming copies.
pub const MIN_CHUNK_SIZE: usize = 0x1_0000;

/// Largest chunk size used for streaming copies.
pub const MAX_CHUNK_SIZE: usize = 0x10_0000;

// =============================================================================
// Unaligned Reads
// =============================================================================

/// Reads a little-endian u32 from a byte slice at the given offset.
///
/// Returns `None` if the slice is too short.
#[inline(always)]
pub fn read_u32_le_at(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset.checked_add(4)?).map(LittleEndian::read_u32)
}

/// Reads a big-endian u32 from a byte slice at the given offset.
///
/// Returns `None` if the slice is too short.
#[inline(always)]
pub fn read_u32_be_at(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset.checked_add(4)?).map(BigEndian::read_u32)
}

// =============================================================================
// Byte Search
// =============================================================================

/// Finds the position of the first null byte in a slice.
///
/// Returns `data.len()` when the slice has no terminator.
#[inline(always)]
pub fn memchr_null(data: &[u8]) -> usize {
    memchr::memchr(0, data).unwrap_or(data.len())
}

/// Decodes a NUL-terminated string, lossily converting invalid UTF-8.
pub fn c_string(data: &[u8]) -> String {
    String::from_utf8_lossy(&data[..memchr_null(data)]).into_owned()
}

// =============================================================================
// Alignment Utilities
// =============================================================================

/// Rounds `value` up to a multiple of `alignment`.
///
/// ELF alignments are powers of two in practice, but `p_align` comes from
/// untrusted input: 0 and 1 mean "no alignment" and any other value is
/// handled with a division instead of a mask.
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    if alignment.is_power_of_two() {
        return value
            .checked_add(alignment - 1)
            .map_or(value, |v| v & !(alignment - 1));
    }
    value
        .div_ceil(alignment)
        .checked_mul(alignment)
        .unwrap_or(value)
}

/// Clamps a requested chunk size into the supported streaming range.
#[inline]
pub fn clamp_chunk_size(size: usize) -> usize {
    size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

// =============================================================================
// Streaming Copies
// =============================================================================

/// Copies exactly `len` bytes starting at `offset` in `src` to the current
/// position of `dst`, using `buf` as the only intermediate storage.
///
/// `on_chunk` is called with the size of every chunk written. Peak memory is
/// `buf.len()` regardless of `len`. Fails with `UnexpectedEof` if `src` ends
/// early.
pub fn copy_range<R, W, F>(
    src: &mut R,
    offset: u64,
    len: u64,
    dst: &mut W,
    buf: &mut [u8],
    mut on_chunk: F,
) -> io::Result<()>
where
    R: Read + Seek,
    W: Write,
    F: FnMut(u64),
{
    if buf.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty copy buffer"));
    }

    src.seek(SeekFrom::Start(offset))?;

    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(buf.len() as u64) as usize;
        src.read_exact(&mut buf[..n])?;
        dst.write_all(&buf[..n])?;
        remaining -= n as u64;
        on_chunk(n as u64);
    }

    Ok(())
}

// =============================================================================
// Output Paths
// =============================================================================

/// Converts a container-supplied name into a relative path that stays below
/// the destination directory.
///
/// Backslashes are treated as separators. Returns `None` for empty names,
/// absolute paths and names with `..` components.
pub fn safe_relative_path(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    let mut out = PathBuf::new();

    for comp in Path::new(&normalized).components() {
        match comp {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reads() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05];
        assert_eq!(read_u32_le_at(&data, 1), Some(0x05040302));
        assert_eq!(read_u32_be_at(&data, 0), Some(0x01020304));
        assert_eq!(read_u32_le_at(&data, 2), None);
        assert_eq!(read_u32_le_at(&data, usize::MAX), None);
    }

    #[test]
    fn test_memchr_null() {
        assert_eq!(memchr_null(b"hello\0world"), 5);
        assert_eq!(memchr_null(b"\0"), 0);
        assert_eq!(memchr_null(b"hello"), 5);
        assert_eq!(c_string(b"param.sfo\0junk"), "param.sfo");
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 8), 16);
        assert_eq!(align_up(0x1001, 0x4000), 0x4000);
        assert_eq!(align_up(5, 0), 5);
        assert_eq!(align_up(5, 1), 5);
        assert_eq!(align_up(7, 6), 12);
        assert_eq!(align_up(u64::MAX, 0x1000), u64::MAX);
    }

    #[test]
    fn test_clamp_chunk_size() {
        assert_eq!(clamp_chunk_size(1), MIN_CHUNK_SIZE);
        assert_eq!(clamp_chunk_size(0x8_0000), 0x8_0000);
        assert_eq!(clamp_chunk_size(usize::MAX), MAX_CHUNK_SIZE);
    }

    #[test]
    fn test_copy_range_small_buffer() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut src = Cursor::new(data.clone());
        let mut dst = Vec::new();
        let mut buf = [0u8; 7];
        let mut chunks = 0;

        copy_range(&mut src, 100, 500, &mut dst, &mut buf, |n| {
            assert!(n <= 7);
            chunks += 1;
        })
        .unwrap();
        assert_eq!(dst, &data[100..600]);
        assert_eq!(chunks, 500usize.div_ceil(7));
    }

    #[test]
    fn test_copy_range_past_end() {
        let mut src = Cursor::new(vec![0u8; 16]);
        let mut dst = Vec::new();
        let mut buf = [0u8; 8];

        let err = copy_range(&mut src, 8, 16, &mut dst, &mut buf, |_| {}).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_safe_relative_path() {
        assert_eq!(
            safe_relative_path("changeinfo/changeinfo.xml"),
            Some(PathBuf::from("changeinfo").join("changeinfo.xml"))
        );
        assert_eq!(safe_relative_path("./icon0.png"), Some(PathBuf::from("icon0.png")));
        assert_eq!(
            safe_relative_path("keymap_rp\\001.png"),
            Some(PathBuf::from("keymap_rp").join("001.png"))
        );
        assert_eq!(safe_relative_path(""), None);
        assert_eq!(safe_relative_path("/etc/passwd"), None);
        assert_eq!(safe_relative_path("../escape"), None);
        assert_eq!(safe_relative_path("a/../../b"), None);
    }
}
