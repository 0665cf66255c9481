//! Segment decryption capability.
//!
//! Plaintext for encrypted segments comes from the host environment; the
//! converter only ever asks for byte ranges of a program segment by index.

use std::io;

use super::context::SelfContext;

/// Source of plaintext for the program segments of one SELF.
///
/// Implementations must accept repeated requests for disjoint sub-ranges of
/// the same segment and return the same bytes for the same request.
pub trait SegmentDecryptor {
    /// Returns `len` plaintext bytes starting at `offset` within program
    /// segment `segment`.
    fn decrypt_range(&mut self, segment: u32, offset: u64, len: usize) -> io::Result<Vec<u8>>;
}

impl<F> SegmentDecryptor for F
where
    F: FnMut(u32, u64, usize) -> io::Result<Vec<u8>>,
{
    fn decrypt_range(&mut self, segment: u32, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        self(segment, offset, len)
    }
}

/// Serves segments that are stored in the clear.
///
/// Program segment `i` is read from the descriptor whose id is `i`.
/// Encrypted or compressed descriptors are refused: this reader never
/// decrypts anything.
#[derive(Debug)]
pub struct PlaintextSegmentReader<'a> {
    ctx: &'a SelfContext,
}

impl<'a> PlaintextSegmentReader<'a> {
    /// Creates a reader over an open container.
    pub fn new(ctx: &'a SelfContext) -> Self {
        Self { ctx }
    }
}

impl SegmentDecryptor for PlaintextSegmentReader<'_> {
    fn decrypt_range(&mut self, segment: u32, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let entry = self.ctx.segment_for_phdr(segment).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no segment descriptor for program segment {}", segment),
            )
        })?;

        if entry.is_encrypted() || entry.is_compressed() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("segment {} is stored encrypted or compressed", segment),
            ));
        }

        let end = offset
            .checked_add(len as u64)
            .filter(|&end| end <= entry.encrypted_size.get())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "range {:#x}+{:#x} exceeds stored size {:#x} of segment {}",
                        offset,
                        len,
                        entry.encrypted_size.get(),
                        segment
                    ),
                )
            })?;

        let start = entry.offset.get().saturating_add(offset);
        let stop = entry.offset.get().saturating_add(end);
        self.ctx
            .mmap
            .get(start as usize..stop as usize)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("segment {} data at {:#x} is outside the container", segment, start),
                )
            })
    }
}
