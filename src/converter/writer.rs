//! File writer for the rebuilt ELF.

use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::self_file::SegmentDecryptor;

use super::{ConversionContext, WriteProcedure, WriteSource};

/// Executes the write procedures and returns the size of the output file.
///
/// Decrypted segments are requested in chunks of at most `ctx.chunk_size`
/// bytes. Zero padding up to each segment's aligned size is produced by
/// extending the file, never by overwriting bytes already written. If a
/// segment lands inside the header region the headers are written again at
/// the end.
pub fn write_elf<P: AsRef<Path>>(
    ctx: &ConversionContext,
    procedures: &[WriteProcedure],
    decryptor: &mut dyn SegmentDecryptor,
    output_path: P,
) -> Result<u64> {
    let path = output_path.as_ref();
    let write_err = |e: std::io::Error| Error::FileWrite {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::CreateDir {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let mut file = File::create(path).map_err(write_err)?;
    let header = ctx.source.output_header();
    let header_end = header.len() as u64;

    let mut written_end = 0u64;
    let mut padded_end = 0u64;
    let mut restamp = false;

    for proc in procedures {
        file.seek(SeekFrom::Start(proc.write_offset)).map_err(write_err)?;

        match proc.source {
            WriteSource::Header => {
                file.write_all(&header).map_err(write_err)?;
            }
            WriteSource::Decrypted { segment } => {
                write_decrypted(ctx, &mut file, decryptor, segment, proc.size)
                    .map_err(|e| match e {
                        Error::Io(io) => write_err(io),
                        other => other,
                    })?;
                restamp |= proc.write_offset < header_end;
            }
            WriteSource::ContainerTail { segment } => {
                let start = proc.read_offset as usize;
                let data = ctx
                    .source
                    .mmap
                    .get(start..start.saturating_add(proc.size as usize))
                    .ok_or(Error::MetadataOutOfBounds {
                        segment,
                        size: proc.size,
                        file_size: ctx.source.file_size(),
                    })?;
                for chunk in data.chunks(ctx.chunk_size.max(1)) {
                    file.write_all(chunk).map_err(write_err)?;
                }
                restamp |= proc.write_offset < header_end;
            }
        }

        written_end = written_end.max(proc.end());
        padded_end = padded_end.max(proc.padded_end());
    }

    if restamp {
        ctx.warn("segment overlaps the ELF headers, rewriting headers");
        file.seek(SeekFrom::Start(0)).map_err(write_err)?;
        file.write_all(&header).map_err(write_err)?;
    }

    let output_size = written_end.max(padded_end);
    if padded_end > written_end {
        file.set_len(output_size).map_err(write_err)?;
    }

    file.flush().map_err(write_err)?;
    ctx.info(&format!("wrote {:#x} bytes to {}", output_size, path.display()));

    Ok(output_size)
}

/// Streams `[0, size)` of a program segment from the decryptor into `out`.
fn write_decrypted(
    ctx: &ConversionContext,
    out: &mut File,
    decryptor: &mut dyn SegmentDecryptor,
    segment: u32,
    size: u64,
) -> Result<()> {
    let chunk_size = ctx.chunk_size.max(1) as u64;
    let mut offset = 0u64;

    while offset < size {
        let len = (size - offset).min(chunk_size) as usize;
        let data = decryptor
            .decrypt_range(segment, offset, len)
            .map_err(|e| Error::Decryption {
                segment,
                offset,
                len,
                source: e,
            })?;

        if data.len() != len {
            return Err(Error::ShortDecryption {
                segment,
                offset,
                expected: len,
                actual: data.len(),
            });
        }

        out.write_all(&data)?;
        offset += len as u64;
    }

    Ok(())
}
