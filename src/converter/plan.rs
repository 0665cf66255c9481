//! Segment classification.
//!
//! Decides which program segments are copied into the rebuilt ELF and where
//! their bytes come from.

use crate::elf::{segment_type_name, Elf64Header, Elf64Phdr, PT_SCE_VERSION};
use crate::error::{Error, Result};
use crate::util::align_up;

use super::{ConversionContext, WriteProcedure};

/// A program segment selected for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPlan {
    /// Program header index
    pub index: u32,
    /// Segment type
    pub p_type: u32,
    /// Offset in the output file
    pub file_offset: u64,
    /// Number of content bytes
    pub file_size: u64,
    /// Size rounded up to the segment alignment
    pub buf_size: u64,
    /// Whether the bytes must come from the decryptor
    pub encrypted: bool,
}

/// Returns true for the version/signature segment stored at the end of the
/// container.
#[inline]
pub fn is_metadata_segment(p_type: u32) -> bool {
    p_type == PT_SCE_VERSION
}

/// Returns true if segment `index` lies entirely within another non-empty
/// content segment.
///
/// Of two segments with identical ranges, the lower index is kept.
pub fn is_subsumed(phdrs: &[Elf64Phdr], index: usize) -> bool {
    let Some(phdr) = phdrs.get(index) else {
        return false;
    };

    phdrs.iter().enumerate().any(|(j, other)| {
        if j == index || other.p_filesz.get() == 0 || is_metadata_segment(other.p_type.get()) {
            return false;
        }
        if !phdr.is_within(other) {
            return false;
        }
        let identical = phdr.p_offset.get() == other.p_offset.get() && phdr.file_end() == other.file_end();
        !identical || j < index
    })
}

/// Selects the segments to write, in program header order.
///
/// Empty segments are dropped. Subsumed segments are dropped unless they are
/// the metadata segment, which is always kept and never encrypted.
pub fn plan_segments(phdrs: &[Elf64Phdr]) -> Vec<SegmentPlan> {
    phdrs
        .iter()
        .enumerate()
        .filter(|(i, phdr)| {
            phdr.p_filesz.get() > 0
                && (is_metadata_segment(phdr.p_type.get()) || !is_subsumed(phdrs, *i))
        })
        .map(|(i, phdr)| {
            let p_type = phdr.p_type.get();
            SegmentPlan {
                index: i as u32,
                p_type,
                file_offset: phdr.p_offset.get(),
                file_size: phdr.p_filesz.get(),
                buf_size: align_up(phdr.p_filesz.get(), phdr.p_align.get()),
                encrypted: !is_metadata_segment(p_type),
            }
        })
        .collect()
}

/// Turns the selected segments into write procedures, headers first.
pub fn build_procedures(ctx: &ConversionContext, plans: &[SegmentPlan]) -> Result<Vec<WriteProcedure>> {
    let source = ctx.source;
    let header_size = (Elf64Header::SIZE + source.phdrs.len() * Elf64Phdr::SIZE) as u64;

    let mut procedures = Vec::with_capacity(plans.len() + 1);
    procedures.push(WriteProcedure::from_header(header_size));

    for plan in plans {
        ctx.info(&format!(
            "segment {} ({}): offset {:#x} size {:#x} bufsz {:#x}{}",
            plan.index,
            segment_type_name(plan.p_type),
            plan.file_offset,
            plan.file_size,
            plan.buf_size,
            if plan.encrypted { "" } else { " [tail]" }
        ));

        if plan.encrypted {
            procedures.push(WriteProcedure::from_decrypted(
                plan.index,
                plan.file_offset,
                plan.file_size,
                plan.buf_size,
            ));
        } else {
            let read_offset = source
                .file_size()
                .checked_sub(plan.file_size)
                .ok_or(Error::MetadataOutOfBounds {
                    segment: plan.index,
                    size: plan.file_size,
                    file_size: source.file_size(),
                })?;
            procedures.push(WriteProcedure::from_tail(
                plan.index,
                plan.file_offset,
                read_offset,
                plan.file_size,
            ));
        }
    }

    Ok(procedures)
}
