//! PKG archive context and extraction.
//!
//! The archive is memory-mapped once; headers and the entry table are parsed
//! up front and entry payloads are written straight from the mapping.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::{debug, info, warn};
use zerocopy::FromBytes;

use super::names::{resolve_names, NameTable, Resolution};
use super::structs::*;
use crate::error::{Error, Result};
use crate::util::safe_relative_path;

/// Metadata subdirectory that receives every resolved entry.
pub const SCE_SYS_DIR: &str = "sce_sys";

// =============================================================================
// Extraction Report
// =============================================================================

/// Summary of a package extraction.
#[derive(Debug, Default)]
pub struct PackageReport {
    /// Files written under `sce_sys/`
    pub written: Vec<PathBuf>,
    /// Entries without an output (tables, digests, signatures)
    pub skipped: usize,
    /// File entries for which no name could be resolved
    pub unnamed: usize,
    /// Entries that failed, with the reason
    pub failed: Vec<(usize, Error)>,
}

impl PackageReport {
    /// Returns true if every resolvable entry was written.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

// =============================================================================
// Pkg Context
// =============================================================================

/// Main context for working with a PKG archive.
#[derive(Debug)]
pub struct PkgContext {
    /// Archive file (memory-mapped)
    pub mmap: Mmap,
    /// Path to the archive
    pub path: PathBuf,
    /// Parsed main header
    pub header: PkgMainHeader,
    /// Parsed content header (absent if the archive is too short)
    pub content_header: Option<PkgContentHeader>,
    /// Entry table in file order
    pub entries: Vec<PkgEntry>,
}

impl PkgContext {
    /// Opens a PKG archive and parses its headers and entry table.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path).map_err(|e| Error::FileOpen {
            path: path.clone(),
            source: e,
        })?;

        // SAFETY: the archive is opened read-only and treated as immutable for
        // the lifetime of the context.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::MemoryMap {
            path: path.clone(),
            source: e,
        })?;

        let header = Self::parse_header(&mmap, &path)?;
        let content_header = Self::parse_content_header(&mmap);
        let entries = Self::parse_entries(&mmap, &header, &path)?;

        info!(
            "{}: {} entries, table at {:#x}, content id {}",
            path.display(),
            entries.len(),
            header.file_table_offset.get(),
            header.content_id()
        );

        Ok(Self {
            mmap,
            path,
            header,
            content_header,
            entries,
        })
    }

    /// Parses and validates the main header.
    fn parse_header(data: &[u8], path: &Path) -> Result<PkgMainHeader> {
        let header = PkgMainHeader::read_from_prefix(data)
            .map_err(|_| Error::buffer_too_small(PkgMainHeader::SIZE as u64, data.len() as u64))?
            .0;

        if !header.is_valid() {
            return Err(Error::InvalidPkgMagic {
                path: path.to_path_buf(),
                expected: PKG_MAGIC,
                actual: header.magic.get(),
            });
        }

        debug!("{}", header);
        Ok(header)
    }

    /// Parses the content header. Missing data is not an error.
    fn parse_content_header(data: &[u8]) -> Option<PkgContentHeader> {
        let start = PKG_CONTENT_HEADER_OFFSET as usize;
        let header = data
            .get(start..)
            .and_then(|rest| PkgContentHeader::read_from_prefix(rest).ok())
            .map(|(h, _)| h);

        match &header {
            Some(h) => debug!(
                "content offset {:#x}, content size {:#x}",
                h.content_offset.get(),
                h.content_size.get()
            ),
            None => debug!("no content header at {:#x}", start),
        }
        header
    }

    /// Reads `table_entries_num` records contiguously from the table offset.
    fn parse_entries(data: &[u8], header: &PkgMainHeader, path: &Path) -> Result<Vec<PkgEntry>> {
        let offset = header.file_table_offset.get() as usize;
        let count = header.table_entries_num.get() as usize;
        let table_size = count * PkgTableEntry::SIZE;

        let table = offset
            .checked_add(table_size)
            .and_then(|end| data.get(offset..end))
            .ok_or_else(|| Error::EntryTableOverflow {
                path: path.to_path_buf(),
                offset: offset as u64,
                count,
                file_size: data.len() as u64,
            })?;

        let entries: Vec<PkgEntry> = table
            .chunks_exact(PkgTableEntry::SIZE)
            .enumerate()
            .filter_map(|(i, chunk)| {
                PkgTableEntry::read_from_bytes(chunk)
                    .ok()
                    .map(|raw| PkgEntry::from_raw(i, &raw))
            })
            .collect();

        for entry in &entries {
            debug!("{}", entry);
        }

        Ok(entries)
    }

    /// Returns the archive size in bytes.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Returns the data of an entry.
    pub fn entry_data(&self, entry: &PkgEntry) -> Result<&[u8]> {
        let out_of_bounds = || Error::EntryOutOfBounds {
            index: entry.index,
            entry_type: entry.entry_type,
            offset: entry.offset,
            size: entry.size,
            file_size: self.file_size(),
        };

        let start = usize::try_from(entry.offset).map_err(|_| out_of_bounds())?;
        let end = usize::try_from(entry.end()).map_err(|_| out_of_bounds())?;
        self.mmap.get(start..end).ok_or_else(out_of_bounds)
    }

    /// Collects the names of every name-table entry, in table order.
    ///
    /// A name-table entry with a size of 0 is read up to the end of the file.
    pub fn name_table(&self) -> NameTable {
        let mut table = NameTable::new();

        for entry in self.entries.iter().filter(|e| e.is_name_table()) {
            let start = entry.offset as usize;
            let data = if entry.size == 0 {
                self.mmap.get(start..)
            } else {
                let end = (entry.end() as usize).min(self.mmap.len());
                self.mmap.get(start..end)
            };

            match data {
                Some(data) => {
                    let before = table.len();
                    table.extend_from_entry(data);
                    debug!(
                        "name table entry #{}: {} names",
                        entry.index,
                        table.len() - before
                    );
                }
                None => warn!(
                    "{}: name table entry #{} at {:#x} is outside the archive",
                    self.path.display(),
                    entry.index,
                    entry.offset
                ),
            }
        }

        table
    }

    /// Resolves an output name for every entry, in table order.
    pub fn resolve(&self) -> Vec<(&PkgEntry, Resolution)> {
        let names = self.name_table();
        let resolved = resolve_names(&self.entries, &names);
        self.entries.iter().zip(resolved).collect()
    }

    /// Extracts every named entry to `dest/sce_sys/<name>`.
    ///
    /// Per-entry failures are logged and collected in the report; only a
    /// failure to create `dest` itself is returned as an error.
    pub fn extract<P: AsRef<Path>>(&self, dest: P) -> Result<PackageReport> {
        let sys_dir = dest.as_ref().join(SCE_SYS_DIR);
        fs::create_dir_all(&sys_dir).map_err(|e| Error::CreateDir {
            path: sys_dir.clone(),
            source: e,
        })?;

        let mut report = PackageReport::default();

        for (entry, resolution) in self.resolve() {
            let name = match resolution {
                Resolution::Named { name, .. } => name,
                Resolution::Skipped => {
                    report.skipped += 1;
                    continue;
                }
                Resolution::Unnamed => {
                    warn!(
                        "{}: file entry #{} (type {:#06x}) has no name, skipping",
                        self.path.display(),
                        entry.index,
                        entry.entry_type
                    );
                    report.unnamed += 1;
                    continue;
                }
            };

            match self.write_entry(entry, &name, &sys_dir) {
                Ok(path) => {
                    debug!("{} -> {}", entry, path.display());
                    report.written.push(path);
                }
                Err(e) if e.is_recoverable() => {
                    warn!("{}: entry #{} ({}): {}", self.path.display(), entry.index, name, e);
                    report.failed.push((entry.index, e));
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "{}: wrote {} files ({} skipped, {} unnamed, {} failed)",
            self.path.display(),
            report.written.len(),
            report.skipped,
            report.unnamed,
            report.failed.len()
        );

        Ok(report)
    }

    /// Writes one entry below `sys_dir`, replacing any existing file.
    fn write_entry(&self, entry: &PkgEntry, name: &str, sys_dir: &Path) -> Result<PathBuf> {
        let relative = safe_relative_path(name).ok_or_else(|| Error::UnsafeName {
            name: name.to_string(),
        })?;
        let data = self.entry_data(entry)?;
        let out_path = sys_dir.join(relative);

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        fs::write(&out_path, data).map_err(|e| Error::FileWrite {
            path: out_path.clone(),
            source: e,
        })?;

        Ok(out_path)
    }
}
