//! Directory walk over the inode graph.
//!
//! The same traversal drives both the dry run (counting only) and the real
//! extraction, so the two always agree on what the image contains.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use zerocopy::FromBytes;

use super::context::PfsContext;
use super::structs::*;
use crate::error::{Error, Result};
use crate::util::{copy_range, safe_relative_path};

/// What the walker does with the files it finds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkMode {
    /// Traverse and count, write nothing.
    DryRun,
    /// Create directories and copy file contents.
    Extract,
}

/// Totals gathered by a walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageStats {
    /// Regular files
    pub files: u64,
    /// Directories below the destination root
    pub directories: u64,
    /// Bytes of file content
    pub bytes: u64,
    /// Records ignored (root-level files, unknown types, bad records, revisited directories)
    pub skipped: u64,
    /// Entries that could not be produced
    pub failed: u64,
}

// =============================================================================
// Directory Records
// =============================================================================

/// A decoded directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirRecord {
    /// Absolute image offset of the record
    pub offset: u64,
    /// Target inode
    pub ino: u32,
    /// Record type
    pub entry_type: u32,
    /// Declared record size
    pub entsize: u32,
    /// Name bytes, lossily decoded
    pub name: String,
}

/// Iterates the records of one directory block.
///
/// Stops at a terminator record or at the end of the block. A record whose
/// `entsize` cannot be trusted yields an error and ends the iteration.
pub struct DirentIter<'a> {
    block: &'a [u8],
    base: u64,
    pos: usize,
    done: bool,
}

impl<'a> DirentIter<'a> {
    /// Creates an iterator over `block`, located at `base` in the image.
    pub fn new(block: &'a [u8], base: u64) -> Self {
        Self {
            block,
            base,
            pos: 0,
            done: false,
        }
    }

    fn invalid(&mut self, reason: String) -> Option<Result<DirRecord>> {
        self.done = true;
        Some(Err(Error::InvalidDirent {
            offset: self.base + self.pos as u64,
            reason,
        }))
    }
}

impl Iterator for DirentIter<'_> {
    type Item = Result<DirRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let rest = self.block.get(self.pos..)?;
        let Ok((dirent, _)) = PfsDirent::read_from_prefix(rest) else {
            self.done = true;
            return None;
        };

        let entry_type = dirent.entry_type.get();
        if entry_type == DIRENT_TYPE_TERMINATOR {
            self.done = true;
            return None;
        }

        let entsize = dirent.entsize.get() as usize;
        let namelen = dirent.namelen.get() as usize;

        if entsize == 0 {
            return self.invalid("entsize is zero".into());
        }
        if entsize < PfsDirent::SIZE + namelen {
            return self.invalid(format!(
                "entsize {:#x} smaller than record with {:#x}-byte name",
                entsize, namelen
            ));
        }
        let Some(name) = rest.get(PfsDirent::SIZE..PfsDirent::SIZE + namelen) else {
            return self.invalid(format!("{:#x}-byte name runs past the block end", namelen));
        };

        let record = DirRecord {
            offset: self.base + self.pos as u64,
            ino: dirent.ino.get(),
            entry_type,
            entsize: entsize as u32,
            name: String::from_utf8_lossy(name).into_owned(),
        };
        self.pos += entsize;
        Some(Ok(record))
    }
}

// =============================================================================
// Walker
// =============================================================================

/// Depth-first walker over the directory graph.
pub(crate) struct Walker<'a, 'p> {
    ctx: &'a PfsContext,
    mode: WalkMode,
    buf: Vec<u8>,
    progress: Option<&'p mut dyn FnMut(u64)>,
    visited: HashSet<u64>,
    stats: ImageStats,
}

impl<'a, 'p> Walker<'a, 'p> {
    /// Creates a walker. `chunk_size` bounds the copy buffer.
    pub(crate) fn new(
        ctx: &'a PfsContext,
        mode: WalkMode,
        chunk_size: usize,
        progress: Option<&'p mut dyn FnMut(u64)>,
    ) -> Self {
        let buf = match mode {
            WalkMode::DryRun => Vec::new(),
            WalkMode::Extract => vec![0u8; chunk_size],
        };
        Self {
            ctx,
            mode,
            buf,
            progress,
            visited: HashSet::new(),
            stats: ImageStats::default(),
        }
    }

    /// Walks from `root` into `dest` and returns the totals.
    pub(crate) fn run(mut self, root: u64, dest: &Path) -> ImageStats {
        self.walk_dir(root, 0, dest);
        self.stats
    }

    /// Walks a directory inode. Every directory has exactly one parent, so
    /// an inode reached a second time is skipped.
    fn walk_dir(&mut self, ino: u64, level: u32, path: &Path) {
        if !self.visited.insert(ino) {
            warn!("{}: {}", path.display(), Error::DirectoryCycle { ino });
            self.stats.skipped += 1;
            return;
        }

        let inode = match self.ctx.inode(ino) {
            Ok(inode) => *inode,
            Err(e) => {
                warn!("{}: {}", path.display(), e);
                self.stats.skipped += 1;
                return;
            }
        };
        debug!("dir ino={} level={} {}", ino, level, inode);

        let claimed = inode.block_list();
        let blocks = claimed.clamp_to(self.ctx.block_count());
        if blocks.len() < claimed.len() {
            warn!(
                "{}: directory inode {} claims {} blocks, only {} lie inside the image",
                path.display(),
                ino,
                claimed.len(),
                blocks.len()
            );
            self.stats.failed += 1;
        }

        for block in blocks.iter() {
            self.scan_block(block, level, path);
        }
    }

    fn scan_block(&mut self, block: u64, level: u32, path: &Path) {
        let data = match self.ctx.read_block(block) {
            Ok(data) => data,
            Err(e) => {
                warn!("{}: {}", path.display(), e);
                self.stats.failed += 1;
                return;
            }
        };

        let base = block * self.ctx.header.block_size();
        for record in DirentIter::new(&data, base) {
            match record {
                Ok(record) => self.visit(&record, level, path),
                Err(e) => {
                    warn!("{}: {}, skipping rest of block", path.display(), e);
                    self.stats.skipped += 1;
                }
            }
        }
    }

    fn visit(&mut self, record: &DirRecord, level: u32, path: &Path) {
        debug!(
            "dent ino={} type={} pos={:#x} name={}",
            record.ino, record.entry_type, record.offset, record.name
        );

        match record.entry_type {
            DIRENT_TYPE_FILE if level == 0 => {
                self.stats.skipped += 1;
            }
            DIRENT_TYPE_FILE => {
                if let Some(out) = self.child_path(path, &record.name) {
                    self.visit_file(record.ino as u64, &out);
                }
            }
            // Root-level directories carry no name and map onto the destination itself
            DIRENT_TYPE_DIRECTORY if level == 0 => {
                self.walk_dir(record.ino as u64, level + 1, path);
            }
            DIRENT_TYPE_DIRECTORY if self.visited.contains(&(record.ino as u64)) => {
                warn!(
                    "{}: {}, skipping '{}'",
                    path.display(),
                    Error::DirectoryCycle { ino: record.ino as u64 },
                    record.name
                );
                self.stats.skipped += 1;
            }
            DIRENT_TYPE_DIRECTORY => {
                let Some(out) = self.child_path(path, &record.name) else {
                    return;
                };
                if self.mode == WalkMode::Extract {
                    if let Err(e) = fs::create_dir_all(&out) {
                        warn!("{}", Error::CreateDir { path: out, source: e });
                        self.stats.failed += 1;
                        return;
                    }
                }
                self.stats.directories += 1;
                self.walk_dir(record.ino as u64, level + 1, &out);
            }
            DIRENT_TYPE_DOT | DIRENT_TYPE_DOTDOT => {}
            other => {
                debug!("ignoring record type {} at {:#x}", other, record.offset);
                self.stats.skipped += 1;
            }
        }
    }

    /// Joins a single-component name onto `path`, refusing anything else.
    fn child_path(&mut self, path: &Path, name: &str) -> Option<PathBuf> {
        match safe_relative_path(name).filter(|p| p.components().count() == 1) {
            Some(rel) => Some(path.join(rel)),
            None => {
                warn!("{}: {}", path.display(), Error::UnsafeName { name: name.to_string() });
                self.stats.failed += 1;
                None
            }
        }
    }

    fn visit_file(&mut self, ino: u64, out: &Path) {
        let inode = match self.ctx.inode(ino) {
            Ok(inode) => *inode,
            Err(e) => {
                warn!("{}: {}", out.display(), e);
                self.stats.skipped += 1;
                return;
            }
        };

        let result = self.ctx.file_data_range(&inode).and_then(|(offset, size)| {
            debug!("file pos={:#x} size={:#x} dest={}", offset, size, out.display());
            match self.mode {
                WalkMode::DryRun => Ok(size),
                WalkMode::Extract => self.copy_file(offset, size, out).map(|_| size),
            }
        });

        match result {
            Ok(size) => {
                self.stats.files += 1;
                self.stats.bytes += size;
            }
            Err(e) => {
                warn!("{}: {}", out.display(), e);
                self.stats.failed += 1;
            }
        }
    }

    fn copy_file(&mut self, offset: u64, size: u64, out: &Path) -> Result<()> {
        let write_err = |e: io::Error| Error::FileWrite {
            path: out.to_path_buf(),
            source: e,
        };

        let mut dst = File::create(out).map_err(write_err)?;
        let mut src = self.ctx.reader();
        let progress = &mut self.progress;

        copy_range(&mut src, offset, size, &mut dst, &mut self.buf, |n| {
            if let Some(cb) = progress.as_mut() {
                cb(n);
            }
        })
        .map_err(write_err)
    }
}
