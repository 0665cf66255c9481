//! PFS image context.
//!
//! Holds the open image, its header and the full inode table. File contents
//! are never loaded whole; they are streamed through a fixed-size buffer.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zerocopy::{FromBytes, FromZeros};

use super::structs::*;
use super::walk::{ImageStats, WalkMode, Walker};
use crate::error::{Error, Result};
use crate::util::clamp_chunk_size;

/// Largest block size accepted.
pub const MAX_BLOCK_SIZE: u32 = 0x100_0000;

/// Main context for working with a PFS image.
#[derive(Debug)]
pub struct PfsContext {
    file: File,
    /// Path to the image
    pub path: PathBuf,
    /// Parsed header
    pub header: PfsHeader,
    /// Inode table, indexed by inode number
    pub inodes: Vec<PfsInode>,
    file_size: u64,
}

impl PfsContext {
    /// Opens a PFS image and reads its header and inode table.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path).map_err(|e| Error::FileOpen {
            path: path.clone(),
            source: e,
        })?;
        let file_size = file.metadata().map_err(|e| Error::FileOpen {
            path: path.clone(),
            source: e,
        })?.len();

        let mut ctx = Self {
            file,
            path,
            header: PfsHeader::new_zeroed(),
            inodes: Vec::new(),
            file_size,
        };

        ctx.header = ctx.parse_header()?;
        ctx.inodes = ctx.read_inode_table()?;

        info!(
            "{}: {} inodes, block size {:#x}, super-root {}",
            ctx.path.display(),
            ctx.inodes.len(),
            ctx.header.blocksz.get(),
            ctx.header.superroot_ino.get()
        );

        Ok(ctx)
    }

    /// Parses the header and validates the block size.
    fn parse_header(&self) -> Result<PfsHeader> {
        if self.file_size < PfsHeader::SIZE as u64 {
            return Err(Error::buffer_too_small(PfsHeader::SIZE as u64, self.file_size));
        }

        let data = self.read_at(0, PfsHeader::SIZE)?;
        let header = PfsHeader::read_from_bytes(&data)
            .map_err(|_| Error::parse(0, "malformed PFS header"))?;

        if !header.is_valid() {
            warn!(
                "{}: unexpected PFS magic {:#x} (expected {:#x}), continuing",
                self.path.display(),
                header.magic.get(),
                PFS_MAGIC
            );
        }

        let block_size = header.blocksz.get();
        if block_size < PfsInode::SIZE as u32 || block_size > MAX_BLOCK_SIZE {
            return Err(Error::InvalidBlockSize {
                path: self.path.clone(),
                block_size,
            });
        }

        debug!("{}", header);
        Ok(header)
    }

    /// Reads `ndinode` inodes from the `ndinodeblock` blocks after block 0.
    fn read_inode_table(&self) -> Result<Vec<PfsInode>> {
        let per_block = self.header.inodes_per_block();
        let table_blocks = self.header.ndinodeblock.get();
        let count = self
            .header
            .ndinode
            .get()
            .min(table_blocks.saturating_mul(per_block));

        if count == 0 {
            return Ok(Vec::new());
        }

        // End of the last inode record that will be read
        let last = count - 1;
        let table_end = (last / per_block + 1)
            .checked_mul(self.header.block_size())
            .and_then(|v| v.checked_add((last % per_block + 1) * PfsInode::SIZE as u64));

        if !matches!(table_end, Some(end) if end <= self.file_size) {
            return Err(Error::InodeTableOverflow {
                path: self.path.clone(),
                blocks: table_blocks,
                block_size: self.header.blocksz.get(),
                file_size: self.file_size,
            });
        }

        let mut inodes = Vec::with_capacity(count as usize);
        let mut block = 1u64;
        while (inodes.len() as u64) < count {
            let n = per_block.min(count - inodes.len() as u64) as usize;
            let data = self.read_at(block * self.header.block_size(), n * PfsInode::SIZE)?;

            for chunk in data.chunks_exact(PfsInode::SIZE) {
                let inode = PfsInode::read_from_bytes(chunk)
                    .map_err(|_| Error::parse(block * self.header.block_size(), "malformed inode"))?;
                debug!("inode ino={} {}", inodes.len(), inode);
                inodes.push(inode);
            }
            block += 1;
        }

        Ok(inodes)
    }

    /// Reads exactly `len` bytes at `offset`.
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let read_err = |e: io::Error| Error::FileRead {
            path: self.path.clone(),
            offset,
            len: len as u64,
            source: e,
        };

        let mut reader = &self.file;
        reader.seek(SeekFrom::Start(offset)).map_err(read_err)?;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).map_err(read_err)?;
        Ok(buf)
    }

    /// Returns the image file for streaming reads.
    pub(crate) fn reader(&self) -> &File {
        &self.file
    }

    /// Returns the image size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Returns the number of whole blocks in the image.
    pub fn block_count(&self) -> u64 {
        self.file_size / self.header.block_size()
    }

    /// Looks up an inode by number.
    pub fn inode(&self, ino: u64) -> Result<&PfsInode> {
        usize::try_from(ino)
            .ok()
            .and_then(|i| self.inodes.get(i))
            .ok_or(Error::InodeOutOfRange {
                ino,
                count: self.inodes.len(),
            })
    }

    /// Reads one full block.
    pub fn read_block(&self, block: u64) -> Result<Vec<u8>> {
        let block_size = self.header.block_size();
        let offset = block
            .checked_mul(block_size)
            .ok_or_else(|| Error::parse(block, "block index overflows the image"))?;
        self.read_at(offset, block_size as usize)
    }

    /// Returns the `(offset, size)` of a file's contents.
    ///
    /// File data is stored contiguously from `db[0]`.
    pub fn file_data_range(&self, inode: &PfsInode) -> Result<(u64, u64)> {
        let offset = self.header.block_size() * inode.first_block() as u64;
        let size = inode.size();

        match offset.checked_add(size) {
            Some(end) if end <= self.file_size => Ok((offset, size)),
            _ => Err(Error::FileRead {
                path: self.path.clone(),
                offset,
                len: size,
                source: io::Error::from(io::ErrorKind::UnexpectedEof),
            }),
        }
    }

    /// Walks the image without writing anything.
    pub fn dry_run(&self) -> ImageStats {
        let stats = Walker::new(self, WalkMode::DryRun, 0, None)
            .run(self.header.superroot_ino.get(), Path::new(""));
        debug!("dry run: {:?}", stats);
        stats
    }

    /// Reproduces the directory tree and file contents below `dest`.
    ///
    /// `progress` is called with the number of bytes copied after every
    /// chunk. Per-entry failures are logged and counted in the returned
    /// stats.
    pub fn extract<P: AsRef<Path>>(
        &self,
        dest: P,
        chunk_size: usize,
        progress: Option<&mut dyn FnMut(u64)>,
    ) -> Result<ImageStats> {
        let dest = dest.as_ref();
        fs::create_dir_all(dest).map_err(|e| Error::CreateDir {
            path: dest.to_path_buf(),
            source: e,
        })?;

        let stats = Walker::new(self, WalkMode::Extract, clamp_chunk_size(chunk_size), progress)
            .run(self.header.superroot_ino.get(), dest);

        info!(
            "{}: {} files, {} directories, {} bytes ({} skipped, {} failed)",
            self.path.display(),
            stats.files,
            stats.directories,
            stats.bytes,
            stats.skipped,
            stats.failed
        );

        Ok(stats)
    }
}
