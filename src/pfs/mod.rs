//! PFS filesystem image parsing.
//!
//! A PFS image is a flat array of fixed-size blocks: the header in block 0,
//! the inode table after it, and directory and file data elsewhere. The
//! directory graph is walked from the super-root inode.

mod context;
mod structs;
mod walk;

pub use context::*;
pub use structs::*;
pub use walk::{DirRecord, DirentIter, ImageStats, WalkMode};
