//! PKG archive parsing.
//!
//! A PKG starts with a big-endian main header pointing at a table of 0x20-byte
//! entries. Metadata entries are written to `sce_sys/` under fixed names or
//! under names taken from the archive's name table.

mod context;
mod names;
mod structs;

pub use context::*;
pub use names::*;
pub use structs::*;
