//! SELF container parsing.
//!
//! A SELF wraps an ELF image: a small header, one descriptor per stored
//! segment, then the ELF header and program headers. Segment contents may be
//! encrypted; plaintext is obtained through a [`SegmentDecryptor`].

mod context;
mod decrypt;
mod structs;

pub use context::*;
pub use decrypt::*;
pub use structs::*;

#[cfg(test)]
pub(crate) use context::tests as test_support;
