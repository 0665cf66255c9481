//! ELF64 header and program header records.

mod constants;
mod structs;

pub use constants::*;
pub use structs::*;
