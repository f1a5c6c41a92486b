//! Leaf store classes.
//!
//! - `zero`: reads as zeros, discards writes
//! - `memory`: a shared in-memory object
//! - `file`: a regular file (or anything `std::fs::File` can open)
//!
//! [`standard_registry`] returns a registry with these and the core
//! composites, which is what the tools open names against.

mod file;
mod memory;
mod zero;

pub use file::{file_open, FileClass, FileResource, FILE_CLASS};
pub use memory::{memory_create, MemoryClass, MEMORY_CLASS};
pub use zero::{zero_create, ZeroClass, ZERO_CLASS};

use vstore_core::{ClassRegistry, Error, Result};

/// Core composites plus every class in this crate.
pub fn standard_registry() -> Result<ClassRegistry> {
    let mut classes = ClassRegistry::core();
    classes.register(&ZERO_CLASS)?;
    classes.register(&MEMORY_CLASS)?;
    classes.register(&FILE_CLASS)?;
    Ok(classes)
}

/// Parse a byte count, decimal or `0x` hex.
pub(crate) fn parse_size(s: &str) -> Result<u64> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    parsed.map_err(|_| Error::invalid(format!("bad size {:?}", s)))
}
