//! Error types for the extent layer.
//!
//! Errors at this level are purely about address arithmetic. Backend and
//! lifecycle failures belong in higher layers.

use thiserror::Error;

use crate::Run;

/// Errors produced while validating or translating run lists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtentError {
    /// A run has a negative length or a start below the hole sentinel.
    #[error("invalid run #{index}: start {} length {}", run.start, run.length)]
    InvalidRun { index: usize, run: Run },

    /// The block size is not a power of two, or is zero with runs present.
    #[error("invalid block size: {0}")]
    InvalidBlockSize(u32),

    /// An address lies outside the logical address space.
    #[error("address {addr} out of range (end {end})")]
    OutOfRange { addr: i64, end: i64 },

    /// A requested data run maps onto a hole of the base run list.
    #[error("requested run #{index} references a hole")]
    HoleReference { index: usize },

    /// A requested run extends past the end of the base run list.
    #[error("requested run #{index} extends past the end of the base runs")]
    BeyondEnd { index: usize },

    /// A requested run crosses the first period of a repeating run list.
    #[error("requested run #{index} spans a wrap boundary at block {wrap_src}")]
    SpansWrap { index: usize, wrap_src: i64 },

    /// Size arithmetic overflowed.
    #[error("extent size overflow")]
    Overflow,
}
