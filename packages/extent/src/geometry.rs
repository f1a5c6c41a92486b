//! Derived size fields of a run list.
//!
//! Block counts, byte sizes and the log2 shifts are never maintained by
//! hand. They are recomputed from `(runs, block_size, end)` by [`derive`]
//! whenever one of those inputs changes.

use crate::{ExtentError, Run};

/// Page size used for `log2_blocks_per_page`.
pub const PAGE_SIZE: u64 = 4096;

/// Everything that follows from a run list, a block size and an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    /// Logical length in blocks.
    pub end: i64,
    /// Sum of all run lengths, holes included.
    pub wrap_src: i64,
    /// Backed (non-hole) blocks across the whole logical length.
    pub blocks: i64,
    /// `end * block_size`.
    pub size: u64,
    pub log2_block_size: u32,
    pub log2_blocks_per_page: u32,
}

fn checked_sum<'a>(mut runs: impl Iterator<Item = &'a Run>) -> Result<i64, ExtentError> {
    runs.try_fold(0i64, |acc, r| acc.checked_add(r.length))
        .ok_or(ExtentError::Overflow)
}

/// Compute the derived fields.
///
/// An `end` of zero means "unset" and becomes `wrap_src`. When `end` is
/// larger than `wrap_src` the runs repeat; `blocks` then counts every full
/// iteration plus the backed part of the final partial one.
pub fn derive(runs: &[Run], block_size: u32, end: i64) -> Result<Geometry, ExtentError> {
    if block_size == 0 {
        if !runs.is_empty() {
            return Err(ExtentError::InvalidBlockSize(block_size));
        }
    } else if !block_size.is_power_of_two() {
        return Err(ExtentError::InvalidBlockSize(block_size));
    }

    let wrap_src = checked_sum(runs.iter())?;
    let end = if end == 0 || wrap_src == 0 {
        wrap_src
    } else {
        end
    };

    let data_per_iteration = checked_sum(runs.iter().filter(|r| !r.is_hole()))?;

    let blocks = if wrap_src == 0 {
        0
    } else {
        let iterations = end / wrap_src;
        let mut blocks = data_per_iteration
            .checked_mul(iterations)
            .ok_or(ExtentError::Overflow)?;
        let mut pos = iterations * wrap_src;
        for run in runs {
            if pos >= end {
                break;
            }
            if !run.is_hole() {
                blocks += run.length.min(end - pos);
            }
            pos = pos.saturating_add(run.length);
        }
        blocks
    };

    let size = (end as u64)
        .checked_mul(u64::from(block_size))
        .ok_or(ExtentError::Overflow)?;

    let (log2_block_size, log2_blocks_per_page) = if block_size == 0 {
        (0, 0)
    } else {
        let bs = u64::from(block_size);
        let per_page = if bs < PAGE_SIZE {
            (PAGE_SIZE / bs).trailing_zeros()
        } else {
            0
        };
        (block_size.trailing_zeros(), per_page)
    };

    Ok(Geometry {
        end,
        wrap_src,
        blocks,
        size,
        log2_block_size,
        log2_blocks_per_page,
    })
}
