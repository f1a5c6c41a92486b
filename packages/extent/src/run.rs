//! The run: one `(start, length)` extent.

use serde::{Deserialize, Serialize};

use crate::ExtentError;

/// Start value marking a hole.
pub const HOLE: i64 = -1;

/// A contiguous extent of blocks.
///
/// `start` is the backend-relative block address; `-1` marks a hole, which
/// occupies logical address space without any backing storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Run {
    pub start: i64,
    pub length: i64,
}

impl Run {
    /// A data run.
    pub const fn new(start: i64, length: i64) -> Self {
        Self { start, length }
    }

    /// A hole of `length` blocks.
    pub const fn hole(length: i64) -> Self {
        Self {
            start: HOLE,
            length,
        }
    }

    pub fn is_hole(&self) -> bool {
        self.start == HOLE
    }

    /// One past the last backend block covered by a data run.
    pub fn end(&self) -> i64 {
        self.start + self.length
    }
}

impl std::fmt::Display for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_hole() {
            write!(f, "hole+{}", self.length)
        } else {
            write!(f, "{}+{}", self.start, self.length)
        }
    }
}

/// Check that every run has a non-negative length and a start that is
/// either a real address or the hole sentinel.
pub fn validate_runs(runs: &[Run]) -> Result<(), ExtentError> {
    for (index, run) in runs.iter().enumerate() {
        if run.length < 0 || run.start < HOLE {
            return Err(ExtentError::InvalidRun { index, run: *run });
        }
        if !run.is_hole() && run.start.checked_add(run.length).is_none() {
            return Err(ExtentError::Overflow);
        }
    }
    Ok(())
}

/// Sum of all run lengths, holes included (the `wrap_src` of a run list).
pub fn total_length(runs: &[Run]) -> i64 {
    runs.iter().map(|r| r.length).sum()
}
