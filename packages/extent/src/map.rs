//! Locating runs by logical address, with wraparound.

use crate::{ExtentError, Run};

/// A read-only view of a run list together with its wrap parameters.
///
/// `end` is the logical length in blocks, `wrap_src` the summed length of
/// the runs, and `wrap_dst` the backend address offset added for each
/// repetition of the list.
#[derive(Debug, Clone, Copy)]
pub struct RunMap<'a> {
    runs: &'a [Run],
    end: i64,
    wrap_src: i64,
    wrap_dst: i64,
}

/// Position of a logical address within a run list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunCursor {
    /// Index of the current run in the list.
    pub index: usize,
    /// The current run.
    pub run: Run,
    /// Backend address offset of the current iteration.
    pub base: i64,
    /// Block offset of the cursor within the current run.
    pub offset: i64,
    /// Logical block at which the current run starts.
    logical: i64,
    /// Logical end of the address space.
    limit: i64,
}

impl RunCursor {
    pub fn is_hole(&self) -> bool {
        self.run.is_hole()
    }

    /// Backend-relative block address at the cursor.
    pub fn address(&self) -> i64 {
        self.base + self.run.start + self.offset
    }

    /// Blocks available from the cursor to the end of the current run,
    /// clipped at the logical end of the address space.
    pub fn remaining(&self) -> i64 {
        let in_run = self.run.length - self.offset;
        let to_end = self.limit - (self.logical + self.offset);
        in_run.min(to_end).max(0)
    }

    /// Logical block address at the cursor.
    pub fn logical_address(&self) -> i64 {
        self.logical + self.offset
    }
}

impl<'a> RunMap<'a> {
    pub fn new(runs: &'a [Run], end: i64, wrap_src: i64, wrap_dst: i64) -> Self {
        Self {
            runs,
            end,
            wrap_src,
            wrap_dst,
        }
    }

    pub fn runs(&self) -> &'a [Run] {
        self.runs
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    /// True if the run list repeats to reach `end`.
    pub fn is_wrapped(&self) -> bool {
        self.wrap_src > 0 && self.wrap_src < self.end
    }

    /// Find the run containing logical block `addr`.
    ///
    /// In a repeating list, the iteration containing `addr` determines the
    /// cursor's `base` (iteration * `wrap_dst`). The scan over the runs of
    /// one iteration is linear.
    pub fn find_first_run(&self, addr: i64) -> Result<RunCursor, ExtentError> {
        if addr < 0 || addr >= self.end {
            return Err(ExtentError::OutOfRange {
                addr,
                end: self.end,
            });
        }

        let iteration = if addr >= self.wrap_src && self.wrap_src > 0 {
            addr / self.wrap_src
        } else {
            0
        };
        let base = iteration * self.wrap_dst;
        let mut logical = iteration * self.wrap_src;
        let mut rel = addr - logical;

        for (index, run) in self.runs.iter().enumerate() {
            if run.length > rel {
                return Ok(RunCursor {
                    index,
                    run: *run,
                    base,
                    offset: rel,
                    logical,
                    limit: self.end,
                });
            }
            rel -= run.length;
            logical += run.length;
        }

        Err(ExtentError::OutOfRange {
            addr,
            end: self.end,
        })
    }

    /// Advance `cursor` to the start of the following run.
    ///
    /// At the end of the list a repeating map wraps back to the first run,
    /// adding `wrap_dst` to the base. Empty runs are skipped. Returns false
    /// once the logical end is reached.
    pub fn next_run(&self, cursor: &mut RunCursor) -> bool {
        loop {
            let logical = cursor.logical + cursor.run.length;
            if logical >= self.end {
                return false;
            }

            let next = cursor.index + 1;
            if next < self.runs.len() {
                cursor.index = next;
            } else {
                cursor.index = 0;
                cursor.base += self.wrap_dst;
            }
            cursor.run = self.runs[cursor.index];
            cursor.offset = 0;
            cursor.logical = logical;

            if cursor.run.length > 0 {
                return true;
            }
        }
    }
}
