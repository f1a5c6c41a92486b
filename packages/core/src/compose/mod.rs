//! Composite classes: stores built out of other stores.
//!
//! - `concat`: children laid end to end
//! - `interleave`: children striped round-robin
//! - `remap`: a re-scoped view of a single child
//! - `copy`: a private in-memory snapshot of another store

mod concat;
mod copy;
mod interleave;
mod remap;

pub use concat::{concat_create, ConcatClass, CONCAT_CLASS};
pub use copy::{copy_create, CopyClass, COPY_CLASS};
pub use interleave::{interleave_create, InterleaveClass, INTERLEAVE_CLASS};
pub use remap::{parse_remap_runs, remap_create, RemapClass, REMAP_CLASS};

use std::fmt;

use tracing::debug;
use vstore_extent::{check_within_period, lcm, remap_runs};

use crate::{Error, Result, Run, Store, StoreFlags};

/// A failed remap. The source store comes back untouched.
#[derive(Debug)]
pub struct RemapError {
    pub error: Error,
    pub store: Store,
}

impl RemapError {
    pub fn into_store(self) -> Store {
        self.store
    }
}

impl fmt::Display for RemapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remap failed: {}", self.error)
    }
}

impl std::error::Error for RemapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<RemapError> for Error {
    fn from(e: RemapError) -> Self {
        e.error
    }
}

impl Store {
    /// Re-scope the store to `runs`, addresses within its current logical
    /// space.
    ///
    /// The store is consumed; the result is either the same store with a
    /// rewritten run list or a new remap store wrapping it, depending on
    /// the class.
    pub fn remap(self, runs: &[Run]) -> std::result::Result<Store, RemapError> {
        let class = self.class;
        class.remap(self, runs)
    }
}

/// Rewrite `source`'s run list so that it covers `runs`.
///
/// A repeating store can only be remapped within its first period.
pub fn remap_in_place(mut source: Store, runs: &[Run]) -> std::result::Result<Store, RemapError> {
    match composed_runs(&source, runs).and_then(|new_runs| source.set_runs(new_runs)) {
        Ok(()) => {
            debug!(class = source.class.name(), runs = source.runs.len(), "remapped in place");
            Ok(source)
        }
        Err(error) => Err(RemapError {
            error,
            store: source,
        }),
    }
}

fn composed_runs(source: &Store, runs: &[Run]) -> Result<Vec<Run>> {
    if source.run_map().is_wrapped() {
        check_within_period(runs, source.wrap_src)?;
    }
    Ok(remap_runs(runs, &source.runs)?)
}

/// Common block size of `children`.
fn common_block_size(children: &[Store]) -> Result<u32> {
    let mut bs = 1u64;
    for (i, child) in children.iter().enumerate() {
        if child.block_size() == 0 {
            return Err(Error::invalid(format!("child #{} has no block size", i)));
        }
        bs = lcm(bs, u64::from(child.block_size()));
    }
    u32::try_from(bs).map_err(|_| Error::invalid(format!("common block size {} too large", bs)))
}

/// Backend flags every child has.
fn common_flags(children: &[Store]) -> StoreFlags {
    children
        .iter()
        .fold(StoreFlags::all().backend(), |acc, c| acc & c.flags())
}

/// Child block address for a parent block address.
fn child_addr(store: &Store, child: &Store, addr: i64) -> i64 {
    addr * i64::from(store.block_size() / child.block_size())
}
