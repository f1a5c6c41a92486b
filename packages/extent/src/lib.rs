//! Extents: the run-list layer of vstore.
//!
//! This is the bottom of the vstore stack. Everything here is pure address
//! arithmetic over run lists - no stores, no backends, no I/O.
//!
//! A run list describes a logical address space as an ordered sequence of
//! `(start, length)` extents measured in blocks. A run whose start is `-1`
//! is a hole: address space that exists but has no backing. When the sum
//! of run lengths (`wrap_src`) is shorter than the logical end, the list is
//! a repeating pattern, replayed with a per-iteration offset (`wrap_dst`)
//! until the end is reached.
//!
//! # Example
//!
//! ```rust
//! use vstore_extent::{Run, RunMap};
//!
//! let runs = [Run::new(0, 10), Run::hole(5), Run::new(15, 10)];
//! let map = RunMap::new(&runs, 25, 25, 0);
//!
//! let cursor = map.find_first_run(20).unwrap();
//! assert_eq!(cursor.index, 2);
//! assert_eq!(cursor.address(), 20);
//!
//! assert!(map.find_first_run(12).unwrap().is_hole());
//! ```

mod error;
mod geometry;
mod map;
mod remap;
mod run;

pub use error::ExtentError;
pub use geometry::{derive, Geometry, PAGE_SIZE};
pub use map::{RunCursor, RunMap};
pub use remap::{check_within_period, remap_runs};
pub use run::{total_length, validate_runs, Run, HOLE};

/// Result type alias for extent operations.
pub type Result<T> = std::result::Result<T, ExtentError>;

/// Greatest common divisor.
pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Least common multiple; `lcm(0, x)` is `x` so it can seed a fold.
pub fn lcm(a: u64, b: u64) -> u64 {
    if a == 0 {
        return b;
    }
    if b == 0 {
        return a;
    }
    a / gcd(a, b) * b
}
