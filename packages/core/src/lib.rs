//! Core vstore: stores, classes and composition.
//!
//! This layer gives the run lists of `vstore-extent` a backend:
//! - `Store`: a typed, named view over byte-addressable storage
//! - `StoreClass`: the operation table a backend implements
//! - `ResourceHandle`: reference-counted handles on external resources
//! - `StoreEncoding`: the four-channel wire description of a store graph
//!
//! Reads and writes go through one generic engine that walks the run list,
//! splits requests at run boundaries and hands each piece to the class.
//! Composite classes (concatenation, interleaving, remapping) own child
//! stores and route their pieces through the same engine again.
//!
//! # Example
//!
//! ```rust,ignore
//! use vstore_core::{concat_create, ClassRegistry, StoreFlags};
//!
//! let registry = ClassRegistry::core();
//! let store = concat_create(vec![first, second], StoreFlags::empty())?;
//! let bytes = store.read(12, 512)?;
//! ```

pub use bytes::Bytes;

mod class;
pub mod compose;
mod config;
mod encoding;
mod error;
mod flags;
mod io;
mod lifecycle;
mod registry;
mod resource;
mod store;
mod unknown;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use class::{tags, Protection, StoreClass};
pub use compose::{
    concat_create, copy_create, interleave_create, parse_remap_runs, remap_create,
    remap_in_place, RemapError, CONCAT_CLASS, COPY_CLASS, INTERLEAVE_CLASS, REMAP_CLASS,
};
pub use config::StoreConfig;
pub use encoding::{
    decode_children, decode_leaf, encode_children, encode_leaf, encode_runs, EncodeSink,
    EncodingSize, LeafParts, StoreDecoder, StoreEncoding, MAX_DECODE_DEPTH,
};
pub use error::{Error, Result};
pub use flags::StoreFlags;
pub use registry::{parse_children, ChildNames, ClassRegistry, FILE_CLASS_NAME};
pub use resource::{MemoryObject, Resource, ResourceHandle};
pub use store::{Store, StoreInfo};
pub use unknown::{UnknownClass, UNKNOWN_CLASS};

// Re-export extent types for convenience
pub use vstore_extent::{ExtentError, Run, RunCursor, RunMap, HOLE, PAGE_SIZE};
