//! The class contract every backend implements.

use bytes::Bytes;

use crate::compose::{remap_in_place, RemapError};
use crate::encoding::{EncodeSink, EncodingSize, StoreDecoder};
use crate::{ClassRegistry, Error, ResourceHandle, Result, Run, Store, StoreFlags};

/// Wire-format type tags.
///
/// The numbering follows the classic storage-class enumeration so that
/// encodings stay compatible with existing peers.
pub mod tags {
    pub const OTHER: i32 = 0;
    pub const DEVICE: i32 = 1;
    pub const FILE: i32 = 2;
    pub const NETWORK: i32 = 3;
    pub const MEMORY: i32 = 4;
    pub const TASK: i32 = 5;
    pub const NULL: i32 = 6;
    pub const INTERLEAVE: i32 = 7;
    pub const CONCAT: i32 = 8;
    pub const LAYER: i32 = 9;
    pub const ZERO: i32 = 10;
    pub const REMAP: i32 = 11;
    pub const COPY: i32 = 12;
}

/// Access requested from [`StoreClass::map`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadOnly,
    ReadWrite,
}

/// A backend kind and its operations.
///
/// Classes are shared, immutable tables: stores hold a `&'static dyn
/// StoreClass` and never own it. Every operation has a default that
/// reports `Unsupported` (or `InvalidArgument` for flag changes), so a
/// backend implements only what it can do.
///
/// Addresses passed to `read` and `write` are backend-relative block
/// addresses already translated through the store's run list; `index` is
/// the number of the run they fall in.
///
/// # Object Safety
///
/// This trait is object-safe: stores hold `&'static dyn StoreClass`.
pub trait StoreClass: Send + Sync + 'static {
    /// Class name, as used in `TYPE:NAME` strings.
    fn name(&self) -> &'static str;

    /// Wire-format type tag (see [`tags`]).
    fn id(&self) -> i32;

    /// Refuse all access to `store` before the engine looks at the request.
    ///
    /// Classes whose stores are opaque descriptions rather than storage
    /// override this; everyone else keeps the default.
    fn check_usable(&self, _store: &Store) -> Result<()> {
        Ok(())
    }

    /// Read up to `amount` bytes at `addr` within run `index`.
    ///
    /// Returning fewer bytes than requested is a short read, not an error.
    fn read(&self, _store: &Store, _addr: i64, _index: usize, _amount: usize) -> Result<Bytes> {
        Err(Error::unsupported("read"))
    }

    /// Write `data` at `addr` within run `index`, returning bytes written.
    fn write(&self, _store: &mut Store, _addr: i64, _index: usize, _data: &[u8]) -> Result<usize> {
        Err(Error::unsupported("write"))
    }

    /// Change the size of the store to `new_size` bytes.
    fn set_size(&self, _store: &mut Store, _new_size: u64) -> Result<()> {
        Err(Error::unsupported("set_size"))
    }

    /// Tally the channel space `encode` will use.
    ///
    /// The default dry-runs `encode` against a counting sink.
    fn allocate_encoding(&self, store: &Store, size: &mut EncodingSize) -> Result<()> {
        self.encode(store, size)
    }

    /// Append the store's description to the encoding channels.
    fn encode(&self, _store: &Store, _sink: &mut dyn EncodeSink) -> Result<()> {
        Err(Error::unsupported("encode"))
    }

    /// Rebuild a store from the decoder's current position.
    fn decode(&self, _dec: &mut StoreDecoder<'_>, _classes: &ClassRegistry) -> Result<Store> {
        Err(Error::unsupported("decode"))
    }

    /// Confirm newly set backend flags. The core records them on success.
    fn set_flags(&self, _store: &mut Store, flags: StoreFlags) -> Result<()> {
        Err(Error::invalid(format!(
            "class {} cannot set flags {:#x}",
            self.name(),
            flags.bits()
        )))
    }

    /// Confirm cleared backend flags. The core records them on success.
    fn clear_flags(&self, _store: &mut Store, flags: StoreFlags) -> Result<()> {
        Err(Error::invalid(format!(
            "class {} cannot clear flags {:#x}",
            self.name(),
            flags.bits()
        )))
    }

    /// Release backend-private state; handles are still valid here.
    fn cleanup(&self, _store: &mut Store) {}

    /// Copy backend-private state into `to`, whose generic fields have
    /// already been cloned from `from`.
    fn clone_state(&self, _from: &Store, _to: &mut Store) -> Result<()> {
        Ok(())
    }

    /// Re-scope `source` to `runs`.
    ///
    /// The default rewrites the source's run list in place. Classes whose
    /// run index carries meaning override this to wrap the source instead.
    fn remap(&self, source: Store, runs: &[Run]) -> std::result::Result<Store, RemapError> {
        remap_in_place(source, runs)
    }

    /// Open a store named by a class-specific string.
    fn open(&self, _name: &str, _flags: StoreFlags, _classes: &ClassRegistry) -> Result<Store> {
        Err(Error::unsupported("open"))
    }

    /// Check the syntax of a class-specific name without opening it.
    fn validate_name(&self, _name: &str, _classes: &ClassRegistry) -> Result<()> {
        Err(Error::unsupported("validate_name"))
    }

    /// Map the store's contents directly.
    fn map(&self, _store: &Store, _protection: Protection) -> Result<ResourceHandle> {
        Err(Error::unsupported("map"))
    }
}

impl std::fmt::Debug for dyn StoreClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StoreClass({}, tag {})", self.name(), self.id())
    }
}
