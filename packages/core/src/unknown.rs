//! The fallback class for encodings of types we do not understand.
//!
//! An unknown store keeps everything that was left in the encoding when it
//! was decoded and hands it back verbatim when encoded again, so a store
//! can be passed through a process that cannot use it.

use tracing::debug;

use crate::encoding::{EncodeSink, StoreDecoder, StoreEncoding};
use crate::{tags, ClassRegistry, Error, Result, Store, StoreClass, StoreFlags};

/// Captures unrecognized encodings.
///
/// Decoding an unknown store consumes the rest of every channel. I/O and
/// flag changes fail with `UnsupportedFileType`.
pub struct UnknownClass;

pub static UNKNOWN_CLASS: UnknownClass = UnknownClass;

fn captured(store: &Store) -> Result<&StoreEncoding> {
    store
        .hook::<StoreEncoding>()
        .ok_or_else(|| Error::invalid("unknown store has no captured encoding"))
}

fn unsupported(store: &Store) -> Error {
    let tag = store
        .hook::<StoreEncoding>()
        .and_then(|e| e.ints.first().copied())
        .unwrap_or(tags::OTHER);
    Error::UnsupportedFileType(format!("store type {}", tag))
}

impl StoreClass for UnknownClass {
    fn name(&self) -> &'static str {
        "unknown"
    }

    fn id(&self) -> i32 {
        tags::OTHER
    }

    fn check_usable(&self, store: &Store) -> Result<()> {
        Err(unsupported(store))
    }

    fn read(&self, store: &Store, _addr: i64, _index: usize, _amount: usize) -> Result<bytes::Bytes> {
        Err(unsupported(store))
    }

    fn write(&self, store: &mut Store, _addr: i64, _index: usize, _data: &[u8]) -> Result<usize> {
        Err(unsupported(store))
    }

    fn set_flags(&self, store: &mut Store, _flags: StoreFlags) -> Result<()> {
        Err(unsupported(store))
    }

    fn clear_flags(&self, store: &mut Store, _flags: StoreFlags) -> Result<()> {
        Err(unsupported(store))
    }

    fn encode(&self, store: &Store, sink: &mut dyn EncodeSink) -> Result<()> {
        let enc = captured(store)?;
        for handle in &enc.handles {
            sink.put_handle(handle.as_ref());
        }
        for v in &enc.ints {
            sink.put_int(*v);
        }
        for v in &enc.offsets {
            sink.put_offset(*v);
        }
        sink.put_bytes(&enc.bytes);
        Ok(())
    }

    fn decode(&self, dec: &mut StoreDecoder<'_>, _classes: &ClassRegistry) -> Result<Store> {
        let tag = dec.peek_int()?;
        let rest = dec.take_rest();
        debug!(
            tag,
            ints = rest.ints.len(),
            bytes = rest.bytes.len(),
            "captured unknown store encoding"
        );

        // Only the store's generic fields are readable; the rest stays opaque.
        let mut store = Store::new(&UNKNOWN_CLASS, None, StoreFlags::empty(), 0, Vec::new())?;
        store.set_hook(rest);
        Ok(store)
    }

    fn clone_state(&self, from: &Store, to: &mut Store) -> Result<()> {
        to.set_hook(captured(from)?.clone());
        Ok(())
    }
}
