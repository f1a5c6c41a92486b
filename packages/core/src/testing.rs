//! Test classes and a reusable conformance suite.
//!
//! Available to this crate's tests and, with the `test-utils` feature, to
//! backend crates that want to check their classes against the contract.

use bytes::Bytes;

use crate::encoding::{decode_leaf, encode_leaf, EncodeSink, StoreDecoder};
use crate::{ClassRegistry, Error, Result, Run, Store, StoreClass, StoreFlags};

/// Wire tag used by the test buffer class.
pub const BUFFER_TAG: i32 = 100;

/// Private state of [`BufferClass`] and [`HalfWriteClass`] stores.
#[derive(Debug, Clone, Default)]
pub struct BufferState {
    pub data: Vec<u8>,
    /// `(addr, run index, length)` of every write the class received.
    pub writes: Vec<(i64, usize, usize)>,
}

/// A leaf whose backend address space is a private byte vector.
pub struct BufferClass;

pub static BUFFER_CLASS: BufferClass = BufferClass;

/// A buffer leaf that only ever writes half of what it is asked to.
pub struct HalfWriteClass;

pub static HALF_WRITE_CLASS: HalfWriteClass = HalfWriteClass;

/// Private state of [`FlagClass`] stores.
#[derive(Debug, Clone, Default)]
pub struct FlagState {
    /// Backend flags this store refuses to set.
    pub refuse: StoreFlags,
    /// `(set?, flags)` for every hook call.
    pub calls: Vec<(bool, StoreFlags)>,
}

/// A leaf with flag hooks that records every call.
pub struct FlagClass;

pub static FLAG_CLASS: FlagClass = FlagClass;

/// A buffer store over `data` with the given runs.
pub fn buffer_store(block_size: u32, runs: Vec<Run>, data: Vec<u8>) -> Store {
    buffer_store_of(&BUFFER_CLASS, block_size, runs, data)
}

/// A half-writing buffer store over `data`.
pub fn half_write_store(block_size: u32, runs: Vec<Run>, data: Vec<u8>) -> Store {
    buffer_store_of(&HALF_WRITE_CLASS, block_size, runs, data)
}

/// A buffer store of `blocks` blocks whose byte `i` is `i % 251`.
pub fn patterned_store(block_size: u32, blocks: i64) -> Store {
    let len = blocks as usize * block_size as usize;
    let data = (0..len).map(|i| (i % 251) as u8).collect();
    buffer_store(block_size, vec![Run::new(0, blocks)], data)
}

fn buffer_store_of(
    class: &'static dyn StoreClass,
    block_size: u32,
    runs: Vec<Run>,
    data: Vec<u8>,
) -> Store {
    let mut store =
        Store::new(class, None, StoreFlags::empty(), block_size, runs).expect("bad test store");
    store.set_hook(BufferState {
        data,
        writes: Vec::new(),
    });
    store
}

fn buffer_read(store: &Store, addr: i64, amount: usize) -> Result<Bytes> {
    let state = store
        .hook::<BufferState>()
        .ok_or_else(|| Error::io("buffer store has no data"))?;
    let offset = addr as usize * store.block_size() as usize;
    if offset >= state.data.len() {
        return Ok(Bytes::new());
    }
    let end = (offset + amount).min(state.data.len());
    Ok(Bytes::copy_from_slice(&state.data[offset..end]))
}

fn buffer_write(store: &mut Store, addr: i64, index: usize, data: &[u8]) -> Result<usize> {
    let offset = addr as usize * store.block_size() as usize;
    let state = store
        .hook_mut::<BufferState>()
        .ok_or_else(|| Error::io("buffer store has no data"))?;
    state.writes.push((addr, index, data.len()));
    if offset >= state.data.len() {
        return Ok(0);
    }
    let n = data.len().min(state.data.len() - offset);
    state.data[offset..offset + n].copy_from_slice(&data[..n]);
    Ok(n)
}

fn buffer_clone(from: &Store, to: &mut Store) -> Result<()> {
    if let Some(state) = from.hook::<BufferState>() {
        to.set_hook(state.clone());
    }
    Ok(())
}

impl StoreClass for BufferClass {
    fn name(&self) -> &'static str {
        "buffer"
    }

    fn id(&self) -> i32 {
        BUFFER_TAG
    }

    fn read(&self, store: &Store, addr: i64, _index: usize, amount: usize) -> Result<Bytes> {
        buffer_read(store, addr, amount)
    }

    fn write(&self, store: &mut Store, addr: i64, index: usize, data: &[u8]) -> Result<usize> {
        buffer_write(store, addr, index, data)
    }

    fn encode(&self, store: &Store, sink: &mut dyn EncodeSink) -> Result<()> {
        encode_leaf(store, sink)
    }

    fn decode(&self, dec: &mut StoreDecoder<'_>, _classes: &ClassRegistry) -> Result<Store> {
        decode_leaf(dec, |parts| {
            let blocks = parts
                .runs
                .iter()
                .filter(|r| !r.is_hole())
                .map(|r| r.end())
                .max()
                .unwrap_or(0);
            let len = blocks as usize * parts.block_size as usize;
            let mut store = Store::new(
                &BUFFER_CLASS,
                parts.handle,
                parts.flags,
                parts.block_size,
                parts.runs,
            )?;
            store.set_hook(BufferState {
                data: vec![0; len],
                writes: Vec::new(),
            });
            Ok(store)
        })
    }

    fn clone_state(&self, from: &Store, to: &mut Store) -> Result<()> {
        buffer_clone(from, to)
    }
}

impl StoreClass for HalfWriteClass {
    fn name(&self) -> &'static str {
        "half-write"
    }

    fn id(&self) -> i32 {
        BUFFER_TAG + 1
    }

    fn read(&self, store: &Store, addr: i64, _index: usize, amount: usize) -> Result<Bytes> {
        buffer_read(store, addr, amount)
    }

    fn write(&self, store: &mut Store, addr: i64, index: usize, data: &[u8]) -> Result<usize> {
        let bs = store.block_size().max(1) as usize;
        let half = (data.len() / 2) / bs * bs;
        buffer_write(store, addr, index, &data[..half])
    }

    fn clone_state(&self, from: &Store, to: &mut Store) -> Result<()> {
        buffer_clone(from, to)
    }
}

impl StoreClass for FlagClass {
    fn name(&self) -> &'static str {
        "flag-test"
    }

    fn id(&self) -> i32 {
        BUFFER_TAG + 2
    }

    fn set_flags(&self, store: &mut Store, flags: StoreFlags) -> Result<()> {
        let state = store
            .hook_mut::<FlagState>()
            .ok_or_else(|| Error::invalid("no flag state"))?;
        state.calls.push((true, flags));
        if flags.intersects(state.refuse) {
            return Err(Error::invalid(format!("refusing {:#x}", flags.bits())));
        }
        Ok(())
    }

    fn clear_flags(&self, store: &mut Store, flags: StoreFlags) -> Result<()> {
        let state = store
            .hook_mut::<FlagState>()
            .ok_or_else(|| Error::invalid("no flag state"))?;
        state.calls.push((false, flags));
        Ok(())
    }
}

/// Conformance checks any class can be run through.
pub mod class_test_suite {
    use super::*;

    /// Write one block at block 0 and read it back.
    pub fn read_write_works(store: &mut Store) {
        let bs = store.block_size() as usize;
        let pattern: Vec<u8> = (0..bs).map(|i| (i * 7 % 256) as u8).collect();
        let written = store.write(0, &pattern).unwrap();
        assert_eq!(written, bs);
        let back = store.read(0, bs).unwrap();
        assert_eq!(&back[..], &pattern[..]);
    }

    /// A read-only store refuses writes and stays untouched.
    pub fn readonly_write_refused_works(store: &mut Store) {
        let bs = store.block_size() as usize;
        let before = store.read(0, bs).unwrap();
        store.set_flags(StoreFlags::READONLY).unwrap();
        let err = store.write(0, &vec![0xAA; bs]).unwrap_err();
        assert!(matches!(err, Error::ReadOnly));
        assert_eq!(store.read(0, bs).unwrap(), before);
    }

    /// Reading one past the last block is out of range.
    pub fn read_at_end_fails_works(store: &Store) {
        let bs = store.block_size() as usize;
        let err = store.read(store.end(), bs).unwrap_err();
        assert!(matches!(err, Error::AddressOutOfRange { .. }));
    }

    /// Encoding then decoding preserves the generic fields.
    pub fn encode_roundtrip_works(store: &Store, classes: &ClassRegistry) {
        let enc = store.encode().unwrap();
        let back = Store::decode(&enc, classes).unwrap();
        assert_eq!(back.class().name(), store.class().name());
        assert_eq!(back.runs(), store.runs());
        assert_eq!(back.flags(), store.flags());
        assert_eq!(back.block_size(), store.block_size());
        assert_eq!(back.name(), store.name());
        assert_eq!(back.misc(), store.misc());
        assert_eq!(back.end(), store.end());
    }

    /// Cloning then dropping the clone leaves the original's handles alone.
    pub fn clone_keeps_handles_works(store: &Store) {
        let resource_refs = store.resource().map(|h| h.references());
        let source_refs = store.source().map(|h| h.references());

        let clone = store.try_clone().unwrap();
        if let (Some(a), Some(b)) = (store.resource(), clone.resource()) {
            assert_eq!(a, b);
        }
        drop(clone);

        assert_eq!(store.resource().map(|h| h.references()), resource_refs);
        assert_eq!(store.source().map(|h| h.references()), source_refs);
    }
}
