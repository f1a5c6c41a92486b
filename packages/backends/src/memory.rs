use bytes::Bytes;
use tracing::debug;
use vstore_core::{
    decode_leaf, encode_leaf, tags, ClassRegistry, EncodeSink, Error, MemoryObject, Protection,
    ResourceHandle, Result, Run, Store, StoreClass, StoreDecoder, StoreFlags,
};

use crate::parse_size;

/// A store over a shared [`MemoryObject`].
///
/// The object is the store's resource, so clones and decoded copies of the
/// store see the same memory, and mapping the store hands out the object
/// itself.
pub struct MemoryClass;

pub static MEMORY_CLASS: MemoryClass = MemoryClass;

/// A memory store over `object`, which must hold a [`MemoryObject`].
pub fn memory_create(
    object: ResourceHandle,
    flags: StoreFlags,
    block_size: u32,
    runs: Vec<Run>,
) -> Result<Store> {
    if object.downcast_ref::<MemoryObject>().is_none() {
        return Err(Error::invalid(format!(
            "memory store needs a memory object, not {}",
            object.kind()
        )));
    }
    let store = Store::new(&MEMORY_CLASS, Some(object), flags, block_size, runs)?;
    debug!(end = store.end(), block_size, "created memory store");
    Ok(store)
}

fn object(store: &Store) -> Result<&MemoryObject> {
    store
        .resource()
        .and_then(|r| r.downcast_ref::<MemoryObject>())
        .ok_or_else(|| Error::io("memory store has no object"))
}

fn offset(store: &Store, addr: i64) -> Result<usize> {
    usize::try_from(addr)
        .ok()
        .and_then(|a| a.checked_mul(store.block_size() as usize))
        .ok_or_else(|| Error::invalid(format!("bad memory address {}", addr)))
}

fn parse_memory_size(name: &str) -> Result<i64> {
    let size = parse_size(name)?;
    i64::try_from(size).map_err(|_| Error::invalid(format!("memory size {} too large", size)))
}

impl StoreClass for MemoryClass {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn id(&self) -> i32 {
        tags::MEMORY
    }

    fn read(&self, store: &Store, addr: i64, _index: usize, amount: usize) -> Result<Bytes> {
        Ok(Bytes::from(object(store)?.read_at(offset(store, addr)?, amount)))
    }

    fn write(&self, store: &mut Store, addr: i64, _index: usize, data: &[u8]) -> Result<usize> {
        Ok(object(store)?.write_at(offset(store, addr)?, data))
    }

    fn set_size(&self, store: &mut Store, new_size: u64) -> Result<()> {
        let bs = u64::from(store.block_size());
        if bs == 0 || new_size % bs != 0 {
            return Err(Error::invalid(format!(
                "size {} is not a multiple of the block size {}",
                new_size, bs
            )));
        }
        let len = usize::try_from(new_size).map_err(|_| Error::NoMemory)?;
        let runs = match i64::try_from(new_size / bs) {
            Ok(0) => Vec::new(),
            Ok(blocks) => vec![Run::new(0, blocks)],
            Err(_) => return Err(Error::invalid(format!("size {} too large", new_size))),
        };
        object(store)?.try_resize(len)?;
        store.set_runs(runs)
    }

    fn encode(&self, store: &Store, sink: &mut dyn EncodeSink) -> Result<()> {
        encode_leaf(store, sink)
    }

    fn decode(&self, dec: &mut StoreDecoder<'_>, _classes: &ClassRegistry) -> Result<Store> {
        decode_leaf(dec, |parts| {
            let handle = parts
                .handle
                .ok_or_else(|| Error::invalid("memory store encoded without its object"))?;
            memory_create(handle, parts.flags, parts.block_size, parts.runs)
        })
    }

    fn set_flags(&self, store: &mut Store, flags: StoreFlags) -> Result<()> {
        let allowed = StoreFlags::ENFORCED | StoreFlags::INNOCUOUS | StoreFlags::HARD_READONLY;
        if !flags.difference(allowed).is_empty() {
            return Err(Error::invalid(format!(
                "memory cannot set flags {:#x}",
                flags.bits()
            )));
        }
        if flags.contains(StoreFlags::ENFORCED) {
            // Only a store covering exactly the whole object is enforced.
            let len = object(store)?.len() as u64;
            let bs = u64::from(store.block_size());
            let whole = bs != 0 && len % bs == 0 && store.runs() == [Run::new(0, (len / bs) as i64)];
            if !whole {
                return Err(Error::invalid("store does not cover exactly its memory object"));
            }
        }
        Ok(())
    }

    fn clear_flags(&self, _store: &mut Store, _flags: StoreFlags) -> Result<()> {
        Ok(())
    }

    fn map(&self, store: &Store, _protection: Protection) -> Result<ResourceHandle> {
        store
            .resource()
            .cloned()
            .ok_or_else(|| Error::io("memory store has no object"))
    }

    fn open(&self, name: &str, flags: StoreFlags, _classes: &ClassRegistry) -> Result<Store> {
        let size = parse_memory_size(name)?;
        let len = usize::try_from(size).map_err(|_| Error::NoMemory)?;
        let runs = match size {
            0 => Vec::new(),
            n => vec![Run::new(0, n)],
        };
        memory_create(ResourceHandle::new(MemoryObject::try_new(len)?), flags, 1, runs)
    }

    fn validate_name(&self, name: &str, _classes: &ClassRegistry) -> Result<()> {
        parse_memory_size(name).map(|_| ())
    }
}
