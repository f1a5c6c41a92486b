use bytes::Bytes;
use tracing::debug;

use crate::encoding::{decode_leaf, encode_leaf, EncodeSink, StoreDecoder};
use crate::{tags, ClassRegistry, Error, Result, Run, Store, StoreClass, StoreFlags};

/// A private in-memory snapshot of another store.
///
/// The snapshot is a plain byte buffer held in the store's private state.
/// Writes change only the snapshot; cloning duplicates it.
pub struct CopyClass;

pub static COPY_CLASS: CopyClass = CopyClass;

struct CopyBuffer(Vec<u8>);

/// Read all of `source` into a new copy store.
///
/// Holes in the source read as zeros.
pub fn copy_create(source: &Store, flags: StoreFlags) -> Result<Store> {
    let data = source.read_whole()?;
    let runs = match source.end() {
        0 => Vec::new(),
        end => vec![Run::new(0, end)],
    };
    let mut store = Store::new(&COPY_CLASS, None, flags, source.block_size(), runs)?;
    store.set_name(source.name().map(str::to_string));
    debug!(source = source.class().name(), bytes = data.len(), "copied store");
    store.set_hook(CopyBuffer(data));
    Ok(store)
}

fn buffer(store: &Store) -> Result<&[u8]> {
    store
        .hook::<CopyBuffer>()
        .map(|b| b.0.as_slice())
        .ok_or_else(|| Error::io("copy store has no buffer"))
}

impl StoreClass for CopyClass {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn id(&self) -> i32 {
        tags::COPY
    }

    fn read(&self, store: &Store, addr: i64, _index: usize, amount: usize) -> Result<Bytes> {
        let data = buffer(store)?;
        let offset = addr as usize * store.block_size() as usize;
        if offset >= data.len() {
            return Ok(Bytes::new());
        }
        let end = offset.saturating_add(amount).min(data.len());
        Ok(Bytes::copy_from_slice(&data[offset..end]))
    }

    fn write(&self, store: &mut Store, addr: i64, _index: usize, bytes: &[u8]) -> Result<usize> {
        let offset = addr as usize * store.block_size() as usize;
        let data = &mut store
            .hook_mut::<CopyBuffer>()
            .ok_or_else(|| Error::io("copy store has no buffer"))?
            .0;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = bytes.len().min(data.len() - offset);
        data[offset..offset + n].copy_from_slice(&bytes[..n]);
        Ok(n)
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
        let blocks = i64::try_from(new_size / bs)
            .map_err(|_| Error::invalid(format!("size {} too large", new_size)))?;
        if let Some(buf) = store.hook_mut::<CopyBuffer>() {
            let grow = len.saturating_sub(buf.0.len());
            buf.0.try_reserve_exact(grow).map_err(|_| Error::NoMemory)?;
            buf.0.resize(len, 0);
        }
        store.set_runs(vec![Run::new(0, blocks)])
    }

    fn encode(&self, store: &Store, sink: &mut dyn EncodeSink) -> Result<()> {
        encode_leaf(store, sink)?;
        sink.put_bytes(buffer(store)?);
        Ok(())
    }

    fn decode(&self, dec: &mut StoreDecoder<'_>, _classes: &ClassRegistry) -> Result<Store> {
        let mut store = decode_leaf(dec, |parts| {
            Store::new(
                &COPY_CLASS,
                parts.handle,
                parts.flags,
                parts.block_size,
                parts.runs,
            )
        })?;
        let len = usize::try_from(store.size()).map_err(|_| Error::NoMemory)?;
        let data = dec.take_bytes(len)?.to_vec();
        store.set_hook(CopyBuffer(data));
        Ok(store)
    }

    fn set_flags(&self, _store: &mut Store, flags: StoreFlags) -> Result<()> {
        // A private buffer is always exactly its own extent.
        if flags.difference(StoreFlags::ENFORCED | StoreFlags::INNOCUOUS).is_empty() {
            Ok(())
        } else {
            Err(Error::invalid(format!("copy cannot set flags {:#x}", flags.bits())))
        }
    }

    fn clear_flags(&self, _store: &mut Store, _flags: StoreFlags) -> Result<()> {
        Ok(())
    }

    fn clone_state(&self, from: &Store, to: &mut Store) -> Result<()> {
        let data = buffer(from)?.to_vec();
        to.set_hook(CopyBuffer(data));
        Ok(())
    }

    fn open(&self, name: &str, flags: StoreFlags, classes: &ClassRegistry) -> Result<Store> {
        let source = classes.open(name, flags)?;
        copy_create(&source, flags)
    }

    fn validate_name(&self, name: &str, classes: &ClassRegistry) -> Result<()> {
        classes.validate_name(name)
    }
}
