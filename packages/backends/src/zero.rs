use bytes::Bytes;
use tracing::debug;
use vstore_core::{
    decode_leaf, encode_leaf, tags, ClassRegistry, EncodeSink, Error, Result, Run, Store,
    StoreClass, StoreDecoder, StoreFlags,
};

use crate::parse_size;

/// Reads as zeros; writes are accepted and discarded.
pub struct ZeroClass;

pub static ZERO_CLASS: ZeroClass = ZeroClass;

fn zero_runs(size: i64) -> Vec<Run> {
    match size {
        0 => Vec::new(),
        n => vec![Run::new(0, n)],
    }
}

/// A zero store of `size` bytes.
pub fn zero_create(size: u64, flags: StoreFlags) -> Result<Store> {
    let size = i64::try_from(size).map_err(|_| Error::invalid(format!("zero size {} too large", size)))?;
    let store = Store::new(&ZERO_CLASS, None, flags, 1, zero_runs(size))?;
    debug!(size, "created zero store");
    Ok(store)
}

/// `SIZE`, or the largest possible store when empty.
fn parse_zero_size(name: &str) -> Result<u64> {
    if name.is_empty() {
        Ok(i64::MAX as u64)
    } else {
        parse_size(name)
    }
}

impl StoreClass for ZeroClass {
    fn name(&self) -> &'static str {
        "zero"
    }

    fn id(&self) -> i32 {
        tags::ZERO
    }

    fn read(&self, _store: &Store, _addr: i64, _index: usize, amount: usize) -> Result<Bytes> {
        let mut zeros = Vec::new();
        zeros.try_reserve_exact(amount).map_err(|_| Error::NoMemory)?;
        zeros.resize(amount, 0);
        Ok(Bytes::from(zeros))
    }

    fn write(&self, _store: &mut Store, _addr: i64, _index: usize, data: &[u8]) -> Result<usize> {
        Ok(data.len())
    }

    fn set_size(&self, store: &mut Store, new_size: u64) -> Result<()> {
        let size = i64::try_from(new_size).map_err(|_| Error::invalid("zero size too large"))?;
        store.set_runs(zero_runs(size))
    }

    fn encode(&self, store: &Store, sink: &mut dyn EncodeSink) -> Result<()> {
        encode_leaf(store, sink)
    }

    fn decode(&self, dec: &mut StoreDecoder<'_>, _classes: &ClassRegistry) -> Result<Store> {
        decode_leaf(dec, |parts| {
            Store::new(&ZERO_CLASS, None, parts.flags, parts.block_size, parts.runs)
        })
    }

    fn set_flags(&self, _store: &mut Store, flags: StoreFlags) -> Result<()> {
        // Nothing outside the store can be reached through it.
        let allowed = StoreFlags::ENFORCED | StoreFlags::INNOCUOUS | StoreFlags::HARD_READONLY;
        if flags.difference(allowed).is_empty() {
            Ok(())
        } else {
            Err(Error::invalid(format!("zero cannot set flags {:#x}", flags.bits())))
        }
    }

    fn clear_flags(&self, _store: &mut Store, _flags: StoreFlags) -> Result<()> {
        Ok(())
    }

    fn open(&self, name: &str, flags: StoreFlags, _classes: &ClassRegistry) -> Result<Store> {
        zero_create(parse_zero_size(name)?, flags)
    }

    fn validate_name(&self, name: &str, _classes: &ClassRegistry) -> Result<()> {
        parse_zero_size(name).map(|_| ())
    }
}
