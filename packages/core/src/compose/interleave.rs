use bytes::Bytes;
use tracing::debug;

use super::{child_addr, common_block_size, common_flags, remap_create, RemapError};
use crate::encoding::{decode_children, encode_children, EncodeSink, StoreDecoder};
use crate::{tags, ClassRegistry, Error, Result, Run, Store, StoreClass, StoreFlags};

/// Children striped round-robin.
///
/// The run list holds one stripe per child, `{0, interleave}`, and repeats
/// with a backend offset of one stripe per period. Run `i` therefore always
/// lands on child `i`, at the child's address within its own stripes.
pub struct InterleaveClass;

pub static INTERLEAVE_CLASS: InterleaveClass = InterleaveClass;

/// Stripe `children` in chunks of `interleave` bytes.
///
/// `interleave` must be a positive multiple of the common block size. The
/// store covers as many whole stripes as the smallest child can hold.
pub fn interleave_create(children: Vec<Store>, interleave: u64, flags: StoreFlags) -> Result<Store> {
    if children.is_empty() {
        return Err(Error::invalid("cannot interleave zero stores"));
    }
    let block_size = common_block_size(&children)?;
    let bs = u64::from(block_size);
    if interleave == 0 || interleave % bs != 0 {
        return Err(Error::invalid(format!(
            "interleave {} is not a positive multiple of block size {}",
            interleave, bs
        )));
    }

    let stripe = i64::try_from(interleave / bs)
        .map_err(|_| Error::invalid(format!("interleave {} too large", interleave)))?;
    let min_end = children
        .iter()
        .map(|c| (c.size() / bs) as i64)
        .min()
        .unwrap_or(0);
    if min_end < stripe {
        return Err(Error::invalid(format!(
            "smallest child ({} blocks) holds no whole stripe of {}",
            min_end, stripe
        )));
    }

    let n = children.len() as i64;
    let end = (min_end / stripe)
        .checked_mul(stripe)
        .and_then(|e| e.checked_mul(n))
        .ok_or_else(|| Error::invalid("interleaved size overflows"))?;

    let runs = vec![Run::new(0, stripe); children.len()];
    let flags = flags | common_flags(&children);
    let mut store = Store::new(&INTERLEAVE_CLASS, None, flags, block_size, runs)?;
    store.set_wrap(end, stripe)?;

    debug!(
        children = children.len(),
        stripe,
        end = store.end(),
        "interleaved stores"
    );
    store.set_children(children);
    Ok(store)
}

/// The stripe size in bytes.
fn interleave_bytes(store: &Store) -> u64 {
    store
        .runs()
        .first()
        .map_or(0, |r| r.length as u64 * u64::from(store.block_size()))
}

impl StoreClass for InterleaveClass {
    fn name(&self) -> &'static str {
        "interleave"
    }

    fn id(&self) -> i32 {
        tags::INTERLEAVE
    }

    fn read(&self, store: &Store, addr: i64, index: usize, amount: usize) -> Result<Bytes> {
        let child = store.child(index)?;
        child.read(child_addr(store, child, addr), amount)
    }

    fn write(&self, store: &mut Store, addr: i64, index: usize, data: &[u8]) -> Result<usize> {
        let parent_bs = store.block_size();
        let child = store.child_mut(index)?;
        let addr = addr * i64::from(parent_bs / child.block_size());
        child.write(addr, data)
    }

    fn encode(&self, store: &Store, sink: &mut dyn EncodeSink) -> Result<()> {
        let interleave = i32::try_from(interleave_bytes(store))
            .map_err(|_| Error::invalid("interleave does not fit the encoding"))?;
        sink.put_int(self.id());
        sink.put_int(store.flags().bits() as i32);
        sink.put_int(interleave);
        sink.put_int(store.children().len() as i32);
        encode_children(store, sink)
    }

    fn decode(&self, dec: &mut StoreDecoder<'_>, classes: &ClassRegistry) -> Result<Store> {
        dec.require(0, 4, 0, 0)?;
        let _tag = dec.take_int()?;
        let flags = StoreFlags::from_bits_retain(dec.take_int()? as u32);
        let interleave = dec.take_count("interleave")? as u64;
        let n = dec.take_count("child count")?;
        let children = decode_children(dec, n, classes)?;
        interleave_create(children, interleave, flags)
    }

    fn set_flags(&self, store: &mut Store, flags: StoreFlags) -> Result<()> {
        store.set_child_flags(flags)
    }

    fn clear_flags(&self, store: &mut Store, flags: StoreFlags) -> Result<()> {
        store.clear_child_flags(flags)
    }

    fn remap(&self, source: Store, runs: &[Run]) -> std::result::Result<Store, RemapError> {
        remap_create(source, runs, StoreFlags::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{buffer_store, class_test_suite, BufferState, BUFFER_CLASS};

    fn child(tag: u8, blocks: usize) -> Store {
        // Byte i of child `tag` is tag * 100 + i, modulo 256.
        let data = (0..blocks).map(|i| (tag as usize * 100 + i) as u8).collect();
        buffer_store(1, vec![Run::new(0, blocks as i64)], data)
    }

    fn three() -> Store {
        let children = vec![child(0, 100), child(1, 100), child(2, 100)];
        interleave_create(children, 4, StoreFlags::empty()).unwrap()
    }

    #[test]
    fn stripes_round_robin() {
        let store = three();
        assert_eq!(store.end(), 300);
        assert_eq!(store.wrap_src(), 12);
        assert_eq!(store.wrap_dst(), 4);

        let cursor = store.run_map().find_first_run(9).unwrap();
        assert_eq!(cursor.index, 2);
        assert_eq!(cursor.address(), 1);
        // Child 2, block 1.
        assert_eq!(&store.read(9, 1).unwrap()[..], &[201]);
    }

    #[test]
    fn later_periods_advance_child_addresses() {
        let store = three();
        let cursor = store.run_map().find_first_run(13).unwrap();
        assert_eq!((cursor.index, cursor.address()), (0, 5));
        assert_eq!(&store.read(13, 1).unwrap()[..], &[5]);
        assert_eq!(&store.read(299, 1).unwrap()[..], &[(299 % 256) as u8]);
    }

    #[test]
    fn reads_cross_stripes() {
        let store = three();
        assert_eq!(&store.read(2, 4).unwrap()[..], &[2, 3, 100, 101]);
        assert_eq!(&store.read(10, 4).unwrap()[..], &[202, 203, 4, 5]);
    }

    #[test]
    fn writes_land_in_stripes() {
        let mut store = three();
        assert_eq!(store.write(11, &[7, 8]).unwrap(), 2);
        let c2 = store.children()[2].hook::<BufferState>().unwrap();
        let c0 = store.children()[0].hook::<BufferState>().unwrap();
        assert_eq!(c2.data[3], 7);
        assert_eq!(c0.data[4], 8);
    }

    #[test]
    fn end_is_rounded_to_whole_stripes() {
        let children = vec![child(0, 10), child(1, 7)];
        let store = interleave_create(children, 4, StoreFlags::empty()).unwrap();
        assert_eq!(store.end(), 8);
        assert!(store.read(8, 1).is_err());
    }

    #[test]
    fn bad_interleave_is_invalid() {
        let children = vec![buffer_store(4, vec![Run::new(0, 4)], vec![0; 16])];
        assert!(interleave_create(children, 6, StoreFlags::empty()).is_err());
        let children = vec![child(0, 2)];
        assert!(interleave_create(children, 4, StoreFlags::empty()).is_err());
        assert!(interleave_create(vec![], 4, StoreFlags::empty()).is_err());
    }

    #[test]
    fn round_trip_keeps_interleave() {
        let mut classes = ClassRegistry::core();
        classes.register(&BUFFER_CLASS).unwrap();
        let store = three();
        class_test_suite::encode_roundtrip_works(&store, &classes);

        let enc = store.encode().unwrap();
        assert_eq!(&enc.ints[..4], &[tags::INTERLEAVE, 0, 4, 3]);
        let back = Store::decode(&enc, &classes).unwrap();
        assert_eq!(back.wrap_dst(), 4);
    }
}
