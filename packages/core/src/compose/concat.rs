use bytes::Bytes;
use tracing::debug;

use super::{child_addr, common_block_size, common_flags, remap_create, RemapError};
use crate::encoding::{decode_children, encode_children, EncodeSink, StoreDecoder};
use crate::{tags, ClassRegistry, Error, Result, Run, Store, StoreClass, StoreFlags};

/// Children laid end to end.
///
/// Run `i` of a concatenation covers all of child `i`, so reads and writes
/// go to the child numbered by the run index.
pub struct ConcatClass;

pub static CONCAT_CLASS: ConcatClass = ConcatClass;

/// Concatenate `children` into one store.
///
/// The block size is the least common multiple of the children's; backend
/// flags every child has are inherited.
pub fn concat_create(children: Vec<Store>, flags: StoreFlags) -> Result<Store> {
    if children.is_empty() {
        return Err(Error::invalid("cannot concatenate zero stores"));
    }
    let block_size = common_block_size(&children)?;

    let runs = children
        .iter()
        .map(|c| Run::new(0, (c.size() / u64::from(block_size)) as i64))
        .collect();

    let flags = flags | common_flags(&children);
    let mut store = Store::new(&CONCAT_CLASS, None, flags, block_size, runs)?;
    debug!(children = children.len(), end = store.end(), "concatenated stores");
    store.set_children(children);
    Ok(store)
}

impl StoreClass for ConcatClass {
    fn name(&self) -> &'static str {
        "concat"
    }

    fn id(&self) -> i32 {
        tags::CONCAT
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
        sink.put_int(self.id());
        sink.put_int(store.flags().bits() as i32);
        sink.put_int(store.children().len() as i32);
        encode_children(store, sink)
    }

    fn decode(&self, dec: &mut StoreDecoder<'_>, classes: &ClassRegistry) -> Result<Store> {
        dec.require(0, 3, 0, 0)?;
        let _tag = dec.take_int()?;
        let flags = StoreFlags::from_bits_retain(dec.take_int()? as u32);
        let n = dec.take_count("child count")?;
        let children = decode_children(dec, n, classes)?;
        concat_create(children, flags)
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

    fn open(&self, name: &str, flags: StoreFlags, classes: &ClassRegistry) -> Result<Store> {
        let children = classes.open_children(name, flags)?;
        concat_create(children, flags)
    }

    fn validate_name(&self, name: &str, classes: &ClassRegistry) -> Result<()> {
        classes.validate_children(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{buffer_store, class_test_suite, BufferState, BUFFER_CLASS};

    fn numbered(n: usize, first: u8) -> Vec<u8> {
        (0..n).map(|i| first.wrapping_add(i as u8)).collect()
    }

    fn pair() -> Store {
        let a = buffer_store(1, vec![Run::new(0, 10)], numbered(10, 0));
        let b = buffer_store(1, vec![Run::new(0, 20)], numbered(20, 100));
        concat_create(vec![a, b], StoreFlags::empty()).unwrap()
    }

    #[test]
    fn concatenation_resolves_to_children() {
        let store = pair();
        assert_eq!(store.end(), 30);
        assert_eq!(store.runs(), &[Run::new(0, 10), Run::new(0, 20)]);

        let cursor = store.run_map().find_first_run(12).unwrap();
        assert_eq!((cursor.index, cursor.address()), (1, 2));
        assert_eq!(&store.read(12, 1).unwrap()[..], &[102]);
    }

    #[test]
    fn reads_span_children() {
        let store = pair();
        assert_eq!(&store.read(8, 4).unwrap()[..], &[8, 9, 100, 101]);
    }

    #[test]
    fn writes_reach_the_right_child() {
        let mut store = pair();
        assert_eq!(store.write(9, &[1, 2]).unwrap(), 2);
        let first = store.children()[0].hook::<BufferState>().unwrap();
        let second = store.children()[1].hook::<BufferState>().unwrap();
        assert_eq!(first.data[9], 1);
        assert_eq!(second.data[0], 2);
    }

    #[test]
    fn mixed_block_sizes_use_the_lcm() {
        let small = buffer_store(1, vec![Run::new(0, 8)], numbered(8, 0));
        let big = buffer_store(4, vec![Run::new(0, 2)], numbered(8, 50));
        let store = concat_create(vec![small, big], StoreFlags::empty()).unwrap();
        assert_eq!(store.block_size(), 4);
        assert_eq!(store.runs(), &[Run::new(0, 2), Run::new(0, 2)]);
        assert_eq!(&store.read(1, 4).unwrap()[..], &[4, 5, 6, 7]);
        assert_eq!(&store.read(3, 4).unwrap()[..], &[54, 55, 56, 57]);
    }

    #[test]
    fn zero_children_is_invalid() {
        assert!(matches!(
            concat_create(vec![], StoreFlags::empty()),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn round_trip() {
        let mut classes = ClassRegistry::core();
        classes.register(&BUFFER_CLASS).unwrap();
        let store = pair();
        class_test_suite::encode_roundtrip_works(&store, &classes);

        let enc = store.encode().unwrap();
        assert_eq!(&enc.ints[..3], &[tags::CONCAT, 0, 2]);
        let back = Store::decode(&enc, &classes).unwrap();
        assert_eq!(back.children().len(), 2);
        assert_eq!(back.children()[1].end(), 20);
    }

    #[test]
    fn remap_wraps_instead_of_rewriting() {
        let store = pair();
        let store = store.remap(&[Run::new(8, 4)]).unwrap();
        assert_eq!(store.class().name(), "remap");
        assert_eq!(store.children()[0].class().name(), "concat");
        assert_eq!(&store.read(0, 4).unwrap()[..], &[8, 9, 100, 101]);
    }

    #[test]
    fn clone_is_deep() {
        let store = pair();
        class_test_suite::clone_keeps_handles_works(&store);
        let mut clone = store.try_clone().unwrap();
        clone.write(0, &[42]).unwrap();
        assert_eq!(&store.read(0, 1).unwrap()[..], &[0]);
    }
}
