use proptest::prelude::*;
use vstore_backends::{memory_create, standard_registry, zero_create};
use vstore_core::testing::class_test_suite;
use vstore_core::{
    concat_create, interleave_create, tags, MemoryObject, Protection, ResourceHandle, Run, Store,
    StoreConfig, StoreEncoding, StoreFlags,
};

fn memory(data: &[u8]) -> (Store, ResourceHandle) {
    let handle = ResourceHandle::new(MemoryObject::from_vec(data.to_vec()));
    let runs = vec![Run::new(0, data.len() as i64)];
    let store = memory_create(handle.clone(), StoreFlags::empty(), 1, runs).unwrap();
    (store, handle)
}

#[test]
fn named_composites() {
    let classes = standard_registry().unwrap();
    let mut store = classes
        .open("concat:,zero:4,memory:4", StoreFlags::empty())
        .unwrap();
    assert_eq!(store.end(), 8);
    assert_eq!(store.write(4, b"abcd").unwrap(), 4);
    assert_eq!(&store.read(0, 8).unwrap()[..], b"\0\0\0\0abcd");
}

#[test]
fn memory_children_share_their_object_across_encoding() {
    let classes = standard_registry().unwrap();
    let (mem, handle) = memory(b"0123");
    let store = concat_create(
        vec![mem, zero_create(4, StoreFlags::empty()).unwrap()],
        StoreFlags::empty(),
    )
    .unwrap();
    class_test_suite::encode_roundtrip_works(&store, &classes);

    let enc = store.encode().unwrap();
    assert_eq!(enc.ints[0], tags::CONCAT);
    assert_eq!(enc.handles.len(), 2);

    let frame = enc.to_frame().unwrap();
    let enc = StoreEncoding::from_frame(&frame, enc.handles.clone()).unwrap();
    let mut back = Store::decode(&enc, &classes).unwrap();
    back.write(1, b"Z").unwrap();
    let object = handle.downcast_ref::<MemoryObject>().unwrap();
    assert_eq!(object.snapshot(), b"0Z23");
}

#[test]
fn interleaved_memory_from_config() {
    let classes = standard_registry().unwrap();
    let json = r#"{
        "type": "interleave",
        "interleave": 2,
        "children": [
            {"type": "named", "name": "memory:8"},
            {"type": "named", "name": "memory:8"}
        ]
    }"#;
    let config: StoreConfig = serde_json::from_str(json).unwrap();
    let mut store = config.build(&classes).unwrap();
    assert_eq!(store.end(), 16);
    store.write(0, b"aabbccddeeffgghh").unwrap();

    let first = store.children()[0].read(0, 8).unwrap();
    let second = store.children()[1].read(0, 8).unwrap();
    assert_eq!(&first[..], b"aacceegg");
    assert_eq!(&second[..], b"bbddffhh");
}

#[test]
fn foreign_types_pass_through() {
    let classes = standard_registry().unwrap().with_unknown_fallback();
    let enc = StoreEncoding {
        handles: vec![None],
        ints: vec![tags::TASK, 0, 1, 0, 0, 0],
        offsets: vec![],
        bytes: vec![],
    };
    let store = Store::decode(&enc, &classes).unwrap();
    assert_eq!(store.class().name(), "unknown");
    assert_eq!(store.encode().unwrap(), enc);
}

#[test]
fn composites_map_by_copy() {
    let (a, _) = memory(b"ab");
    let (b, _) = memory(b"cd");
    let store = concat_create(vec![a, b], StoreFlags::empty()).unwrap();
    let mapped = store.map(Protection::ReadOnly).unwrap();
    assert_eq!(mapped.downcast_ref::<MemoryObject>().unwrap().snapshot(), b"abcd");
    assert!(store.map(Protection::ReadWrite).unwrap_err().is_unsupported());
}

#[test]
fn securely_returnable_needs_every_child() {
    let (mut a, _) = memory(b"ab");
    a.set_flags(StoreFlags::ENFORCED).unwrap();
    let b = zero_create(2, StoreFlags::empty()).unwrap();
    let mut store = concat_create(vec![a, b], StoreFlags::empty()).unwrap();
    assert!(!store.is_securely_returnable(false));

    store.set_flags(StoreFlags::ENFORCED).unwrap();
    assert!(store.is_securely_returnable(true));
}

proptest! {
    #[test]
    fn interleave_is_a_permutation_of_children(stripe in 1u64..5, periods in 1usize..5) {
        let len = stripe as usize * periods;
        let (a, ha) = memory(&vec![0; len]);
        let (b, hb) = memory(&vec![0; len]);
        let mut store = interleave_create(vec![a, b], stripe, StoreFlags::empty()).unwrap();
        let data: Vec<u8> = (0..2 * len).map(|i| i as u8).collect();
        prop_assert_eq!(store.write(0, &data).unwrap(), data.len());

        let mut merged = Vec::new();
        let (sa, sb) = (
            ha.downcast_ref::<MemoryObject>().unwrap().snapshot(),
            hb.downcast_ref::<MemoryObject>().unwrap().snapshot(),
        );
        for p in 0..periods {
            let range = p * stripe as usize..(p + 1) * stripe as usize;
            merged.extend_from_slice(&sa[range.clone()]);
            merged.extend_from_slice(&sb[range]);
        }
        prop_assert_eq!(merged, data);
    }
}
