use std::io::Write;

use tempfile::{NamedTempFile, TempDir};
use vstore_backends::{file_open, standard_registry, FileResource};
use vstore_core::testing::class_test_suite;
use vstore_core::{Error, Run, Store, StoreFlags};

fn temp_with(contents: &[u8]) -> NamedTempFile {
    let mut temp = NamedTempFile::new().unwrap();
    temp.write_all(contents).unwrap();
    temp.flush().unwrap();
    temp
}

#[test]
fn covers_the_whole_file() {
    let temp = temp_with(b"hello, store");
    let store = file_open(temp.path(), StoreFlags::empty()).unwrap();
    assert_eq!(store.block_size(), 1);
    assert_eq!(store.runs(), &[Run::new(0, 12)]);
    assert_eq!(store.name(), Some(temp.path().to_str().unwrap()));
    assert_eq!(&store.read(7, 100).unwrap()[..], b"store");
}

#[test]
fn writes_reach_the_file() {
    let temp = temp_with(b"0123456789");
    let mut store = file_open(temp.path(), StoreFlags::empty()).unwrap();
    class_test_suite::read_write_works(&mut store);
    assert_eq!(store.write(8, b"xy").unwrap(), 2);
    drop(store);
    assert_eq!(std::fs::read(temp.path()).unwrap(), b"\x001234567xy");
}

#[test]
fn readonly_open_refuses_writes() {
    let temp = temp_with(b"abcd");
    let mut store = file_open(temp.path(), StoreFlags::READONLY).unwrap();
    let resource = store.resource().unwrap().downcast_ref::<FileResource>().unwrap();
    assert!(!resource.is_writable());
    assert!(matches!(store.write(0, b"z"), Err(Error::ReadOnly)));
    assert!(matches!(store.set_size(2), Err(Error::ReadOnly)));
}

#[test]
fn missing_file_is_not_found() {
    let dir = TempDir::new().unwrap();
    let err = file_open(dir.path().join("nope"), StoreFlags::empty()).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn resize_truncates_and_extends() {
    let temp = temp_with(b"abcdef");
    let mut store = file_open(temp.path(), StoreFlags::empty()).unwrap();
    store.set_size(3).unwrap();
    assert_eq!(store.end(), 3);
    assert_eq!(std::fs::metadata(temp.path()).unwrap().len(), 3);
    store.set_size(0).unwrap();
    assert_eq!(store.end(), 0);
    assert!(store.runs().is_empty());
}

#[test]
fn inactive_releases_and_reacquires() {
    let temp = temp_with(b"abcd");
    let mut store = file_open(temp.path(), StoreFlags::empty()).unwrap();

    store.set_flags(StoreFlags::INACTIVE).unwrap();
    assert!(store.resource().is_none());
    assert!(store.read(0, 1).is_err());
    assert!(!store.is_securely_returnable(false));

    store.clear_flags(StoreFlags::INACTIVE).unwrap();
    assert!(store.resource().is_some());
    assert_eq!(&store.read(0, 4).unwrap()[..], b"abcd");
}

#[test]
fn reacquire_needs_a_name() {
    let temp = temp_with(b"abcd");
    let mut store = file_open(temp.path(), StoreFlags::empty()).unwrap();
    store.set_flags(StoreFlags::INACTIVE).unwrap();
    store.set_name(None);
    assert!(matches!(
        store.clear_flags(StoreFlags::INACTIVE),
        Err(Error::NotFound(_))
    ));
    assert!(store.flags().contains(StoreFlags::INACTIVE));
}

#[test]
fn enforced_only_over_the_whole_file() {
    let temp = temp_with(b"abcdefgh");
    let store = file_open(temp.path(), StoreFlags::empty()).unwrap();
    let mut part = store.remap(&[Run::new(2, 4)]).unwrap();
    assert!(part.set_flags(StoreFlags::ENFORCED).is_err());

    let mut whole = file_open(temp.path(), StoreFlags::empty()).unwrap();
    whole.set_flags(StoreFlags::ENFORCED).unwrap();
    assert!(whole.is_securely_returnable(true));
}

#[test]
fn round_trips_with_and_without_the_handle() {
    let classes = standard_registry().unwrap();
    let temp = temp_with(b"abcd");
    let store = file_open(temp.path(), StoreFlags::empty()).unwrap();
    class_test_suite::encode_roundtrip_works(&store, &classes);
    class_test_suite::clone_keeps_handles_works(&store);

    let mut enc = store.encode().unwrap();
    let frame = enc.to_frame().unwrap();
    enc.handles = vec![None];
    let detached = vstore_core::StoreEncoding::from_frame(&frame, enc.handles.clone()).unwrap();
    let mut back = Store::decode(&detached, &classes).unwrap();
    assert!(back.resource().is_none());
    assert!(back.flags().contains(StoreFlags::INACTIVE));
    assert!(back.read(0, 4).is_err());

    back.clear_flags(StoreFlags::INACTIVE).unwrap();
    assert!(!back.resource().unwrap().same_resource(store.resource().unwrap()));
    assert_eq!(&back.read(0, 4).unwrap()[..], b"abcd");
}

#[test]
fn decoding_a_bare_name_opens_nothing() {
    let classes = standard_registry().unwrap();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("secret");
    std::fs::write(&path, b"private").unwrap();

    let store = file_open(&path, StoreFlags::READONLY).unwrap();
    let mut enc = store.encode().unwrap();
    drop(store);
    enc.handles = vec![None];

    let back = Store::decode(&enc, &classes).unwrap();
    assert!(back.resource().is_none());
    assert!(back.flags().contains(StoreFlags::INACTIVE));
    assert!(back.read(0, 7).is_err());

    // A name that does not exist decodes just the same.
    std::fs::remove_file(&path).unwrap();
    let back = Store::decode(&enc, &classes).unwrap();
    assert!(back.resource().is_none());
}

#[test]
fn opens_through_the_registry() {
    let classes = standard_registry().unwrap();
    let temp = temp_with(b"wxyz");
    let path = temp.path().to_str().unwrap().to_string();

    let plain = classes.open(&path, StoreFlags::empty()).unwrap();
    let typed = classes.open(&format!("file:{}", path), StoreFlags::empty()).unwrap();
    assert_eq!(plain.read(0, 4).unwrap(), typed.read(0, 4).unwrap());
}
