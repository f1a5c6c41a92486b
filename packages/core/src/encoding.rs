//! The four-channel wire description of a store graph.
//!
//! A store encodes as parallel sequences of resource handles, `i32` ints,
//! `i64` offsets and raw bytes. The first int of every store record is its
//! class tag, which selects the decoder on the way back.
//!
//! Encoding runs in two phases: the class first tallies what it will write
//! into an [`EncodingSize`], the channels are allocated once, and then the
//! class appends to them for real. Both phases drive the same
//! [`EncodeSink`] calls, so the default tally is simply a dry run.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::{ClassRegistry, Error, ResourceHandle, Result, Run, Store, StoreFlags};

/// Receiver of encoded store data.
pub trait EncodeSink {
    fn put_handle(&mut self, handle: Option<&ResourceHandle>);
    fn put_int(&mut self, value: i32);
    fn put_offset(&mut self, value: i64);
    fn put_bytes(&mut self, bytes: &[u8]);
}

/// Channel lengths an encoding needs. Used as a counting sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodingSize {
    pub handles: usize,
    pub ints: usize,
    pub offsets: usize,
    pub bytes: usize,
}

impl EncodeSink for EncodingSize {
    fn put_handle(&mut self, _handle: Option<&ResourceHandle>) {
        self.handles += 1;
    }

    fn put_int(&mut self, _value: i32) {
        self.ints += 1;
    }

    fn put_offset(&mut self, _value: i64) {
        self.offsets += 1;
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.bytes += bytes.len();
    }
}

/// An encoded store graph.
///
/// A `None` handle stands for an empty slot; the slot still occupies a
/// position in the handle channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreEncoding {
    pub handles: Vec<Option<ResourceHandle>>,
    pub ints: Vec<i32>,
    pub offsets: Vec<i64>,
    pub bytes: Vec<u8>,
}

impl EncodeSink for StoreEncoding {
    fn put_handle(&mut self, handle: Option<&ResourceHandle>) {
        self.handles.push(handle.cloned());
    }

    fn put_int(&mut self, value: i32) {
        self.ints.push(value);
    }

    fn put_offset(&mut self, value: i64) {
        self.offsets.push(value);
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }
}

const FRAME_HEADER: usize = 4 * 4;

/// Deepest store graph [`Store::decode`] accepts.
pub const MAX_DECODE_DEPTH: usize = 64;

impl StoreEncoding {
    pub fn with_capacity(size: &EncodingSize) -> Self {
        Self {
            handles: Vec::with_capacity(size.handles),
            ints: Vec::with_capacity(size.ints),
            offsets: Vec::with_capacity(size.offsets),
            bytes: Vec::with_capacity(size.bytes),
        }
    }

    /// Channel lengths of this encoding.
    pub fn size(&self) -> EncodingSize {
        EncodingSize {
            handles: self.handles.len(),
            ints: self.ints.len(),
            offsets: self.offsets.len(),
            bytes: self.bytes.len(),
        }
    }

    pub fn decoder(&self) -> StoreDecoder<'_> {
        StoreDecoder {
            enc: self,
            handle: 0,
            int: 0,
            offset: 0,
            byte: 0,
            depth: 0,
        }
    }

    /// Serialize the data channels into a little-endian byte frame.
    ///
    /// The frame holds four `u32` counts (handles, ints, offsets, bytes)
    /// followed by the int, offset and byte payloads. Handles cannot be
    /// serialized; they travel out of band and are matched up again by
    /// count in [`StoreEncoding::from_frame`].
    pub fn to_frame(&self) -> Result<Bytes> {
        let count = |n: usize| {
            u32::try_from(n).map_err(|_| Error::invalid(format!("channel of {} entries too long", n)))
        };
        let len = FRAME_HEADER + self.ints.len() * 4 + self.offsets.len() * 8 + self.bytes.len();
        let mut frame = BytesMut::with_capacity(len);
        frame.put_u32_le(count(self.handles.len())?);
        frame.put_u32_le(count(self.ints.len())?);
        frame.put_u32_le(count(self.offsets.len())?);
        frame.put_u32_le(count(self.bytes.len())?);
        for v in &self.ints {
            frame.put_i32_le(*v);
        }
        for v in &self.offsets {
            frame.put_i64_le(*v);
        }
        frame.put_slice(&self.bytes);
        Ok(frame.freeze())
    }

    /// Rebuild an encoding from a frame and its out-of-band handles.
    pub fn from_frame(mut frame: &[u8], handles: Vec<Option<ResourceHandle>>) -> Result<Self> {
        if frame.remaining() < FRAME_HEADER {
            return Err(Error::invalid("truncated frame header"));
        }
        let n_handles = frame.get_u32_le() as usize;
        let n_ints = frame.get_u32_le() as usize;
        let n_offsets = frame.get_u32_le() as usize;
        let n_bytes = frame.get_u32_le() as usize;

        if n_handles != handles.len() {
            return Err(Error::invalid(format!(
                "frame expects {} handles, got {}",
                n_handles,
                handles.len()
            )));
        }
        let payload = n_ints
            .checked_mul(4)
            .zip(n_offsets.checked_mul(8))
            .and_then(|(a, b)| a.checked_add(b))
            .and_then(|a| a.checked_add(n_bytes))
            .ok_or_else(|| Error::invalid("frame counts overflow"))?;
        if frame.remaining() < payload {
            return Err(Error::invalid(format!(
                "truncated frame: {} payload bytes, need {}",
                frame.remaining(),
                payload
            )));
        }
        if frame.remaining() > payload {
            return Err(Error::invalid(format!(
                "{} bytes of trailing data after frame",
                frame.remaining() - payload
            )));
        }

        let ints = (0..n_ints).map(|_| frame.get_i32_le()).collect();
        let offsets = (0..n_offsets).map(|_| frame.get_i64_le()).collect();
        let bytes = frame.to_vec();
        Ok(Self {
            handles,
            ints,
            offsets,
            bytes,
        })
    }
}

/// Cursors over the four channels of a [`StoreEncoding`].
#[derive(Debug, Clone)]
pub struct StoreDecoder<'a> {
    enc: &'a StoreEncoding,
    handle: usize,
    int: usize,
    offset: usize,
    byte: usize,
    depth: usize,
}

impl<'a> StoreDecoder<'a> {
    /// Step into a nested store record.
    pub(crate) fn enter(&mut self) -> Result<()> {
        if self.depth >= MAX_DECODE_DEPTH {
            return Err(Error::invalid(format!(
                "store graph nested deeper than {} levels",
                MAX_DECODE_DEPTH
            )));
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Fail unless at least this much remains in each channel.
    pub fn require(&self, handles: usize, ints: usize, offsets: usize, bytes: usize) -> Result<()> {
        let left = self.remaining();
        if left.handles < handles || left.ints < ints || left.offsets < offsets || left.bytes < bytes
        {
            return Err(Error::invalid(format!(
                "truncated encoding: need {}/{}/{}/{}, have {}/{}/{}/{}",
                handles,
                ints,
                offsets,
                bytes,
                left.handles,
                left.ints,
                left.offsets,
                left.bytes
            )));
        }
        Ok(())
    }

    /// What is left in each channel.
    pub fn remaining(&self) -> EncodingSize {
        EncodingSize {
            handles: self.enc.handles.len() - self.handle,
            ints: self.enc.ints.len() - self.int,
            offsets: self.enc.offsets.len() - self.offset,
            bytes: self.enc.bytes.len() - self.byte,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == EncodingSize::default()
    }

    /// The next int, without consuming it.
    pub fn peek_int(&self) -> Result<i32> {
        self.enc
            .ints
            .get(self.int)
            .copied()
            .ok_or_else(|| Error::invalid("truncated encoding: no type tag"))
    }

    pub fn take_handle(&mut self) -> Result<Option<ResourceHandle>> {
        self.require(1, 0, 0, 0)?;
        let handle = self.enc.handles[self.handle].clone();
        self.handle += 1;
        Ok(handle)
    }

    pub fn take_int(&mut self) -> Result<i32> {
        self.require(0, 1, 0, 0)?;
        let v = self.enc.ints[self.int];
        self.int += 1;
        Ok(v)
    }

    pub fn take_offset(&mut self) -> Result<i64> {
        self.require(0, 0, 1, 0)?;
        let v = self.enc.offsets[self.offset];
        self.offset += 1;
        Ok(v)
    }

    pub fn take_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.require(0, 0, 0, len)?;
        let enc: &'a StoreEncoding = self.enc;
        let bytes = &enc.bytes[self.byte..self.byte + len];
        self.byte += len;
        Ok(bytes)
    }

    /// Take a non-negative count from the int channel.
    pub fn take_count(&mut self, what: &str) -> Result<usize> {
        let v = self.take_int()?;
        usize::try_from(v).map_err(|_| Error::invalid(format!("negative {} {}", what, v)))
    }

    /// Take `n` runs from the offset channel.
    pub fn take_runs(&mut self, n: usize) -> Result<Vec<Run>> {
        let offsets = n
            .checked_mul(2)
            .ok_or_else(|| Error::invalid("run count overflow"))?;
        self.require(0, 0, offsets, 0)?;
        let mut runs = Vec::with_capacity(n);
        for _ in 0..n {
            let start = self.take_offset()?;
            let length = self.take_offset()?;
            runs.push(Run::new(start, length));
        }
        Ok(runs)
    }

    /// Everything left in all four channels, consumed.
    pub fn take_rest(&mut self) -> StoreEncoding {
        let rest = StoreEncoding {
            handles: self.enc.handles[self.handle..].to_vec(),
            ints: self.enc.ints[self.int..].to_vec(),
            offsets: self.enc.offsets[self.offset..].to_vec(),
            bytes: self.enc.bytes[self.byte..].to_vec(),
        };
        self.handle = self.enc.handles.len();
        self.int = self.enc.ints.len();
        self.offset = self.enc.offsets.len();
        self.byte = self.enc.bytes.len();
        rest
    }
}

/// Put `runs` on the offset channel as start/length pairs.
pub fn encode_runs(runs: &[Run], sink: &mut dyn EncodeSink) {
    for run in runs {
        sink.put_offset(run.start);
        sink.put_offset(run.length);
    }
}

fn to_i32(v: impl TryInto<i32>, what: &str) -> Result<i32> {
    v.try_into()
        .map_err(|_| Error::invalid(format!("{} does not fit the encoding", what)))
}

/// Encode a store in the common leaf shape.
///
/// One handle (the resource); six ints (tag, flags, block size, run count,
/// name length, misc length); two offsets per run; then the name with a
/// NUL terminator, followed by the misc bytes. A name length of zero means
/// the store has no name.
pub fn encode_leaf(store: &Store, sink: &mut dyn EncodeSink) -> Result<()> {
    let name_len = store.name().map_or(0, |n| n.len() + 1);

    sink.put_handle(store.resource());
    sink.put_int(store.class().id());
    sink.put_int(store.flags().bits() as i32);
    sink.put_int(to_i32(store.block_size(), "block size")?);
    sink.put_int(to_i32(store.runs().len(), "run count")?);
    sink.put_int(to_i32(name_len, "name length")?);
    sink.put_int(to_i32(store.misc().len(), "misc length")?);
    encode_runs(store.runs(), sink);
    if let Some(name) = store.name() {
        sink.put_bytes(name.as_bytes());
        sink.put_bytes(&[0]);
    }
    sink.put_bytes(store.misc());
    Ok(())
}

/// The generic fields of a leaf record, handed to the class constructor.
#[derive(Debug)]
pub struct LeafParts {
    pub handle: Option<ResourceHandle>,
    pub flags: StoreFlags,
    pub block_size: u32,
    pub runs: Vec<Run>,
}

/// Decode a leaf-shaped record.
///
/// `create` builds the store from the generic fields; the name and misc
/// bytes are attached to whatever it returns.
pub fn decode_leaf<F>(dec: &mut StoreDecoder<'_>, create: F) -> Result<Store>
where
    F: FnOnce(LeafParts) -> Result<Store>,
{
    dec.require(1, 6, 0, 0)?;
    let handle = dec.take_handle()?;
    let _tag = dec.take_int()?;
    let flags = StoreFlags::from_bits_retain(dec.take_int()? as u32);
    let block_size = dec.take_count("block size")? as u32;
    let n_runs = dec.take_count("run count")?;
    let name_len = dec.take_count("name length")?;
    let misc_len = dec.take_count("misc length")?;

    let bytes = name_len
        .checked_add(misc_len)
        .ok_or_else(|| Error::invalid("leaf byte lengths overflow"))?;
    dec.require(0, 0, n_runs.saturating_mul(2), bytes)?;
    let runs = dec.take_runs(n_runs)?;

    let name = match name_len {
        0 => None,
        _ => {
            let raw = dec.take_bytes(name_len)?;
            let (last, body) = raw
                .split_last()
                .ok_or_else(|| Error::invalid("empty name"))?;
            if *last != 0 {
                return Err(Error::invalid("name is not NUL-terminated"));
            }
            let name = std::str::from_utf8(body)
                .map_err(|e| Error::invalid(format!("name is not UTF-8: {}", e)))?;
            Some(name.to_string())
        }
    };
    let misc = dec.take_bytes(misc_len)?.to_vec();

    let mut store = create(LeafParts {
        handle,
        flags,
        block_size,
        runs,
    })?;
    store.set_name(name);
    store.set_misc(misc);
    Ok(store)
}

/// Encode each child, in order.
pub fn encode_children(store: &Store, sink: &mut dyn EncodeSink) -> Result<()> {
    for child in store.children() {
        child.class().encode(child, sink)?;
    }
    Ok(())
}

/// Decode `n` stores. Children already decoded are dropped on failure.
pub fn decode_children(
    dec: &mut StoreDecoder<'_>,
    n: usize,
    classes: &ClassRegistry,
) -> Result<Vec<Store>> {
    let mut children = Vec::with_capacity(n.min(dec.remaining().ints));
    for _ in 0..n {
        children.push(classes.decode(dec)?);
    }
    Ok(children)
}

impl Store {
    /// Encode the store graph.
    pub fn encode(&self) -> Result<StoreEncoding> {
        let mut size = EncodingSize::default();
        self.class.allocate_encoding(self, &mut size)?;

        let mut enc = StoreEncoding::with_capacity(&size);
        self.class.encode(self, &mut enc)?;
        debug!(
            class = self.class.name(),
            handles = enc.handles.len(),
            ints = enc.ints.len(),
            offsets = enc.offsets.len(),
            bytes = enc.bytes.len(),
            "encoded store"
        );
        Ok(enc)
    }

    /// Rebuild a store graph from its encoding.
    ///
    /// The encoding must be consumed exactly.
    pub fn decode(enc: &StoreEncoding, classes: &ClassRegistry) -> Result<Store> {
        let mut dec = enc.decoder();
        let store = classes.decode(&mut dec)?;
        if !dec.is_exhausted() {
            let left = dec.remaining();
            return Err(Error::invalid(format!(
                "trailing encoding data: {}/{}/{}/{}",
                left.handles, left.ints, left.offsets, left.bytes
            )));
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{buffer_store, class_test_suite, BUFFER_CLASS, BUFFER_TAG};
    use crate::MemoryObject;

    fn registry() -> ClassRegistry {
        let mut classes = ClassRegistry::core();
        classes.register(&BUFFER_CLASS).unwrap();
        classes
    }

    fn named_leaf() -> Store {
        let mut store = buffer_store(
            512,
            vec![Run::new(0, 10), Run::hole(5), Run::new(15, 10)],
            vec![0; 25 * 512],
        );
        store.set_name(Some("disk0".to_string()));
        store.set_misc(vec![1, 2, 3]);
        store.set_resource(Some(ResourceHandle::new(MemoryObject::new(1))));
        store
    }

    #[test]
    fn leaf_layout() {
        let store = named_leaf();
        let enc = store.encode().unwrap();
        assert_eq!(enc.handles.len(), 1);
        assert_eq!(enc.ints, vec![BUFFER_TAG, 0, 512, 3, 6, 3]);
        assert_eq!(enc.offsets, vec![0, 10, -1, 5, 15, 10]);
        assert_eq!(enc.bytes, b"disk0\0\x01\x02\x03");
    }

    #[test]
    fn tally_matches_encoding() {
        let store = named_leaf();
        let mut size = EncodingSize::default();
        store.class().allocate_encoding(&store, &mut size).unwrap();
        assert_eq!(size, store.encode().unwrap().size());
    }

    #[test]
    fn leaf_round_trip() {
        let classes = registry();
        let store = named_leaf();
        class_test_suite::encode_roundtrip_works(&store, &classes);

        let back = Store::decode(&store.encode().unwrap(), &classes).unwrap();
        assert_eq!(back.resource(), store.resource());
    }

    #[test]
    fn unnamed_leaf_round_trip() {
        let classes = registry();
        let store = buffer_store(1, vec![Run::new(0, 4)], vec![0; 4]);
        let enc = store.encode().unwrap();
        assert_eq!(enc.ints[4], 0);
        let back = Store::decode(&enc, &classes).unwrap();
        assert_eq!(back.name(), None);
    }

    #[test]
    fn truncated_encoding_is_invalid() {
        let classes = registry();
        let mut enc = named_leaf().encode().unwrap();
        enc.offsets.pop();
        let err = Store::decode(&enc, &classes).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));

        let mut enc = named_leaf().encode().unwrap();
        enc.bytes[5] = b'x';
        assert!(Store::decode(&enc, &classes).is_err());
    }

    #[test]
    fn trailing_data_is_invalid() {
        let classes = registry();
        let mut enc = named_leaf().encode().unwrap();
        enc.ints.push(7);
        assert!(Store::decode(&enc, &classes).is_err());
    }

    #[test]
    fn unknown_tag_without_fallback_is_invalid() {
        let enc = StoreEncoding {
            ints: vec![999],
            ..Default::default()
        };
        let err = Store::decode(&enc, &registry()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn nesting_is_bounded() {
        let mut ints = Vec::new();
        for _ in 0..100_000 {
            ints.extend_from_slice(&[crate::tags::CONCAT, 0, 1]);
        }
        let enc = StoreEncoding {
            ints,
            ..Default::default()
        };
        let err = Store::decode(&enc, &registry()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn modest_nesting_decodes() {
        let mut store = buffer_store(1, vec![Run::new(0, 4)], vec![0; 4]);
        for _ in 0..10 {
            store = crate::concat_create(vec![store], StoreFlags::empty()).unwrap();
        }
        let back = Store::decode(&store.encode().unwrap(), &registry()).unwrap();
        assert_eq!(back.end(), 4);
    }

    #[test]
    fn frame_round_trip() {
        let enc = named_leaf().encode().unwrap();
        let frame = enc.to_frame().unwrap();
        assert_eq!(&frame[..4], &1u32.to_le_bytes());
        let back = StoreEncoding::from_frame(&frame, enc.handles.clone()).unwrap();
        assert_eq!(back, enc);
    }

    #[test]
    fn bad_frames_are_invalid() {
        let enc = named_leaf().encode().unwrap();
        let frame = enc.to_frame().unwrap();

        let short = &frame[..frame.len() - 1];
        assert!(StoreEncoding::from_frame(short, enc.handles.clone()).is_err());

        let mut long = frame.to_vec();
        long.push(0);
        assert!(StoreEncoding::from_frame(&long, enc.handles.clone()).is_err());

        assert!(StoreEncoding::from_frame(&frame, vec![]).is_err());
        assert!(StoreEncoding::from_frame(&frame[..3], vec![]).is_err());
    }
}
