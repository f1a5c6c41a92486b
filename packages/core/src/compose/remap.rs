use bytes::Bytes;
use tracing::debug;
use vstore_extent::validate_runs;

use super::RemapError;
use crate::encoding::{encode_runs, EncodeSink, StoreDecoder};
use crate::{tags, ClassRegistry, Error, Result, Run, Store, StoreClass, StoreFlags};

/// A re-scoped view of a single child.
///
/// The run list addresses the child's logical blocks; reads and writes are
/// forwarded to child 0 unchanged. Remapping a remap store again composes
/// the run lists in place.
pub struct RemapClass;

pub static REMAP_CLASS: RemapClass = RemapClass;

/// Wrap `source` so that only `runs` of it are visible.
///
/// Data runs must lie within the source. On failure the source is handed
/// back inside the error.
pub fn remap_create(
    source: Store,
    runs: &[Run],
    flags: StoreFlags,
) -> std::result::Result<Store, RemapError> {
    let built = check_runs(runs, source.end()).and_then(|()| {
        Store::new(
            &REMAP_CLASS,
            None,
            flags | source.flags(),
            source.block_size(),
            runs.to_vec(),
        )
    });

    match built {
        Ok(mut store) => {
            debug!(
                source = source.class().name(),
                runs = runs.len(),
                end = store.end(),
                "wrapped store in remap"
            );
            store.set_children(vec![source]);
            Ok(store)
        }
        Err(error) => Err(RemapError {
            error,
            store: source,
        }),
    }
}

fn check_runs(runs: &[Run], end: i64) -> Result<()> {
    validate_runs(runs)?;
    for (i, run) in runs.iter().enumerate() {
        if !run.is_hole() && run.end() > end {
            return Err(Error::invalid(format!(
                "run #{} ({}) reaches past the end of the source ({})",
                i, run, end
            )));
        }
    }
    Ok(())
}

fn parse_number(s: &str) -> Result<i64> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => s.parse::<i64>(),
    };
    match parsed {
        Ok(v) if v >= 0 => Ok(v),
        _ => Err(Error::invalid(format!("bad block number {:?}", s))),
    }
}

/// Parse a run list of the form `START+LEN,START,...`.
///
/// A bare `START` runs to `end`. Numbers are decimal or `0x` hex.
pub fn parse_remap_runs(list: &str, end: i64) -> Result<Vec<Run>> {
    if list.is_empty() {
        return Err(Error::invalid("empty run list"));
    }
    list.split(',')
        .map(|part| match part.split_once('+') {
            Some((start, len)) => Ok(Run::new(parse_number(start)?, parse_number(len)?)),
            None => {
                let start = parse_number(part)?;
                if start > end {
                    return Err(Error::invalid(format!(
                        "run start {} is past the end ({})",
                        start, end
                    )));
                }
                Ok(Run::new(start, end - start))
            }
        })
        .collect()
}

fn split_name(name: &str) -> Result<(&str, &str)> {
    name.split_once(':')
        .ok_or_else(|| Error::invalid(format!("remap name {:?} is not RUNS:NAME", name)))
}

impl StoreClass for RemapClass {
    fn name(&self) -> &'static str {
        "remap"
    }

    fn id(&self) -> i32 {
        tags::REMAP
    }

    fn read(&self, store: &Store, addr: i64, _index: usize, amount: usize) -> Result<Bytes> {
        store.child(0)?.read(addr, amount)
    }

    fn write(&self, store: &mut Store, addr: i64, _index: usize, data: &[u8]) -> Result<usize> {
        store.child_mut(0)?.write(addr, data)
    }

    fn encode(&self, store: &Store, sink: &mut dyn EncodeSink) -> Result<()> {
        let child = store.child(0)?;
        sink.put_int(self.id());
        sink.put_int(store.flags().bits() as i32);
        sink.put_int(store.runs().len() as i32);
        encode_runs(store.runs(), sink);
        child.class().encode(child, sink)
    }

    fn decode(&self, dec: &mut StoreDecoder<'_>, classes: &ClassRegistry) -> Result<Store> {
        dec.require(0, 3, 0, 0)?;
        let _tag = dec.take_int()?;
        let flags = StoreFlags::from_bits_retain(dec.take_int()? as u32);
        let n = dec.take_count("run count")?;
        let runs = dec.take_runs(n)?;
        let child = classes.decode(dec)?;
        Ok(remap_create(child, &runs, flags)?)
    }

    fn set_flags(&self, store: &mut Store, flags: StoreFlags) -> Result<()> {
        store.set_child_flags(flags)
    }

    fn clear_flags(&self, store: &mut Store, flags: StoreFlags) -> Result<()> {
        store.clear_child_flags(flags)
    }

    fn open(&self, name: &str, flags: StoreFlags, classes: &ClassRegistry) -> Result<Store> {
        let (runs, child_name) = split_name(name)?;
        let child = classes.open(child_name, flags)?;
        let runs = parse_remap_runs(runs, child.end())?;
        Ok(child.remap(&runs)?)
    }

    fn validate_name(&self, name: &str, classes: &ClassRegistry) -> Result<()> {
        let (runs, child_name) = split_name(name)?;
        parse_remap_runs(runs, i64::MAX)?;
        classes.validate_name(child_name)
    }
}
