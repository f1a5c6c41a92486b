//! Shared plumbing for the vstore command-line tools.

use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vstore_core::{
    concat_create, interleave_create, parse_remap_runs, ClassRegistry, Store, StoreConfig,
    StoreFlags,
};

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "VSTORE_LOG";

const CHUNK: usize = 64 * 1024;

/// Log to stderr, filtered by `VSTORE_LOG` (default `warn`).
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    // A second call (as in tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

/// The registry the tools open names with: the composites, zero, memory
/// and plain files, with unknown types decoded opaquely.
pub fn registry() -> Result<ClassRegistry> {
    Ok(vstore_backends::standard_registry()?.with_unknown_fallback())
}

/// Open `names` as one store.
///
/// A single name is opened as is. Several are concatenated, or interleaved
/// in chunks of `interleave` bytes when given.
pub fn open_names(
    classes: &ClassRegistry,
    names: &[String],
    interleave: Option<u64>,
    flags: StoreFlags,
) -> Result<Store> {
    let mut stores = names
        .iter()
        .map(|name| {
            classes
                .open(name, flags)
                .with_context(|| format!("opening {}", name))
        })
        .collect::<Result<Vec<_>>>()?;

    let store = match (stores.len(), interleave) {
        (0, _) => bail!("no store names given"),
        (1, None) => stores.remove(0),
        (_, None) => concat_create(stores, flags)?,
        (_, Some(bytes)) => interleave_create(stores, bytes, flags)?,
    };
    debug!(class = store.class().name(), end = store.end(), "opened");
    Ok(store)
}

/// Restrict `store` to the runs in `list` (`START+LEN,...`, in blocks).
pub fn remap(store: Store, list: &str) -> Result<Store> {
    let runs = parse_remap_runs(list, store.end())?;
    Ok(store.remap(&runs).map_err(vstore_core::Error::from)?)
}

/// Build the store described by the JSON config at `path`.
pub fn open_config(classes: &ClassRegistry, path: &Path) -> Result<Store> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: StoreConfig = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(config.build(classes)?)
}

/// Copy `len` bytes (or everything) from block `addr` on to `out`.
///
/// Returns the number of bytes written.
pub fn dump(store: &Store, addr: i64, len: Option<u64>, out: &mut impl Write) -> Result<u64> {
    let bs = u64::from(store.block_size());
    if bs == 0 {
        bail!("store has no block size");
    }
    let chunk = (CHUNK as u64 / bs).max(1) * bs;

    let mut addr = addr;
    let mut left = len.unwrap_or(u64::MAX);
    let mut written = 0;
    while left > 0 && addr < store.end() {
        let data = store.read(addr, chunk.min(left) as usize)?;
        if data.is_empty() {
            break;
        }
        out.write_all(&data)?;
        written += data.len() as u64;
        left -= data.len() as u64;

        let blocks = data.len() as u64 / bs;
        if blocks == 0 {
            break;
        }
        addr += blocks as i64;
    }
    out.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_several_names() {
        let classes = registry().unwrap();
        let names = vec!["zero:3".to_string(), "memory:5".to_string()];
        let store = open_names(&classes, &names, None, StoreFlags::empty()).unwrap();
        assert_eq!(store.class().name(), "concat");
        assert_eq!(store.end(), 8);
    }

    #[test]
    fn interleaves_when_asked() {
        let classes = registry().unwrap();
        let names = vec!["memory:8".to_string(), "memory:8".to_string()];
        let store = open_names(&classes, &names, Some(4), StoreFlags::empty()).unwrap();
        assert_eq!(store.class().name(), "interleave");
        assert_eq!(store.end(), 16);
    }

    #[test]
    fn no_names_is_an_error() {
        let classes = registry().unwrap();
        assert!(open_names(&classes, &[], None, StoreFlags::empty()).is_err());
    }

    #[test]
    fn dumps_a_remapped_file() {
        let mut temp = tempfile::NamedTempFile::new().unwrap();
        temp.write_all(b"0123456789").unwrap();
        temp.flush().unwrap();

        let classes = registry().unwrap();
        let names = vec![temp.path().display().to_string()];
        let store = open_names(&classes, &names, None, StoreFlags::READONLY).unwrap();
        let store = remap(store, "6+4,0+2").unwrap();

        let mut out = Vec::new();
        assert_eq!(dump(&store, 0, None, &mut out).unwrap(), 6);
        assert_eq!(out, b"678901");

        out.clear();
        assert_eq!(dump(&store, 3, Some(2), &mut out).unwrap(), 2);
        assert_eq!(out, b"90");
    }

    #[test]
    fn builds_from_a_config_file() {
        let mut temp = tempfile::NamedTempFile::new().unwrap();
        write!(
            temp,
            r#"{{"type": "concat", "children": [
                {{"type": "named", "name": "zero:2"}},
                {{"type": "named", "name": "memory:2"}}
            ], "readonly": true}}"#
        )
        .unwrap();
        temp.flush().unwrap();

        let store = open_config(&registry().unwrap(), temp.path()).unwrap();
        assert_eq!(store.end(), 4);
        assert!(store.flags().contains(StoreFlags::READONLY));
    }
}
