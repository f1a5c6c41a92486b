//! Serializable descriptions of store graphs.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    concat_create, copy_create, interleave_create, ClassRegistry, Result, Run, Store, StoreFlags,
};

/// A store graph to build.
///
/// ```json
/// {"type": "remap", "runs": [{"start": 0, "length": 8}],
///  "child": {"type": "named", "name": "file:disk.img", "readonly": true}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// A store opened by `TYPE:NAME`
    Named {
        name: String,
        #[serde(default)]
        readonly: bool,
    },
    /// Children laid end to end
    Concat {
        children: Vec<StoreConfig>,
        #[serde(default)]
        readonly: bool,
    },
    /// Children striped in chunks of `interleave` bytes
    Interleave {
        interleave: u64,
        children: Vec<StoreConfig>,
        #[serde(default)]
        readonly: bool,
    },
    /// A re-scoped view of `child`
    Remap {
        runs: Vec<Run>,
        child: Box<StoreConfig>,
        #[serde(default)]
        readonly: bool,
    },
    /// A private in-memory snapshot of `child`
    Copy {
        child: Box<StoreConfig>,
        #[serde(default)]
        readonly: bool,
    },
}

impl StoreConfig {
    fn readonly(&self) -> bool {
        match self {
            StoreConfig::Named { readonly, .. }
            | StoreConfig::Concat { readonly, .. }
            | StoreConfig::Interleave { readonly, .. }
            | StoreConfig::Remap { readonly, .. }
            | StoreConfig::Copy { readonly, .. } => *readonly,
        }
    }

    /// Open every store the description names and compose them.
    pub fn build(&self, classes: &ClassRegistry) -> Result<Store> {
        let flags = if self.readonly() {
            StoreFlags::READONLY
        } else {
            StoreFlags::empty()
        };

        let mut store = match self {
            StoreConfig::Named { name, .. } => classes.open(name, flags)?,
            StoreConfig::Concat { children, .. } => {
                concat_create(build_all(children, classes)?, StoreFlags::empty())?
            }
            StoreConfig::Interleave {
                interleave,
                children,
                ..
            } => interleave_create(build_all(children, classes)?, *interleave, StoreFlags::empty())?,
            StoreConfig::Remap { runs, child, .. } => child.build(classes)?.remap(runs)?,
            StoreConfig::Copy { child, .. } => copy_create(&child.build(classes)?, StoreFlags::empty())?,
        };

        store.set_flags(flags)?;
        debug!(class = store.class().name(), end = store.end(), "built store from config");
        Ok(store)
    }
}

fn build_all(configs: &[StoreConfig], classes: &ClassRegistry) -> Result<Vec<Store>> {
    configs.iter().map(|c| c.build(classes)).collect()
}
