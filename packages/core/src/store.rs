//! The store record.

use std::any::Any;
use std::fmt;

use serde::Serialize;
use tracing::debug;
use vstore_extent::{derive, validate_runs, Run, RunMap};

use crate::{Error, ResourceHandle, Result, StoreClass, StoreFlags};

/// A typed, named view over byte-addressable storage.
///
/// The logical address space is described by `runs`, measured in blocks of
/// `block_size` bytes. The derived fields (`blocks`, `size`, the log2
/// shifts, `wrap_src`) are recomputed by one routine whenever runs, block
/// size or end change, and are only readable from outside.
///
/// A store owns its runs, its children and its private state outright.
/// `resource` and `source` are counted handles on external resources;
/// dropping the store frees the children, runs the class cleanup hook and
/// then releases both handles, in that order.
pub struct Store {
    pub(crate) runs: Vec<Run>,
    pub(crate) block_size: u32,
    pub(crate) end: i64,
    pub(crate) wrap_src: i64,
    pub(crate) wrap_dst: i64,
    pub(crate) blocks: i64,
    pub(crate) size: u64,
    pub(crate) log2_block_size: u32,
    pub(crate) log2_blocks_per_page: u32,
    pub(crate) flags: StoreFlags,
    pub(crate) name: Option<String>,
    pub(crate) class: &'static dyn StoreClass,
    pub(crate) resource: Option<ResourceHandle>,
    pub(crate) source: Option<ResourceHandle>,
    pub(crate) misc: Vec<u8>,
    pub(crate) children: Vec<Store>,
    pub(crate) hook: Option<Box<dyn Any + Send + Sync>>,
}

impl Store {
    /// Allocate a store.
    ///
    /// Every constructor, leaf or composite, goes through here: the block
    /// size must be a power of two (or zero with no runs) and the runs must
    /// be well formed.
    pub fn new(
        class: &'static dyn StoreClass,
        resource: Option<ResourceHandle>,
        flags: StoreFlags,
        block_size: u32,
        runs: Vec<Run>,
    ) -> Result<Store> {
        validate_runs(&runs)?;

        let mut store = Store {
            runs,
            block_size,
            end: 0,
            wrap_src: 0,
            wrap_dst: 0,
            blocks: 0,
            size: 0,
            log2_block_size: 0,
            log2_blocks_per_page: 0,
            flags,
            name: None,
            class,
            resource,
            source: None,
            misc: Vec::new(),
            children: Vec::new(),
            hook: None,
        };
        store.derive()?;

        debug!(
            class = class.name(),
            block_size,
            runs = store.runs.len(),
            end = store.end,
            "created store"
        );
        Ok(store)
    }

    /// Recompute the derived fields from runs, block size and end.
    pub(crate) fn derive(&mut self) -> Result<()> {
        let g = derive(&self.runs, self.block_size, self.end)?;
        self.end = g.end;
        self.wrap_src = g.wrap_src;
        self.blocks = g.blocks;
        self.size = g.size;
        self.log2_block_size = g.log2_block_size;
        self.log2_blocks_per_page = g.log2_blocks_per_page;
        Ok(())
    }

    /// Make the run list repeat up to `end` blocks, shifting backend
    /// addresses by `wrap_dst` on every iteration.
    pub fn set_wrap(&mut self, end: i64, wrap_dst: i64) -> Result<()> {
        if end < 0 || wrap_dst < 0 {
            return Err(Error::invalid(format!(
                "bad wrap parameters: end {} wrap_dst {}",
                end, wrap_dst
            )));
        }
        let (old_end, old_dst) = (self.end, self.wrap_dst);
        self.end = end;
        self.wrap_dst = wrap_dst;
        if let Err(e) = self.derive() {
            self.end = old_end;
            self.wrap_dst = old_dst;
            return Err(e);
        }
        Ok(())
    }

    /// The run list together with its wrap parameters.
    pub fn run_map(&self) -> RunMap<'_> {
        RunMap::new(&self.runs, self.end, self.wrap_src, self.wrap_dst)
    }

    pub fn class(&self) -> &'static dyn StoreClass {
        self.class
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Logical length in blocks.
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Backed (non-hole) blocks.
    pub fn blocks(&self) -> i64 {
        self.blocks
    }

    /// Logical length in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn wrap_src(&self) -> i64 {
        self.wrap_src
    }

    pub fn wrap_dst(&self) -> i64 {
        self.wrap_dst
    }

    pub fn log2_block_size(&self) -> u32 {
        self.log2_block_size
    }

    pub fn log2_blocks_per_page(&self) -> u32 {
        self.log2_blocks_per_page
    }

    pub fn flags(&self) -> StoreFlags {
        self.flags
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    pub fn resource(&self) -> Option<&ResourceHandle> {
        self.resource.as_ref()
    }

    /// Replace the resource handle, releasing the previous one.
    pub fn set_resource(&mut self, resource: Option<ResourceHandle>) {
        self.resource = resource;
    }

    pub fn source(&self) -> Option<&ResourceHandle> {
        self.source.as_ref()
    }

    pub fn set_source(&mut self, source: Option<ResourceHandle>) {
        self.source = source;
    }

    pub fn misc(&self) -> &[u8] {
        &self.misc
    }

    pub fn set_misc(&mut self, misc: Vec<u8>) {
        self.misc = misc;
    }

    pub fn children(&self) -> &[Store] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [Store] {
        &mut self.children
    }

    pub fn child(&self, index: usize) -> Result<&Store> {
        self.children
            .get(index)
            .ok_or_else(|| Error::invalid(format!("no child #{}", index)))
    }

    pub fn child_mut(&mut self, index: usize) -> Result<&mut Store> {
        self.children
            .get_mut(index)
            .ok_or_else(|| Error::invalid(format!("no child #{}", index)))
    }

    /// Backend-private state, if it has type `T`.
    pub fn hook<T: Any>(&self) -> Option<&T> {
        self.hook.as_ref().and_then(|h| h.downcast_ref::<T>())
    }

    pub fn hook_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.hook.as_mut().and_then(|h| h.downcast_mut::<T>())
    }

    pub fn set_hook<T: Any + Send + Sync>(&mut self, state: T) {
        self.hook = Some(Box::new(state));
    }

    pub fn take_hook(&mut self) -> Option<Box<dyn Any + Send + Sync>> {
        self.hook.take()
    }

    /// A serializable summary of the store graph.
    pub fn describe(&self) -> StoreInfo {
        StoreInfo {
            class: self.class.name(),
            name: self.name.clone(),
            flags: self.flags.bits(),
            block_size: self.block_size,
            end: self.end,
            blocks: self.blocks,
            size: self.size,
            wrap_src: self.wrap_src,
            wrap_dst: self.wrap_dst,
            runs: self.runs.clone(),
            children: self.children.iter().map(Store::describe).collect(),
        }
    }
}

/// Summary of a store, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreInfo {
    pub class: &'static str,
    pub name: Option<String>,
    pub flags: u32,
    pub block_size: u32,
    pub end: i64,
    pub blocks: i64,
    pub size: u64,
    pub wrap_src: i64,
    pub wrap_dst: i64,
    pub runs: Vec<Run>,
    pub children: Vec<StoreInfo>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("class", &self.class.name())
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("block_size", &self.block_size)
            .field("end", &self.end)
            .field("runs", &self.runs)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{buffer_store, BUFFER_CLASS};

    #[test]
    fn derived_fields_follow_runs() {
        let store = Store::new(
            &BUFFER_CLASS,
            None,
            StoreFlags::empty(),
            512,
            vec![Run::new(0, 10), Run::hole(5), Run::new(15, 10)],
        )
        .unwrap();
        assert_eq!(store.end(), 25);
        assert_eq!(store.blocks(), 20);
        assert_eq!(store.size(), 25 * 512);
        assert_eq!(store.log2_block_size(), 9);
        assert_eq!(store.log2_blocks_per_page(), 3);
        assert!(!store.run_map().is_wrapped());
    }

    #[test]
    fn bad_block_size_is_rejected() {
        let err = Store::new(
            &BUFFER_CLASS,
            None,
            StoreFlags::empty(),
            1000,
            vec![Run::new(0, 1)],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));

        let empty = Store::new(&BUFFER_CLASS, None, StoreFlags::empty(), 0, vec![]).unwrap();
        assert_eq!(empty.size(), 0);
    }

    #[test]
    fn bad_runs_are_rejected() {
        let err = Store::new(
            &BUFFER_CLASS,
            None,
            StoreFlags::empty(),
            1,
            vec![Run::new(0, -3)],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn set_wrap_repeats_runs() {
        let mut store = buffer_store(1, vec![Run::new(0, 4)], vec![0; 16]);
        store.set_wrap(12, 4).unwrap();
        assert_eq!(store.end(), 12);
        assert_eq!(store.blocks(), 12);
        assert_eq!(store.wrap_src(), 4);
        assert!(store.run_map().is_wrapped());

        assert!(store.set_wrap(-1, 0).is_err());
        assert_eq!(store.end(), 12);
    }

    #[test]
    fn hooks_downcast() {
        let mut store = buffer_store(1, vec![Run::new(0, 4)], vec![7; 4]);
        store.set_hook(42u32);
        assert_eq!(store.hook::<u32>(), Some(&42));
        assert!(store.hook::<String>().is_none());
        *store.hook_mut::<u32>().unwrap() = 43;
        assert_eq!(store.hook::<u32>(), Some(&43));
    }

    #[test]
    fn describe_includes_children() {
        let child = buffer_store(1, vec![Run::new(0, 4)], vec![0; 4]);
        let parent = crate::concat_create(vec![child], StoreFlags::empty()).unwrap();
        let info = parent.describe();
        assert_eq!(info.class, "concat");
        assert_eq!(info.children.len(), 1);
        assert_eq!(info.children[0].end, 4);
    }
}
