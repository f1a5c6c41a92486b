//! Cloning, replacing parts of, and dropping stores.

use tracing::{debug, trace};
use vstore_extent::validate_runs;

use crate::{Result, Run, Store};

impl Store {
    /// Duplicate the store.
    ///
    /// Generic fields are copied, children are cloned recursively and the
    /// resource and source handles gain a reference; then the class's
    /// `clone_state` hook copies backend-private state. If any step fails,
    /// everything cloned so far is dropped.
    pub fn try_clone(&self) -> Result<Store> {
        let children = self
            .children
            .iter()
            .map(Store::try_clone)
            .collect::<Result<Vec<_>>>()?;

        let mut clone = Store {
            runs: self.runs.clone(),
            block_size: self.block_size,
            end: self.end,
            wrap_src: self.wrap_src,
            wrap_dst: self.wrap_dst,
            blocks: self.blocks,
            size: self.size,
            log2_block_size: self.log2_block_size,
            log2_blocks_per_page: self.log2_blocks_per_page,
            flags: self.flags,
            name: self.name.clone(),
            class: self.class,
            resource: self.resource.clone(),
            source: self.source.clone(),
            misc: self.misc.clone(),
            children,
            hook: None,
        };

        self.class.clone_state(self, &mut clone)?;
        trace!(class = self.class.name(), "cloned store");
        Ok(clone)
    }

    /// Install a new run list.
    ///
    /// Any wrap set up on the old list is dropped. On error the store is
    /// unchanged.
    pub fn set_runs(&mut self, runs: Vec<Run>) -> Result<()> {
        validate_runs(&runs)?;
        let old = std::mem::replace(&mut self.runs, runs);
        let (old_end, old_dst) = (self.end, self.wrap_dst);
        self.end = 0;
        self.wrap_dst = 0;
        if let Err(e) = self.derive() {
            self.runs = old;
            self.end = old_end;
            self.wrap_dst = old_dst;
            return Err(e);
        }
        Ok(())
    }

    /// Replace the children, dropping the old ones.
    pub fn set_children(&mut self, children: Vec<Store>) {
        self.children = children;
    }

    /// Release the source handle.
    pub fn close_source(&mut self) {
        self.source = None;
    }

    /// Resize the store through the class.
    pub fn set_size(&mut self, new_size: u64) -> Result<()> {
        let class = self.class;
        class.check_usable(self)?;
        class.set_size(self, new_size)?;
        debug!(class = class.name(), new_size, "resized store");
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.children.clear();
        let class = self.class;
        class.cleanup(self);
        self.resource = None;
        self.source = None;
    }
}
