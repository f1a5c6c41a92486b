//! Store flags and their state machine.
//!
//! Flags come in two groups. Core-owned flags (`READONLY`, `NO_FILEIO`) are
//! plain bookkeeping in the store record. Everything else belongs to the
//! backend: the class must confirm a change through its `set_flags` or
//! `clear_flags` hook before the core records it.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result, Store};

bitflags! {
    /// State bits of a store.
    ///
    /// Bits from [`StoreFlags::BACKEND_SPEC_BASE`] upward are backend-private
    /// and are carried through unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct StoreFlags: u32 {
        /// No writing allowed.
        const READONLY = 0x01;
        /// Can't be made writable.
        const HARD_READONLY = 0x02;
        /// The address range is enforced by the backend itself.
        const ENFORCED = 0x04;
        /// Not in a usable state; the backend resource is released.
        const INACTIVE = 0x08;
        /// Cannot modify anything dangerous.
        const INNOCUOUS = 0x10;
        /// Don't fall back to file I/O when opening.
        const NO_FILEIO = 0x20;

        const _ = !0;
    }
}

impl StoreFlags {
    /// First backend-private bit.
    pub const BACKEND_SPEC_BASE: u32 = 0x100;

    /// Flags the core records without asking the class.
    pub const CORE: StoreFlags = StoreFlags::READONLY.union(StoreFlags::NO_FILEIO);

    /// The backend-owned part of these flags.
    pub fn backend(self) -> StoreFlags {
        self.difference(Self::CORE)
    }

    /// The `n`th backend-private bit.
    pub fn backend_private(n: u32) -> StoreFlags {
        StoreFlags::from_bits_retain(Self::BACKEND_SPEC_BASE << n)
    }
}

impl Store {
    /// Set `flags` on the store.
    ///
    /// Only bits not already set are considered. Backend-owned bits must be
    /// accepted by the class first; a class without a `set_flags` hook
    /// refuses them with `InvalidArgument`.
    pub fn set_flags(&mut self, flags: StoreFlags) -> Result<()> {
        let new = flags.difference(self.flags);
        if new.is_empty() {
            return Ok(());
        }

        let backend = new.backend();
        if !backend.is_empty() {
            let class = self.class;
            class.set_flags(self, backend)?;
        }

        self.flags.insert(new);
        Ok(())
    }

    /// Clear `flags` on the store.
    ///
    /// Clearing `READONLY` on a `HARD_READONLY` store fails with `ReadOnly`.
    pub fn clear_flags(&mut self, flags: StoreFlags) -> Result<()> {
        let kill = flags.intersection(self.flags);
        if kill.is_empty() {
            return Ok(());
        }

        if kill.contains(StoreFlags::READONLY)
            && self.flags.contains(StoreFlags::HARD_READONLY)
            && !kill.contains(StoreFlags::HARD_READONLY)
        {
            return Err(Error::ReadOnly);
        }

        let backend = kill.backend();
        if !backend.is_empty() {
            let class = self.class;
            class.clear_flags(self, backend)?;
        }

        self.flags.remove(kill);
        Ok(())
    }

    /// Set `flags` on every child, undoing the children already changed if
    /// one of them fails.
    ///
    /// Composite classes use this as their `set_flags` hook; the caller
    /// records the flags on the parent.
    pub fn set_child_flags(&mut self, flags: StoreFlags) -> Result<()> {
        let mut originals = Vec::with_capacity(self.children.len());

        for i in 0..self.children.len() {
            let child = &mut self.children[i];
            originals.push(child.flags);
            if let Err(e) = child.set_flags(flags) {
                warn!(child = i, error = %e, "child refused flags, rolling back");
                for (j, orig) in originals.iter().enumerate().take(i) {
                    let added = flags.difference(*orig);
                    if let Err(e) = self.children[j].clear_flags(added) {
                        warn!(child = j, error = %e, "rollback failed");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Clear `flags` on every child, restoring the children already changed
    /// if one of them fails.
    pub fn clear_child_flags(&mut self, flags: StoreFlags) -> Result<()> {
        let mut originals = Vec::with_capacity(self.children.len());

        for i in 0..self.children.len() {
            let child = &mut self.children[i];
            originals.push(child.flags);
            if let Err(e) = child.clear_flags(flags) {
                warn!(child = i, error = %e, "child refused flag clear, rolling back");
                for (j, orig) in originals.iter().enumerate().take(i) {
                    let removed = flags.intersection(*orig);
                    if let Err(e) = self.children[j].set_flags(removed) {
                        warn!(child = j, error = %e, "rollback failed");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// True if the store can be handed to an untrusted party without letting
    /// it reach outside the store's range.
    ///
    /// That requires an active store whose range is enforced by the
    /// backend, or one that is hard read-only and not being opened for
    /// writing. Composite stores also require it of every child.
    pub fn is_securely_returnable(&self, open_for_write: bool) -> bool {
        let flags = self.flags;
        if flags.contains(StoreFlags::INACTIVE) {
            return false;
        }
        let own = flags.contains(StoreFlags::ENFORCED)
            || (flags.contains(StoreFlags::HARD_READONLY) && !open_for_write);
        own && self
            .children
            .iter()
            .all(|c| c.is_securely_returnable(open_for_write))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{buffer_store, FlagState, FLAG_CLASS};
    use crate::{concat_create, Run};

    fn flag_store(refuse: StoreFlags) -> Store {
        let mut store = Store::new(
            &FLAG_CLASS,
            None,
            StoreFlags::empty(),
            1,
            vec![Run::new(0, 4)],
        )
        .unwrap();
        store.set_hook(FlagState {
            refuse,
            calls: Vec::new(),
        });
        store
    }

    #[test]
    fn core_flags_need_no_hook() {
        let mut store = buffer_store(1, vec![Run::new(0, 4)], vec![0; 4]);
        store.set_flags(StoreFlags::READONLY).unwrap();
        assert!(store.flags().contains(StoreFlags::READONLY));
        store.clear_flags(StoreFlags::READONLY).unwrap();
        assert!(store.flags().is_empty());
    }

    #[test]
    fn backend_flags_without_hook_are_invalid() {
        let mut store = buffer_store(1, vec![Run::new(0, 4)], vec![0; 4]);
        let err = store.set_flags(StoreFlags::ENFORCED).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert!(store.flags().is_empty());
    }

    #[test]
    fn only_changed_bits_reach_the_class() {
        let mut store = flag_store(StoreFlags::empty());
        store
            .set_flags(StoreFlags::INNOCUOUS | StoreFlags::READONLY)
            .unwrap();
        store
            .set_flags(StoreFlags::INNOCUOUS | StoreFlags::ENFORCED)
            .unwrap();
        let calls = &store.hook::<FlagState>().unwrap().calls;
        assert_eq!(
            calls,
            &vec![
                (true, StoreFlags::INNOCUOUS),
                (true, StoreFlags::ENFORCED)
            ]
        );
        assert!(store
            .flags()
            .contains(StoreFlags::INNOCUOUS | StoreFlags::ENFORCED | StoreFlags::READONLY));
    }

    #[test]
    fn refused_backend_flag_is_not_recorded() {
        let mut store = flag_store(StoreFlags::ENFORCED);
        assert!(store.set_flags(StoreFlags::ENFORCED).is_err());
        assert!(!store.flags().contains(StoreFlags::ENFORCED));
    }

    #[test]
    fn hard_readonly_cannot_become_writable() {
        let mut store = flag_store(StoreFlags::empty());
        store
            .set_flags(StoreFlags::HARD_READONLY | StoreFlags::READONLY)
            .unwrap();
        let err = store.clear_flags(StoreFlags::READONLY).unwrap_err();
        assert!(matches!(err, Error::ReadOnly));
        assert!(store.flags().contains(StoreFlags::READONLY));
    }

    #[test]
    fn private_bits_are_backend_owned() {
        let private = StoreFlags::backend_private(0);
        assert_eq!(private.bits(), 0x100);
        assert_eq!(private.backend(), private);
        assert!(StoreFlags::READONLY.backend().is_empty());
    }

    #[test]
    fn composite_flags_roll_back_on_failure() {
        let children = vec![
            flag_store(StoreFlags::empty()),
            flag_store(StoreFlags::empty()),
            flag_store(StoreFlags::INNOCUOUS),
        ];
        let mut parent = concat_create(children, StoreFlags::empty()).unwrap();

        let err = parent.set_flags(StoreFlags::INNOCUOUS).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert!(!parent.flags().contains(StoreFlags::INNOCUOUS));
        for child in parent.children() {
            assert!(!child.flags().contains(StoreFlags::INNOCUOUS));
        }

        // The first two children saw the set and then the rollback.
        let calls = &parent.children()[0].hook::<FlagState>().unwrap().calls;
        assert_eq!(
            calls,
            &vec![
                (true, StoreFlags::INNOCUOUS),
                (false, StoreFlags::INNOCUOUS)
            ]
        );
    }

    #[test]
    fn composite_flags_propagate() {
        let children = vec![flag_store(StoreFlags::empty()), flag_store(StoreFlags::empty())];
        let mut parent = concat_create(children, StoreFlags::empty()).unwrap();
        parent.set_flags(StoreFlags::ENFORCED).unwrap();
        assert!(parent.flags().contains(StoreFlags::ENFORCED));
        assert!(parent
            .children()
            .iter()
            .all(|c| c.flags().contains(StoreFlags::ENFORCED)));

        assert!(parent.is_securely_returnable(true));

        parent.clear_flags(StoreFlags::ENFORCED).unwrap();
        assert!(parent
            .children()
            .iter()
            .all(|c| !c.flags().contains(StoreFlags::ENFORCED)));
        assert!(!parent.is_securely_returnable(false));
    }

    #[test]
    fn securely_returnable_rules() {
        let mut store = flag_store(StoreFlags::empty());
        assert!(!store.is_securely_returnable(false));

        store.set_flags(StoreFlags::HARD_READONLY).unwrap();
        assert!(store.is_securely_returnable(false));
        assert!(!store.is_securely_returnable(true));

        store.set_flags(StoreFlags::INACTIVE).unwrap();
        assert!(!store.is_securely_returnable(false));
    }
}
