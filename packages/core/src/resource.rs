//! Reference-counted handles on externally issued resources.
//!
//! A store's `resource` and `source` are handles on things the core does
//! not own: open files, memory objects, device connections. Cloning a
//! handle acquires a new reference; the resource itself is released when
//! the last handle is dropped. The handle value can never be duplicated in
//! any other way.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::{Error, Result};

/// An external resource a store may hold a handle on.
///
/// Implementors release whatever they wrap in their own `Drop`.
pub trait Resource: Send + Sync + fmt::Debug + 'static {
    /// Short description of the resource kind, for diagnostics.
    fn kind(&self) -> &'static str;
}

trait AnyResource: Resource {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Resource> AnyResource for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A counted reference on a [`Resource`].
///
/// Two handles compare equal when they refer to the same resource.
#[derive(Clone)]
pub struct ResourceHandle(Arc<dyn AnyResource>);

impl ResourceHandle {
    pub fn new<R: Resource>(resource: R) -> Self {
        Self(Arc::new(resource))
    }

    pub fn kind(&self) -> &'static str {
        self.0.kind()
    }

    /// Borrow the resource as its concrete type.
    pub fn downcast_ref<R: Resource>(&self) -> Option<&R> {
        self.0.as_any().downcast_ref::<R>()
    }

    /// Number of live handles on this resource.
    pub fn references(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// True if both handles refer to the same resource.
    pub fn same_resource(&self, other: &ResourceHandle) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0) as *const (),
            Arc::as_ptr(&other.0) as *const (),
        )
    }
}

impl PartialEq for ResourceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same_resource(other)
    }
}

impl Eq for ResourceHandle {}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceHandle").field(&self.0).finish()
    }
}

/// A shared, growable block of memory.
///
/// This is the resource behind memory-backed stores and behind the copy
/// that [`Store::map`](crate::Store::map) falls back to when a class has no
/// mapping of its own.
#[derive(Debug, Default)]
pub struct MemoryObject {
    data: RwLock<Vec<u8>>,
}

impl MemoryObject {
    /// A zero-filled object of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self::from_vec(vec![0; size])
    }

    /// Like [`MemoryObject::new`], failing with `NoMemory` instead of
    /// aborting when the allocation cannot be made.
    pub fn try_new(size: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(size).map_err(|_| Error::NoMemory)?;
        data.resize(size, 0);
        Ok(Self::from_vec(data))
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy up to `len` bytes starting at `offset`; short at the end.
    pub fn read_at(&self, offset: usize, len: usize) -> Vec<u8> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        if offset >= data.len() {
            return Vec::new();
        }
        let end = offset.saturating_add(len).min(data.len());
        data[offset..end].to_vec()
    }

    /// Overwrite bytes at `offset`, returning how many fit.
    pub fn write_at(&self, offset: usize, bytes: &[u8]) -> usize {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        if offset >= data.len() {
            return 0;
        }
        let n = bytes.len().min(data.len() - offset);
        data[offset..offset + n].copy_from_slice(&bytes[..n]);
        n
    }

    /// Grow or shrink the object, zero-filling new space.
    pub fn resize(&self, size: usize) {
        self.data
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .resize(size, 0);
    }

    /// Fallible [`MemoryObject::resize`].
    pub fn try_resize(&self, size: usize) -> Result<()> {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        let grow = size.saturating_sub(data.len());
        data.try_reserve_exact(grow).map_err(|_| Error::NoMemory)?;
        data.resize(size, 0);
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Resource for MemoryObject {
    fn kind(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Counted(Arc<AtomicUsize>);

    impl Resource for Counted {
        fn kind(&self) -> &'static str {
            "counted"
        }
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn released_exactly_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let handle = ResourceHandle::new(Counted(releases.clone()));
        let second = handle.clone();
        assert_eq!(handle.references(), 2);
        assert_eq!(handle, second);

        drop(handle);
        assert_eq!(releases.load(Ordering::SeqCst), 0);
        drop(second);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn downcast_to_concrete_type() {
        let handle = ResourceHandle::new(MemoryObject::new(16));
        assert_eq!(handle.kind(), "memory");
        assert_eq!(handle.downcast_ref::<MemoryObject>().unwrap().len(), 16);
        assert!(handle.downcast_ref::<Counted>().is_none());
    }

    #[test]
    fn distinct_resources_are_not_equal() {
        let a = ResourceHandle::new(MemoryObject::new(1));
        let b = ResourceHandle::new(MemoryObject::new(1));
        assert_ne!(a, b);
    }

    #[test]
    fn memory_object_bounds() {
        let mem = MemoryObject::from_vec(b"hello world".to_vec());
        assert_eq!(mem.read_at(6, 100), b"world");
        assert!(mem.read_at(50, 1).is_empty());
        assert_eq!(mem.write_at(9, b"xyz"), 2);
        assert_eq!(mem.snapshot(), b"hello worxy");
        mem.resize(2);
        assert_eq!(mem.snapshot(), b"he");
    }

    #[test]
    fn impossible_sizes_are_no_memory() {
        assert!(matches!(MemoryObject::try_new(usize::MAX), Err(Error::NoMemory)));
        let mem = MemoryObject::try_new(4).unwrap();
        assert!(matches!(mem.try_resize(usize::MAX), Err(Error::NoMemory)));
        assert_eq!(mem.len(), 4);
        mem.try_resize(6).unwrap();
        assert_eq!(mem.snapshot(), [0; 6]);
    }
}
