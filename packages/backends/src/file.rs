use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bytes::Bytes;
use tracing::{debug, info};
use vstore_core::{
    decode_leaf, encode_leaf, tags, ClassRegistry, EncodeSink, Error, Resource, ResourceHandle,
    Result, Run, Store, StoreClass, StoreDecoder, StoreFlags,
};

/// An open file.
///
/// The file is shared by every store holding a handle on it; seeks and
/// transfers happen under its lock.
#[derive(Debug)]
pub struct FileResource {
    path: PathBuf,
    writable: bool,
    file: Mutex<File>,
}

impl FileResource {
    /// Open `path`, for writing unless `readonly`.
    pub fn open(path: impl AsRef<Path>, readonly: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(!readonly)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
                _ => Error::from(e),
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            writable: !readonly,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.lock().metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_at(&self, offset: u64, amount: usize) -> Result<Vec<u8>> {
        let mut file = self.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(amount);
        Read::by_ref(&mut *file)
            .take(amount as u64)
            .read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        let mut file = self.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(data.len())
    }

    fn set_len(&self, len: u64) -> Result<()> {
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        self.lock().set_len(len)?;
        Ok(())
    }
}

impl Resource for FileResource {
    fn kind(&self) -> &'static str {
        "file"
    }
}

/// Regular files, addressed in bytes.
///
/// Setting `INACTIVE` closes the file; clearing it opens the file again by
/// the store's name.
pub struct FileClass;

pub static FILE_CLASS: FileClass = FileClass;

fn file_runs(len: u64) -> Result<Vec<Run>> {
    let len = i64::try_from(len).map_err(|_| Error::invalid(format!("file size {} too large", len)))?;
    Ok(match len {
        0 => Vec::new(),
        n => vec![Run::new(0, n)],
    })
}

/// Open the file at `path` as a store covering all of it.
///
/// The file is opened read-only when `flags` has `READONLY`.
pub fn file_open(path: impl AsRef<Path>, flags: StoreFlags) -> Result<Store> {
    let path = path.as_ref();
    let resource = FileResource::open(path, flags.contains(StoreFlags::READONLY))?;
    let runs = file_runs(resource.len()?)?;
    let mut store = Store::new(&FILE_CLASS, Some(ResourceHandle::new(resource)), flags, 1, runs)?;
    store.set_name(Some(path.display().to_string()));
    info!(path = %path.display(), size = store.size(), "opened file store");
    Ok(store)
}

fn file(store: &Store) -> Result<&FileResource> {
    store
        .resource()
        .and_then(|r| r.downcast_ref::<FileResource>())
        .ok_or_else(|| Error::io("file store has no open file"))
}

fn reopen(store: &Store) -> Result<ResourceHandle> {
    let name = store
        .name()
        .ok_or_else(|| Error::NotFound("file store has no name to reopen".into()))?;
    let resource = FileResource::open(name, store.flags().contains(StoreFlags::READONLY))?;
    debug!(path = name, "reopened file");
    Ok(ResourceHandle::new(resource))
}

impl StoreClass for FileClass {
    fn name(&self) -> &'static str {
        "file"
    }

    fn id(&self) -> i32 {
        tags::FILE
    }

    fn read(&self, store: &Store, addr: i64, _index: usize, amount: usize) -> Result<Bytes> {
        let offset = addr as u64 * u64::from(store.block_size());
        Ok(Bytes::from(file(store)?.read_at(offset, amount)?))
    }

    fn write(&self, store: &mut Store, addr: i64, _index: usize, data: &[u8]) -> Result<usize> {
        let offset = addr as u64 * u64::from(store.block_size());
        file(store)?.write_at(offset, data)
    }

    fn set_size(&self, store: &mut Store, new_size: u64) -> Result<()> {
        if store.flags().contains(StoreFlags::READONLY) {
            return Err(Error::ReadOnly);
        }
        let runs = file_runs(new_size)?;
        file(store)?.set_len(new_size)?;
        store.set_runs(runs)
    }

    fn encode(&self, store: &Store, sink: &mut dyn EncodeSink) -> Result<()> {
        encode_leaf(store, sink)
    }

    fn decode(&self, dec: &mut StoreDecoder<'_>, _classes: &ClassRegistry) -> Result<Store> {
        // A record without a handle comes back inactive; only the receiver
        // decides to open the named file, by clearing INACTIVE.
        decode_leaf(dec, |parts| {
            let flags = match parts.handle {
                Some(_) => parts.flags,
                None => parts.flags | StoreFlags::INACTIVE,
            };
            Store::new(&FILE_CLASS, parts.handle, flags, parts.block_size, parts.runs)
        })
    }

    fn set_flags(&self, store: &mut Store, flags: StoreFlags) -> Result<()> {
        let allowed = StoreFlags::ENFORCED
            | StoreFlags::INNOCUOUS
            | StoreFlags::HARD_READONLY
            | StoreFlags::INACTIVE;
        if !flags.difference(allowed).is_empty() {
            return Err(Error::invalid(format!("file cannot set flags {:#x}", flags.bits())));
        }
        if flags.contains(StoreFlags::ENFORCED) {
            let len = file(store)?.len()?;
            if store.runs() != file_runs(len)?.as_slice() {
                return Err(Error::invalid("store does not cover exactly its file"));
            }
        }
        if flags.contains(StoreFlags::INACTIVE) {
            debug!(name = store.name(), "releasing file");
            store.set_resource(None);
        }
        Ok(())
    }

    fn clear_flags(&self, store: &mut Store, flags: StoreFlags) -> Result<()> {
        if flags.contains(StoreFlags::INACTIVE) {
            let handle = reopen(store)?;
            store.set_resource(Some(handle));
        }
        Ok(())
    }

    fn open(&self, name: &str, flags: StoreFlags, _classes: &ClassRegistry) -> Result<Store> {
        file_open(name, flags)
    }

    fn validate_name(&self, name: &str, _classes: &ClassRegistry) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid("empty file name"));
        }
        Ok(())
    }
}
