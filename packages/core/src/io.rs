//! The generic read/write engine.
//!
//! Requests are expressed in logical block addresses. The engine walks the
//! run list, splits each request at run boundaries (and wrap boundaries),
//! and hands every piece to the class with a backend-relative address.

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::{Error, MemoryObject, Protection, ResourceHandle, Result, RunCursor, Store, StoreFlags};

impl Store {
    fn check_active(&self) -> Result<()> {
        self.class.check_usable(self)?;
        if self.flags.contains(StoreFlags::INACTIVE) {
            return Err(Error::invalid("store is inactive"));
        }
        Ok(())
    }

    /// Validate a read request and position a cursor on it.
    ///
    /// Returns the clamped amount alongside the cursor.
    fn start_read(&self, addr: i64, amount: usize) -> Result<(RunCursor, usize)> {
        self.check_active()?;
        if addr < 0 || addr >= self.end {
            return Err(Error::AddressOutOfRange {
                addr,
                end: self.end,
            });
        }

        let available = ((self.end - addr) as u64).saturating_mul(u64::from(self.block_size));
        let amount = usize::try_from(available).map_or(amount, |a| amount.min(a));

        let cursor = self.run_map().find_first_run(addr)?;
        if cursor.is_hole() {
            return Err(Error::io(format!("read at block {} hits a hole", addr)));
        }
        Ok((cursor, amount))
    }

    /// Read up to `amount` bytes starting at block `addr`.
    ///
    /// The amount is clamped to the end of the store. Fewer bytes than
    /// requested come back when a backend reads short, when a hole is
    /// reached, or when a backend fails after some data was already read.
    pub fn read(&self, addr: i64, amount: usize) -> Result<Bytes> {
        let (cursor, amount) = self.start_read(addr, amount)?;
        if amount == 0 {
            return Ok(Bytes::new());
        }

        let in_run = (cursor.remaining() as u64).saturating_mul(u64::from(self.block_size));
        if amount as u64 <= in_run {
            trace!(addr, amount, index = cursor.index, "single-run read");
            let mut data = self
                .class
                .read(self, cursor.address(), cursor.index, amount)?;
            data.truncate(amount);
            return Ok(data);
        }

        let mut buf = BytesMut::with_capacity(amount);
        self.read_segments(cursor, amount, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Read like [`Store::read`], appending to `buf`.
    ///
    /// Returns the number of bytes appended.
    pub fn read_into(&self, addr: i64, amount: usize, buf: &mut BytesMut) -> Result<usize> {
        let (cursor, amount) = self.start_read(addr, amount)?;
        if amount == 0 {
            return Ok(0);
        }
        buf.reserve(amount);
        self.read_segments(cursor, amount, buf)
    }

    fn read_segments(&self, mut cursor: RunCursor, amount: usize, buf: &mut BytesMut) -> Result<usize> {
        let map = self.run_map();
        let bs = u64::from(self.block_size);
        let mut done = 0usize;

        loop {
            if cursor.is_hole() {
                // Only reachable after the first segment.
                warn!(at = cursor.logical_address(), done, "read stopped at a hole");
                break;
            }

            let in_run = (cursor.remaining() as u64).saturating_mul(bs);
            let seg = usize::try_from(in_run).map_or(amount - done, |r| r.min(amount - done));

            trace!(addr = cursor.address(), index = cursor.index, seg, "read segment");
            match self.class.read(self, cursor.address(), cursor.index, seg) {
                Ok(data) => {
                    let n = data.len().min(seg);
                    buf.extend_from_slice(&data[..n]);
                    done += n;
                    if n < seg {
                        warn!(requested = seg, got = n, "short read");
                        break;
                    }
                }
                Err(e) if done == 0 => return Err(e),
                Err(e) => {
                    warn!(error = %e, done, "read failed part way");
                    break;
                }
            }

            if done == amount || !map.next_run(&mut cursor) {
                break;
            }
        }

        Ok(done)
    }

    /// Write `data` starting at block `addr`, returning the bytes written.
    ///
    /// The length must be a whole number of blocks and the range must lie
    /// within the store. The transfer stops early, without error, at the
    /// first short write from the backend, at a hole, or at a backend error
    /// after the first segment.
    pub fn write(&mut self, addr: i64, data: &[u8]) -> Result<usize> {
        self.class.check_usable(self)?;
        if self.flags.contains(StoreFlags::READONLY) {
            return Err(Error::ReadOnly);
        }
        self.check_active()?;

        let bs = u64::from(self.block_size);
        if bs == 0 || data.len() as u64 % bs != 0 {
            return Err(Error::invalid(format!(
                "write of {} bytes is not a multiple of the block size {}",
                data.len(),
                bs
            )));
        }
        let blocks = (data.len() as u64 / bs) as i64;
        if addr < 0 || addr >= self.end || blocks > self.end - addr {
            return Err(Error::AddressOutOfRange {
                addr,
                end: self.end,
            });
        }
        if data.is_empty() {
            return Ok(0);
        }

        let mut cursor = self.run_map().find_first_run(addr)?;
        if cursor.is_hole() {
            return Err(Error::io(format!("write at block {} hits a hole", addr)));
        }

        let class = self.class;
        let mut written = 0usize;
        loop {
            let in_run = (cursor.remaining() as u64).saturating_mul(bs);
            let left = data.len() - written;
            let seg = usize::try_from(in_run).map_or(left, |r| r.min(left));

            trace!(addr = cursor.address(), index = cursor.index, seg, "write segment");
            match class.write(self, cursor.address(), cursor.index, &data[written..written + seg]) {
                Ok(n) => {
                    // Partial blocks do not count as written.
                    let n = n.min(seg) / bs as usize * bs as usize;
                    written += n;
                    if n < seg {
                        warn!(requested = seg, wrote = n, "short write");
                        break;
                    }
                }
                Err(e) if written == 0 => return Err(e),
                Err(e) => {
                    warn!(error = %e, written, "write failed part way");
                    break;
                }
            }

            if written == data.len() || !self.run_map().next_run(&mut cursor) {
                break;
            }
            if cursor.is_hole() {
                warn!(at = cursor.logical_address(), written, "write stopped at a hole");
                break;
            }
        }

        Ok(written)
    }

    /// Map the store's contents.
    ///
    /// When the class cannot map and only read access is asked for, the
    /// whole store is copied into a fresh [`MemoryObject`].
    pub fn map(&self, protection: Protection) -> Result<ResourceHandle> {
        self.class.check_usable(self)?;
        match self.class.map(self, protection) {
            Err(e) if e.is_unsupported() && protection == Protection::ReadOnly => {
                debug!(class = self.class.name(), size = self.size, "mapping by copy");
                let data = self.read_whole()?;
                Ok(ResourceHandle::new(MemoryObject::from_vec(data)))
            }
            other => other,
        }
    }

    /// The store's full contents, with holes read as zeros.
    pub(crate) fn read_whole(&self) -> Result<Vec<u8>> {
        self.check_active()?;
        let len = usize::try_from(self.size).map_err(|_| Error::NoMemory)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| Error::NoMemory)?;
        if len == 0 {
            return Ok(data);
        }

        let map = self.run_map();
        let bs = self.block_size as usize;
        let mut cursor = map.find_first_run(0)?;
        loop {
            let seg = cursor.remaining() as usize * bs;
            if cursor.is_hole() {
                data.resize(data.len() + seg, 0);
            } else {
                let mut piece = self.class.read(self, cursor.address(), cursor.index, seg)?;
                if piece.len() < seg {
                    return Err(Error::io(format!(
                        "short read of {} bytes at block {}",
                        piece.len(),
                        cursor.logical_address()
                    )));
                }
                piece.truncate(seg);
                data.extend_from_slice(&piece);
            }
            if !map.next_run(&mut cursor) {
                break;
            }
        }
        Ok(data)
    }
}
