//! The per-domain block cache: mapping block numbers to buffers and
//! the read/write front end callers go through.

use std::ops::BitOr;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::ondisk;
use crate::result::io_fault;
use crate::{BlockNo, Error, Fs, LockDomain, Result};

/// Flags controlling buffer I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dio(u32);

impl Dio {
    pub const NONE: Dio = Dio(0);
    /// Issue the read or write without blocking on it.
    pub const START: Dio = Dio(1 << 0);
    /// Block until any I/O for the buffer has completed.
    pub const WAIT: Dio = Dio(1 << 1);
    /// Discard cached validity and force a re-read from disk.
    pub const FORCE: Dio = Dio(1 << 2);
    /// Clear the dirty flag without performing I/O.
    pub const CLEAN: Dio = Dio(1 << 3);
    /// Mark the buffer dirty. The buffer must be current.
    pub const DIRTY: Dio = Dio(1 << 4);

    pub fn contains(self, other: Dio) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Dio {
    type Output = Dio;

    fn bitor(self, rhs: Dio) -> Dio {
        Dio(self.0 | rhs.0)
    }
}

impl Fs {
    /// Look up (or, with `create`, map) the buffer for a block under a
    /// domain. With `create`, a cache slot is allocated and mapped
    /// even if the block is absent on disk, which is how freshly
    /// allocated blocks enter the cache.
    pub fn get_block(
        &self,
        domain: &Arc<LockDomain>,
        blkno: BlockNo,
        create: bool,
    ) -> Option<Buffer> {
        let mut cache = domain.cache.lock();
        if let Some(buf) = cache.get(&blkno) {
            return Some(buf.clone());
        }
        if !create {
            return None;
        }

        let buf = Buffer::new(blkno, self.config.block_size);
        cache.insert(blkno, buf.clone());
        log::trace!(
            "mapped block {} into domain {}",
            blkno,
            domain.name()
        );
        Some(buf)
    }

    /// Read a block from disk, returning a referenced buffer. The
    /// returned handle is dropped on error.
    pub fn read_block(
        &self,
        domain: &Arc<LockDomain>,
        blkno: BlockNo,
        flags: Dio,
    ) -> Result<Buffer> {
        let buf = self
            .get_block(domain, blkno, true)
            .expect("get_block with create cannot miss");
        self.reread(&buf, flags)?;
        Ok(buf)
    }

    /// (Re-)read an already-mapped buffer.
    ///
    /// FORCE discards cached validity first. START issues read I/O if
    /// the buffer is not current. WAIT blocks until completion and
    /// fails with an I/O fault if the buffer still is not current, or
    /// if the filesystem has shut down in the meantime.
    pub fn reread(&self, buf: &Buffer, flags: Dio) -> Result<()> {
        self.fail_if_shutdown()?;

        if flags.contains(Dio::FORCE) {
            buf.inner.state.lock().uptodate = false;
        }

        if flags.contains(Dio::START) {
            self.io.submit_read(buf);
        }

        if flags.contains(Dio::WAIT) {
            buf.wait_io();
            if !buf.is_uptodate() {
                self.io_error_block(buf);
                return Err(io_fault(buf.blkno(), "read did not complete"));
            }
            self.fail_if_shutdown()?;
        }

        Ok(())
    }

    /// Write a buffer to disk and/or wait for its write-back.
    ///
    /// CLEAN clears dirty without I/O. DIRTY requires a current buffer
    /// and marks it dirty. START issues write I/O if the buffer is
    /// dirty. WAIT blocks for completion and faults if the buffer is
    /// still dirty or not current afterward. On a read-only or
    /// shut-down filesystem nothing touches storage.
    pub fn write_block(&self, buf: &Buffer, flags: Dio) -> Result<()> {
        if self.config.read_only {
            log::warn!(
                "write of block {} on a read-only filesystem",
                buf.blkno()
            );
            return Err(Error::ReadOnly);
        }
        self.fail_if_shutdown()?;

        if flags.contains(Dio::CLEAN) {
            buf.inner.state.lock().dirty = false;
        }

        if flags.contains(Dio::DIRTY) {
            let mut state = buf.inner.state.lock();
            if !state.uptodate {
                drop(state);
                log::warn!("DIRTY mark of stale block {}", buf.blkno());
                return Err(io_fault(buf.blkno(), "DIRTY mark of a stale buffer"));
            }
            state.dirty = true;
        }

        if flags.contains(Dio::START) && buf.is_dirty() {
            buf.wait_io();
            self.io.submit_write(buf);
        }

        if flags.contains(Dio::WAIT) {
            buf.wait_io();
            let (uptodate, dirty) = {
                let state = buf.inner.state.lock();
                (state.uptodate, state.dirty)
            };
            if !uptodate || dirty {
                self.io_error_block(buf);
                return Err(io_fault(buf.blkno(), "write did not complete"));
            }
            self.fail_if_shutdown()?;
        }

        Ok(())
    }

    /// Prepare a freshly mapped buffer for a newly allocated block:
    /// current, clean, and stamped with the magic constant and its own
    /// block number. No read I/O ever happens for such a block.
    pub fn prep_new_buffer(&self, buf: &Buffer) {
        let mut state = buf.inner.state.lock();
        state.dirty = false;
        state.uptodate = true;
        ondisk::header_stamp(&mut state.data, buf.blkno());
    }
}
