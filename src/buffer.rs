use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::{BlockNo, LockDomain};

/// A shared handle to the cached image of one on-disk block.
///
/// The block cache owns one handle for as long as the buffer is
/// cached; callers, pins, and AIL commit groups hold additional
/// counted handles. Flag transitions happen under the buffer's own
/// lock; AIL membership transitions happen under the filesystem's log
/// lock.
#[derive(Clone)]
pub struct Buffer {
    pub(crate) inner: Arc<BufInner>,
}

pub(crate) struct BufInner {
    pub(crate) blkno: BlockNo,
    pub(crate) state: Mutex<BufState>,
    pub(crate) io_done: Condvar,
    pub(crate) meta: Mutex<Option<Arc<BufMeta>>>,
}

pub(crate) struct BufState {
    pub(crate) data: Vec<u8>,
    pub(crate) uptodate: bool,
    pub(crate) dirty: bool,
    pub(crate) pinned: bool,
    /// I/O is in flight for this buffer. The "locked" flag of the
    /// classic buffer-head state machine.
    pub(crate) in_flight: bool,
    /// The reference held by an active pin, dropped at unpin time.
    pub(crate) pin_ref: Option<Buffer>,
}

impl BufState {
    /// dirty | locked | pinned: the buffer may not be promoted out of
    /// a pending list while any of these hold.
    pub(crate) fn busy(&self) -> bool {
        self.dirty || self.in_flight || self.pinned
    }

    /// dirty | locked: the buffer's on-disk image is not yet settled.
    pub(crate) fn in_io(&self) -> bool {
        self.dirty || self.in_flight
    }
}

/// Transactional side metadata, created lazily the first time a
/// buffer participates in a transaction and destroyed when the buffer
/// is reclaimed free of all AIL linkage.
pub(crate) struct BufMeta {
    pub(crate) domain: Arc<LockDomain>,
    /// The commit group whose pending/awaiting-release list currently
    /// holds this buffer, or 0 for none. Only mutated under the log
    /// lock.
    pub(crate) ail_group: AtomicU64,
}

impl BufMeta {
    pub(crate) fn ail_group_id(&self) -> u64 {
        self.ail_group.load(Ordering::Acquire)
    }

    pub(crate) fn set_ail_group(&self, group: u64) {
        self.ail_group.store(group, Ordering::Release);
    }
}

impl Buffer {
    pub(crate) fn new(blkno: BlockNo, block_size: usize) -> Buffer {
        Buffer {
            inner: Arc::new(BufInner {
                blkno,
                state: Mutex::new(BufState {
                    data: vec![0; block_size],
                    uptodate: false,
                    dirty: false,
                    pinned: false,
                    in_flight: false,
                    pin_ref: None,
                }),
                io_done: Condvar::new(),
                meta: Mutex::new(None),
            }),
        }
    }

    /// The block number this buffer is mapped to.
    pub fn blkno(&self) -> BlockNo {
        self.inner.blkno
    }

    pub fn is_uptodate(&self) -> bool {
        self.inner.state.lock().uptodate
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.state.lock().dirty
    }

    pub fn is_pinned(&self) -> bool {
        self.inner.state.lock().pinned
    }

    /// The number of live handles to this buffer, the cache's own
    /// included.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Block until any in-flight I/O for this buffer completes.
    pub fn wait_io(&self) {
        let mut state = self.inner.state.lock();
        while state.in_flight {
            self.inner.io_done.wait(&mut state);
        }
    }

    /// Read access to the buffer image.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let state = self.inner.state.lock();
        f(&state.data)
    }

    /// Mutable access to the buffer image. Callers must hold a pin (or
    /// otherwise own the buffer) while mutating; the cache never
    /// writes back a pinned buffer.
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut state = self.inner.state.lock();
        f(&mut state.data)
    }

    pub(crate) fn meta(&self) -> Option<Arc<BufMeta>> {
        self.inner.meta.lock().clone()
    }

    /// Attach transactional metadata if none is present. Idempotent;
    /// a second attach to the same domain is a no-op, and an attach to
    /// a different domain violates the one-domain-per-buffer
    /// invariant (caught by the caller via the returned flag).
    pub(crate) fn attach_meta(&self, domain: &Arc<LockDomain>) -> bool {
        let mut meta = self.inner.meta.lock();
        match &*meta {
            Some(existing) => Arc::ptr_eq(&existing.domain, domain),
            None => {
                *meta = Some(Arc::new(BufMeta {
                    domain: domain.clone(),
                    ail_group: AtomicU64::new(0),
                }));
                true
            }
        }
    }

    pub(crate) fn detach_meta(&self) -> Option<Arc<BufMeta>> {
        self.inner.meta.lock().take()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Buffer")
            .field("blkno", &self.inner.blkno)
            .field("uptodate", &state.uptodate)
            .field("dirty", &state.dirty)
            .field("pinned", &state.pinned)
            .field("in_flight", &state.in_flight)
            .field("refs", &Arc::strong_count(&self.inner))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_tracks_all_three_flags() {
        let buf = Buffer::new(1, 64);

        assert!(!buf.inner.state.lock().busy());

        buf.inner.state.lock().dirty = true;
        assert!(buf.inner.state.lock().busy());
        buf.inner.state.lock().dirty = false;

        buf.inner.state.lock().pinned = true;
        assert!(buf.inner.state.lock().busy());
        assert!(!buf.inner.state.lock().in_io());
    }

    #[test]
    fn meta_attach_is_idempotent_per_domain() {
        let d1 = LockDomain::new_for_test(1);
        let d2 = LockDomain::new_for_test(2);
        let buf = Buffer::new(7, 64);

        assert!(buf.attach_meta(&d1));
        assert!(buf.attach_meta(&d1));
        assert!(!buf.attach_meta(&d2));
    }
}
