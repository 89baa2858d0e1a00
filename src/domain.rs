//! Lock domains: the buffer-cache namespace and AIL membership owned
//! by one distributed lock, plus the operations the lock layer runs
//! before a lock may be relinquished or revoked.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use fnv::{FnvHashMap, FnvHashSet};
use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::{BlockNo, Dio, Error, Fs, Result};

/// The scope of one distributed lock: a block-cache namespace plus
/// the set of blocks with outstanding AIL write-back under this lock.
pub struct LockDomain {
    name: u64,
    pub(crate) cache: Mutex<FnvHashMap<BlockNo, Buffer>>,
    /// AIL membership. Mutated only under the log lock.
    pub(crate) members: Mutex<FnvHashSet<BlockNo>>,
    ail_count: AtomicUsize,
    /// Block reclamation while an invalidation or domain-wide
    /// write-back is in progress.
    pub(crate) no_evict: AtomicBool,
}

impl LockDomain {
    pub(crate) fn new(name: u64) -> Arc<LockDomain> {
        Arc::new(LockDomain {
            name,
            cache: Mutex::new(FnvHashMap::default()),
            members: Mutex::new(FnvHashSet::default()),
            ail_count: AtomicUsize::new(0),
            no_evict: AtomicBool::new(false),
        })
    }

    /// The lock name this domain belongs to, for diagnostics.
    pub fn name(&self) -> u64 {
        self.name
    }

    /// Number of blocks in this domain with outstanding AIL
    /// write-back. Must reach zero before the owning lock may be
    /// released.
    pub fn ail_count(&self) -> usize {
        self.ail_count.load(Ordering::Acquire)
    }

    /// Number of buffers currently cached under this domain.
    pub fn cached_blocks(&self) -> usize {
        self.cache.lock().len()
    }

    /// Snapshot of the blocks with outstanding AIL write-back under
    /// this domain.
    pub fn members(&self) -> Vec<BlockNo> {
        self.members.lock().iter().copied().collect()
    }

    pub(crate) fn is_member(&self, blkno: BlockNo) -> bool {
        self.members.lock().contains(&blkno)
    }

    pub(crate) fn member_insert(&self, blkno: BlockNo) {
        let inserted = self.members.lock().insert(blkno);
        assert!(inserted, "block {} was already an AIL member", blkno);
        self.ail_count.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn member_remove(&self, blkno: BlockNo) {
        let removed = self.members.lock().remove(&blkno);
        assert!(removed, "block {} was not an AIL member", blkno);
        self.ail_count.fetch_sub(1, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(name: u64) -> Arc<LockDomain> {
        LockDomain::new(name)
    }
}

impl Fs {
    /// Create the cache namespace for a newly acquired lock.
    pub fn new_domain(&self, name: u64) -> Arc<LockDomain> {
        LockDomain::new(name)
    }

    /// Discard every buffer cached under a domain.
    ///
    /// The domain's AIL count must already be zero; anything else
    /// means a lock is being torn down with write-back outstanding,
    /// which is fatal. Reclamation is fenced out for the duration so
    /// a concurrent `try_release_buffer` cannot race the teardown.
    pub fn invalidate_all(&self, domain: &Arc<LockDomain>) -> Result<()> {
        if domain.ail_count() != 0 {
            return Err(self.withdraw(format!(
                "invalidate of domain {} with {} AIL members outstanding",
                domain.name(),
                domain.ail_count()
            )));
        }

        domain.no_evict.store(true, Ordering::Release);

        let mut cache = domain.cache.lock();
        for (blkno, _buf) in cache.drain() {
            log::trace!(
                "invalidated block {} in domain {}",
                blkno,
                domain.name()
            );
        }
        assert!(cache.is_empty());
        drop(cache);

        domain.no_evict.store(false, Ordering::Release);
        Ok(())
    }

    /// Issue and/or await write-back for every dirty buffer in a
    /// domain, AIL membership or not. Any write that leaves a buffer
    /// dirty afterward is surfaced as a domain-wide I/O fault.
    pub fn sync_all(&self, domain: &Arc<LockDomain>, flags: Dio) -> Result<()> {
        self.fail_if_shutdown()?;

        domain.no_evict.store(true, Ordering::Release);
        let bufs: Vec<Buffer> =
            domain.cache.lock().values().cloned().collect();

        if flags.contains(Dio::START) {
            for buf in &bufs {
                if buf.is_dirty() {
                    buf.wait_io();
                    self.io.submit_write(buf);
                }
            }
        }

        let mut faulted = false;
        if flags.contains(Dio::WAIT) {
            for buf in &bufs {
                buf.wait_io();
                if buf.is_dirty() {
                    self.io_error_block(buf);
                    faulted = true;
                }
            }
        }
        domain.no_evict.store(false, Ordering::Release);

        if faulted {
            Err(Error::Io(std::io::Error::other(format!(
                "write-back failed in domain {}",
                domain.name()
            ))))
        } else {
            Ok(())
        }
    }

    /// Force out a domain's remaining AIL membership ahead of lock
    /// release or revocation.
    ///
    /// Callers must have synced first: every member buffer is expected
    /// to be clean, and a busy one is fatal. Each member is detached
    /// from its commit group and the domain, and its block number is
    /// recorded as revoked inside an internal transaction so the log
    /// subsystem can reclaim the block's older log records. The
    /// transaction is committed and the log flushed before returning.
    pub fn force_drain_for_release(
        &self,
        domain: &Arc<LockDomain>,
    ) -> Result<()> {
        let blocks = domain.ail_count();
        if blocks == 0 {
            return Ok(());
        }

        let tx = match self.journal.begin(blocks) {
            Ok(tx) => tx,
            Err(e) => {
                return Err(self.withdraw(format!(
                    "transaction for lock-release drain of domain {} \
                     failed: {}",
                    domain.name(),
                    e
                )));
            }
        };

        let mut ail = self.ail.lock();
        loop {
            let blkno = match domain.members.lock().iter().next().copied() {
                Some(blkno) => blkno,
                None => break,
            };

            if let Some(buf) = ail.remove_block(blkno) {
                if buf.inner.state.lock().busy() {
                    drop(ail);
                    return Err(self.withdraw(format!(
                        "busy block {} during lock-release drain of \
                         domain {}",
                        blkno,
                        domain.name()
                    )));
                }
                let meta = buf
                    .meta()
                    .expect("AIL member lost its metadata while attached");
                meta.set_ail_group(0);
            }
            domain.member_remove(blkno);

            // never hold the log lock across the journal call
            drop(ail);
            self.journal.add_revoke(blkno);
            log::trace!(
                "revoked block {} while draining domain {}",
                blkno,
                domain.name()
            );
            ail = self.ail.lock();
        }
        ail.gc();
        drop(ail);

        assert_eq!(domain.ail_count(), 0);

        self.journal.end(tx);
        self.journal.flush()?;

        Ok(())
    }
}
