//! The contract consumed from the log/transaction subsystem. Log
//! serialization itself lives elsewhere; this crate only needs to
//! open bounded transactions, record revokes, and flush.

use parking_lot::Mutex;

use crate::{BlockNo, Result};

/// Handle for one open journal transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHandle(u64);

impl TxHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// The begin/revoke/end/flush contract of the log subsystem.
pub trait Journal: Send + Sync + 'static {
    /// Open a transaction sized for `estimated_blocks` block records.
    fn begin(&self, estimated_blocks: usize) -> Result<TxHandle>;

    /// Record that older log records for a block are obsolete and
    /// reclaimable.
    fn add_revoke(&self, blkno: BlockNo);

    /// Commit a transaction.
    fn end(&self, tx: TxHandle);

    /// Flush the log to durable storage.
    fn flush(&self) -> Result<()>;
}

#[derive(Default)]
struct RecordingState {
    next_tx: u64,
    open: Vec<u64>,
    revokes: Vec<BlockNo>,
    flushes: u64,
}

/// A `Journal` that records the calls made against it. Used as the
/// default wiring and by tests asserting on revoke traffic.
#[derive(Default)]
pub struct RecordingJournal {
    inner: Mutex<RecordingState>,
}

impl RecordingJournal {
    /// Every block revoked so far, in call order.
    pub fn revokes(&self) -> Vec<BlockNo> {
        self.inner.lock().revokes.clone()
    }

    pub fn flush_count(&self) -> u64 {
        self.inner.lock().flushes
    }

    pub fn open_transactions(&self) -> usize {
        self.inner.lock().open.len()
    }
}

impl Journal for RecordingJournal {
    fn begin(&self, estimated_blocks: usize) -> Result<TxHandle> {
        let mut inner = self.inner.lock();
        inner.next_tx += 1;
        let tx = inner.next_tx;
        inner.open.push(tx);
        log::trace!(
            "journal transaction {} opened for {} blocks",
            tx,
            estimated_blocks
        );
        Ok(TxHandle(tx))
    }

    fn add_revoke(&self, blkno: BlockNo) {
        self.inner.lock().revokes.push(blkno);
    }

    fn end(&self, tx: TxHandle) {
        let mut inner = self.inner.lock();
        inner.open.retain(|open| *open != tx.0);
        log::trace!("journal transaction {} committed", tx.0);
    }

    fn flush(&self) -> Result<()> {
        self.inner.lock().flushes += 1;
        Ok(())
    }
}
