//! Pinning: keeping a modified buffer away from its in-place location
//! until the transaction's log record is durable.
//!
//! A buffer is pinned from the time it is added to an open
//! transaction until after its log record has been written, at which
//! point `unpin` hands it to a commit group for ordered write-back.

use crate::ail::GroupId;
use crate::buffer::Buffer;
use crate::{Fs, Result};

impl Fs {
    /// Pin a buffer ahead of modification inside an open transaction.
    ///
    /// Double-pinning is a programming-invariant violation and
    /// withdraws the filesystem. If the buffer sits in a commit
    /// group's pending list with no I/O in flight, its old on-disk
    /// image has already settled and is now stale relative to this
    /// pin, so it is demoted straight to awaiting-release rather than
    /// rewritten as-is; a buffer mid-write stays pending. Dirty is
    /// cleared because the upcoming modification supersedes prior
    /// content.
    pub fn pin(&self, buf: &Buffer) -> Result<()> {
        if self.config.read_only {
            return Err(self.withdraw(format!(
                "pin of block {} on a read-only filesystem",
                buf.blkno()
            )));
        }

        {
            let mut state = buf.inner.state.lock();
            if state.pinned {
                drop(state);
                return Err(self
                    .withdraw(format!("double pin of block {}", buf.blkno())));
            }
            state.pinned = true;
            while state.in_flight {
                buf.inner.io_done.wait(&mut state);
            }
        }

        if let Some(meta) = buf.meta() {
            let mut ail = self.ail.lock();
            let gid = meta.ail_group_id();
            if gid != 0 {
                let in_io = buf.inner.state.lock().in_io();
                if !in_io {
                    if let Some(g) = ail.group_mut(gid) {
                        if let Some(pos) = g
                            .pending
                            .iter()
                            .position(|b| b.blkno() == buf.blkno())
                        {
                            let demoted = g.pending.remove(pos).unwrap();
                            g.awaiting.push(demoted);
                            log::trace!(
                                "pin demoted block {} to awaiting-release",
                                buf.blkno()
                            );
                        }
                    }
                }
            }
        }

        let mut state = buf.inner.state.lock();
        state.dirty = false;
        while state.in_flight {
            buf.inner.io_done.wait(&mut state);
        }
        if !state.uptodate {
            state.pinned = false;
            drop(state);
            self.io_error_block(buf);
            return Err(crate::result::io_fault(
                buf.blkno(),
                "not uptodate at pin time",
            ));
        }
        state.pin_ref = Some(buf.clone());

        Ok(())
    }

    /// Unpin a buffer once its log record is durable, attaching it to
    /// `target` for ordered write-back.
    ///
    /// If the buffer already has AIL membership, a newer transaction
    /// supersedes the older record: the old group's entry is dropped
    /// instead of a duplicate write-back being queued, and the
    /// domain's membership count does not change. Otherwise this is
    /// the buffer's first AIL membership and the owning domain's
    /// count grows by one.
    ///
    /// `target` is `None` when multiple modifications are being merged
    /// into one still-open transaction and AIL attachment has already
    /// happened; the pending-list attach is skipped in that case.
    pub fn unpin(&self, buf: &Buffer, target: Option<GroupId>) -> Result<()> {
        let meta = match buf.meta() {
            Some(meta) => meta,
            None => {
                return Err(self.withdraw(format!(
                    "unpin of block {} with no transactional metadata",
                    buf.blkno()
                )));
            }
        };

        let pin_ref = {
            let mut state = buf.inner.state.lock();
            if !state.uptodate {
                drop(state);
                return Err(self.withdraw(format!(
                    "unpin of stale block {}",
                    buf.blkno()
                )));
            }
            if !state.pinned {
                drop(state);
                return Err(self.withdraw(format!(
                    "unpin of unpinned block {}",
                    buf.blkno()
                )));
            }
            state.dirty = true;
            state.pinned = false;
            state.pin_ref.take()
        };

        let mut ail = self.ail.lock();

        let old_group = meta.ail_group_id();
        if old_group != 0 {
            if let Some(g) = ail.group_mut(old_group) {
                // the superseded entry's AIL reference dies here
                g.remove(buf.blkno());
            }
        }
        // A group id of 0 does not imply no membership: a merge unpin
        // (target None) leaves the buffer a domain member with no group
        // linkage until the transaction finally commits.
        if !meta.domain.is_member(buf.blkno()) {
            meta.domain.member_insert(buf.blkno());
        }
        drop(pin_ref);

        match target {
            Some(group) => {
                let g = match ail.group_mut(group.get()) {
                    Some(g) => g,
                    None => {
                        drop(ail);
                        return Err(self.withdraw(format!(
                            "unpin of block {} into dead commit group {:?}",
                            buf.blkno(),
                            group
                        )));
                    }
                };
                g.pending.push_back(buf.clone());
                g.touched = true;
                meta.set_ail_group(group.get());
                log::trace!(
                    "block {} attached to commit group {:?}",
                    buf.blkno(),
                    group
                );
            }
            None => meta.set_ail_group(0),
        }

        Ok(())
    }

    /// Registration call used by higher layers before modifying a
    /// buffer inside the currently open transaction: attaches
    /// transactional metadata (lazily, on first touch) and pins the
    /// buffer.
    pub fn attach_to_transaction(
        &self,
        domain: &std::sync::Arc<crate::LockDomain>,
        buf: &Buffer,
    ) -> Result<()> {
        if !buf.attach_meta(domain) {
            return Err(self.withdraw(format!(
                "block {} is already owned by another lock domain",
                buf.blkno()
            )));
        }
        self.pin(buf)
    }
}
