//! The AIL ("active items list"): buffers whose log records are
//! durable but whose in-place write-back is still outstanding,
//! grouped by committing transaction and drained in commit order.
//!
//! All list state lives in `AilState` behind one mutex per filesystem
//! instance (the log lock). The log lock is never held across a
//! blocking wait for I/O completion; drain loops release it before
//! waiting and restart their scan after reacquiring it, because the
//! lists may have changed in between.

use std::collections::VecDeque;
use std::num::NonZeroU64;

use crate::buffer::Buffer;
use crate::{BlockNo, Fs, Result};

/// Identifies one commit group in the AIL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(NonZeroU64);

impl GroupId {
    pub(crate) fn get(self) -> u64 {
        self.0.get()
    }
}

/// Per-buffer drain progress within a commit group.
///
/// PENDING -> AWAITING_RELEASE -> RELEASED, where RELEASED means the
/// buffer has been detached from both the group and its domain's
/// membership set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Pending,
    AwaitingRelease,
    Released,
}

/// One committing transaction's worth of AIL buffers.
///
/// `pending` is ordered oldest-enqueued-first; `awaiting` holds
/// buffers whose write-back has completed and which only need
/// detachment. The `Buffer` handles stored here carry the AIL's
/// reference; dropping them is what makes a buffer reclaimable again.
pub(crate) struct CommitGroup {
    pub(crate) id: u64,
    pub(crate) pending: VecDeque<Buffer>,
    pub(crate) awaiting: Vec<Buffer>,
    /// Set once a buffer has ever been attached, so group GC never
    /// reaps a freshly created group that has not been used yet.
    pub(crate) touched: bool,
}

impl CommitGroup {
    fn new(id: u64) -> CommitGroup {
        CommitGroup {
            id,
            pending: VecDeque::new(),
            awaiting: Vec::new(),
            touched: false,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.awaiting.is_empty()
    }

    /// Detach a buffer from whichever of the two lists holds it,
    /// returning the AIL-held handle.
    pub(crate) fn remove(&mut self, blkno: BlockNo) -> Option<Buffer> {
        if let Some(pos) =
            self.pending.iter().position(|b| b.blkno() == blkno)
        {
            return self.pending.remove(pos);
        }
        if let Some(pos) =
            self.awaiting.iter().position(|b| b.blkno() == blkno)
        {
            return Some(self.awaiting.remove(pos));
        }
        None
    }
}

/// Everything the log lock guards: the ordered collection of commit
/// groups plus the id counter for new ones.
pub(crate) struct AilState {
    next_id: u64,
    /// Commit order, oldest first.
    pub(crate) groups: VecDeque<CommitGroup>,
}

impl AilState {
    pub(crate) fn new() -> AilState {
        AilState { next_id: 1, groups: VecDeque::new() }
    }

    pub(crate) fn new_group(&mut self) -> GroupId {
        let id = self.next_id;
        self.next_id += 1;
        self.groups.push_back(CommitGroup::new(id));
        GroupId(NonZeroU64::new(id).unwrap())
    }

    pub(crate) fn group_mut(&mut self, id: u64) -> Option<&mut CommitGroup> {
        self.groups.iter_mut().find(|g| g.id == id)
    }

    pub(crate) fn group_ids(&self) -> Vec<u64> {
        self.groups.iter().map(|g| g.id).collect()
    }

    /// Detach a block from whichever group holds it.
    pub(crate) fn remove_block(&mut self, blkno: BlockNo) -> Option<Buffer> {
        for group in &mut self.groups {
            if let Some(buf) = group.remove(blkno) {
                return Some(buf);
            }
        }
        None
    }

    /// Drop groups whose two lists have both fully drained.
    pub(crate) fn gc(&mut self) {
        self.groups.retain(|g| !g.touched || !g.is_empty());
    }
}

impl Fs {
    /// Open a new commit group at transaction-commit time. Buffers are
    /// attached to it via `unpin` once their log records are durable.
    pub fn new_commit_group(&self) -> GroupId {
        let id = self.ail.lock().new_group();
        log::trace!("opened commit group {:?}", id);
        id
    }

    /// Start write-back on a commit group's pending list.
    ///
    /// Scans oldest-first. Idle buffers are promoted to
    /// awaiting-release (a stale one signals an I/O fault first, but is
    /// promoted regardless). A buffer that is busy only transiently
    /// (locked, not dirty) is skipped. A dirty buffer is moved to the
    /// retry position at the back of the list, then written with the
    /// log lock released; the scan restarts from the top afterwards.
    pub fn ail1_start_one(&self, group: GroupId) -> Result<()> {
        self.fail_if_shutdown()?;

        let mut ail = self.ail.lock();
        'restart: loop {
            let g = match ail.group_mut(group.get()) {
                Some(g) => g,
                None => return Ok(()),
            };

            let mut i = 0;
            while i < g.pending.len() {
                let buf = g.pending[i].clone();
                let (busy, dirty, uptodate) = {
                    let state = buf.inner.state.lock();
                    (state.busy(), state.dirty, state.uptodate)
                };

                if !busy {
                    let promoted = g.pending.remove(i).unwrap();
                    if !uptodate {
                        self.io_error_block(&promoted);
                    }
                    g.awaiting.push(promoted);
                    continue;
                }

                if !dirty {
                    i += 1;
                    continue;
                }

                // Dirty: requeue at the back before the log lock is
                // dropped so no concurrent scan sees it missing, then
                // wait out any in-flight I/O and issue the write.
                let requeued = g.pending.remove(i).unwrap();
                g.pending.push_back(requeued);
                drop(ail);

                buf.wait_io();
                self.io.submit_write(&buf);

                ail = self.ail.lock();
                continue 'restart;
            }

            return Ok(());
        }
    }

    /// Test whether a commit group's pending list has drained,
    /// promoting idle buffers along the way.
    ///
    /// In ordered mode (`all == false`) the scan stops at the first
    /// busy buffer: a later buffer must never be reported drained
    /// while an earlier one in the same group is still outstanding.
    /// `all == true` requests a full unordered scan instead.
    pub fn ail1_empty_one(&self, group: GroupId, all: bool) -> Result<bool> {
        self.fail_if_shutdown()?;

        let mut ail = self.ail.lock();
        let g = match ail.group_mut(group.get()) {
            Some(g) => g,
            None => return Ok(true),
        };

        let mut i = 0;
        while i < g.pending.len() {
            let buf = g.pending[i].clone();
            if buf.inner.state.lock().busy() {
                if all {
                    i += 1;
                    continue;
                }
                break;
            }

            let promoted = g.pending.remove(i).unwrap();
            if !promoted.is_uptodate() {
                self.io_error_block(&promoted);
            }
            g.awaiting.push(promoted);
        }

        Ok(g.pending.is_empty())
    }

    /// Unconditionally drain a commit group's awaiting-release list:
    /// every entry is detached from its domain's membership set and
    /// its AIL reference dropped, making the buffer reclaimable. An
    /// empty group is destroyed afterwards.
    pub fn ail2_release_all(&self, group: GroupId) -> Result<()> {
        self.fail_if_shutdown()?;

        let mut ail = self.ail.lock();
        let g = match ail.group_mut(group.get()) {
            Some(g) => g,
            None => return Ok(()),
        };

        for buf in g.awaiting.drain(..) {
            let meta = buf
                .meta()
                .expect("AIL member lost its metadata while attached");
            assert_eq!(meta.ail_group_id(), group.get());

            meta.set_ail_group(0);
            meta.domain.member_remove(buf.blkno());
            log::trace!(
                "released block {} from commit group {:?}",
                buf.blkno(),
                group
            );
        }

        ail.gc();
        Ok(())
    }

    /// Start write-back across the whole AIL, oldest commit group
    /// first.
    pub fn ail1_start_all(&self) -> Result<()> {
        let ids = self.ail.lock().group_ids();
        for id in ids {
            self.ail1_start_one(GroupId(NonZeroU64::new(id).unwrap()))?;
        }
        Ok(())
    }

    /// Test whether the whole AIL has drained. In ordered mode the
    /// scan stops at the first group that still has work outstanding.
    pub fn ail1_empty_all(&self, all: bool) -> Result<bool> {
        let ids = self.ail.lock().group_ids();
        let mut empty = true;
        for id in ids {
            let group = GroupId(NonZeroU64::new(id).unwrap());
            if !self.ail1_empty_one(group, all)? {
                empty = false;
                if !all {
                    break;
                }
            }
        }
        Ok(empty)
    }

    /// Release every fully written-back buffer in the AIL, oldest
    /// commit group first.
    pub fn ail2_empty_all(&self) -> Result<()> {
        let ids = self.ail.lock().group_ids();
        for id in ids {
            self.ail2_release_all(GroupId(NonZeroU64::new(id).unwrap()))?;
        }
        Ok(())
    }

    /// Drain-state introspection for one block, intended for
    /// diagnostics and tests.
    pub fn drain_state(&self, group: GroupId, blkno: BlockNo) -> DrainState {
        let mut ail = self.ail.lock();
        if let Some(g) = ail.group_mut(group.get()) {
            if g.pending.iter().any(|b| b.blkno() == blkno) {
                return DrainState::Pending;
            }
            if g.awaiting.iter().any(|b| b.blkno() == blkno) {
                return DrainState::AwaitingRelease;
            }
        }
        DrainState::Released
    }

    /// Number of buffers still pending write-back in a group.
    pub fn pending_len(&self, group: GroupId) -> usize {
        let mut ail = self.ail.lock();
        ail.group_mut(group.get()).map_or(0, |g| g.pending.len())
    }

    /// Number of buffers awaiting release in a group.
    pub fn awaiting_len(&self, group: GroupId) -> usize {
        let mut ail = self.ail.lock();
        ail.group_mut(group.get()).map_or(0, |g| g.awaiting.len())
    }
}
