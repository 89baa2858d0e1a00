//! The inode layer's view of the cache: a small most-recently-used
//! array of metadata buffers indexed by indirection-tree height, the
//! tagged read paths for metadata and data blocks, and the wipe of a
//! deallocated run.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::ondisk::META_HEADER_LEN;
use crate::result::io_fault;
use crate::{BlockNo, Buffer, Dio, Fs, LockDomain, MetaType, Result};

/// Maximum height of an inode's indirect-addressing tree.
pub const MAX_META_HEIGHT: usize = 10;

/// Per-inode MRU cache of the metadata buffers along the indirect
/// tree path, one slot per height. Guards itself; do not confuse this
/// with the domain's block cache, which keeps owning the buffers.
pub struct InodeBufCache {
    addr: BlockNo,
    journaled_data: bool,
    height: AtomicUsize,
    slots: Mutex<[Option<Buffer>; MAX_META_HEIGHT]>,
}

impl InodeBufCache {
    /// `addr` is the inode's own block number; `height` the current
    /// depth of its indirect tree (0 = stuffed).
    pub fn new(addr: BlockNo, journaled_data: bool, height: usize) -> InodeBufCache {
        assert!(height < MAX_META_HEIGHT);
        InodeBufCache {
            addr,
            journaled_data,
            height: AtomicUsize::new(height),
            slots: Mutex::new(Default::default()),
        }
    }

    /// The inode's own block number.
    pub fn addr(&self) -> BlockNo {
        self.addr
    }

    /// True while the inode has no indirect tree and its data lives
    /// inside the inode record itself.
    pub fn is_stuffed(&self) -> bool {
        self.height.load(Ordering::Acquire) == 0
    }

    /// True when the inode's data blocks go through the journal.
    pub fn is_journaled_data(&self) -> bool {
        self.journaled_data
    }

    pub fn set_height(&self, height: usize) {
        assert!(height < MAX_META_HEIGHT);
        self.height.store(height, Ordering::Release);
    }

    /// Drop every reference held by the MRU array.
    pub fn flush_meta_cache(&self) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            *slot = None;
        }
    }
}

impl Fs {
    /// Get a metadata buffer for one level of an inode's indirect
    /// tree, going through the inode's MRU slot for that height
    /// before falling back to the domain cache.
    ///
    /// With `new`, the block was just allocated: the buffer is
    /// prepared in place, registered with the open transaction, and
    /// tagged as an index node. Otherwise the on-disk header must
    /// carry the tag appropriate to the height.
    pub fn get_meta_buffer(
        &self,
        domain: &Arc<LockDomain>,
        ip: &InodeBufCache,
        height: usize,
        blkno: BlockNo,
        new: bool,
    ) -> Result<Buffer> {
        assert!(height < MAX_META_HEIGHT);

        let slot_hit = {
            let slots = ip.slots.lock();
            slots[height].clone().filter(|buf| buf.blkno() == blkno)
        };

        let buf = match slot_hit {
            Some(buf) => {
                if new {
                    self.prep_new_buffer(&buf);
                } else {
                    self.reread(&buf, Dio::START | Dio::WAIT)?;
                }
                buf
            }
            None => {
                let buf = if new {
                    let buf = self
                        .get_block(domain, blkno, true)
                        .expect("get_block with create cannot miss");
                    self.prep_new_buffer(&buf);
                    buf
                } else {
                    self.read_block(domain, blkno, Dio::START | Dio::WAIT)?
                };

                let mut slots = ip.slots.lock();
                slots[height] = Some(buf.clone());
                buf
            }
        };

        if new {
            if height == 0 {
                log::warn!(
                    "new metadata buffer for block {} at the inode level",
                    blkno
                );
                return Err(io_fault(blkno, "new metadata buffer at height 0"));
            }
            self.attach_to_transaction(domain, &buf)?;
            buf.metatype_set(MetaType::IndexNode);
            buf.clear_tail(META_HEADER_LEN);
        } else {
            let expected = if height > 0 {
                MetaType::IndexNode
            } else {
                MetaType::InodeRecord
            };
            buf.metatype_check(expected)?;
        }

        Ok(buf)
    }

    /// Get a data buffer for an inode, picking the read/tag path from
    /// the inode's shape: a stuffed inode reads its own record, a
    /// journaled-data inode stamps and checks the journaled-data tag,
    /// and ordinary data is tagged at allocation only, never checked
    /// on read.
    pub fn get_data_buffer(
        &self,
        domain: &Arc<LockDomain>,
        ip: &InodeBufCache,
        blkno: BlockNo,
        new: bool,
    ) -> Result<Buffer> {
        if blkno == ip.addr() {
            if new {
                log::warn!("new data buffer at inode block {}", blkno);
                return Err(io_fault(blkno, "new allocation at the inode block"));
            }
            let buf =
                self.read_block(domain, blkno, Dio::START | Dio::WAIT)?;
            buf.metatype_check(MetaType::InodeRecord)?;
            Ok(buf)
        } else if ip.is_journaled_data() {
            if new {
                let buf = self
                    .get_block(domain, blkno, true)
                    .expect("get_block with create cannot miss");
                self.prep_new_buffer(&buf);
                self.attach_to_transaction(domain, &buf)?;
                buf.metatype_set(MetaType::JournaledData);
                buf.clear_tail(META_HEADER_LEN);
                Ok(buf)
            } else {
                let buf =
                    self.read_block(domain, blkno, Dio::START | Dio::WAIT)?;
                buf.metatype_check(MetaType::JournaledData)?;
                Ok(buf)
            }
        } else if new {
            let buf = self
                .get_block(domain, blkno, true)
                .expect("get_block with create cannot miss");
            self.prep_new_buffer(&buf);
            buf.metatype_set(MetaType::DataNode);
            Ok(buf)
        } else {
            self.read_block(domain, blkno, Dio::START | Dio::WAIT)
        }
    }

    /// Quietly kill the cached buffers of a contiguous run of
    /// deallocated blocks: drop any pin, detach AIL membership with a
    /// revoke record per detached block, and clear dirty/uptodate so
    /// nothing gets written back for blocks that no longer exist.
    pub fn buf_wipe(
        &self,
        domain: &Arc<LockDomain>,
        bstart: BlockNo,
        blen: u64,
    ) -> Result<()> {
        for blkno in bstart..bstart + blen {
            let buf = match self.get_block(domain, blkno, false) {
                Some(buf) => buf,
                None => continue,
            };

            {
                let mut state = buf.inner.state.lock();
                if state.pinned {
                    state.pinned = false;
                    state.pin_ref = None;
                    log::trace!("wipe dropped pin of block {}", blkno);
                }
            }

            if let Some(meta) = buf.meta() {
                let mut ail = self.ail.lock();
                if meta.ail_group_id() != 0 {
                    let detached = ail.remove_block(blkno);
                    meta.set_ail_group(0);
                    meta.domain.member_remove(blkno);
                    ail.gc();
                    drop(ail);
                    drop(detached);
                    self.journal.add_revoke(blkno);
                }
            }

            let mut state = buf.inner.state.lock();
            state.dirty = false;
            state.uptodate = false;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn predicates_follow_inode_shape() {
        let ip = InodeBufCache::new(5, true, 0);
        assert!(ip.is_stuffed());
        assert!(ip.is_journaled_data());

        ip.set_height(3);
        assert!(!ip.is_stuffed());
    }

    #[test]
    fn mru_slot_is_reused_per_height() {
        let dir = tempdir::TempDir::new("gneiss-meta").unwrap();
        let fs = Fs::open(Config::new(dir.path().join("dev"))).unwrap();
        let domain = fs.new_domain(3);
        let ip = InodeBufCache::new(5, false, 2);
        let group = fs.new_commit_group();

        let buf = fs.get_meta_buffer(&domain, &ip, 1, 80, true).unwrap();
        fs.unpin(&buf, Some(group)).unwrap();

        // same height, same block: served from the MRU slot
        let again = fs.get_meta_buffer(&domain, &ip, 1, 80, true).unwrap();
        assert_eq!(buf.blkno(), again.blkno());
        fs.unpin(&again, None).unwrap();

        ip.flush_meta_cache();
        assert!(ip.slots.lock().iter().all(|slot| slot.is_none()));
    }

    #[test]
    fn plain_data_is_tagged_at_allocation_only() {
        let dir = tempdir::TempDir::new("gneiss-data").unwrap();
        let fs = Fs::open(Config::new(dir.path().join("dev"))).unwrap();
        let domain = fs.new_domain(3);
        let ip = InodeBufCache::new(5, false, 1);

        let buf = fs.get_data_buffer(&domain, &ip, 90, true).unwrap();
        buf.metatype_check(MetaType::DataNode).unwrap();

        // pre-existing plain data is read back without a type check
        let again = fs.get_data_buffer(&domain, &ip, 90, false).unwrap();
        assert_eq!(again.blkno(), 90);
    }

    #[test]
    fn wipe_revokes_ail_members() {
        let dir = tempdir::TempDir::new("gneiss-wipe").unwrap();
        let journal = Arc::new(crate::RecordingJournal::default());
        let device = Arc::new(
            crate::FileDev::open(dir.path().join("dev"), 4096).unwrap(),
        );
        let fs = Fs::open_with(Config::new(dir.path().join("dev")), device, journal.clone())
            .unwrap();
        let domain = fs.new_domain(3);
        let group = fs.new_commit_group();

        let buf = fs.get_block(&domain, 200, true).unwrap();
        fs.prep_new_buffer(&buf);
        fs.attach_to_transaction(&domain, &buf).unwrap();
        fs.unpin(&buf, Some(group)).unwrap();
        assert_eq!(domain.ail_count(), 1);

        fs.buf_wipe(&domain, 199, 3).unwrap();

        assert_eq!(domain.ail_count(), 0);
        assert_eq!(journal.revokes(), vec![200]);
        assert!(!buf.is_dirty());
        assert!(!buf.is_uptodate());
    }
}
