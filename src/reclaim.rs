//! Cache reclamation and the stall watchdog.
//!
//! Reclamation fails fast instead of blocking: a still-referenced
//! buffer is reported as such and registered with the watchdog, a
//! background reporter that emits a full diagnostic snapshot once the
//! stall outlives the configured threshold, then re-arms.

use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, bounded};
use fnv::FnvHashMap;
use parking_lot::Mutex;

use crate::buffer::{BufInner, Buffer};
use crate::{BlockNo, Fs, LockDomain, Result};

/// Outcome of a reclamation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaim {
    /// The buffer's metadata was detached and its cache slot freed.
    Freed,
    /// Someone still holds a reference; nothing was freed. The stall
    /// watchdog has been armed for this buffer.
    StillReferenced,
    /// The domain is in the middle of an invalidation or domain-wide
    /// write-back; reclamation must not race it.
    WriterActive,
}

struct Stall {
    since: Instant,
    domain: u64,
    buf: Weak<BufInner>,
}

pub(crate) struct StallWatchdog {
    stalls: Arc<Mutex<FnvHashMap<(u64, BlockNo), Stall>>>,
    shutdown_tx: Sender<()>,
    join_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl StallWatchdog {
    pub(crate) fn start(threshold: Duration) -> StallWatchdog {
        let stalls: Arc<Mutex<FnvHashMap<(u64, BlockNo), Stall>>> =
            Arc::default();
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let join_handle = thread::Builder::new()
            .name("gneiss-stall-watchdog".into())
            .spawn({
                let stalls = stalls.clone();
                move || {
                    let tick = threshold.max(Duration::from_millis(20)) / 4;
                    while shutdown_rx.recv_timeout(tick).is_err() {
                        report(&stalls, threshold);
                    }
                }
            })
            .unwrap();

        StallWatchdog {
            stalls,
            shutdown_tx,
            join_handle: Mutex::new(Some(join_handle)),
        }
    }

    pub(crate) fn note(&self, domain: &Arc<LockDomain>, buf: &Buffer) {
        self.stalls
            .lock()
            .entry((domain.name(), buf.blkno()))
            .or_insert_with(|| Stall {
                since: Instant::now(),
                domain: domain.name(),
                buf: Arc::downgrade(&buf.inner),
            });
    }

    pub(crate) fn resolve(&self, domain: u64, blkno: BlockNo) {
        self.stalls.lock().remove(&(domain, blkno));
    }
}

impl Drop for StallWatchdog {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.join_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

fn report(
    stalls: &Mutex<FnvHashMap<(u64, BlockNo), Stall>>,
    threshold: Duration,
) {
    let now = Instant::now();
    let mut stalls = stalls.lock();

    stalls.retain(|(domain, blkno), stall| {
        let inner = match stall.buf.upgrade() {
            Some(inner) => inner,
            // the stall resolved itself; stop tracking
            None => return false,
        };

        if now.duration_since(stall.since) >= threshold {
            let buf = Buffer { inner };
            let membership = buf
                .meta()
                .map(|meta| meta.ail_group_id())
                .unwrap_or(0);
            log::warn!(
                "stuck reclaiming block {} in domain {}: {:?}, \
                 ail group {}",
                blkno,
                stall.domain,
                buf,
                membership
            );
            stall.since = now;
        }
        let _ = domain;
        true
    });
}

impl Fs {
    /// Attempt to reclaim one cached buffer.
    ///
    /// Fails fast: a referenced buffer is reported as
    /// `StillReferenced` (and watched for stalls) rather than blocking
    /// the caller. On success the buffer's transactional metadata is
    /// detached, asserting it carries no remaining AIL linkage, and
    /// its cache slot is freed; the caller's own handle is the last
    /// one left.
    pub fn try_release_buffer(
        &self,
        domain: &Arc<LockDomain>,
        buf: &Buffer,
    ) -> Result<Reclaim> {
        use std::sync::atomic::Ordering;

        if domain.no_evict.load(Ordering::Acquire) {
            return Ok(Reclaim::WriterActive);
        }

        let mut cache = domain.cache.lock();
        let in_cache = cache
            .get(&buf.blkno())
            .is_some_and(|cached| Arc::ptr_eq(&cached.inner, &buf.inner));

        // one reference for the caller, one for the cache slot
        let floor = 1 + usize::from(in_cache);
        if buf.ref_count() > floor {
            drop(cache);
            self.watchdog.note(domain, buf);
            return Ok(Reclaim::StillReferenced);
        }

        assert!(!buf.is_pinned());

        if let Some(meta) = buf.detach_meta() {
            assert_eq!(
                meta.ail_group_id(),
                0,
                "reclaiming block {} still attached to a commit group",
                buf.blkno()
            );
            assert!(
                !meta.domain.members.lock().contains(&buf.blkno()),
                "reclaiming block {} still an AIL member",
                buf.blkno()
            );
        }

        if in_cache {
            cache.remove(&buf.blkno());
        }
        drop(cache);

        self.watchdog.resolve(domain.name(), buf.blkno());
        log::trace!(
            "reclaimed block {} from domain {}",
            buf.blkno(),
            domain.name()
        );
        Ok(Reclaim::Freed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn reclaim_fails_fast_while_referenced() {
        let dir = tempdir::TempDir::new("gneiss-reclaim").unwrap();
        let fs = Fs::open(Config::new(dir.path().join("dev"))).unwrap();
        let domain = fs.new_domain(9);

        let buf = fs.get_block(&domain, 42, true).unwrap();
        let extra = buf.clone();

        assert_eq!(
            fs.try_release_buffer(&domain, &buf).unwrap(),
            Reclaim::StillReferenced
        );

        drop(extra);
        assert_eq!(
            fs.try_release_buffer(&domain, &buf).unwrap(),
            Reclaim::Freed
        );
        assert_eq!(domain.cached_blocks(), 0);
    }

    #[test]
    fn reclaim_defers_to_active_invalidation() {
        let dir = tempdir::TempDir::new("gneiss-reclaim-writer").unwrap();
        let fs = Fs::open(Config::new(dir.path().join("dev"))).unwrap();
        let domain = fs.new_domain(9);

        let buf = fs.get_block(&domain, 42, true).unwrap();
        domain.no_evict.store(true, std::sync::atomic::Ordering::Release);
        assert_eq!(
            fs.try_release_buffer(&domain, &buf).unwrap(),
            Reclaim::WriterActive
        );
    }
}
