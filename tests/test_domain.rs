mod common;

use gneiss::{Dio, Error};
use rand::Rng;

use common::{fixture, new_pinned_block};

#[test]
fn invalidate_requires_an_empty_ail() {
    let f = fixture("gneiss-invalidate");
    let domain = f.fs.new_domain(1);
    let group = f.fs.new_commit_group();

    let buf = new_pinned_block(&f, &domain, 70);
    f.fs.unpin(&buf, Some(group)).unwrap();
    assert_eq!(domain.ail_count(), 1);

    let err = f.fs.invalidate_all(&domain).unwrap_err();
    assert!(matches!(err, Error::Invariant(_)));
    assert!(f.fs.is_shutdown());
}

#[test]
fn invalidate_empties_a_quiet_domain() {
    let f = fixture("gneiss-invalidate-ok");
    let domain = f.fs.new_domain(1);

    for blkno in 80..85 {
        let buf = f.fs.get_block(&domain, blkno, true).unwrap();
        f.fs.prep_new_buffer(&buf);
    }
    assert_eq!(domain.cached_blocks(), 5);

    f.fs.invalidate_all(&domain).unwrap();
    assert_eq!(domain.cached_blocks(), 0);
    assert!(f.fs.get_block(&domain, 80, false).is_none());
}

#[test]
fn force_drain_revokes_every_member() {
    let f = fixture("gneiss-force-drain");
    let domain = f.fs.new_domain(1);
    let group = f.fs.new_commit_group();

    for blkno in [90, 91, 92] {
        let buf = new_pinned_block(&f, &domain, blkno);
        f.fs.unpin(&buf, Some(group)).unwrap();
    }
    assert_eq!(domain.ail_count(), 3);

    // callers must sync before a forced drain
    f.fs.sync_all(&domain, Dio::START | Dio::WAIT).unwrap();

    f.fs.force_drain_for_release(&domain).unwrap();

    assert_eq!(domain.ail_count(), 0);
    assert!(domain.members().is_empty());

    let mut revokes = f.journal.revokes();
    revokes.sort_unstable();
    assert_eq!(revokes, vec![90, 91, 92]);
    assert_eq!(f.journal.open_transactions(), 0);
    assert!(f.journal.flush_count() >= 1);

    // the drained domain may now be invalidated for lock release
    f.fs.invalidate_all(&domain).unwrap();
}

#[test]
fn force_drain_of_a_quiet_domain_is_free() {
    let f = fixture("gneiss-force-drain-quiet");
    let domain = f.fs.new_domain(1);

    f.fs.force_drain_for_release(&domain).unwrap();
    assert!(f.journal.revokes().is_empty());
    assert_eq!(f.journal.flush_count(), 0);
}

#[test]
fn sync_all_settles_every_dirty_buffer() {
    let f = fixture("gneiss-sync-all");
    let domain = f.fs.new_domain(1);

    for blkno in 100..108 {
        let buf = f.fs.get_block(&domain, blkno, true).unwrap();
        f.fs.prep_new_buffer(&buf);
        f.fs.write_block(&buf, Dio::DIRTY).unwrap();
    }

    f.fs.sync_all(&domain, Dio::START | Dio::WAIT).unwrap();

    for blkno in 100..108 {
        let buf = f.fs.get_block(&domain, blkno, false).unwrap();
        assert!(!buf.is_dirty());
        assert!(buf.is_uptodate());
    }
}

#[test]
fn mixed_transactional_workload_settles_to_zero() {
    let f = fixture("gneiss-workload");
    let domain = f.fs.new_domain(1);
    let mut rng = rand::rng();

    // several transactions touching an overlapping window of blocks,
    // each unpinning into its own commit group
    for _ in 0..8 {
        let group = f.fs.new_commit_group();
        let base: u64 = rng.random_range(200..220);
        for blkno in base..base + rng.random_range(1..6) {
            let buf = f.fs.get_block(&domain, blkno, true).unwrap();
            if !buf.is_uptodate() {
                f.fs.prep_new_buffer(&buf);
            }
            if buf.is_pinned() {
                continue;
            }
            f.fs.attach_to_transaction(&domain, &buf).unwrap();
            buf.with_data_mut(|data| {
                data[gneiss::META_HEADER_LEN] = blkno as u8
            });
            f.fs.unpin(&buf, Some(group)).unwrap();
        }
    }

    let members = domain.members().len();
    assert_eq!(members, domain.ail_count());

    f.fs.sync_meta().unwrap();

    assert_eq!(domain.ail_count(), 0);
    assert!(domain.members().is_empty());
    assert!(f.fs.check_error().is_ok());
}
