mod common;

use std::io;
use std::sync::Arc;

use gneiss::{
    BlockDev, Config, Dio, Error, Fs, MetaType, META_HEADER_LEN,
    RecordingJournal,
};

use common::fixture;

#[test]
fn dirty_then_write_back_settles_deterministically() {
    let f = fixture("gneiss-dwrite");
    let domain = f.fs.new_domain(1);

    let buf = f.fs.get_block(&domain, 7, true).unwrap();
    f.fs.prep_new_buffer(&buf);

    f.fs.write_block(&buf, Dio::DIRTY).unwrap();
    assert!(buf.is_dirty());

    f.fs.write_block(&buf, Dio::START | Dio::WAIT).unwrap();
    assert!(buf.is_uptodate());
    assert!(!buf.is_dirty());
}

#[test]
fn dirty_mark_of_a_stale_buffer_fails() {
    let f = fixture("gneiss-dirty-stale");
    let domain = f.fs.new_domain(1);

    // mapped but never read or prepared
    let buf = f.fs.get_block(&domain, 8, true).unwrap();
    assert!(!buf.is_uptodate());

    let err = f.fs.write_block(&buf, Dio::DIRTY).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert!(!buf.is_dirty());
}

#[test]
fn force_reread_round_trips_through_the_device() {
    let f = fixture("gneiss-force");
    let domain = f.fs.new_domain(1);

    let buf = f.fs.get_block(&domain, 9, true).unwrap();
    f.fs.prep_new_buffer(&buf);
    buf.metatype_set(MetaType::IndexNode);
    buf.with_data_mut(|data| data[META_HEADER_LEN] = 0xAB);
    f.fs.write_block(&buf, Dio::DIRTY | Dio::START | Dio::WAIT).unwrap();

    // clobber the in-memory image, then force a re-read
    buf.with_data_mut(|data| data[META_HEADER_LEN] = 0);
    f.fs.reread(&buf, Dio::FORCE | Dio::START | Dio::WAIT).unwrap();

    assert!(buf.is_uptodate());
    buf.with_data(|data| assert_eq!(data[META_HEADER_LEN], 0xAB));
    buf.metatype_check(MetaType::IndexNode).unwrap();

    let err = buf.metatype_check(MetaType::InodeRecord).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { block: 9, .. }));
}

#[test]
fn shutdown_fails_everything_fast() {
    let f = fixture("gneiss-shutdown");
    let domain = f.fs.new_domain(1);
    let group = f.fs.new_commit_group();

    let buf = f.fs.get_block(&domain, 5, true).unwrap();
    f.fs.prep_new_buffer(&buf);

    f.fs.shut_down();

    assert_eq!(
        f.fs.read_block(&domain, 6, Dio::START | Dio::WAIT).unwrap_err(),
        Error::Shutdown
    );
    assert_eq!(
        f.fs.write_block(&buf, Dio::DIRTY | Dio::START).unwrap_err(),
        Error::Shutdown
    );
    assert_eq!(f.fs.ail1_start_one(group).unwrap_err(), Error::Shutdown);
    assert_eq!(
        f.fs.start_readahead(&domain, 5, 4).unwrap_err(),
        Error::Shutdown
    );
    // nothing was dirtied or queued on the way out
    assert!(!buf.is_dirty());
}

#[test]
fn read_only_mounts_reject_writes_without_touching_storage() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir::TempDir::new("gneiss-ro").unwrap();
    let config =
        Config { read_only: true, ..Config::new(dir.path().join("dev")) };
    let fs = Fs::open(config).unwrap();
    let domain = fs.new_domain(1);

    let buf = fs.get_block(&domain, 3, true).unwrap();
    assert_eq!(
        fs.write_block(&buf, Dio::DIRTY | Dio::START).unwrap_err(),
        Error::ReadOnly
    );
    assert!(!fs.is_shutdown());
}

/// A device whose reads never succeed.
struct BrokenDev;

impl BlockDev for BrokenDev {
    fn read_block(&self, _blkno: u64, _buf: &mut [u8]) -> io::Result<()> {
        Err(io::Error::other("media error"))
    }

    fn write_block(&self, _blkno: u64, _buf: &[u8]) -> io::Result<()> {
        Err(io::Error::other("media error"))
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn failed_reads_surface_as_io_faults() {
    let _ = env_logger::builder().is_test(true).try_init();
    let fs = Fs::open_with(
        Config::new("unused"),
        Arc::new(BrokenDev),
        Arc::new(RecordingJournal::default()),
    )
    .unwrap();
    let domain = fs.new_domain(1);

    let err =
        fs.read_block(&domain, 11, Dio::START | Dio::WAIT).unwrap_err();
    assert!(matches!(err, Error::Io(_)));

    // the fault was also recorded filesystem-wide
    assert!(fs.check_error().is_err());
}
