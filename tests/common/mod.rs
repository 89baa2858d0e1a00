use std::sync::Arc;

use gneiss::{Config, FileDev, Fs, RecordingJournal};
use tempdir::TempDir;

pub struct Fixture {
    pub fs: Arc<Fs>,
    pub journal: Arc<RecordingJournal>,
    _dir: TempDir,
}

/// A filesystem on a fresh temporary image with a recording journal.
pub fn fixture(name: &str) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = TempDir::new(name).unwrap();
    let path = dir.path().join("dev");
    let config = Config::new(&path);

    let journal = Arc::new(RecordingJournal::default());
    let device =
        Arc::new(FileDev::open(&path, config.block_size).unwrap());
    let fs = Fs::open_with(config, device, journal.clone()).unwrap();

    Fixture { fs, journal, _dir: dir }
}

/// Map a fresh block, prepare it as newly allocated, register it with
/// the open transaction, and scribble something recognizable in it.
pub fn new_pinned_block(
    f: &Fixture,
    domain: &Arc<gneiss::LockDomain>,
    blkno: u64,
) -> gneiss::Buffer {
    let buf = f.fs.get_block(domain, blkno, true).unwrap();
    f.fs.prep_new_buffer(&buf);
    f.fs.attach_to_transaction(domain, &buf).unwrap();
    buf.with_data_mut(|data| data[gneiss::META_HEADER_LEN] = blkno as u8);
    buf
}
