use std::fs;
use std::io;
use std::path::Path;

use fault_injection::{annotate, fallible, maybe};
use crate::BlockNo;

/// The block device a filesystem instance sits on. One fixed-size
/// block per call; all multi-block orchestration lives above this
/// seam.
pub trait BlockDev: Send + Sync + 'static {
    fn read_block(&self, blkno: BlockNo, buf: &mut [u8]) -> io::Result<()>;
    fn write_block(&self, blkno: BlockNo, buf: &[u8]) -> io::Result<()>;
    fn sync(&self) -> io::Result<()>;
}

/// A `BlockDev` backed by a single file or raw device node, held under
/// an exclusive advisory lock for the life of the handle.
pub struct FileDev {
    file: fs::File,
    block_size: usize,
}

impl FileDev {
    pub fn open<P: AsRef<Path>>(
        path: P,
        block_size: usize,
    ) -> io::Result<FileDev> {
        let mut options = fs::OpenOptions::new();
        options.create(true).read(true).write(true);

        let file = fallible!(options.open(path));
        fallible!(fs2::FileExt::try_lock_exclusive(&file));

        Ok(FileDev { file, block_size })
    }

    fn offset(&self, blkno: BlockNo) -> u64 {
        blkno * self.block_size as u64
    }
}

impl BlockDev for FileDev {
    fn read_block(&self, blkno: BlockNo, buf: &mut [u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;

        assert_eq!(buf.len(), self.block_size);
        maybe!(self.file.read_exact_at(buf, self.offset(blkno)))
    }

    fn write_block(&self, blkno: BlockNo, buf: &[u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;

        assert_eq!(buf.len(), self.block_size);
        maybe!(self.file.write_all_at(buf, self.offset(blkno)))
    }

    fn sync(&self) -> io::Result<()> {
        match self.file.sync_all() {
            Ok(()) => Ok(()),
            Err(e) => Err(annotate!(e)),
        }
    }
}
