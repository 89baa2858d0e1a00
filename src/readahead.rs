//! Speculative prefetch of an extent of blocks expected to be read
//! soon.

use std::sync::Arc;

use crate::{BlockNo, Fs, LockDomain, Result};

impl Fs {
    /// Start readahead on `extlen` blocks beginning at `start`.
    ///
    /// `extlen` is clamped to `Config.max_readahead_blocks`. If the
    /// first block is already current there is nothing worth
    /// prefetching and the call returns at once. Otherwise each
    /// subsequent block not already current or in flight gets a
    /// non-blocking read; the loop stops early as soon as the first
    /// block becomes current, since the expected benefit shrinks from
    /// there. Every acquired reference is released before returning.
    pub fn start_readahead(
        &self,
        domain: &Arc<LockDomain>,
        start: BlockNo,
        extlen: u64,
    ) -> Result<()> {
        let max = self.config.max_readahead_blocks;
        if extlen == 0 || max == 0 {
            return Ok(());
        }
        self.fail_if_shutdown()?;

        let extlen = extlen.min(max);

        let first = self
            .get_block(domain, start, true)
            .expect("get_block with create cannot miss");
        if first.is_uptodate() {
            return Ok(());
        }
        self.io.submit_read(&first);

        for blkno in start + 1..start + extlen {
            let buf = self
                .get_block(domain, blkno, true)
                .expect("get_block with create cannot miss");
            self.io.submit_read(&buf);
            drop(buf);

            if first.is_uptodate() {
                break;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::Dio;

    #[test]
    fn readahead_is_clamped_and_harmless_on_current_blocks() {
        let dir = tempdir::TempDir::new("gneiss-ra").unwrap();
        let config = crate::Config {
            max_readahead_blocks: 4,
            ..crate::Config::new(dir.path().join("dev"))
        };
        let fs = crate::Fs::open(config).unwrap();
        let domain = fs.new_domain(1);

        // settle a run of blocks on disk
        for blkno in 100..110 {
            let buf = fs.get_block(&domain, blkno, true).unwrap();
            fs.prep_new_buffer(&buf);
            fs.write_block(&buf, Dio::DIRTY | Dio::START | Dio::WAIT)
                .unwrap();
        }
        fs.invalidate_all(&domain).unwrap();

        fs.start_readahead(&domain, 100, 10).unwrap();

        // clamped: at most 4 blocks were mapped back in
        assert!(domain.cached_blocks() <= 4);

        // readahead holds no references of its own; the worker's
        // transient clone drops shortly after io completion
        for blkno in 100..110 {
            if let Some(buf) = fs.get_block(&domain, blkno, false) {
                buf.wait_io();
                for _ in 0..1000 {
                    if buf.ref_count() == 2 {
                        break;
                    }
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
                assert_eq!(buf.ref_count(), 2);
            }
        }

        // a fully current first block short-circuits
        let first = fs.read_block(&domain, 100, Dio::START | Dio::WAIT).unwrap();
        assert!(first.is_uptodate());
        fs.start_readahead(&domain, 100, 10).unwrap();
    }
}
