use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for a filesystem instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the backing block device or image file.
    pub path: PathBuf,
    /// Size in bytes of one on-disk block. Buffers are exactly this
    /// large. Default is 4096.
    pub block_size: usize,
    /// Upper bound on the number of blocks one readahead call may
    /// speculatively fetch. Default is 32. Zero disables readahead.
    pub max_readahead_blocks: u64,
    /// How long a buffer may stay referenced during reclamation before
    /// the stall watchdog emits a diagnostic snapshot. Default is 10
    /// seconds.
    pub stall_threshold: Duration,
    /// Mount read-only. Any write fails without touching storage.
    pub read_only: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            path: "gneiss.default".into(),
            block_size: 4096,
            max_readahead_blocks: 32,
            stall_threshold: Duration::from_secs(10),
            read_only: false,
        }
    }
}

impl Config {
    pub fn new<P: Into<PathBuf>>(path: P) -> Config {
        Config { path: path.into(), ..Default::default() }
    }
}
