use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::ail::AilState;
use crate::buffer::Buffer;
use crate::device::{BlockDev, FileDev};
use crate::io::IoDispatcher;
use crate::journal::{Journal, RecordingJournal};
use crate::reclaim::StallWatchdog;
use crate::result::io_fault;
use crate::{Config, Error, Result};

const SHUTDOWN_BIT: u32 = 1;

/// One mounted filesystem instance: the device, the journal contract,
/// the I/O dispatcher, and the log lock guarding all AIL state.
pub struct Fs {
    pub config: Config,
    pub(crate) journal: Arc<dyn Journal>,
    pub(crate) io: IoDispatcher,
    /// The log lock. Guards every AIL list mutation; never held
    /// across a blocking wait for I/O completion.
    pub(crate) ail: Mutex<AilState>,
    flags: AtomicU32,
    global_error: Mutex<Option<Error>>,
    pub(crate) watchdog: StallWatchdog,
}

impl Fs {
    /// Mount on the file at `config.path`.
    pub fn open(config: Config) -> Result<Arc<Fs>> {
        let device = Arc::new(FileDev::open(&config.path, config.block_size)?);
        Fs::open_with(config, device, Arc::new(RecordingJournal::default()))
    }

    /// Mount on an explicit device and journal, the seam used by
    /// orchestration layers and tests.
    pub fn open_with(
        config: Config,
        device: Arc<dyn BlockDev>,
        journal: Arc<dyn Journal>,
    ) -> Result<Arc<Fs>> {
        let io = IoDispatcher::start(device, config.block_size);
        let watchdog = StallWatchdog::start(config.stall_threshold);

        Ok(Arc::new(Fs {
            config,
            journal,
            io,
            ail: Mutex::new(AilState::new()),
            flags: AtomicU32::new(0),
            global_error: Mutex::new(None),
            watchdog,
        }))
    }

    /// True once the filesystem has been shut down after a fault.
    pub fn is_shutdown(&self) -> bool {
        self.flags.load(Ordering::Acquire) & SHUTDOWN_BIT != 0
    }

    /// Set the filesystem-wide shutdown flag. Every subsequent read,
    /// write, or drain operation fails fast without touching storage.
    pub fn shut_down(&self) {
        self.flags.fetch_or(SHUTDOWN_BIT, Ordering::Release);
    }

    pub(crate) fn fail_if_shutdown(&self) -> Result<()> {
        if self.is_shutdown() { Err(Error::Shutdown) } else { Ok(()) }
    }

    /// Escalate a programming-invariant violation: log it, shut the
    /// filesystem down, install the global error, and hand back the
    /// `Invariant` error for the caller to return.
    pub(crate) fn withdraw(&self, why: String) -> Error {
        log::error!("withdrawing from filesystem: {}", why);
        self.shut_down();
        let err = Error::Invariant(why);
        self.set_error(&err);
        err
    }

    /// The first fault recorded against this filesystem, if any.
    pub fn check_error(&self) -> Result<()> {
        match &*self.global_error.lock() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub(crate) fn set_error(&self, error: &Error) {
        let mut slot = self.global_error.lock();
        if slot.is_none() {
            *slot = Some(error.clone());
        }
    }

    /// Record an I/O fault against one buffer. Used where no direct
    /// caller exists to hand the error to, e.g. during AIL draining.
    pub(crate) fn io_error_block(&self, buf: &Buffer) {
        log::error!("I/O fault on block {}: {:?}", buf.blkno(), buf);
        self.set_error(&io_fault(buf.blkno(), "buffer not current"));
    }

    /// Flush all metadata to its in-place locations: journal first,
    /// then the whole AIL, polling until every commit group has
    /// drained, then release everything.
    pub fn sync_meta(&self) -> Result<()> {
        self.journal.flush()?;

        loop {
            self.ail1_start_all()?;
            if self.ail1_empty_all(true)? {
                break;
            }
            self.check_error()?;
            thread::sleep(Duration::from_millis(10));
        }

        self.ail2_empty_all()
    }
}
