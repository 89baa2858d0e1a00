//! Metadata buffer cache and write-back ordering engine for a
//! journaled, lock-coordinated filesystem.
//!
//! Higher layers read and modify fixed-size on-disk blocks through a
//! per-lock-domain cache of [`Buffer`]s. A buffer modified inside an
//! open transaction is pinned so its in-place location is never
//! overwritten before the log record is durable; after the log record
//! is durable it is unpinned into a commit group of the AIL, which
//! drains modified buffers back to their in-place locations in strict
//! commit order before the protecting lock can be released.

mod ail;
mod buffer;
mod cache;
mod config;
mod device;
mod domain;
mod fs;
mod io;
mod journal;
mod meta;
mod ondisk;
mod pin;
mod readahead;
mod reclaim;
mod result;

pub use ail::{DrainState, GroupId};
pub use buffer::Buffer;
pub use cache::Dio;
pub use config::Config;
pub use device::{BlockDev, FileDev};
pub use domain::LockDomain;
pub use fs::Fs;
pub use journal::{Journal, RecordingJournal, TxHandle};
pub use meta::{InodeBufCache, MAX_META_HEIGHT};
pub use ondisk::{META_HEADER_LEN, META_MAGIC, MetaType};
pub use reclaim::Reclaim;
pub use result::{Error, Result};

/// A device-relative block number.
pub type BlockNo = u64;
