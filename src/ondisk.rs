//! The fixed on-disk header stamped into every metadata block.
//!
//! Layout, big-endian: magic `u32`, metadata type tag `u32`, the
//! block's own number `u64`. A block whose header fails the magic or
//! type check at read time is treated as a hard I/O fault.

use crate::{BlockNo, Error, Result};

/// Magic constant at the start of every metadata block.
pub const META_MAGIC: u32 = 0x474e_5331; // "GNS1"

/// Total size of the on-disk metadata header.
pub const META_HEADER_LEN: usize = 16;

/// The metadata type tag carried in a block's on-disk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MetaType {
    /// Freshly prepared, not yet tagged by a higher layer.
    None = 0,
    /// An interior node of an inode's indirect-addressing tree.
    IndexNode = 1,
    /// An ordinary (non-journaled) data block.
    DataNode = 2,
    /// A data block whose contents go through the journal.
    JournaledData = 3,
    /// An on-disk inode record.
    InodeRecord = 4,
}

impl MetaType {
    fn from_raw(raw: u32) -> Option<MetaType> {
        match raw {
            0 => Some(MetaType::None),
            1 => Some(MetaType::IndexNode),
            2 => Some(MetaType::DataNode),
            3 => Some(MetaType::JournaledData),
            4 => Some(MetaType::InodeRecord),
            _ => None,
        }
    }
}

/// Stamp the magic constant and the block's own number into a buffer
/// image, leaving the type tag untouched.
pub(crate) fn header_stamp(data: &mut [u8], blkno: BlockNo) {
    assert!(data.len() >= META_HEADER_LEN);
    data[0..4].copy_from_slice(&META_MAGIC.to_be_bytes());
    data[8..16].copy_from_slice(&blkno.to_be_bytes());
}

/// Set the metadata type tag in a buffer image.
pub(crate) fn metatype_set(data: &mut [u8], metatype: MetaType) {
    assert!(data.len() >= META_HEADER_LEN);
    data[4..8].copy_from_slice(&(metatype as u32).to_be_bytes());
}

/// Check that a buffer image carries the magic constant and the
/// expected type tag.
pub(crate) fn metatype_check(
    data: &[u8],
    blkno: BlockNo,
    expected: MetaType,
) -> Result<()> {
    assert!(data.len() >= META_HEADER_LEN);
    let magic = u32::from_be_bytes(data[0..4].try_into().unwrap());
    let found = u32::from_be_bytes(data[4..8].try_into().unwrap());

    if magic != META_MAGIC {
        return Err(crate::result::io_fault(blkno, "bad header magic"));
    }
    if MetaType::from_raw(found) != Some(expected) {
        return Err(Error::TypeMismatch { block: blkno, expected, found });
    }

    Ok(())
}

/// Zero a buffer image past the given offset. Used when initializing
/// freshly allocated metadata blocks so stale device contents never
/// leak past the header.
pub(crate) fn buffer_clear_tail(data: &mut [u8], from: usize) {
    assert!(from <= data.len());
    for byte in &mut data[from..] {
        *byte = 0;
    }
}

impl crate::Buffer {
    /// Set the metadata type tag in this buffer's on-disk header.
    pub fn metatype_set(&self, metatype: MetaType) {
        let mut state = self.inner.state.lock();
        metatype_set(&mut state.data, metatype);
    }

    /// Check this buffer's on-disk header against an expected type
    /// tag. A mismatch is a hard I/O fault.
    pub fn metatype_check(&self, expected: MetaType) -> Result<()> {
        let state = self.inner.state.lock();
        metatype_check(&state.data, self.blkno(), expected)
    }

    /// Zero the buffer image past the metadata header.
    pub fn clear_tail(&self, from: usize) {
        let mut state = self.inner.state.lock();
        buffer_clear_tail(&mut state.data, from);
    }
}
