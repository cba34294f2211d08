//! Core type definitions for CaskDB.

use std::fmt;

/// Identifier of a segment file.
///
/// Segment ids are assigned in creation order and never reused. They are
/// persisted only as the segment's file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SegmentId(pub u64);

impl SegmentId {
    /// Creates a new segment id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the id the next rotation will use.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:09}", self.0)
    }
}

/// How deletions are represented on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TombstoneEncoding {
    /// `value_length` is written as -1 and no value bytes follow.
    ///
    /// Any value, including a single zero byte, can be stored.
    #[default]
    Flag,
    /// A value of exactly one `0x00` byte marks the key as deleted.
    ///
    /// Reads logs that use an in-band marker value. Storing that value
    /// deletes the key once the log is replayed.
    ZeroByte,
}

impl TombstoneEncoding {
    /// The legacy in-band deletion marker.
    pub const ZERO_BYTE_MARKER: &'static [u8] = &[0];
}
