//! Segment storage.
//!
//! A segment is an append-only file of log records. Exactly one segment, the
//! active one, accepts writes; every other segment is immutable until the
//! compactor deletes it.
//!
//! ## Segment Record Format
//!
//! ```text
//! | checksum (4) | timestamp (8) | key_len (4) | value_len (4) | key (K) | value (V) |
//! ```
//!
//! `value_len = -1` marks a deletion.

mod file;
mod reader;
pub mod record;
mod writer;

pub use file::{SegmentFile, SegmentSet};
pub(crate) use file::SegmentMap;
pub use reader::{ScanEnd, SegmentEntry, SegmentReader};
pub use record::{Record, RecordHeader};
pub use writer::Segment;
