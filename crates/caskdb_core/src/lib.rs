//! # CaskDB Core
//!
//! Log-structured key-value storage engine.
//!
//! This crate provides:
//! - An append-only record format with CRC-32 checksums
//! - Segment files with size-based rotation
//! - An in-memory keydir mapping every key to its latest value
//! - Recovery by replaying all segments on open
//! - Background merging of old segments
//!
//! The log is the only copy of the data. There is no separate WAL, index file
//! or manifest.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod compaction;
mod config;
mod dir;
mod engine;
mod error;
mod keydir;
pub mod segment;
mod stats;
mod types;

pub use compaction::{CompactionResult, Compactor, MergePolicy};
pub use config::{Config, MergeWindow};
pub use dir::{parse_segment_file_name, segment_file_name, SegmentDir};
pub use engine::Engine;
pub use error::{CoreError, CoreResult, Corruption, ErrorKind};
pub use keydir::{Keydir, KeydirEntry, Keys};
pub use segment::{ScanEnd, SegmentEntry, SegmentReader};
pub use stats::{EngineStats, StatsSnapshot};
pub use types::{SegmentId, TombstoneEncoding};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
