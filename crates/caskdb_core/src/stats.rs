//! Engine statistics.
//!
//! Operation counters live in [`EngineStats`] and are updated by the engine
//! and the compactor. [`Engine::stats`](crate::Engine::stats) combines them
//! with the current keydir and segment gauges into a [`StatsSnapshot`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use caskdb_core::Engine;
//!
//! let engine = Engine::open("data")?;
//! engine.set(b"user:1", b"alice")?;
//!
//! let stats = engine.stats();
//! println!("Writes: {}", stats.writes);
//! println!("Dead ratio: {:.2}", stats.dead_ratio());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Engine operation counters.
///
/// All counters are atomic and can be read while operations are in progress.
/// Values only increase.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Successful get operations.
    reads: AtomicU64,
    /// Successful set operations.
    writes: AtomicU64,
    /// Delete operations.
    deletes: AtomicU64,
    /// Value bytes returned by gets.
    bytes_read: AtomicU64,
    /// Record bytes appended, including compaction rewrites.
    bytes_written: AtomicU64,
    /// Completed merge passes.
    merges: AtomicU64,
    /// Merge passes aborted by an error.
    merge_failures: AtomicU64,
    /// Active segment rotations.
    rotations: AtomicU64,
}

impl EngineStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self, bytes: u64) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self, bytes: u64) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Counts bytes appended by a compaction rewrite.
    pub(crate) fn record_rewrite(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_merge(&self) {
        self.merges.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_merge_failure(&self) {
        self.merge_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rotation(&self) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of successful gets.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns the number of successful sets.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Returns the number of deletes.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Returns the value bytes returned by gets.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Returns the record bytes appended.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Returns the number of completed merge passes.
    pub fn merges(&self) -> u64 {
        self.merges.load(Ordering::Relaxed)
    }

    /// Returns the number of failed merge passes.
    pub fn merge_failures(&self) -> u64 {
        self.merge_failures.load(Ordering::Relaxed)
    }

    /// Returns the number of segment rotations.
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    /// Combines the counters with engine gauges.
    pub(crate) fn snapshot(&self, gauges: Gauges) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads(),
            writes: self.writes(),
            deletes: self.deletes(),
            bytes_read: self.bytes_read(),
            bytes_written: self.bytes_written(),
            merges: self.merges(),
            merge_failures: self.merge_failures(),
            rotations: self.rotations(),
            keys: gauges.keys,
            segments: gauges.segments,
            sum: gauges.sum,
            dead: gauges.dead,
            merging: gauges.merging,
        }
    }
}

/// Point-in-time engine state fed into a snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Gauges {
    pub keys: u64,
    pub segments: u64,
    pub sum: u64,
    pub dead: u64,
    pub merging: bool,
}

/// A point-in-time snapshot of engine statistics.
///
/// Unlike [`EngineStats`], this is a plain struct that can be compared or
/// passed across threads without atomics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Successful get operations.
    pub reads: u64,
    /// Successful set operations.
    pub writes: u64,
    /// Delete operations.
    pub deletes: u64,
    /// Value bytes returned by gets.
    pub bytes_read: u64,
    /// Record bytes appended.
    pub bytes_written: u64,
    /// Completed merge passes.
    pub merges: u64,
    /// Failed merge passes.
    pub merge_failures: u64,
    /// Segment rotations.
    pub rotations: u64,
    /// Live keys.
    pub keys: u64,
    /// Registered segments.
    pub segments: u64,
    /// Records in registered segments.
    pub sum: u64,
    /// Dead records in registered segments.
    pub dead: u64,
    /// Whether a merge pass is running.
    pub merging: bool,
}

impl StatsSnapshot {
    /// Fraction of records that are dead, 0.0 when nothing was written.
    #[must_use]
    pub fn dead_ratio(&self) -> f64 {
        dead_ratio(self.sum, self.dead)
    }
}

/// `dead / sum`, or 0.0 for an empty log.
#[must_use]
pub fn dead_ratio(sum: u64, dead: u64) -> f64 {
    if sum == 0 {
        0.0
    } else {
        dead as f64 / sum as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = EngineStats::new();
        assert_eq!(stats.reads(), 0);
        assert_eq!(stats.writes(), 0);
        assert_eq!(stats.merges(), 0);
    }

    #[test]
    fn record_operations() {
        let stats = EngineStats::new();

        stats.record_read(100);
        stats.record_read(50);
        assert_eq!(stats.reads(), 2);
        assert_eq!(stats.bytes_read(), 150);

        stats.record_write(200);
        stats.record_delete(21);
        stats.record_rewrite(30);
        assert_eq!(stats.writes(), 1);
        assert_eq!(stats.deletes(), 1);
        assert_eq!(stats.bytes_written(), 251);
    }

    #[test]
    fn snapshot_includes_gauges() {
        let stats = EngineStats::new();
        stats.record_merge();
        stats.record_rotation();

        let snap = stats.snapshot(Gauges {
            keys: 3,
            segments: 2,
            sum: 8,
            dead: 2,
            merging: false,
        });
        assert_eq!(snap.merges, 1);
        assert_eq!(snap.rotations, 1);
        assert_eq!(snap.keys, 3);
        assert!((snap.dead_ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn dead_ratio_of_empty_log_is_zero() {
        assert_eq!(dead_ratio(0, 0), 0.0);
        assert_eq!(StatsSnapshot::default().dead_ratio(), 0.0);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(EngineStats::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.record_read(1);
                    s.record_write(1);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.reads(), 1000);
        assert_eq!(stats.writes(), 1000);
    }
}
