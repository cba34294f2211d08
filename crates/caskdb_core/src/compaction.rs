//! Background merge of old segments.
//!
//! A merge pass rewrites the live records of every segment except the active
//! one through the ordinary write path, then deletes the old files. Dead
//! records (superseded values and deletion markers) are dropped.
//!
//! ## Liveness
//!
//! A record is live iff the keydir entry for its key points at exactly that
//! record: same segment and same value offset. The check and the rewrite run
//! under the engine write lock, one record at a time, so a concurrent `set`
//! either lands before the check (and the record is skipped) or after the
//! rewrite (and supersedes it).
//!
//! ## Deletion
//!
//! Merged segments are unregistered, then deleted once no reader still holds
//! a handle to them, in ascending id order. A segment that is still referenced
//! by the keydir is kept, together with every newer merged segment, since those
//! may hold the deletion markers that shadow its records.

use crate::config::MergeWindow;
use crate::engine::{EngineInner, Payload};
use crate::error::{CoreError, CoreResult};
use crate::keydir::KeydirEntry;
use crate::segment::{ScanEnd, SegmentFile, SegmentReader};
use crate::stats::dead_ratio;
use crate::types::SegmentId;
use chrono::Timelike;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Poll interval while waiting for readers to drop a retired segment.
const HANDLE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Wait on readers longer than this is logged.
const SLOW_READER_WAIT: Duration = Duration::from_millis(100);

/// Decides when a merge may run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergePolicy {
    trigger: f64,
    window: MergeWindow,
}

impl MergePolicy {
    /// Creates a policy from a dead ratio trigger and a window.
    #[must_use]
    pub const fn new(trigger: f64, window: MergeWindow) -> Self {
        Self { trigger, window }
    }

    /// True when `dead / sum` exceeds the trigger and `hour` is in the window.
    #[must_use]
    pub fn should_merge(&self, sum: u64, dead: u64, hour: u32) -> bool {
        dead_ratio(sum, dead) > self.trigger && self.window.contains(hour)
    }
}

/// Current hour on the local clock.
#[must_use]
pub fn local_hour() -> u32 {
    chrono::Local::now().hour()
}

/// Outcome of one merge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionResult {
    /// Segments whose files were deleted.
    pub segments_merged: usize,
    /// Segments scanned but kept.
    pub segments_retained: usize,
    /// Records read from merged segments.
    pub records_scanned: u64,
    /// Live records copied into the active segment.
    pub records_rewritten: u64,
    /// Dead records left behind.
    pub records_dropped: u64,
    /// Bytes of segment files deleted.
    pub bytes_reclaimed: u64,
}

/// Stop signal shared with the compactor thread.
#[derive(Debug, Default)]
pub(crate) struct Shutdown {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl Shutdown {
    fn trigger(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleeps up to `timeout`. Returns true if shutdown was requested.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.wake.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// Handle to the background compactor thread.
///
/// Dropping the handle stops the thread and waits for it.
#[derive(Debug)]
pub struct Compactor {
    shutdown: Arc<Shutdown>,
    handle: Option<JoinHandle<()>>,
}

impl Compactor {
    /// Starts the compactor for `engine`.
    ///
    /// The thread holds only a weak reference and exits once the engine is
    /// gone.
    pub(crate) fn start(engine: &Arc<EngineInner>) -> CoreResult<Self> {
        let shutdown = Arc::new(Shutdown::default());
        let weak = Arc::downgrade(engine);
        let thread_shutdown = Arc::clone(&shutdown);
        let dispatch = engine.dispatch.clone();

        let handle = thread::Builder::new()
            .name("caskdb-compactor".to_string())
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || run(&weak, &thread_shutdown));
            })?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for it to exit.
    ///
    /// A pass in progress is abandoned between records; nothing is deleted.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("compactor thread panicked");
            }
        }
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn run(engine: &Weak<EngineInner>, shutdown: &Shutdown) {
    let Some((interval, retry_delay)) = engine
        .upgrade()
        .map(|inner| (inner.config.merge_interval, inner.config.merge_retry_delay))
    else {
        return;
    };
    tracing::debug!(?interval, "compactor started");

    let mut delay = interval;
    loop {
        if shutdown.wait(delay) {
            break;
        }
        let Some(inner) = engine.upgrade() else {
            break;
        };
        delay = interval;

        let hour = local_hour();
        if !inner.should_merge(hour) {
            let (sum, dead) = inner.segments.totals();
            tracing::debug!(sum, dead, hour, "merge not due");
            continue;
        }

        match inner.run_merge(Some(shutdown)) {
            Ok(_) => {}
            Err(CoreError::Closed) => break,
            Err(_) => delay = retry_delay,
        }
    }

    tracing::debug!("compactor stopped");
}

/// Resets the merging flag when a pass ends.
struct MergingFlag<'a>(&'a AtomicBool);

impl Drop for MergingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

impl EngineInner {
    /// Runs one merge pass, logging and counting the outcome.
    pub(crate) fn run_merge(&self, shutdown: Option<&Shutdown>) -> CoreResult<CompactionResult> {
        let started = Instant::now();
        match self.merge_pass(shutdown) {
            Ok(result) => {
                self.stats.record_merge();
                tracing::info!(
                    merged = result.segments_merged,
                    retained = result.segments_retained,
                    rewritten = result.records_rewritten,
                    dropped = result.records_dropped,
                    reclaimed = result.bytes_reclaimed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "merge pass complete"
                );
                Ok(result)
            }
            Err(CoreError::Closed) => {
                tracing::debug!("merge pass abandoned on shutdown");
                Err(CoreError::Closed)
            }
            Err(e) => {
                self.stats.record_merge_failure();
                tracing::error!(error = %e, "merge pass failed");
                Err(e)
            }
        }
    }

    fn merge_pass(&self, shutdown: Option<&Shutdown>) -> CoreResult<CompactionResult> {
        let _pass = self.merge_lock.lock();
        self.merging.store(true, Ordering::Relaxed);
        let _flag = MergingFlag(&self.merging);

        let active_id = {
            let guard = self.writer.lock();
            guard
                .as_ref()
                .map(|active| active.segment.id())
                .ok_or(CoreError::Closed)?
        };
        let candidates = self.segments.older_than(active_id);
        let mut result = CompactionResult::default();
        if candidates.is_empty() {
            return Ok(result);
        }
        tracing::info!(segments = candidates.len(), active = %active_id, "merge pass started");

        for (i, file) in candidates.iter().enumerate() {
            if i > 0 && shutdown.is_some_and(|s| s.wait(self.config.merge_pause)) {
                return Err(CoreError::Closed);
            }
            let end = self.merge_segment(file, shutdown, &mut result)?;
            if let ScanEnd::Corrupt { offset, reason, .. } = end {
                tracing::warn!(segment_id = %file.id(), offset, %reason, "merge stopped at corrupt record");
            }
        }

        // Rewritten records must be durable before their old copies go.
        // Segments rotated out during the pass were synced by the rotation.
        {
            let mut guard = self.writer.lock();
            guard.as_mut().ok_or(CoreError::Closed)?.sync()?;
        }

        let mut retired: Vec<Arc<SegmentFile>> = Vec::new();
        let mut retain_rest = false;
        for file in candidates {
            let references = self.keydir.references_segment(file.id());
            if retain_rest || references > 0 {
                retain_rest = true;
                result.segments_retained += 1;
                tracing::warn!(segment_id = %file.id(), references, "keeping merged segment");
                continue;
            }
            self.segments.remove(file.id());
            retired.push(file);
        }

        let mut ids: Vec<SegmentId> = Vec::with_capacity(retired.len());
        for file in retired {
            result.bytes_reclaimed += std::fs::metadata(file.path())
                .map(|m| m.len())
                .unwrap_or(0);
            ids.push(file.id());
            wait_for_readers(file);
        }
        result.segments_merged = self.dir.delete_segment_files(&ids)?;
        Ok(result)
    }

    /// Copies the live records of one segment into the active segment.
    fn merge_segment(
        &self,
        file: &SegmentFile,
        shutdown: Option<&Shutdown>,
        result: &mut CompactionResult,
    ) -> CoreResult<ScanEnd> {
        let encoding = self.config.tombstone_encoding;
        let mut reader = SegmentReader::open(file.path(), file.id())?;

        while let Some(entry) = reader.read()? {
            if shutdown.is_some_and(Shutdown::is_stopped) {
                return Err(CoreError::Closed);
            }
            result.records_scanned += 1;
            if entry.record.is_deletion(encoding) {
                result.records_dropped += 1;
                continue;
            }

            let value_offset = entry.value_offset();
            let record = entry.record;

            let mut guard = self.writer.lock();
            let active = guard.as_mut().ok_or(CoreError::Closed)?;
            let live = self.keydir.get(&record.key).is_some_and(|current| {
                current.segment_id == file.id() && current.value_offset == value_offset
            });
            if !live {
                result.records_dropped += 1;
                continue;
            }

            let appended =
                self.append(active, &record.key, Payload::Value(&record.value), record.timestamp)?;
            self.keydir.add(
                &record.key,
                KeydirEntry {
                    segment_id: appended.segment_id,
                    value_size: record.value.len() as u32,
                    value_offset: appended.value_offset,
                    timestamp: record.timestamp,
                },
            );
            file.record_dead();
            drop(guard);

            self.stats.record_rewrite(appended.bytes);
            result.records_rewritten += 1;
        }

        Ok(reader.end_state().unwrap_or(ScanEnd::Clean))
    }
}

/// Blocks until `file` is the last handle to its segment, then drops it.
///
/// Readers hold a handle only for one positional read, so the wait is short
/// unless a reader is stuck in I/O.
fn wait_for_readers(file: Arc<SegmentFile>) {
    let started = Instant::now();
    let mut reported = false;
    while Arc::strong_count(&file) > 1 {
        if !reported && started.elapsed() >= SLOW_READER_WAIT {
            reported = true;
            tracing::debug!(
                segment_id = %file.id(),
                handles = Arc::strong_count(&file) - 1,
                "waiting for readers to release retired segment"
            );
        }
        thread::sleep(HANDLE_POLL_INTERVAL);
    }
    if reported {
        tracing::debug!(
            segment_id = %file.id(),
            waited_ms = started.elapsed().as_millis() as u64,
            "readers released retired segment"
        );
    }
}
