//! Engine facade and recovery.

use crate::compaction::{CompactionResult, Compactor, MergePolicy};
use crate::config::Config;
use crate::dir::SegmentDir;
use crate::error::{CoreError, CoreResult};
use crate::keydir::{Keydir, KeydirEntry, Keys};
use crate::segment::record::encoded_len;
use crate::segment::{ScanEnd, Segment, SegmentFile, SegmentReader, SegmentSet};
use crate::stats::{EngineStats, Gauges, StatsSnapshot};
use crate::types::{SegmentId, TombstoneEncoding};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The main engine handle.
///
/// `Engine` is the primary entry point for CaskDB. It provides:
/// - Point reads, writes and deletes of byte keys
/// - Recovery by replaying every segment on open
/// - Segment rotation by size
/// - Background compaction (see [`crate::compaction`])
///
/// # Opening an Engine
///
/// ```rust,ignore
/// use caskdb_core::Engine;
/// use std::path::Path;
///
/// let engine = Engine::open(Path::new("my_store"))?;
/// engine.set(b"user:1", b"alice")?;
/// assert_eq!(engine.get(b"user:1")?, b"alice");
/// engine.close()?;
/// ```
///
/// # Thread Safety
///
/// All methods take `&self`. Writes are serialized by an internal lock;
/// reads never take it. `close` must not race with in-flight calls.
pub struct Engine {
    inner: Arc<EngineInner>,
    compactor: Mutex<Option<Compactor>>,
}

/// State shared between the engine handle and its compactor.
pub(crate) struct EngineInner {
    pub(crate) config: Config,
    pub(crate) dir: SegmentDir,
    pub(crate) keydir: Keydir,
    pub(crate) segments: SegmentSet,
    /// The active segment. `None` once closed.
    pub(crate) writer: Mutex<Option<ActiveSegment>>,
    pub(crate) stats: EngineStats,
    pub(crate) dispatch: tracing::Dispatch,
    /// Serializes merge passes.
    pub(crate) merge_lock: Mutex<()>,
    pub(crate) merging: AtomicBool,
    open: AtomicBool,
}

/// The writable segment plus the clock that stamps its records.
pub(crate) struct ActiveSegment {
    pub(crate) segment: Segment,
    pub(crate) file: Arc<SegmentFile>,
    last_timestamp: i64,
}

impl ActiveSegment {
    /// Next write timestamp in microseconds, strictly increasing.
    fn next_timestamp(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_micros();
        self.last_timestamp = now.max(self.last_timestamp.saturating_add(1));
        self.last_timestamp
    }

    /// Fsyncs the segment and records how far it is durable.
    pub(crate) fn sync(&mut self) -> CoreResult<()> {
        self.segment.sync()?;
        self.file.record_synced(self.segment.size());
        Ok(())
    }
}

/// What to append for a key.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Payload<'a> {
    Value(&'a [u8]),
    Tombstone,
}

/// Where an append landed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Appended {
    pub(crate) segment_id: SegmentId,
    pub(crate) value_offset: u64,
    pub(crate) bytes: u64,
}

/// Outcome of replaying the existing segments.
struct Recovered {
    ids: Vec<SegmentId>,
    last_end: ScanEnd,
    max_timestamp: i64,
}

impl Engine {
    /// Opens an engine on a directory with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another engine has the directory locked (`DirectoryLocked`)
    /// - The path is unusable (`InvalidPath`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens an engine on a directory with custom configuration.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use caskdb_core::{Config, Engine};
    /// use std::path::Path;
    ///
    /// let config = Config::default()
    ///     .max_segment_size(64 * 1024 * 1024)
    ///     .sync_on_write(true);
    ///
    /// let engine = Engine::open_with_config(Path::new("my_store"), config)?;
    /// ```
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        config.validate()?;
        let dispatch = config
            .log_dispatch
            .clone()
            .unwrap_or_else(|| tracing::dispatcher::get_default(tracing::Dispatch::clone));

        let engine_dispatch = dispatch.clone();
        tracing::dispatcher::with_default(&dispatch, move || {
            Self::open_inner(path, config, engine_dispatch)
        })
    }

    fn open_inner(path: &Path, config: Config, dispatch: tracing::Dispatch) -> CoreResult<Self> {
        let dir = SegmentDir::open(path, config.create_if_missing, config.lock_directory)?;
        let keydir = Keydir::new();
        let segments = SegmentSet::new();

        let recovered = replay(&dir, &keydir, &segments, &config)?;

        // New records never go behind bytes the reader could not decode.
        let active_id = match recovered.ids.last() {
            None => SegmentId::new(0),
            Some(&id) if recovered.last_end.is_clean() => id,
            Some(&id) => id.next(),
        };
        let file = match segments.get(active_id) {
            Some(file) => file,
            None => {
                let path = dir.create_segment_file(active_id)?;
                let file = Arc::new(SegmentFile::open(&path, active_id)?);
                segments.insert(Arc::clone(&file));
                file
            }
        };
        let segment = Segment::open(file.path(), active_id)?;

        tracing::info!(
            path = %path.display(),
            segments = segments.len(),
            keys = keydir.len(),
            active = %active_id,
            "opened engine"
        );

        let inner = Arc::new(EngineInner {
            dir,
            keydir,
            segments,
            writer: Mutex::new(Some(ActiveSegment {
                segment,
                file,
                last_timestamp: recovered.max_timestamp,
            })),
            stats: EngineStats::new(),
            dispatch,
            merge_lock: Mutex::new(()),
            merging: AtomicBool::new(false),
            open: AtomicBool::new(true),
            config,
        });

        let compactor = if inner.config.compaction {
            Some(Compactor::start(&inner)?)
        } else {
            None
        };

        Ok(Self {
            inner,
            compactor: Mutex::new(compactor),
        })
    }

    /// Returns the value stored for `key`.
    ///
    /// Fails with `KeyNotFound` if the key is absent.
    pub fn get(&self, key: &[u8]) -> CoreResult<Vec<u8>> {
        self.inner.ensure_open()?;

        // Resolve the location and pin its segment under the registry lock so
        // the compactor cannot delete the file before the read.
        let (entry, file) = {
            let segments = self.inner.segments.read();
            let entry = self
                .inner
                .keydir
                .get(key)
                .ok_or_else(|| CoreError::not_found(key))?;
            let file = segments
                .get(&entry.segment_id)
                .cloned()
                .ok_or(CoreError::SegmentMissing {
                    segment_id: entry.segment_id,
                })?;
            (entry, file)
        };

        let value = file.read_value(entry.value_offset, entry.value_size)?;
        self.inner.stats.record_read(value.len() as u64);
        Ok(value)
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// Fails with `Validation` on an empty key or a key or value longer than
    /// `i32::MAX` bytes.
    pub fn set(&self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.inner.ensure_open()?;
        validate_key(key)?;
        if self.inner.config.tombstone_encoding == TombstoneEncoding::ZeroByte
            && value == TombstoneEncoding::ZERO_BYTE_MARKER
        {
            return self.delete(key);
        }

        let mut guard = self.inner.writer.lock();
        let active = guard.as_mut().ok_or(CoreError::Closed)?;
        let timestamp = active.next_timestamp();
        let appended = self
            .inner
            .append(active, key, Payload::Value(value), timestamp)?;

        let entry = KeydirEntry {
            segment_id: appended.segment_id,
            value_size: value.len() as u32,
            value_offset: appended.value_offset,
            timestamp,
        };
        if let Some(previous) = self.inner.keydir.add(key, entry) {
            self.inner.mark_dead(previous.segment_id);
        }
        drop(guard);

        self.inner.stats.record_write(appended.bytes);
        Ok(())
    }

    /// Deletes `key`. Deleting an absent key succeeds without writing.
    pub fn delete(&self, key: &[u8]) -> CoreResult<()> {
        self.inner.ensure_open()?;
        validate_key(key)?;

        let mut guard = self.inner.writer.lock();
        let active = guard.as_mut().ok_or(CoreError::Closed)?;
        if !self.inner.keydir.contains(key) {
            return Ok(());
        }
        let timestamp = active.next_timestamp();
        let appended = self
            .inner
            .append(active, key, Payload::Tombstone, timestamp)?;

        // The marker itself is never live.
        active.file.record_dead();
        if let Some(previous) = self.inner.keydir.remove(key) {
            self.inner.mark_dead(previous.segment_id);
        }
        drop(guard);

        self.inner.stats.record_delete(appended.bytes);
        Ok(())
    }

    /// Returns true if `key` has a value.
    pub fn has(&self, key: &[u8]) -> CoreResult<bool> {
        self.inner.ensure_open()?;
        Ok(self.inner.keydir.contains(key))
    }

    /// Flushes and fsyncs the active segment.
    pub fn sync(&self) -> CoreResult<()> {
        self.inner.ensure_open()?;
        let mut guard = self.inner.writer.lock();
        let active = guard.as_mut().ok_or(CoreError::Closed)?;
        active.sync()
    }

    /// Makes every acknowledged write durable. Same as [`Engine::sync`].
    pub fn flush_all(&self) -> CoreResult<()> {
        self.sync()
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.keydir.len()
    }

    /// Returns true if no keys are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.keydir.is_empty()
    }

    /// Returns a lazy iterator over live keys.
    ///
    /// Keys deleted while iterating are skipped; keys added are not visited.
    pub fn keys(&self) -> CoreResult<Keys> {
        self.inner.ensure_open()?;
        Ok(self.inner.keydir.keys())
    }

    /// Runs one merge pass now, ignoring the trigger and the window.
    pub fn merge(&self) -> CoreResult<CompactionResult> {
        self.inner.ensure_open()?;
        self.inner.run_merge(None)
    }

    /// Runs a merge pass if the trigger and the window allow it right now.
    pub fn try_merge(&self) -> CoreResult<Option<CompactionResult>> {
        self.try_merge_at(crate::compaction::local_hour())
    }

    /// Runs a merge pass if the trigger and the window allow it at `hour`.
    pub fn try_merge_at(&self, hour: u32) -> CoreResult<Option<CompactionResult>> {
        self.inner.ensure_open()?;
        if !self.inner.should_merge(hour) {
            return Ok(None);
        }
        self.inner.run_merge(None).map(Some)
    }

    /// Returns a snapshot of counters and gauges.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        let (sum, dead) = self.inner.segments.totals();
        self.inner.stats.snapshot(Gauges {
            keys: self.inner.keydir.len() as u64,
            segments: self.inner.segments.len() as u64,
            sum,
            dead,
            merging: self.inner.merging.load(Ordering::Relaxed),
        })
    }

    /// Registered segment ids in ascending order.
    #[must_use]
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.inner.segments.ids()
    }

    /// Id of the segment currently accepting writes.
    pub fn active_segment_id(&self) -> CoreResult<SegmentId> {
        let guard = self.inner.writer.lock();
        guard
            .as_ref()
            .map(|active| active.segment.id())
            .ok_or(CoreError::Closed)
    }

    /// Copies the whole keydir.
    #[must_use]
    pub fn keydir_snapshot(&self) -> HashMap<Vec<u8>, KeydirEntry> {
        self.inner.keydir.snapshot()
    }

    /// Returns the storage directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.dir.path()
    }

    /// Returns engine configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Checks if the engine is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Closes the engine.
    ///
    /// Stops the compactor, syncs and closes the active segment, drops the
    /// keydir and releases the directory lock. Every step is attempted; the
    /// first error is returned. Closing twice is a no-op.
    pub fn close(&self) -> CoreResult<()> {
        if !self.inner.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let inner = &self.inner;
        tracing::dispatcher::with_default(&inner.dispatch, || {
            let mut first_error = None;

            if let Some(compactor) = self.compactor.lock().take() {
                compactor.stop();
            }

            if let Some(mut active) = inner.writer.lock().take() {
                if let Err(e) = active.sync() {
                    tracing::error!(error = %e, "failed to sync active segment on close");
                    first_error.get_or_insert(e);
                }
                if let Err(e) = active.segment.close() {
                    first_error.get_or_insert(e);
                }
            }

            inner.keydir.clear();

            if let Err(e) = inner.dir.unlock() {
                tracing::warn!(error = %e, "failed to release directory lock");
                first_error.get_or_insert(e);
            }

            tracing::info!(path = %inner.dir.path().display(), "closed engine");
            first_error.map_or(Ok(()), Err)
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("path", &self.path())
            .field("is_open", &self.is_open())
            .field("keys", &self.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl EngineInner {
    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CoreError::Closed)
        }
    }

    /// Merge policy built from the configuration.
    pub(crate) fn merge_policy(&self) -> MergePolicy {
        MergePolicy::new(self.config.merge_trigger, self.config.merge_window)
    }

    /// Whether the trigger and the window allow a merge at `hour`.
    pub(crate) fn should_merge(&self, hour: u32) -> bool {
        let (sum, dead) = self.segments.totals();
        self.merge_policy().should_merge(sum, dead, hour)
    }

    /// Counts one record in `segment_id` as superseded.
    pub(crate) fn mark_dead(&self, segment_id: SegmentId) {
        if let Some(file) = self.segments.get(segment_id) {
            file.record_dead();
        }
    }

    /// Appends one record to the active segment, rotating first if needed.
    ///
    /// The record is flushed to the OS (and fsynced with `sync_on_write`)
    /// before this returns, so readers can see it once the keydir points at
    /// it. Callers hold the writer lock and update the keydir themselves.
    pub(crate) fn append(
        &self,
        active: &mut ActiveSegment,
        key: &[u8],
        payload: Payload<'_>,
        timestamp: i64,
    ) -> CoreResult<Appended> {
        let encoding = self.config.tombstone_encoding;
        let needed = match payload {
            Payload::Value(value) => encoded_len(key.len(), value.len()),
            Payload::Tombstone => match encoding {
                TombstoneEncoding::Flag => encoded_len(key.len(), 0),
                TombstoneEncoding::ZeroByte => {
                    encoded_len(key.len(), TombstoneEncoding::ZERO_BYTE_MARKER.len())
                }
            },
        };

        let size = active.segment.size();
        if active.segment.is_poisoned()
            || (size > 0 && size.saturating_add(needed) > self.config.max_segment_size)
        {
            self.rotate(active)?;
        }

        let value_offset = match payload {
            Payload::Value(value) => active.segment.write(key, value, timestamp)?,
            Payload::Tombstone => match encoding {
                TombstoneEncoding::Flag => active.segment.write_tombstone(key, timestamp)?,
                TombstoneEncoding::ZeroByte => active.segment.write(
                    key,
                    TombstoneEncoding::ZERO_BYTE_MARKER,
                    timestamp,
                )?,
            },
        };
        if self.config.sync_on_write {
            active.sync()?;
        } else {
            active.segment.flush()?;
        }
        active.file.record_written();

        Ok(Appended {
            segment_id: active.segment.id(),
            value_offset,
            bytes: needed,
        })
    }

    /// Closes the active segment and starts the next one.
    ///
    /// The outgoing segment is fsynced first: [`Engine::sync`] only touches
    /// the active segment, so every closed segment must already be durable.
    fn rotate(&self, active: &mut ActiveSegment) -> CoreResult<()> {
        tracing::dispatcher::with_default(&self.dispatch, || self.rotate_inner(active))
    }

    fn rotate_inner(&self, active: &mut ActiveSegment) -> CoreResult<()> {
        let previous_id = active.segment.id();
        let poisoned = active.segment.is_poisoned();
        match active.sync() {
            Ok(()) => {}
            Err(e) if poisoned => {
                tracing::warn!(segment_id = %previous_id, error = %e, "failed to sync poisoned segment");
            }
            Err(e) => return Err(e),
        }

        let next = previous_id.next();
        let path = self.dir.create_segment_file(next)?;
        let segment = Segment::open(&path, next)?;
        let file = Arc::new(SegmentFile::open(&path, next)?);
        self.segments.insert(Arc::clone(&file));

        let previous = std::mem::replace(&mut active.segment, segment);
        active.file = file;
        self.stats.record_rotation();

        if let Err(e) = previous.close() {
            tracing::warn!(segment_id = %previous_id, error = %e, "failed to close rotated segment");
        }
        tracing::info!(from = %previous_id, to = %next, poisoned, "rotated active segment");
        Ok(())
    }
}

/// Rebuilds the keydir from every segment in the directory.
fn replay(
    dir: &SegmentDir,
    keydir: &Keydir,
    segments: &SegmentSet,
    config: &Config,
) -> CoreResult<Recovered> {
    let ids = dir.list_segments()?;
    let mut last_end = ScanEnd::Clean;
    let mut max_timestamp = 0;

    for &id in &ids {
        let path = dir.segment_path(id);
        let file = Arc::new(SegmentFile::open(&path, id)?);
        segments.insert(Arc::clone(&file));

        let mut reader = SegmentReader::open(&path, id)?;
        let mut records = 0u64;
        while let Some(entry) = reader.read()? {
            records += 1;
            file.record_written();
            max_timestamp = max_timestamp.max(entry.record.timestamp);

            if entry.record.is_deletion(config.tombstone_encoding) {
                file.record_dead();
                if let Some(previous) = keydir.remove(&entry.record.key) {
                    mark_replayed_dead(segments, previous.segment_id);
                }
            } else {
                let location = KeydirEntry {
                    segment_id: id,
                    value_size: entry.record.value.len() as u32,
                    value_offset: entry.value_offset(),
                    timestamp: entry.record.timestamp,
                };
                if let Some(previous) = keydir.add(&entry.record.key, location) {
                    mark_replayed_dead(segments, previous.segment_id);
                }
            }
        }

        last_end = reader.end_state().unwrap_or(ScanEnd::Clean);
        match last_end {
            ScanEnd::Clean => {
                tracing::debug!(segment_id = %id, records, "replayed segment");
            }
            ScanEnd::TornTail { offset } => {
                tracing::warn!(
                    segment_id = %id,
                    offset,
                    ignored_bytes = reader.file_len() - offset,
                    "ignoring torn tail"
                );
            }
            ScanEnd::Corrupt {
                offset,
                reason,
                unreadable_bytes,
            } => {
                tracing::error!(
                    segment_id = %id,
                    offset,
                    %reason,
                    unreadable_bytes,
                    "corrupt record, rest of segment skipped"
                );
                if config.strict_recovery {
                    return Err(CoreError::CorruptRecord {
                        segment_id: Some(id),
                        offset,
                        reason,
                    });
                }
            }
        }
    }

    Ok(Recovered {
        ids,
        last_end,
        max_timestamp,
    })
}

fn mark_replayed_dead(segments: &SegmentSet, segment_id: SegmentId) {
    if let Some(file) = segments.get(segment_id) {
        file.record_dead();
    }
}

fn validate_key(key: &[u8]) -> CoreResult<()> {
    if key.is_empty() {
        return Err(CoreError::validation("key must not be empty"));
    }
    Ok(())
}
