//! Shared read handles and the registry of live segments.

use crate::error::{CoreError, CoreResult};
use crate::types::SegmentId;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Random-access read handle for one segment.
///
/// Handles are shared through `Arc`. The compactor only deletes a segment's
/// file once it holds the last reference, so a reader that obtained a handle
/// can always finish its read.
///
/// Each handle also counts the records written to its segment, how many of
/// them are dead (superseded, deleted, or deletion markers), and how many
/// bytes this process has fsynced.
pub struct SegmentFile {
    id: SegmentId,
    path: PathBuf,
    file: Mutex<File>,
    records: AtomicU64,
    dead: AtomicU64,
    synced_len: AtomicU64,
}

impl SegmentFile {
    /// Opens a read handle on an existing segment file.
    pub fn open(path: &Path, id: SegmentId) -> CoreResult<Self> {
        let file = File::open(path).map_err(|e| CoreError::segment_io(path, e))?;
        Ok(Self {
            id,
            path: path.to_path_buf(),
            file: Mutex::new(file),
            records: AtomicU64::new(0),
            dead: AtomicU64::new(0),
            synced_len: AtomicU64::new(0),
        })
    }

    /// Reads exactly `len` bytes at `offset`.
    ///
    /// Fewer bytes than requested is a [`CoreError::ShortRead`].
    pub fn read_value(&self, offset: u64, len: u32) -> CoreResult<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        let mut filled = 0;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| CoreError::segment_io(&self.path, e))?;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(CoreError::segment_io(&self.path, e)),
            }
        }
        drop(file);

        if filled < buf.len() {
            return Err(CoreError::ShortRead {
                segment_id: self.id,
                offset,
                expected: len,
                actual: filled,
            });
        }
        Ok(buf)
    }

    /// Returns the segment id.
    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Returns the segment file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Counts one record written to this segment.
    pub(crate) fn record_written(&self) {
        self.records.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one record in this segment as dead.
    pub(crate) fn record_dead(&self) {
        self.dead.fetch_add(1, Ordering::Relaxed);
    }

    /// Notes that the first `len` bytes reached durable storage.
    pub(crate) fn record_synced(&self, len: u64) {
        self.synced_len.fetch_max(len, Ordering::Release);
    }

    /// Bytes of this segment fsynced since open.
    #[must_use]
    pub fn synced_len(&self) -> u64 {
        self.synced_len.load(Ordering::Acquire)
    }

    /// Records written to this segment.
    #[must_use]
    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    /// Dead records in this segment.
    #[must_use]
    pub fn dead(&self) -> u64 {
        self.dead.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SegmentFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentFile")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("records", &self.records())
            .field("dead", &self.dead())
            .field("synced_len", &self.synced_len())
            .finish_non_exhaustive()
    }
}

/// Map of segment id to its shared read handle.
pub(crate) type SegmentMap = BTreeMap<SegmentId, Arc<SegmentFile>>;

/// Registry of every segment the engine can read from.
///
/// A segment leaves the registry when the compactor retires it. Lookups that
/// must agree with the keydir hold [`SegmentSet::read`] across both steps.
#[derive(Debug, Default)]
pub struct SegmentSet {
    segments: RwLock<SegmentMap>,
}

impl SegmentSet {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a segment handle.
    pub fn insert(&self, file: Arc<SegmentFile>) {
        self.segments.write().insert(file.id(), file);
    }

    /// Returns the handle for `id`.
    #[must_use]
    pub fn get(&self, id: SegmentId) -> Option<Arc<SegmentFile>> {
        self.segments.read().get(&id).cloned()
    }

    /// Unregisters a segment, returning its handle.
    pub fn remove(&self, id: SegmentId) -> Option<Arc<SegmentFile>> {
        self.segments.write().remove(&id)
    }

    /// Takes the shared lock on the registry.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, SegmentMap> {
        self.segments.read()
    }

    /// Handles for every registered segment below `active`, in id order.
    #[must_use]
    pub fn older_than(&self, active: SegmentId) -> Vec<Arc<SegmentFile>> {
        self.segments
            .read()
            .range(..active)
            .map(|(_, file)| Arc::clone(file))
            .collect()
    }

    /// Registered segment ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<SegmentId> {
        self.segments.read().keys().copied().collect()
    }

    /// Number of registered segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.read().len()
    }

    /// Returns true if no segments are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.read().is_empty()
    }

    /// Total `(records, dead)` across registered segments.
    #[must_use]
    pub fn totals(&self) -> (u64, u64) {
        self.segments
            .read()
            .values()
            .fold((0, 0), |(records, dead), file| {
                (records + file.records(), dead + file.dead())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::writer::Segment;
    use tempfile::tempdir;

    #[test]
    fn reads_value_at_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000000000.data");
        let mut segment = Segment::open(&path, SegmentId::new(0)).unwrap();
        let offset = segment.write(b"key", b"hello", 1).unwrap();
        segment.flush().unwrap();

        let file = SegmentFile::open(&path, SegmentId::new(0)).unwrap();
        assert_eq!(file.read_value(offset, 5).unwrap(), b"hello");
        assert_eq!(file.read_value(offset + 5, 0).unwrap(), b"");
    }

    #[test]
    fn short_read_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000000000.data");
        let mut segment = Segment::open(&path, SegmentId::new(0)).unwrap();
        let offset = segment.write(b"key", b"hello", 1).unwrap();
        segment.flush().unwrap();

        let file = SegmentFile::open(&path, SegmentId::new(0)).unwrap();
        let err = file.read_value(offset, 50).unwrap_err();
        assert!(matches!(
            err,
            CoreError::ShortRead {
                expected: 50,
                actual: 5,
                ..
            }
        ));
    }

    #[test]
    fn registry_tracks_totals_and_order() {
        let dir = tempdir().unwrap();
        let set = SegmentSet::new();
        for id in [2u64, 0, 1] {
            let path = dir.path().join(format!("{id:09}.data"));
            std::fs::File::create(&path).unwrap();
            let file = Arc::new(SegmentFile::open(&path, SegmentId::new(id)).unwrap());
            file.record_written();
            file.record_written();
            if id == 1 {
                file.record_dead();
            }
            set.insert(file);
        }

        assert_eq!(set.ids(), vec![SegmentId(0), SegmentId(1), SegmentId(2)]);
        assert_eq!(set.totals(), (6, 1));
        let older: Vec<_> = set.older_than(SegmentId(2)).iter().map(|f| f.id()).collect();
        assert_eq!(older, vec![SegmentId(0), SegmentId(1)]);

        set.remove(SegmentId(1));
        assert_eq!(set.totals(), (4, 0));
        assert_eq!(set.len(), 2);
    }
}
