//! Storage directory management.
//!
//! This module handles the file system layout for CaskDB:
//!
//! ```text
//! <db_path>/
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ 000000000.data    # Oldest segment
//! ├─ 000000001.data
//! └─ 000000002.data    # Active segment (highest id)
//! ```
//!
//! Segment ids are persisted only as file names. Files that don't match the
//! segment naming scheme are ignored.

use crate::error::{CoreError, CoreResult};
use crate::types::SegmentId;
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Lock file name within the storage directory.
const LOCK_FILE: &str = "LOCK";
/// Extension of segment files.
const SEGMENT_EXTENSION: &str = "data";

/// Manages the storage directory and its advisory lock.
///
/// # Thread Safety
///
/// When locking is enabled, a `SegmentDir` holds an exclusive lock on the
/// directory until [`SegmentDir::unlock`] or drop. A second instance on the same directory
/// fails with [`CoreError::DirectoryLocked`].
///
/// # Example
///
/// ```rust,ignore
/// use caskdb_core::SegmentDir;
/// use std::path::Path;
///
/// let dir = SegmentDir::open(Path::new("my_db"), true, true)?;
/// for id in dir.list_segments()? {
///     println!("{}", dir.segment_path(id).display());
/// }
/// ```
#[derive(Debug)]
pub struct SegmentDir {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access until released).
    lock_file: Mutex<Option<File>>,
}

impl SegmentDir {
    /// Opens or creates a storage directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path exists but is not a directory
    /// - Another process holds the lock (returns `DirectoryLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool, lock: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path).map_err(|e| CoreError::segment_io(path, e))?;
            } else {
                return Err(CoreError::InvalidPath {
                    path: path.to_path_buf(),
                    reason: "directory does not exist",
                });
            }
        }

        if !path.is_dir() {
            return Err(CoreError::InvalidPath {
                path: path.to_path_buf(),
                reason: "not a directory",
            });
        }

        let lock_file = if lock {
            let lock_path = path.join(LOCK_FILE);
            let lock_file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&lock_path)
                .map_err(|e| CoreError::segment_io(&lock_path, e))?;

            // Non-blocking: a held lock means another engine owns the directory.
            if lock_file.try_lock_exclusive().is_err() {
                return Err(CoreError::DirectoryLocked);
            }
            Some(lock_file)
        } else {
            None
        };

        Ok(Self {
            path: path.to_path_buf(),
            lock_file: Mutex::new(lock_file),
        })
    }

    /// Releases the directory lock, if held.
    ///
    /// The lock is also released when the `SegmentDir` is dropped.
    pub fn unlock(&self) -> CoreResult<()> {
        match self.lock_file.lock().take() {
            Some(file) => FileExt::unlock(&file)
                .map_err(|e| CoreError::segment_io(self.path.join(LOCK_FILE), e)),
            None => Ok(()),
        }
    }

    /// Returns true while the directory lock is held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock_file.lock().is_some()
    }

    /// Returns the path to the storage directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of a segment file, e.g. `000000001.data`.
    #[must_use]
    pub fn segment_path(&self, id: SegmentId) -> PathBuf {
        self.path.join(segment_file_name(id))
    }

    /// Lists segment ids present in the directory, in ascending order.
    pub fn list_segments(&self) -> CoreResult<Vec<SegmentId>> {
        let entries =
            fs::read_dir(&self.path).map_err(|e| CoreError::segment_io(&self.path, e))?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CoreError::segment_io(&self.path, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(id) = parse_segment_file_name(&path) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Creates an empty segment file and returns its path.
    ///
    /// The directory is fsynced so the new entry survives a crash.
    pub fn create_segment_file(&self, id: SegmentId) -> CoreResult<PathBuf> {
        let segment_path = self.segment_path(id);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&segment_path)
            .map_err(|e| CoreError::segment_io(&segment_path, e))?;
        self.sync_directory()?;
        Ok(segment_path)
    }

    /// Deletes segment files in ascending id order.
    ///
    /// Missing files are skipped. After deletion the directory is fsynced.
    /// Returns the number of files removed.
    pub fn delete_segment_files(&self, ids: &[SegmentId]) -> CoreResult<usize> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();

        let mut deleted = 0;
        for id in ids {
            let segment_path = self.segment_path(id);
            match fs::remove_file(&segment_path) {
                Ok(()) => {
                    tracing::debug!(segment_id = %id, "deleted segment file");
                    deleted += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CoreError::segment_io(&segment_path, e)),
            }
        }

        if deleted > 0 {
            self.sync_directory()?;
        }
        Ok(deleted)
    }

    /// Syncs the directory so entry creations and removals are durable.
    ///
    /// Windows has no directory fsync; NTFS journals metadata instead.
    #[cfg(unix)]
    pub fn sync_directory(&self) -> CoreResult<()> {
        let dir = File::open(&self.path).map_err(|e| CoreError::segment_io(&self.path, e))?;
        dir.sync_all()
            .map_err(|e| CoreError::segment_io(&self.path, e))
    }

    /// Syncs the directory so entry creations and removals are durable.
    #[cfg(not(unix))]
    pub fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// Formats the file name of a segment.
#[must_use]
pub fn segment_file_name(id: SegmentId) -> String {
    format!("{id}.{SEGMENT_EXTENSION}")
}

/// Parses a segment id out of a `<digits>.data` file name.
#[must_use]
pub fn parse_segment_file_name(path: &Path) -> Option<SegmentId> {
    if path.extension()? != SEGMENT_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok().map(SegmentId::new)
}
