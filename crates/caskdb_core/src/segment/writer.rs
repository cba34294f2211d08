//! Append-only writer for the active segment.

use crate::error::{CoreError, CoreResult};
use crate::segment::record::{self, HEADER_SIZE};
use crate::types::SegmentId;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Write buffer size for the active segment.
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// The writable end of one segment file.
///
/// Records are appended through a [`BufWriter`]. The tracked offset counts
/// buffered bytes, so offsets returned by [`Segment::write`] are valid before
/// the buffer reaches the file.
pub struct Segment {
    id: SegmentId,
    path: PathBuf,
    writer: BufWriter<File>,
    offset: u64,
    poisoned: bool,
}

impl Segment {
    /// Opens a segment file for appending, creating it if needed.
    ///
    /// The write offset starts at the current file length.
    pub fn open(path: &Path, id: SegmentId) -> CoreResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| CoreError::segment_io(path, e))?;
        let offset = file
            .metadata()
            .map_err(|e| CoreError::segment_io(path, e))?
            .len();

        tracing::debug!(segment_id = %id, offset, path = %path.display(), "opened segment for append");

        Ok(Self {
            id,
            path: path.to_path_buf(),
            writer: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            offset,
            poisoned: false,
        })
    }

    /// Appends a put record and returns the offset of its value.
    pub fn write(&mut self, key: &[u8], value: &[u8], timestamp: i64) -> CoreResult<u64> {
        let encoded = record::encode(key, value, timestamp)?;
        let record_offset = self.append(&encoded)?;
        Ok(record_offset + (HEADER_SIZE + key.len()) as u64)
    }

    /// Appends a flagged deletion record and returns the record's offset.
    pub fn write_tombstone(&mut self, key: &[u8], timestamp: i64) -> CoreResult<u64> {
        let encoded = record::encode_tombstone(key, timestamp)?;
        self.append(&encoded)
    }

    fn append(&mut self, encoded: &[u8]) -> CoreResult<u64> {
        if self.poisoned {
            return Err(CoreError::segment_io(
                &self.path,
                std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "segment rejected writes after a failed append",
                ),
            ));
        }

        let record_offset = self.offset;
        if let Err(e) = self.writer.write_all(encoded) {
            // Part of the record may already be in the file.
            self.poisoned = true;
            return Err(CoreError::segment_io(&self.path, e));
        }
        self.offset += encoded.len() as u64;
        Ok(record_offset)
    }

    /// Pushes buffered bytes to the operating system.
    ///
    /// A failed flush may leave part of a record in the file, so it poisons
    /// the segment like a failed append.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.writer.flush().map_err(|e| {
            self.poisoned = true;
            CoreError::segment_io(&self.path, e)
        })
    }

    /// Flushes buffered bytes and forces them to durable storage.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.flush()?;
        self.writer
            .get_ref()
            .sync_data()
            .map_err(|e| CoreError::segment_io(&self.path, e))
    }

    /// Flushes and releases the file handle.
    pub fn close(mut self) -> CoreResult<()> {
        self.flush()?;
        tracing::debug!(segment_id = %self.id, size = self.offset, "closed segment");
        Ok(())
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

    /// Returns the logical size including buffered bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.offset
    }

    /// Returns true once an append failed part-way.
    ///
    /// A poisoned segment must be rotated out before writing again.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}
