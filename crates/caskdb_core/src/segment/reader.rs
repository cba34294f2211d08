//! Sequential segment reader used by recovery, compaction and tooling.
//!
//! ## Stop Policy
//!
//! The reader never fails on bad data. It stops at the first record it
//! cannot decode and remembers why in [`ScanEnd`]:
//!
//! - **Torn tail**: the failing record reaches past end-of-file, ends exactly
//!   at end-of-file, or everything from it to end-of-file is zero. This is
//!   what a crash in the middle of an append leaves behind.
//! - **Corrupt**: the failing record is followed by further non-zero bytes.
//!   Those bytes are unreachable.
//!
//! A damaged length field that makes a record claim more bytes than the file
//! holds is indistinguishable from a torn append without the checksum, which
//! covers bytes that are not there. It is reported as a torn tail, so strict
//! recovery does not catch it; the records after it are dropped with a
//! warning. `caskdb verify` shows the offset and the unread byte count.
//!
//! Only filesystem errors are returned as `Err`.

use crate::error::{CoreError, CoreResult, Corruption};
use crate::segment::record::{self, Record, RecordHeader, HEADER_SIZE};
use crate::types::SegmentId;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Read buffer size for sequential scans.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    /// Every byte decoded.
    Clean,
    /// An incomplete record at the end of the file.
    TornTail {
        /// Offset of the incomplete record.
        offset: u64,
    },
    /// A bad record with more data after it.
    Corrupt {
        /// Offset of the bad record.
        offset: u64,
        /// What was wrong with it.
        reason: Corruption,
        /// Bytes from the bad record to end-of-file.
        unreadable_bytes: u64,
    },
}

impl ScanEnd {
    /// Returns true if the whole segment decoded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

/// A record together with its position in the segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentEntry {
    /// Offset of the record's first header byte.
    pub offset: u64,
    /// The decoded record.
    pub record: Record,
}

impl SegmentEntry {
    /// Offset of the value bytes within the segment.
    #[must_use]
    pub fn value_offset(&self) -> u64 {
        self.offset + self.record.value_offset()
    }

    /// Offset just past this record.
    #[must_use]
    pub fn end_offset(&self) -> u64 {
        self.offset + self.record.encoded_len()
    }
}

/// Streams the records of one segment file in write order.
pub struct SegmentReader {
    id: SegmentId,
    path: PathBuf,
    reader: BufReader<File>,
    len: u64,
    offset: u64,
    end: Option<ScanEnd>,
}

impl SegmentReader {
    /// Opens a segment for sequential reading from offset 0.
    ///
    /// Bytes appended after this call are not visited.
    pub fn open(path: &Path, id: SegmentId) -> CoreResult<Self> {
        let file = File::open(path).map_err(|e| CoreError::segment_io(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| CoreError::segment_io(path, e))?
            .len();

        Ok(Self {
            id,
            path: path.to_path_buf(),
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, file),
            len,
            offset: 0,
            end: None,
        })
    }

    /// Returns the next record, or `None` at end of useful data.
    pub fn read(&mut self) -> CoreResult<Option<SegmentEntry>> {
        if self.end.is_some() {
            return Ok(None);
        }

        let offset = self.offset;
        let remaining = self.len - offset;
        if remaining == 0 {
            self.end = Some(ScanEnd::Clean);
            return Ok(None);
        }
        if remaining < HEADER_SIZE as u64 {
            self.end = Some(ScanEnd::TornTail { offset });
            return Ok(None);
        }

        let mut header_bytes = [0u8; HEADER_SIZE];
        self.read_exact(&mut header_bytes)?;
        let header = match RecordHeader::decode(&header_bytes) {
            Ok(header) => header,
            Err(reason) => return self.stop(offset, remaining, reason),
        };

        let record_len = header.record_len();
        if record_len > remaining {
            self.end = Some(ScanEnd::TornTail { offset });
            return Ok(None);
        }

        // record_len <= remaining, which is at most the file length
        let mut body = vec![0u8; (record_len - HEADER_SIZE as u64) as usize];
        self.read_exact(&mut body)?;
        if let Err(reason) = record::verify_checksum(&header, &body) {
            if record_len == remaining {
                self.end = Some(ScanEnd::TornTail { offset });
                return Ok(None);
            }
            return self.stop(offset, remaining, reason);
        }

        self.offset += record_len;
        Ok(Some(SegmentEntry {
            offset,
            record: record::build_record(&header, &body),
        }))
    }

    fn stop(
        &mut self,
        offset: u64,
        remaining: u64,
        reason: Corruption,
    ) -> CoreResult<Option<SegmentEntry>> {
        let end = if self.zero_from(offset)? {
            ScanEnd::TornTail { offset }
        } else {
            ScanEnd::Corrupt {
                offset,
                reason,
                unreadable_bytes: remaining,
            }
        };
        self.end = Some(end);
        Ok(None)
    }

    /// Checks whether every byte from `offset` to end-of-file is zero.
    fn zero_from(&mut self, offset: u64) -> CoreResult<bool> {
        self.reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| CoreError::segment_io(&self.path, e))?;
        let mut chunk = [0u8; 4096];
        loop {
            let n = match self.reader.read(&mut chunk) {
                Ok(0) => return Ok(true),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CoreError::segment_io(&self.path, e)),
            };
            if chunk[..n].iter().any(|&b| b != 0) {
                return Ok(false);
            }
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> CoreResult<()> {
        self.reader
            .read_exact(buf)
            .map_err(|e| CoreError::segment_io(&self.path, e))
    }

    /// Returns how the scan ended, once it has.
    #[must_use]
    pub fn end_state(&self) -> Option<ScanEnd> {
        self.end
    }

    /// Offset just past the last record returned.
    #[must_use]
    pub fn valid_len(&self) -> u64 {
        self.offset
    }

    /// File length when the reader was opened.
    #[must_use]
    pub fn file_len(&self) -> u64 {
        self.len
    }

    /// Returns the segment id.
    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }
}

impl Iterator for SegmentReader {
    type Item = CoreResult<SegmentEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("id", &self.id)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}
