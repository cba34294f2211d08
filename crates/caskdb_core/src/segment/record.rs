//! Log record codec.
//!
//! ```text
//! | checksum u32 | timestamp i64 | key_len i32 | value_len i32 | key | value |
//! ```
//!
//! All header fields are big-endian. The checksum is CRC-32 (IEEE) over
//! everything after the checksum field. A `value_len` of -1 marks a
//! deletion and is followed by no value bytes.

use crate::error::{CoreError, CoreResult, Corruption};
use crate::types::TombstoneEncoding;

/// Size of the fixed record header in bytes.
pub const HEADER_SIZE: usize = 20;

/// `value_len` written for a deletion record.
const TOMBSTONE_VALUE_LEN: i32 = -1;

/// Largest key or value a record can hold.
pub const MAX_FIELD_LEN: usize = i32::MAX as usize;

/// Returns the encoded size of a record with the given key and value lengths.
#[must_use]
pub const fn encoded_len(key_len: usize, value_len: usize) -> u64 {
    (HEADER_SIZE + key_len + value_len) as u64
}

/// Decoded fixed-size record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Stored checksum.
    pub checksum: u32,
    /// Write timestamp.
    pub timestamp: i64,
    /// Key length in bytes.
    pub key_len: u32,
    /// Value length in bytes, `None` for a deletion record.
    pub value_len: Option<u32>,
}

impl RecordHeader {
    /// Parses a header, rejecting lengths no writer produces.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self, Corruption> {
        let checksum = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let timestamp = i64::from_be_bytes([
            buf[4], buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11],
        ]);
        let raw_key_len = i32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let raw_value_len = i32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);

        let key_len = u32::try_from(raw_key_len).map_err(|_| Corruption::InvalidLength {
            field: "key_len",
            value: raw_key_len,
        })?;
        let value_len = match raw_value_len {
            TOMBSTONE_VALUE_LEN => None,
            len => Some(u32::try_from(len).map_err(|_| Corruption::InvalidLength {
                field: "value_len",
                value: len,
            })?),
        };

        Ok(Self {
            checksum,
            timestamp,
            key_len,
            value_len,
        })
    }

    /// Number of key and value bytes following the header.
    #[must_use]
    pub fn body_len(&self) -> u64 {
        u64::from(self.key_len) + u64::from(self.value_len.unwrap_or(0))
    }

    /// Total encoded size including the header.
    #[must_use]
    pub fn record_len(&self) -> u64 {
        HEADER_SIZE as u64 + self.body_len()
    }
}

/// One decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Write timestamp (microseconds since the Unix epoch).
    pub timestamp: i64,
    /// Key bytes.
    pub key: Vec<u8>,
    /// Value bytes, empty for a flagged deletion.
    pub value: Vec<u8>,
    /// Whether the header carries the deletion flag.
    pub tombstone: bool,
}

impl Record {
    /// Creates a put record.
    #[must_use]
    pub fn put(key: Vec<u8>, value: Vec<u8>, timestamp: i64) -> Self {
        Self {
            timestamp,
            key,
            value,
            tombstone: false,
        }
    }

    /// Creates a flagged deletion record.
    #[must_use]
    pub fn tombstone(key: Vec<u8>, timestamp: i64) -> Self {
        Self {
            timestamp,
            key,
            value: Vec::new(),
            tombstone: true,
        }
    }

    /// Returns whether replay should treat this record as a deletion.
    #[must_use]
    pub fn is_deletion(&self, encoding: TombstoneEncoding) -> bool {
        match encoding {
            TombstoneEncoding::Flag => self.tombstone,
            TombstoneEncoding::ZeroByte => {
                self.tombstone || self.value == TombstoneEncoding::ZERO_BYTE_MARKER
            }
        }
    }

    /// Offset of the value relative to the start of the record.
    #[must_use]
    pub fn value_offset(&self) -> u64 {
        (HEADER_SIZE + self.key.len()) as u64
    }

    /// Returns the encoded size of this record.
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        encoded_len(self.key.len(), self.value.len())
    }

    /// Encodes the record.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let value = if self.tombstone { None } else { Some(self.value.as_slice()) };
        encode_parts(&self.key, value, self.timestamp)
    }

    /// Decodes a record from the start of `data`.
    ///
    /// Trailing bytes after the record are ignored.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        decode_parts(data).map_err(|reason| CoreError::corrupt(0, reason))
    }
}

/// Encodes a put record.
pub fn encode(key: &[u8], value: &[u8], timestamp: i64) -> CoreResult<Vec<u8>> {
    encode_parts(key, Some(value), timestamp)
}

/// Encodes a flagged deletion record.
pub fn encode_tombstone(key: &[u8], timestamp: i64) -> CoreResult<Vec<u8>> {
    encode_parts(key, None, timestamp)
}

/// Checks that a field fits a signed 32-bit length.
pub(crate) fn length_field(len: usize) -> CoreResult<i32> {
    i32::try_from(len).map_err(|_| CoreError::validation("key or value exceeds 2 GiB"))
}

fn encode_parts(key: &[u8], value: Option<&[u8]>, timestamp: i64) -> CoreResult<Vec<u8>> {
    let key_len = length_field(key.len())?;
    let value_len = match value {
        Some(v) => length_field(v.len())?,
        None => TOMBSTONE_VALUE_LEN,
    };
    let value = value.unwrap_or_default();

    let mut buf = Vec::with_capacity(HEADER_SIZE + key.len() + value.len());
    buf.extend_from_slice(&[0u8; 4]);
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.extend_from_slice(&key_len.to_be_bytes());
    buf.extend_from_slice(&value_len.to_be_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);

    let checksum = crc32fast::hash(&buf[4..]);
    buf[..4].copy_from_slice(&checksum.to_be_bytes());
    Ok(buf)
}

pub(crate) fn decode_parts(data: &[u8]) -> Result<Record, Corruption> {
    let Some(header_bytes) = data.first_chunk::<HEADER_SIZE>() else {
        return Err(Corruption::Truncated {
            needed: HEADER_SIZE as u64,
            available: data.len() as u64,
        });
    };
    let header = RecordHeader::decode(header_bytes)?;

    let record_len = header.record_len();
    if (data.len() as u64) < record_len {
        return Err(Corruption::Truncated {
            needed: record_len,
            available: data.len() as u64,
        });
    }

    // record_len <= data.len() so it fits in usize
    let record = &data[..record_len as usize];
    verify_checksum(&header, &record[HEADER_SIZE..])?;
    Ok(build_record(&header, &record[HEADER_SIZE..]))
}

/// Recomputes the checksum of a record given its header and body bytes.
pub(crate) fn verify_checksum(header: &RecordHeader, body: &[u8]) -> Result<(), Corruption> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header.timestamp.to_be_bytes());
    hasher.update(&(header.key_len as i32).to_be_bytes());
    let value_len = header.value_len.map_or(TOMBSTONE_VALUE_LEN, |len| len as i32);
    hasher.update(&value_len.to_be_bytes());
    hasher.update(body);
    let actual = hasher.finalize();

    if actual != header.checksum {
        return Err(Corruption::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }
    Ok(())
}

/// Splits a verified body into key and value.
pub(crate) fn build_record(header: &RecordHeader, body: &[u8]) -> Record {
    let (key, value) = body.split_at(header.key_len as usize);
    Record {
        timestamp: header.timestamp,
        key: key.to_vec(),
        value: value.to_vec(),
        tombstone: header.value_len.is_none(),
    }
}
