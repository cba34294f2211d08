//! Error types for CaskDB core.

use crate::types::SegmentId;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse error classification handed to the protocol layer.
///
/// Every [`CoreError`] maps to exactly one kind via [`CoreError::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request itself was invalid (for example an empty key).
    Validation,
    /// The key is not present in the keydir.
    NotFound,
    /// A record failed its checksum or was truncated.
    CorruptRecord,
    /// Open, seek, read, write or sync failed at the filesystem boundary.
    Io,
    /// The engine has been closed.
    Closed,
    /// Another engine instance owns the storage directory.
    Locked,
}

/// Why a record could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// The stored checksum does not match the recomputed one.
    ChecksumMismatch {
        /// Checksum stored in the record header.
        expected: u32,
        /// Checksum computed over the record body.
        actual: u32,
    },
    /// Fewer bytes were available than the record claims.
    Truncated {
        /// Bytes the record needs.
        needed: u64,
        /// Bytes actually available.
        available: u64,
    },
    /// A length field holds a value no writer produces.
    InvalidLength {
        /// Name of the offending header field.
        field: &'static str,
        /// The raw value read from disk.
        value: i32,
    },
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected:08x}, got {actual:08x}")
            }
            Self::Truncated { needed, available } => {
                write!(f, "truncated record: needed {needed} bytes, {available} available")
            }
            Self::InvalidLength { field, value } => write!(f, "invalid {field}: {value}"),
        }
    }
}

/// Errors that can occur in CaskDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error without further context.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// I/O error on a specific file.
    #[error("I/O error on {}: {source}", path.display())]
    SegmentIo {
        /// File the operation was acting on.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A value read returned fewer bytes than the keydir promised.
    #[error("short read from segment {segment_id} at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Segment being read.
        segment_id: SegmentId,
        /// Offset of the value.
        offset: u64,
        /// Value size recorded in the keydir.
        expected: u32,
        /// Bytes actually read.
        actual: usize,
    },

    /// The keydir names a segment that is no longer registered.
    #[error("segment {segment_id} is not available")]
    SegmentMissing {
        /// The missing segment.
        segment_id: SegmentId,
    },

    /// A record failed to decode.
    #[error("corrupt record at offset {offset}: {reason}")]
    CorruptRecord {
        /// Segment the record was read from, if known.
        segment_id: Option<SegmentId>,
        /// Byte offset of the record.
        offset: u64,
        /// What was wrong with it.
        reason: Corruption,
    },

    /// The request failed validation.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the problem.
        message: &'static str,
    },

    /// Key not present.
    #[error("key not found: {}", String::from_utf8_lossy(key))]
    KeyNotFound {
        /// The key that was looked up.
        key: Vec<u8>,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: &'static str,
    },

    /// Storage path is unusable.
    #[error("invalid storage path {}: {reason}", path.display())]
    InvalidPath {
        /// The offending path.
        path: PathBuf,
        /// Why it cannot be used.
        reason: &'static str,
    },

    /// Directory is locked by another engine.
    #[error("storage directory locked: another engine has exclusive access")]
    DirectoryLocked,

    /// Engine is closed.
    #[error("engine is closed")]
    Closed,
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: &'static str) -> Self {
        Self::Validation { message }
    }

    /// Creates a not-found error for `key`.
    pub fn not_found(key: &[u8]) -> Self {
        Self::KeyNotFound { key: key.to_vec() }
    }

    /// Creates a corruption error without segment context.
    pub fn corrupt(offset: u64, reason: Corruption) -> Self {
        Self::CorruptRecord {
            segment_id: None,
            offset,
            reason,
        }
    }

    /// Attaches a file path to a bare I/O error.
    pub fn segment_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::SegmentIo {
            path: path.into(),
            source,
        }
    }

    /// Returns the taxonomy kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::SegmentIo { .. } | Self::ShortRead { .. } => ErrorKind::Io,
            Self::SegmentMissing { .. } | Self::InvalidPath { .. } => ErrorKind::Io,
            Self::CorruptRecord { .. } => ErrorKind::CorruptRecord,
            Self::Validation { .. } | Self::InvalidConfig { .. } => ErrorKind::Validation,
            Self::KeyNotFound { .. } => ErrorKind::NotFound,
            Self::DirectoryLocked => ErrorKind::Locked,
            Self::Closed => ErrorKind::Closed,
        }
    }

    /// Returns true if this is a not-found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(CoreError::validation("empty key").kind(), ErrorKind::Validation);
        assert_eq!(CoreError::not_found(b"k").kind(), ErrorKind::NotFound);
        assert_eq!(
            CoreError::corrupt(
                0,
                Corruption::Truncated {
                    needed: 20,
                    available: 3
                }
            )
            .kind(),
            ErrorKind::CorruptRecord
        );
        assert_eq!(
            CoreError::from(io::Error::new(io::ErrorKind::Other, "disk")).kind(),
            ErrorKind::Io
        );
        assert_eq!(
            CoreError::ShortRead {
                segment_id: SegmentId::new(1),
                offset: 0,
                expected: 4,
                actual: 2,
            }
            .kind(),
            ErrorKind::Io
        );
        assert!(CoreError::not_found(b"k").is_not_found());
    }

    #[test]
    fn messages_carry_context() {
        let err = CoreError::not_found(b"user:1");
        assert_eq!(err.to_string(), "key not found: user:1");

        let err = CoreError::CorruptRecord {
            segment_id: Some(SegmentId::new(3)),
            offset: 128,
            reason: Corruption::ChecksumMismatch {
                expected: 0xdead_beef,
                actual: 0,
            },
        };
        assert_eq!(
            err.to_string(),
            "corrupt record at offset 128: checksum mismatch: expected deadbeef, got 00000000"
        );
    }
}
