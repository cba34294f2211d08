//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod inspect;
pub mod kv;
pub mod verify;

use caskdb_core::{Config, CoreError, Engine, SegmentDir, TombstoneEncoding};
use std::path::Path;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// A command needs `--path`.
    #[error("storage path required for {0}")]
    MissingPath(&'static str),

    /// The directory holds no segment files.
    #[error("no segments found at {0}")]
    NoSegments(String),

    /// Verification found unreadable records.
    #[error("verification failed: {0} corrupt segment(s)")]
    VerificationFailed(usize),

    /// Engine error.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Opens a storage directory for offline reading without taking its lock.
pub(crate) fn open_dir(path: &Path) -> Result<SegmentDir, CliError> {
    let dir = SegmentDir::open(path, false, false)?;
    let segments = dir.list_segments()?;
    if segments.is_empty() {
        return Err(CliError::NoSegments(path.display().to_string()));
    }
    tracing::debug!(path = %path.display(), segments = segments.len(), "opened storage directory");
    Ok(dir)
}

/// Opens an engine for a one-shot command, without background compaction.
pub(crate) fn open_engine(path: &Path, encoding: TombstoneEncoding) -> Result<Engine, CliError> {
    let config = Config::default()
        .create_if_missing(false)
        .compaction(false)
        .tombstone_encoding(encoding);
    Ok(Engine::open_with_config(path, config)?)
}
