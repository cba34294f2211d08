//! Manual key access.

use super::open_engine;
use caskdb_core::TombstoneEncoding;
use std::io::Write;
use std::path::Path;

/// Prints the value stored under `key`.
pub fn get(
    path: &Path,
    key: &str,
    encoding: TombstoneEncoding,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine(path, encoding)?;
    let value = engine.get(key.as_bytes())?;
    engine.close()?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&value)?;
    stdout.write_all(b"\n")?;
    Ok(())
}

/// Stores `value` under `key` and syncs it.
pub fn set(
    path: &Path,
    key: &str,
    value: &str,
    encoding: TombstoneEncoding,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine(path, encoding)?;
    engine.set(key.as_bytes(), value.as_bytes())?;
    engine.sync()?;
    engine.close()?;
    Ok(())
}

/// Deletes `key` and syncs the deletion.
pub fn delete(
    path: &Path,
    key: &str,
    encoding: TombstoneEncoding,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine(path, encoding)?;
    engine.delete(key.as_bytes())?;
    engine.sync()?;
    engine.close()?;
    Ok(())
}
