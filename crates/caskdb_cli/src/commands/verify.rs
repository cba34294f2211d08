//! Verify command implementation.

use super::inspect::describe_end;
use super::{open_dir, CliError};
use caskdb_core::{ScanEnd, SegmentDir, SegmentId, SegmentReader};
use std::path::Path;

/// Verification result for one segment.
#[derive(Debug)]
pub struct SegmentCheck {
    /// Segment id.
    pub id: SegmentId,
    /// Records that decoded cleanly.
    pub valid_records: u64,
    /// Bytes covered by valid records.
    pub valid_bytes: u64,
    /// File size in bytes.
    pub file_size: u64,
    /// How the scan ended.
    pub end: ScanEnd,
}

impl SegmentCheck {
    fn is_corrupt(&self) -> bool {
        matches!(self.end, ScanEnd::Corrupt { .. })
    }
}

/// Runs the verify command.
///
/// Torn tails are reported but pass; corruption fails the command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying storage at {:?}", path);
    println!();

    let dir = open_dir(path)?;
    let checks = verify(&dir)?;
    for check in &checks {
        let marker = if check.is_corrupt() { "✗" } else { "✓" };
        println!(
            "  {marker} {}  {} records, {}/{} bytes, {}",
            check.id,
            check.valid_records,
            check.valid_bytes,
            check.file_size,
            describe_end(check.end)
        );
    }

    let corrupt = checks.iter().filter(|c| c.is_corrupt()).count();
    println!();
    if corrupt == 0 {
        println!("✓ Verification passed");
        Ok(())
    } else {
        println!("✗ Verification failed");
        Err(CliError::VerificationFailed(corrupt).into())
    }
}

/// Scans every segment to its end of useful data.
pub fn verify(dir: &SegmentDir) -> Result<Vec<SegmentCheck>, CliError> {
    let mut checks = Vec::new();
    for id in dir.list_segments()? {
        let mut reader = SegmentReader::open(&dir.segment_path(id), id)?;
        let mut valid_records = 0;
        while reader.read()?.is_some() {
            valid_records += 1;
        }
        checks.push(SegmentCheck {
            id,
            valid_records,
            valid_bytes: reader.valid_len(),
            file_size: reader.file_len(),
            end: reader.end_state().unwrap_or(ScanEnd::Clean),
        });
    }
    Ok(checks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use caskdb_core::{Config, Engine};
    use tempfile::tempdir;

    fn populate(path: &Path) {
        let engine = Engine::open_with_config(path, Config::default().compaction(false)).unwrap();
        engine.set(b"a", b"1").unwrap();
        engine.set(b"b", b"2").unwrap();
        engine.set(b"c", b"3").unwrap();
        engine.close().unwrap();
    }

    #[test]
    fn clean_store_passes() {
        let temp = tempdir().unwrap();
        populate(temp.path());

        let dir = SegmentDir::open(temp.path(), false, false).unwrap();
        let checks = verify(&dir).unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].valid_records, 3);
        assert_eq!(checks[0].valid_bytes, checks[0].file_size);
        assert!(checks[0].end.is_clean());
    }

    #[test]
    fn corruption_is_detected() {
        let temp = tempdir().unwrap();
        populate(temp.path());
        let segment = temp.path().join("000000000.data");
        let mut data = std::fs::read(&segment).unwrap();
        data[5] ^= 0x01; // timestamp of the first record
        std::fs::write(&segment, &data).unwrap();

        let dir = SegmentDir::open(temp.path(), false, false).unwrap();
        let checks = verify(&dir).unwrap();
        assert_eq!(checks[0].valid_records, 0);
        assert!(checks[0].is_corrupt());
    }

    #[test]
    fn torn_tail_is_not_corruption() {
        let temp = tempdir().unwrap();
        populate(temp.path());
        let segment = temp.path().join("000000000.data");
        let data = std::fs::read(&segment).unwrap();
        std::fs::write(&segment, &data[..data.len() - 1]).unwrap();

        let dir = SegmentDir::open(temp.path(), false, false).unwrap();
        let checks = verify(&dir).unwrap();
        assert_eq!(checks[0].valid_records, 2);
        assert!(!checks[0].is_corrupt());
        assert_eq!(checks[0].end, ScanEnd::TornTail { offset: 44 });
    }
}
