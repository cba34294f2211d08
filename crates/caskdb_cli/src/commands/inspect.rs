//! Inspect command implementation.

use super::{open_dir, CliError};
use caskdb_core::{ScanEnd, SegmentDir, SegmentId, SegmentReader, TombstoneEncoding};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// Storage directory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Storage path.
    pub path: String,
    /// Number of segment files.
    pub segment_count: usize,
    /// Total size of segment files in bytes.
    pub total_size: u64,
    /// Records across all segments.
    pub record_count: u64,
    /// Deletion markers across all segments.
    pub tombstone_count: u64,
    /// Records that are superseded, deleted or deletion markers.
    pub dead_count: u64,
    /// Keys with a live value.
    pub live_keys: usize,
    /// Per-segment statistics (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<SegmentStats>>,
}

impl InspectResult {
    /// Dead records as a fraction of all records.
    pub fn dead_ratio(&self) -> f64 {
        if self.record_count == 0 {
            0.0
        } else {
            self.dead_count as f64 / self.record_count as f64
        }
    }
}

/// Statistics for a single segment.
#[derive(Debug, Serialize)]
pub struct SegmentStats {
    /// Segment id.
    pub id: u64,
    /// File size in bytes.
    pub size: u64,
    /// Decoded records.
    pub records: u64,
    /// Deletion markers.
    pub tombstones: u64,
    /// Records still holding a live value.
    pub live: u64,
    /// How the scan ended (clean, torn tail or corrupt).
    pub end: String,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    show_segments: bool,
    format: &str,
    encoding: TombstoneEncoding,
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = open_dir(path)?;
    let mut result = inspect(&dir, encoding)?;
    if !show_segments {
        result.segments = None;
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Replays every segment and collects statistics.
pub fn inspect(dir: &SegmentDir, encoding: TombstoneEncoding) -> Result<InspectResult, CliError> {
    let mut segments = Vec::new();
    // key -> segment holding its live value
    let mut live: HashMap<Vec<u8>, SegmentId> = HashMap::new();

    for id in dir.list_segments()? {
        let path = dir.segment_path(id);
        let mut reader = SegmentReader::open(&path, id)?;
        let mut stats = SegmentStats {
            id: id.as_u64(),
            size: reader.file_len(),
            records: 0,
            tombstones: 0,
            live: 0,
            end: String::new(),
        };

        while let Some(entry) = reader.read()? {
            stats.records += 1;
            if entry.record.is_deletion(encoding) {
                stats.tombstones += 1;
                live.remove(&entry.record.key);
            } else {
                live.insert(entry.record.key, id);
            }
        }
        stats.end = describe_end(reader.end_state().unwrap_or(ScanEnd::Clean));
        segments.push(stats);
    }

    for segment_id in live.values() {
        if let Some(stats) = segments.iter_mut().find(|s| s.id == segment_id.as_u64()) {
            stats.live += 1;
        }
    }

    let record_count: u64 = segments.iter().map(|s| s.records).sum();
    Ok(InspectResult {
        path: dir.path().display().to_string(),
        segment_count: segments.len(),
        total_size: segments.iter().map(|s| s.size).sum(),
        record_count,
        tombstone_count: segments.iter().map(|s| s.tombstones).sum(),
        dead_count: record_count - live.len() as u64,
        live_keys: live.len(),
        segments: Some(segments),
    })
}

/// Short description of a scan end state.
pub fn describe_end(end: ScanEnd) -> String {
    match end {
        ScanEnd::Clean => "clean".to_string(),
        ScanEnd::TornTail { offset } => format!("torn tail at {offset}"),
        ScanEnd::Corrupt { offset, reason, .. } => format!("corrupt at {offset}: {reason}"),
    }
}

fn print_text_output(result: &InspectResult) {
    println!("Storage: {}", result.path);
    println!();
    println!("  Segments:    {}", result.segment_count);
    println!("  Total size:  {} bytes", result.total_size);
    println!("  Records:     {}", result.record_count);
    println!("  Tombstones:  {}", result.tombstone_count);
    println!("  Live keys:   {}", result.live_keys);
    println!(
        "  Dead:        {} ({:.1}%)",
        result.dead_count,
        result.dead_ratio() * 100.0
    );

    if let Some(segments) = &result.segments {
        println!();
        println!(
            "  {:>9}  {:>12}  {:>8}  {:>8}  {:>8}  end",
            "id", "size", "records", "deleted", "live"
        );
        for s in segments {
            println!(
                "  {:09}  {:>12}  {:>8}  {:>8}  {:>8}  {}",
                s.id, s.size, s.records, s.tombstones, s.live, s.end
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caskdb_core::{Config, Engine};
    use tempfile::tempdir;

    #[test]
    fn counts_live_and_dead_records() {
        let temp = tempdir().unwrap();
        {
            let config = Config::default().compaction(false).max_segment_size(64);
            let engine = Engine::open_with_config(temp.path(), config).unwrap();
            engine.set(b"a", b"1").unwrap();
            engine.set(b"b", b"2").unwrap();
            engine.set(b"a", b"3").unwrap();
            engine.delete(b"b").unwrap();
            engine.close().unwrap();
        }

        let dir = SegmentDir::open(temp.path(), false, false).unwrap();
        let result = inspect(&dir, TombstoneEncoding::Flag).unwrap();

        assert_eq!(result.record_count, 4);
        assert_eq!(result.tombstone_count, 1);
        assert_eq!(result.live_keys, 1);
        assert_eq!(result.dead_count, 3);
        assert_eq!(result.segment_count, 2);
        let segments = result.segments.unwrap();
        assert_eq!(segments.iter().map(|s| s.live).sum::<u64>(), 1);
        assert!(segments.iter().all(|s| s.end == "clean"));
    }

    #[test]
    fn empty_directory_is_an_error() {
        let temp = tempdir().unwrap();
        assert!(matches!(
            open_dir(temp.path()),
            Err(CliError::NoSegments(_))
        ));
    }
}
