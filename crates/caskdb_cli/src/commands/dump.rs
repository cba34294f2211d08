//! Dump command implementation.

use super::inspect::describe_end;
use super::{open_dir, CliError};
use caskdb_core::{SegmentDir, SegmentId, SegmentReader, TombstoneEncoding};
use serde::Serialize;
use std::path::Path;

/// Segment record representation for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Offset in the segment file.
    pub offset: u64,
    /// Write timestamp.
    pub timestamp: i64,
    /// Key, lossily decoded as UTF-8.
    pub key: String,
    /// Value size in bytes (absent for deletions).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_size: Option<usize>,
    /// Whether the record is a deletion marker.
    pub deleted: bool,
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    segment: u64,
    limit: Option<usize>,
    format: &str,
    encoding: TombstoneEncoding,
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = open_dir(path)?;
    let (records, end) = read_records(&dir, SegmentId::new(segment), limit, encoding)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
            if let Some(end) = end {
                println!();
                println!("End of segment: {end}");
            }
        }
    }

    Ok(())
}

/// Reads up to `limit` records of one segment.
///
/// The end state is returned only when the scan reached it.
pub fn read_records(
    dir: &SegmentDir,
    id: SegmentId,
    limit: Option<usize>,
    encoding: TombstoneEncoding,
) -> Result<(Vec<RecordInfo>, Option<String>), CliError> {
    let mut reader = SegmentReader::open(&dir.segment_path(id), id)?;
    let limit = limit.unwrap_or(usize::MAX);

    let mut records = Vec::new();
    while records.len() < limit {
        let Some(entry) = reader.read()? else {
            break;
        };
        let deleted = entry.record.is_deletion(encoding);
        records.push(RecordInfo {
            offset: entry.offset,
            timestamp: entry.record.timestamp,
            key: String::from_utf8_lossy(&entry.record.key).into_owned(),
            value_size: (!deleted).then_some(entry.record.value.len()),
            deleted,
        });
    }

    Ok((records, reader.end_state().map(describe_end)))
}

fn print_text_output(records: &[RecordInfo]) {
    println!("{:>10}  {:>20}  {:>8}  key", "offset", "timestamp", "value");
    for r in records {
        let value = match r.value_size {
            Some(size) => size.to_string(),
            None => "<del>".to_string(),
        };
        println!("{:>10}  {:>20}  {:>8}  {}", r.offset, r.timestamp, value, r.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caskdb_core::{Config, Engine};
    use tempfile::tempdir;

    #[test]
    fn dumps_records_with_limit() {
        let temp = tempdir().unwrap();
        {
            let engine =
                Engine::open_with_config(temp.path(), Config::default().compaction(false))
                    .unwrap();
            engine.set(b"a", b"one").unwrap();
            engine.delete(b"a").unwrap();
            engine.set(b"b", b"two").unwrap();
            engine.close().unwrap();
        }
        let dir = SegmentDir::open(temp.path(), false, false).unwrap();

        let (all, end) = read_records(&dir, SegmentId(0), None, TombstoneEncoding::Flag).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].value_size, Some(3));
        assert!(all[1].deleted);
        assert_eq!(all[1].value_size, None);
        assert_eq!(all[2].key, "b");
        assert_eq!(end.as_deref(), Some("clean"));

        let (first, end) =
            read_records(&dir, SegmentId(0), Some(1), TombstoneEncoding::Flag).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(end, None);
    }

    #[test]
    fn missing_segment_is_an_error() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("000000000.data"), b"").unwrap();
        let dir = SegmentDir::open(temp.path(), false, false).unwrap();

        assert!(read_records(&dir, SegmentId(5), None, TombstoneEncoding::Flag).is_err());
    }
}
