//! Compact command implementation.

use super::inspect::inspect;
use super::{open_dir, open_engine, CliError};
use caskdb_core::compaction::local_hour;
use caskdb_core::{CompactionResult, Config, MergePolicy, TombstoneEncoding};
use std::path::Path;

/// Record counts that drive the merge decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    /// Segment files.
    pub segments: u64,
    /// Segments a merge pass would rewrite.
    pub mergeable: u64,
    /// Records across all segments.
    pub records: u64,
    /// Dead records across all segments.
    pub dead: u64,
}

impl Analysis {
    fn dead_ratio(&self) -> f64 {
        if self.records == 0 {
            0.0
        } else {
            self.dead as f64 / self.records as f64
        }
    }
}

/// Runs the compact command.
///
/// A dry run only reads the segment files. Otherwise the engine is opened
/// (taking the directory lock) and one merge pass is forced, regardless of
/// the dead ratio and the merge window.
pub fn run(
    path: &Path,
    dry_run: bool,
    encoding: TombstoneEncoding,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting segments at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
        println!();
        print_analysis(&analyze(path, encoding)?, &Config::default());
        return Ok(());
    }
    println!();

    let engine = open_engine(path, encoding)?;
    let stats = engine.stats();
    let active = engine.active_segment_id()?;
    let mergeable = engine.segment_ids().iter().filter(|id| **id < active).count();
    let analysis = Analysis {
        segments: stats.segments,
        mergeable: mergeable as u64,
        records: stats.sum,
        dead: stats.dead,
    };
    print_analysis(&analysis, engine.config());

    println!();
    if mergeable == 0 {
        println!("No compaction needed - only the active segment exists");
    } else {
        println!("Performing compaction...");
        let result = engine.merge()?;
        print_result(&result);
        println!("✓ Compaction complete");
    }

    engine.close()?;
    Ok(())
}

/// Computes merge statistics from the segment files without opening an engine.
///
/// The last segment would stay active unless its scan did not end cleanly,
/// in which case an engine would start a fresh one.
pub fn analyze(path: &Path, encoding: TombstoneEncoding) -> Result<Analysis, CliError> {
    let dir = open_dir(path)?;
    let result = inspect(&dir, encoding)?;
    let last_clean = result
        .segments
        .as_ref()
        .and_then(|segments| segments.last())
        .map_or(true, |last| last.end == "clean");
    let segments = result.segment_count as u64;

    Ok(Analysis {
        segments,
        mergeable: if last_clean {
            segments.saturating_sub(1)
        } else {
            segments
        },
        records: result.record_count,
        dead: result.dead_count,
    })
}

fn print_analysis(analysis: &Analysis, config: &Config) {
    println!("Compaction Analysis:");
    println!(
        "  Segments:          {} ({} mergeable)",
        analysis.segments, analysis.mergeable
    );
    println!("  Records:           {}", analysis.records);
    println!(
        "  Dead records:      {} ({:.1}%)",
        analysis.dead,
        analysis.dead_ratio() * 100.0
    );
    println!("  Merge trigger:     {:.1}%", config.merge_trigger * 100.0);

    let hour = local_hour();
    let policy = MergePolicy::new(config.merge_trigger, config.merge_window);
    let due = policy.should_merge(analysis.records, analysis.dead, hour);
    println!(
        "  Background merge:  {} (window {}..={}, hour {hour})",
        if due { "due" } else { "not due" },
        config.merge_window.start_hour,
        config.merge_window.end_hour
    );
}

fn print_result(result: &CompactionResult) {
    println!("  Segments merged:   {}", result.segments_merged);
    if result.segments_retained > 0 {
        println!("  Segments retained: {}", result.segments_retained);
    }
    println!("  Records scanned:   {}", result.records_scanned);
    println!("  Records rewritten: {}", result.records_rewritten);
    println!("  Records dropped:   {}", result.records_dropped);
    println!("  Space reclaimed:   {} bytes", result.bytes_reclaimed);
}
