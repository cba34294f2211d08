//! Merge passes: trigger, window, liveness and file deletion.

use caskdb_core::{Config, Engine, MergeWindow, SegmentId};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn config() -> Config {
    Config::default()
        .compaction(false)
        .max_segment_size(128)
        .merge_pause(Duration::ZERO)
}

fn segment_files(path: &Path) -> Vec<SegmentId> {
    let mut ids: Vec<_> = std::fs::read_dir(path)
        .unwrap()
        .filter_map(|entry| caskdb_core::parse_segment_file_name(&entry.unwrap().path()))
        .collect();
    ids.sort();
    ids
}

/// Writes `rounds` overwrites of a few keys so most records are dead.
fn churn(engine: &Engine, rounds: u32) {
    for round in 0..rounds {
        for key in ["alpha", "beta", "gamma"] {
            engine
                .set(key.as_bytes(), format!("{key}-{round}").as_bytes())
                .unwrap();
        }
    }
}

#[test]
fn nothing_happens_below_trigger() {
    let dir = tempdir().unwrap();
    let engine = Engine::open_with_config(dir.path(), config().merge_trigger(0.99)).unwrap();
    churn(&engine, 10);
    let before = segment_files(dir.path());

    assert_eq!(engine.try_merge_at(3).unwrap(), None);
    assert_eq!(segment_files(dir.path()), before);
}

#[test]
fn nothing_happens_outside_window() {
    let dir = tempdir().unwrap();
    let config = config().merge_window(MergeWindow::new(2, 5));
    let engine = Engine::open_with_config(dir.path(), config).unwrap();
    churn(&engine, 10);
    let before = segment_files(dir.path());
    assert!(engine.stats().dead_ratio() > 0.6);

    assert_eq!(engine.try_merge_at(6).unwrap(), None);
    assert_eq!(engine.try_merge_at(1).unwrap(), None);
    assert_eq!(segment_files(dir.path()), before);
}

#[test]
fn merge_inside_window_reclaims_dead_records() {
    let dir = tempdir().unwrap();
    let config = config().merge_window(MergeWindow::new(22, 3));
    let engine = Engine::open_with_config(dir.path(), config).unwrap();
    churn(&engine, 10);
    engine.set(b"solo", b"kept").unwrap();
    engine.delete(b"alpha").unwrap();

    let before = segment_files(dir.path());
    let active = engine.active_segment_id().unwrap();
    assert!(before.len() > 2);

    let result = engine.try_merge_at(23).unwrap().expect("merge should run");
    assert_eq!(result.segments_merged, before.len() - 1);
    assert_eq!(result.segments_retained, 0);
    assert!(result.records_dropped > result.records_rewritten);
    assert!(result.bytes_reclaimed > 0);

    // Old files are gone; only the previous active segment and newer remain.
    let after = segment_files(dir.path());
    assert!(after.iter().all(|id| *id >= active));

    assert!(!engine.has(b"alpha").unwrap());
    assert_eq!(engine.get(b"beta").unwrap(), b"beta-9");
    assert_eq!(engine.get(b"gamma").unwrap(), b"gamma-9");
    assert_eq!(engine.get(b"solo").unwrap(), b"kept");
    assert_eq!(engine.stats().merges, 1);
}

#[test]
fn superseded_records_leave_no_dead_count() {
    let dir = tempdir().unwrap();
    let engine = Engine::open_with_config(dir.path(), config()).unwrap();
    for i in 0..20u32 {
        engine.set(b"k", format!("v{i:03}").as_bytes()).unwrap();
    }
    // Move past the last overwrite so every dead record is in an old segment.
    engine.set(b"filler-1", &[1u8; 90]).unwrap();
    engine.set(b"filler-2", &[2u8; 90]).unwrap();

    engine.merge().unwrap();
    let stats = engine.stats();
    assert_eq!(stats.dead, 0);
    assert_eq!(engine.get(b"k").unwrap(), b"v019");
}

#[test]
fn merged_store_survives_restart() {
    let dir = tempdir().unwrap();
    let expected = {
        let engine = Engine::open_with_config(dir.path(), config()).unwrap();
        churn(&engine, 8);
        engine.delete(b"gamma").unwrap();
        engine.merge().unwrap();
        let snapshot: Vec<_> = {
            let mut keys: Vec<_> = engine.keys().unwrap().collect();
            keys.sort();
            keys.into_iter()
                .map(|k| {
                    let v = engine.get(&k).unwrap();
                    (k, v)
                })
                .collect()
        };
        engine.close().unwrap();
        snapshot
    };

    let engine = Engine::open_with_config(dir.path(), config()).unwrap();
    let mut keys: Vec<_> = engine.keys().unwrap().collect();
    keys.sort();
    let actual: Vec<_> = keys
        .into_iter()
        .map(|k| {
            let v = engine.get(&k).unwrap();
            (k, v)
        })
        .collect();
    assert_eq!(actual, expected);
    assert!(!engine.has(b"gamma").unwrap());
}

#[test]
fn merge_with_single_segment_is_a_no_op() {
    let dir = tempdir().unwrap();
    let engine = Engine::open_with_config(dir.path(), Config::default().compaction(false)).unwrap();
    engine.set(b"k", b"1").unwrap();
    engine.set(b"k", b"2").unwrap();

    let result = engine.merge().unwrap();
    assert_eq!(result.segments_merged, 0);
    assert_eq!(segment_files(dir.path()), vec![SegmentId(0)]);
}

#[test]
fn readers_see_every_live_key_during_merge() {
    let dir = tempdir().unwrap();
    let engine = Arc::new(Engine::open_with_config(dir.path(), config()).unwrap());
    for i in 0..40u32 {
        engine.set(format!("key{i}").as_bytes(), format!("v{i}").as_bytes()).unwrap();
    }
    churn(&engine, 20);

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    for i in 0..40u32 {
                        let value = engine.get(format!("key{i}").as_bytes()).unwrap();
                        assert_eq!(value, format!("v{i}").into_bytes());
                    }
                    assert_eq!(engine.get(b"beta").unwrap(), b"beta-19");
                }
            })
        })
        .collect();

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for i in 0..200u32 {
                engine.set(b"hot", format!("{i}").as_bytes()).unwrap();
            }
        })
    };

    for _ in 0..3 {
        engine.merge().unwrap();
    }
    writer.join().unwrap();
    done.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(engine.get(b"hot").unwrap(), b"199");
    assert_eq!(engine.len(), 44);
}

#[test]
fn background_compactor_merges_and_stops_on_close() {
    let dir = tempdir().unwrap();
    let config = config()
        .compaction(true)
        .merge_trigger(0.1)
        .merge_interval(Duration::from_millis(20))
        .merge_retry_delay(Duration::from_millis(20));
    let engine = Engine::open_with_config(dir.path(), config).unwrap();
    churn(&engine, 15);

    let mut merged = false;
    for _ in 0..250 {
        if engine.stats().merges > 0 {
            merged = true;
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    assert!(merged, "compactor never ran");
    assert_eq!(engine.get(b"alpha").unwrap(), b"alpha-14");

    engine.close().unwrap();
    assert!(!engine.stats().merging);
}
