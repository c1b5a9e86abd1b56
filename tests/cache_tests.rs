//! Cache behaviour against a real data directory.

use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use chrono::{FixedOffset, TimeZone, Utc};
use tempfile::TempDir;

use speedboard::cache::clock::ManualClock;
use speedboard::cache::{CacheError, CacheOptions, CacheState, DatasetCache};
use speedboard::config::Config;
use speedboard::ingest::{Ingestor, RecordParser, Scanner};
use speedboard::report::{summary_text, SummaryReport};

fn write_results(dir: &std::path::Path, count: usize) {
    let base = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    for i in 0..count {
        let timestamp = base + chrono::Duration::minutes(i as i64);
        fs::write(
            dir.join(format!("{:03}.json", i)),
            format!(
                r#"{{"timestamp": "{}", "download": {}, "latency": 9}}"#,
                timestamp.to_rfc3339(),
                100 + i
            ),
        )
        .unwrap();
    }
}

fn options(ttl: Duration) -> CacheOptions {
    CacheOptions {
        ttl,
        snapshot_path: None,
    }
}

#[test]
fn test_missing_data_dir_is_unavailable() {
    let dir = TempDir::new().unwrap();
    let ingestor = Ingestor::new(
        dir.path().join("does-not-exist"),
        Scanner::default(),
        RecordParser::default(),
    );
    let cache = DatasetCache::new(Arc::new(ingestor), options(Duration::from_secs(60)));

    let err = cache.get_current_dataset().unwrap_err();
    assert!(matches!(err, CacheError::Unavailable(_)));
    assert_eq!(cache.state(), CacheState::Unavailable);

    let health = cache.health();
    assert_eq!(health.record_count, 0);
    assert!(health.last_error.is_some());
}

#[test]
fn test_empty_directory_is_valid_empty_dataset() {
    let dir = TempDir::new().unwrap();
    let ingestor = Ingestor::new(dir.path(), Scanner::default(), RecordParser::default());
    let cache = DatasetCache::new(Arc::new(ingestor), options(Duration::from_secs(60)));

    let dataset = cache.get_current_dataset().unwrap();
    assert!(dataset.is_empty());
    assert_eq!(dataset.source_file_count(), 0);
    assert_eq!(cache.state(), CacheState::Fresh);
}

#[test]
fn test_concurrent_first_reads_share_one_dataset() {
    let dir = TempDir::new().unwrap();
    write_results(dir.path(), 200);
    let ingestor = Ingestor::new(dir.path(), Scanner::default(), RecordParser::default());
    let cache = DatasetCache::new(Arc::new(ingestor), options(Duration::from_secs(3600)));

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                cache.get_current_dataset().unwrap()
            })
        })
        .collect();

    let datasets: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(datasets.iter().all(|d| Arc::ptr_eq(d, &datasets[0])));
    assert_eq!(datasets[0].len(), 200);
    assert_eq!(cache.health().rebuild_count, 1);
}

#[test]
fn test_new_files_appear_after_ttl() {
    let dir = TempDir::new().unwrap();
    write_results(dir.path(), 3);
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let ingestor = Ingestor::new(dir.path(), Scanner::default(), RecordParser::default());
    let cache = DatasetCache::with_clock(
        Arc::new(ingestor),
        clock.clone(),
        options(Duration::from_secs(60)),
    );

    assert_eq!(cache.get_current_dataset().unwrap().len(), 3);
    write_results(dir.path(), 5);

    // still fresh, new files are not visible yet
    clock.advance(Duration::from_secs(30));
    assert_eq!(cache.get_current_dataset().unwrap().len(), 3);

    // stale read returns the old dataset and rebuilds in the background
    clock.advance(Duration::from_secs(31));
    let stale = cache.get_with_status().unwrap();
    assert!(stale.is_stale());
    assert_eq!(stale.dataset.len(), 3);

    cache.wait_idle();
    let fresh = cache.get_with_status().unwrap();
    assert!(!fresh.is_stale());
    assert_eq!(fresh.dataset.len(), 5);
}

#[test]
fn test_snapshot_survives_restart() {
    let data = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    write_results(data.path(), 4);

    let mut config = Config {
        data_dir: data.path().to_path_buf(),
        snapshot_path: Some(state.path().join("dataset.snap")),
        // every read counts as stale, so the restarted cache must rebuild
        refresh_interval: Duration::ZERO,
        ..Config::default()
    };
    config.validate().unwrap();

    let first = DatasetCache::new(Arc::new(config.ingestor().unwrap()), config.cache_options());
    assert_eq!(first.get_current_dataset().unwrap().len(), 4);

    // the data directory disappears before the restart
    config.data_dir = data.path().join("gone");
    let restarted = DatasetCache::new(Arc::new(config.ingestor().unwrap()), config.cache_options());
    assert_eq!(restarted.state(), CacheState::Stale);

    let cached = restarted.get_with_status().unwrap();
    assert!(cached.is_stale());
    assert_eq!(cached.dataset.len(), 4);

    restarted.wait_idle();
    assert_eq!(restarted.peek().unwrap().len(), 4);
    assert!(restarted.health().last_error.is_some());
}

#[test]
fn test_stale_summary_describes_served_dataset() {
    let dir = TempDir::new().unwrap();
    write_results(dir.path(), 3);
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let ingestor = Ingestor::new(dir.path(), Scanner::default(), RecordParser::default());
    let cache = DatasetCache::with_clock(
        Arc::new(ingestor),
        clock.clone(),
        options(Duration::from_secs(60)),
    );
    cache.get_current_dataset().unwrap();

    write_results(dir.path(), 7);
    clock.advance(Duration::from_secs(61));
    let stale = cache.get_with_status().unwrap();
    assert!(stale.is_stale());

    // the background rebuild publishes before the report is rendered
    cache.wait_idle();
    let health = cache.health();
    assert_eq!(health.record_count, 7);
    assert!(health.built_at.unwrap() > start);

    let report = SummaryReport::new(&stale, &health, None, None);
    assert_eq!(report.built_at, start);
    assert_eq!(report.record_count, 3);
    assert_eq!(report.source_file_count, 3);
    assert_eq!(report.age_secs, 61);
    assert_eq!(report.rebuild_count, 2);

    let text = summary_text(&report, FixedOffset::east_opt(0).unwrap());
    assert!(text.contains("Cache state: stale"));
    assert!(text.contains("Files: 3 scanned, 0 rejected, 0 duplicates, 3 records"));
    assert!(text.contains("Serving stale data as of 2025-03-01 12:00:00 +00:00"));
}
