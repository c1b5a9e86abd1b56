//! The assembled, immutable in-memory dataset.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::types::*;

/// Owned form of `MeasurementRecord::identity`
type RecordIdentity = (i64, u32, Option<String>, Option<String>);

/// All accepted measurements from one full rebuild.
///
/// Records are sorted by timestamp ascending. Duplicates (same file content,
/// or same timestamp + route + server) are dropped, keeping the first
/// occurrence in scan order. A dataset is never mutated after assembly; the
/// next rebuild produces a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    records: Vec<MeasurementRecord>,
    built_at: Timestamp,
    source_file_count: usize,
    failure_count: usize,
    duplicate_count: usize,
    failures: Vec<ParseFailure>,
}

impl Dataset {
    /// Assemble a dataset from per-file parse outcomes given in scan order
    pub fn assemble(
        outcomes: Vec<Result<MeasurementRecord, ParseFailure>>,
        built_at: Timestamp,
    ) -> Self {
        let source_file_count = outcomes.len();
        let mut seen_hashes: HashSet<u64> = HashSet::new();
        let mut seen_identities: HashSet<RecordIdentity> = HashSet::new();
        let mut records = Vec::with_capacity(source_file_count);
        let mut failures = Vec::new();
        let mut duplicate_count = 0;

        for outcome in outcomes {
            match outcome {
                Ok(record) => {
                    let (secs, nanos, route, server) = record.identity();
                    let identity = (secs, nanos, route.map(String::from), server.map(String::from));

                    if !seen_hashes.insert(record.content_hash) || !seen_identities.insert(identity) {
                        log::debug!("Dropping duplicate record from {}", record.raw_source_path.display());
                        duplicate_count += 1;
                        continue;
                    }
                    records.push(record);
                }
                Err(failure) => failures.push(failure),
            }
        }

        // Stable: equal timestamps keep scan order
        records.sort_by_key(|r| r.timestamp);

        Self {
            records,
            built_at,
            source_file_count,
            failure_count: failures.len(),
            duplicate_count,
            failures,
        }
    }

    /// A dataset built from an empty directory
    pub fn empty(built_at: Timestamp) -> Self {
        Self::assemble(Vec::new(), built_at)
    }

    pub fn records(&self) -> &[MeasurementRecord] {
        &self.records
    }

    pub fn built_at(&self) -> Timestamp {
        self.built_at
    }

    /// Number of files the scan produced, accepted or not
    pub fn source_file_count(&self) -> usize {
        self.source_file_count
    }

    pub fn failure_count(&self) -> usize {
        self.failure_count
    }

    pub fn duplicate_count(&self) -> usize {
        self.duplicate_count
    }

    pub fn failures(&self) -> &[ParseFailure] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Time since the dataset was built; zero if `now` precedes `built_at`
    pub fn age(&self, now: Timestamp) -> std::time::Duration {
        (now - self.built_at).to_std().unwrap_or_default()
    }

    /// Oldest and newest measurement timestamps
    pub fn time_extent(&self) -> Option<(Timestamp, Timestamp)> {
        let first = self.records.first()?;
        let last = self.records.last()?;
        Some((first.timestamp, last.timestamp))
    }

    pub fn latest(&self) -> Option<&MeasurementRecord> {
        self.records.last()
    }

    /// Distinct routes, sorted
    pub fn routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self
            .records
            .iter()
            .filter_map(|r| r.route.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        routes.sort();
        routes
    }

    /// Number of records carrying a value for `metric`
    pub fn metric_coverage(&self, metric: Metric) -> usize {
        self.records.iter().filter(|r| r.metric(metric).is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    fn record(path: &str, minute: u32, route: &str, hash: u64) -> MeasurementRecord {
        let mut metrics = Metrics::default();
        metrics.download_mbps = Some(100.0 + minute as f64);
        MeasurementRecord {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 10, minute, 0).unwrap(),
            route: Some(route.to_string()),
            server: None,
            session_id: None,
            metrics,
            field_issues: Vec::new(),
            raw_source_path: PathBuf::from(path),
            content_hash: hash,
        }
    }

    fn failure(path: &str) -> ParseFailure {
        ParseFailure::new(std::path::Path::new(path), ParseFailureKind::MalformedJson, "eof", "{")
    }

    fn built_at() -> Timestamp {
        Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_assemble_sorts_by_timestamp() {
        let dataset = Dataset::assemble(
            vec![
                Ok(record("a.json", 30, "r1", 1)),
                Ok(record("b.json", 10, "r1", 2)),
                Ok(record("c.json", 20, "r1", 3)),
            ],
            built_at(),
        );
        let minutes: Vec<u32> = dataset
            .records()
            .iter()
            .map(|r| chrono::Timelike::minute(&r.timestamp))
            .collect();
        assert_eq!(minutes, vec![10, 20, 30]);
        assert_eq!(dataset.built_at(), built_at());
    }

    #[test]
    fn test_assemble_drops_content_duplicates() {
        let dataset = Dataset::assemble(
            vec![
                Ok(record("a.json", 10, "r1", 7)),
                Ok(record("copy-of-a.json", 11, "r2", 7)),
            ],
            built_at(),
        );
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.duplicate_count(), 1);
        assert_eq!(dataset.records()[0].raw_source_path, PathBuf::from("a.json"));
    }

    #[test]
    fn test_assemble_drops_identity_duplicates_keeping_first() {
        let dataset = Dataset::assemble(
            vec![
                Ok(record("a.json", 10, "r1", 1)),
                Ok(record("b.json", 10, "r1", 2)),
                Ok(record("c.json", 10, "r2", 3)),
            ],
            built_at(),
        );
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.records()[0].raw_source_path, PathBuf::from("a.json"));
        assert_eq!(dataset.records()[1].raw_source_path, PathBuf::from("c.json"));
    }

    #[test]
    fn test_assemble_counts_failures() {
        let dataset = Dataset::assemble(
            vec![
                Ok(record("a.json", 10, "r1", 1)),
                Err(failure("b.json")),
                Err(failure("c.json")),
            ],
            built_at(),
        );
        assert_eq!(dataset.source_file_count(), 3);
        assert_eq!(dataset.failure_count(), 2);
        assert_eq!(dataset.failures().len(), 2);
        assert_eq!(dataset.len(), 1);
    }

    #[test]
    fn test_equal_timestamps_keep_scan_order() {
        let dataset = Dataset::assemble(
            vec![
                Ok(record("z.json", 10, "r2", 1)),
                Ok(record("a.json", 10, "r1", 2)),
            ],
            built_at(),
        );
        assert_eq!(dataset.records()[0].route.as_deref(), Some("r2"));
        assert_eq!(dataset.records()[1].route.as_deref(), Some("r1"));
    }

    #[test]
    fn test_empty_dataset() {
        let dataset = Dataset::empty(built_at());
        assert!(dataset.is_empty());
        assert_eq!(dataset.source_file_count(), 0);
        assert_eq!(dataset.time_extent(), None);
        assert!(dataset.latest().is_none());
    }

    #[test]
    fn test_age_and_extent() {
        let dataset = Dataset::assemble(
            vec![Ok(record("a.json", 5, "r1", 1)), Ok(record("b.json", 45, "r2", 2))],
            built_at(),
        );
        let later = built_at() + chrono::Duration::seconds(90);
        assert_eq!(dataset.age(later), std::time::Duration::from_secs(90));
        assert_eq!(dataset.age(built_at() - chrono::Duration::seconds(5)), std::time::Duration::ZERO);

        let (first, last) = dataset.time_extent().unwrap();
        assert!(first < last);
        assert_eq!(dataset.routes(), vec!["r1".to_string(), "r2".to_string()]);
        assert_eq!(dataset.metric_coverage(Metric::Download), 2);
        assert_eq!(dataset.metric_coverage(Metric::Upload), 0);
    }
}
