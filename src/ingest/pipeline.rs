//! Full rebuild pipeline: scan, parse every file in parallel, assemble.

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use super::dataset::Dataset;
use super::record_parser::RecordParser;
use super::scanner::{ScanError, Scanner};
use super::types::Timestamp;

/// Something that can produce a complete dataset on demand.
///
/// The cache only depends on this trait, so the rebuild step can be swapped
/// out (counted, delayed, failed) in tests.
pub trait DatasetSource: Send + Sync {
    fn build(&self, built_at: Timestamp) -> Result<Dataset, ScanError>;

    /// Human-readable origin, for logs
    fn describe(&self) -> String {
        "dataset source".to_string()
    }
}

/// Reads a data directory into a `Dataset`
#[derive(Debug, Clone)]
pub struct Ingestor {
    root: PathBuf,
    scanner: Scanner,
    parser: RecordParser,
}

impl Ingestor {
    pub fn new(root: impl Into<PathBuf>, scanner: Scanner, parser: RecordParser) -> Self {
        Self {
            root: root.into(),
            scanner,
            parser,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub fn parser(&self) -> &RecordParser {
        &self.parser
    }
}

impl DatasetSource for Ingestor {
    fn build(&self, built_at: Timestamp) -> Result<Dataset, ScanError> {
        let paths = self.scanner.scan(&self.root)?;
        log::info!("Parsing {} result files from {}...", paths.len(), self.root.display());

        // Indexed collect keeps scan order, which deduplication relies on
        let outcomes: Vec<_> = paths.par_iter().map(|path| self.parser.parse(path)).collect();

        for failure in outcomes.iter().filter_map(|o| o.as_ref().err()) {
            log::warn!("Rejected {}", failure);
        }

        let dataset = Dataset::assemble(outcomes, built_at);
        log::info!(
            "Built dataset: {} records from {} files ({} rejected, {} duplicates)",
            dataset.len(),
            dataset.source_file_count(),
            dataset.failure_count(),
            dataset.duplicate_count()
        );
        Ok(dataset)
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_build_from_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("1.json"),
            r#"{"timestamp": "2025-03-01T10:00:00Z", "download": 100, "endpoint": "a"}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("2.json"),
            r#"{"timestamp": "2025-03-01T09:00:00Z", "download": 90, "endpoint": "a"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("3.json"), "not json").unwrap();

        let ingestor = Ingestor::new(dir.path(), Scanner::default(), RecordParser::default());
        let dataset = ingestor.build(Utc::now()).unwrap();

        assert_eq!(dataset.source_file_count(), 3);
        assert_eq!(dataset.failure_count(), 1);
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.records()[0].metrics.download_mbps, Some(90.0));
        assert_eq!(ingestor.describe(), dir.path().display().to_string());
    }

    #[test]
    fn test_build_missing_directory() {
        let dir = TempDir::new().unwrap();
        let ingestor = Ingestor::new(dir.path().join("gone"), Scanner::default(), RecordParser::default());
        assert!(matches!(
            ingestor.build(Utc::now()),
            Err(ScanError::DirectoryUnavailable { .. })
        ));
    }
}
