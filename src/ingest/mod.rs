//! Speedtest result ingestion.
//!
//! Discovers result files under the data directory, parses each into a
//! validated record and assembles the deduplicated, time-ordered dataset.

pub mod types;
pub mod record_parser;
pub mod scanner;
pub mod dataset;
pub mod pipeline;

pub use types::*;
pub use record_parser::{parse, parse_timestamp, ParserLimits, RecordParser};
pub use scanner::{scan, ScanError, Scanner, DEFAULT_FILE_PATTERN};
pub use dataset::Dataset;
pub use pipeline::{DatasetSource, Ingestor};
