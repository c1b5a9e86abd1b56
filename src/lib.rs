//! # Speedboard - ingestion and caching core for a speedtest dashboard
//!
//! A speedtest runner drops one JSON file per completed test into a data
//! directory. This crate turns that directory into an immutable, time-ordered
//! [`ingest::Dataset`], keeps it behind a TTL cache that never serves a
//! half-built result, and computes the views a dashboard draws from it.
//!
//! ## Architecture
//!
//! - `ingest`: result file parsing, directory scanning and dataset assembly
//! - `cache`: process-wide dataset cache with single-flight rebuilds
//! - `aggregate`: time-bucketed series, percentile bands, hourly profile and
//!   latest-run summary
//! - `config`: layered configuration (defaults, YAML, environment)
//! - `report`: text, JSON and CSV output
//! - `utils`: duration parsing
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use speedboard::aggregate::{aggregate, AggregateQuery, BucketSize, GroupBy, Statistic, TimeRange};
//! use speedboard::cache::DatasetCache;
//! use speedboard::config::Config;
//! use speedboard::ingest::Metric;
//!
//! # fn main() -> color_eyre::Result<()> {
//! let config = Config::load(None)?;
//! let cache = DatasetCache::new(Arc::new(config.ingestor()?), config.cache_options());
//!
//! let dataset = cache.get_current_dataset()?;
//! if let Some(range) = TimeRange::trailing(&dataset, config.default_range) {
//!     let query = AggregateQuery {
//!         metric: Metric::Download,
//!         group_by: GroupBy::Route,
//!         range,
//!         bucket: BucketSize::TEN_MINUTES,
//!         statistic: Statistic::Median,
//!     };
//!     for series in aggregate(&dataset, &query) {
//!         println!("{}: {} points", series.group, series.points.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod ingest;
pub mod report;
pub mod utils;

pub use cache::{CacheError, DatasetCache};
pub use config::Config;
pub use ingest::{Dataset, MeasurementRecord, Metric};
