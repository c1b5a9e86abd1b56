//! Time-bucketed series over a dataset.
//!
//! Buckets are aligned to multiples of the bucket size since the Unix epoch,
//! so the same query always yields the same boundaries no matter where the
//! requested range starts. Buckets without samples are left out.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::DateTime;
use serde::Serialize;

use super::stats::{quartiles, Statistic};
use crate::ingest::{Dataset, MeasurementRecord, Metric, Timestamp};
use crate::utils::duration::parse_duration_to_seconds;

/// Group label used when no grouping is requested
pub const ALL_GROUP: &str = "all";
/// Group label for records lacking the grouping field
pub const UNKNOWN_GROUP: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("Time range start {start} is after end {end}")]
    InvertedRange { start: Timestamp, end: Timestamp },

    #[error("Time range is empty after clamping to the available data")]
    EmptyAfterClamp,

    #[error("Invalid bucket size: {0}")]
    InvalidBucket(String),

    #[error("Unknown grouping '{0}' (expected none, route, server or session)")]
    UnknownGroupBy(String),
}

/// Inclusive time range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, QueryError> {
        if start > end {
            return Err(QueryError::InvertedRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// The full extent of the dataset, if it has records
    pub fn covering(dataset: &Dataset) -> Option<Self> {
        dataset
            .time_extent()
            .map(|(start, end)| Self { start, end })
    }

    /// The trailing `window` of the dataset, bounded by its oldest record
    pub fn trailing(dataset: &Dataset, window: Duration) -> Option<Self> {
        let (first, last) = dataset.time_extent()?;
        let start = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| last.checked_sub_signed(w))
            .map_or(first, |s| s.max(first));
        Some(Self { start, end: last })
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Clamp to the dataset's extent; start must remain before end
    pub fn clamp_to(&self, dataset: &Dataset) -> Result<Self, QueryError> {
        let (first, last) = dataset.time_extent().ok_or(QueryError::EmptyAfterClamp)?;
        let start = self.start.max(first);
        let end = self.end.min(last);
        if start >= end {
            return Err(QueryError::EmptyAfterClamp);
        }
        Ok(Self { start, end })
    }
}

/// Fixed bucket width in whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketSize(u64);

impl BucketSize {
    pub const TEN_MINUTES: BucketSize = BucketSize(600);
    pub const HOUR: BucketSize = BucketSize(3600);
    pub const DAY: BucketSize = BucketSize(86_400);

    pub fn from_secs(secs: u64) -> Result<Self, QueryError> {
        if secs == 0 || secs > i64::MAX as u64 {
            return Err(QueryError::InvalidBucket(format!("{} seconds", secs)));
        }
        Ok(Self(secs))
    }

    /// Parse "10m", "1h", "1d", "900"
    pub fn parse(s: &str) -> Result<Self, QueryError> {
        let secs = parse_duration_to_seconds(s).map_err(QueryError::InvalidBucket)?;
        Self::from_secs(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Start of the epoch-aligned bucket holding `ts`
    pub fn bucket_start(&self, ts: Timestamp) -> Timestamp {
        let width = self.0 as i64;
        let start = ts.timestamp().div_euclid(width) * width;
        DateTime::from_timestamp(start, 0).unwrap_or(ts)
    }
}

impl fmt::Display for BucketSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            s if s % 86_400 == 0 => write!(f, "{}d", s / 86_400),
            s if s % 3600 == 0 => write!(f, "{}h", s / 3600),
            s if s % 60 == 0 => write!(f, "{}m", s / 60),
            s => write!(f, "{}s", s),
        }
    }
}

/// Record field to split series by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GroupBy {
    None,
    Route,
    Server,
    Session,
}

impl GroupBy {
    pub fn key(&self, record: &MeasurementRecord) -> String {
        let field = match self {
            GroupBy::None => return ALL_GROUP.to_string(),
            GroupBy::Route => record.route.as_deref(),
            GroupBy::Server => record.server.as_deref(),
            GroupBy::Session => record.session_id.as_deref(),
        };
        field.unwrap_or(UNKNOWN_GROUP).to_string()
    }
}

impl std::str::FromStr for GroupBy {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "all" => Ok(GroupBy::None),
            "route" | "endpoint" => Ok(GroupBy::Route),
            "server" => Ok(GroupBy::Server),
            "session" | "session_id" => Ok(GroupBy::Session),
            _ => Err(QueryError::UnknownGroupBy(s.to_string())),
        }
    }
}

/// Parameters of one aggregation call
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregateQuery {
    pub metric: Metric,
    pub group_by: GroupBy,
    pub range: TimeRange,
    pub bucket: BucketSize,
    pub statistic: Statistic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatePoint {
    pub bucket_start: Timestamp,
    pub value: f64,
    /// Samples that contributed to `value`
    pub count: usize,
}

/// Ordered points for one metric/group combination
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateSeries {
    pub metric: Metric,
    pub statistic: Statistic,
    pub group: String,
    pub points: Vec<AggregatePoint>,
}

/// Per-bucket median with interquartile band
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandPoint {
    pub bucket_start: Timestamp,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub count: usize,
}

/// group -> bucket start (epoch secs) -> samples
type Buckets = BTreeMap<String, BTreeMap<i64, Vec<f64>>>;

fn collect_buckets(
    dataset: &Dataset,
    metric: Metric,
    group_by: GroupBy,
    range: &TimeRange,
    bucket: BucketSize,
) -> Buckets {
    let mut groups: Buckets = BTreeMap::new();

    for record in dataset.records().iter().filter(|r| range.contains(r.timestamp)) {
        let Some(value) = record.metric(metric) else {
            continue;
        };
        let start = bucket.bucket_start(record.timestamp).timestamp();
        groups
            .entry(group_by.key(record))
            .or_default()
            .entry(start)
            .or_default()
            .push(value);
    }

    groups
}

fn to_timestamp(secs: i64) -> Option<Timestamp> {
    DateTime::from_timestamp(secs, 0)
}

/// Compute one series per group, sorted by group label.
///
/// Records outside `query.range` or missing `query.metric` do not contribute.
pub fn aggregate(dataset: &Dataset, query: &AggregateQuery) -> Vec<AggregateSeries> {
    collect_buckets(dataset, query.metric, query.group_by, &query.range, query.bucket)
        .into_iter()
        .map(|(group, buckets)| {
            let points = buckets
                .into_iter()
                .filter_map(|(start, values)| {
                    Some(AggregatePoint {
                        bucket_start: to_timestamp(start)?,
                        value: query.statistic.compute(&values)?,
                        count: values.len(),
                    })
                })
                .collect();
            AggregateSeries {
                metric: query.metric,
                statistic: query.statistic,
                group,
                points,
            }
        })
        .collect()
}

/// Median and 25th/75th percentile per bucket across all groups
pub fn band(dataset: &Dataset, metric: Metric, range: &TimeRange, bucket: BucketSize) -> Vec<BandPoint> {
    collect_buckets(dataset, metric, GroupBy::None, range, bucket)
        .into_values()
        .flat_map(BTreeMap::into_iter)
        .filter_map(|(start, values)| {
            let q = quartiles(&values)?;
            Some(BandPoint {
                bucket_start: to_timestamp(start)?,
                q25: q.q25,
                median: q.median,
                q75: q.q75,
                count: values.len(),
            })
        })
        .collect()
}
