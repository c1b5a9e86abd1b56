//! Read-only views over a dataset: time series, percentile bands, the
//! hour-of-day profile and the latest-run summary.
//!
//! Every function here is a pure function of the dataset it receives, so the
//! same dataset and query always produce the same result.

pub mod profile;
pub mod series;
pub mod stats;
pub mod summary;

pub use profile::{hourly_profile, HourStats, HourlyProfile};
pub use series::{
    aggregate, band, AggregatePoint, AggregateQuery, AggregateSeries, BandPoint, BucketSize,
    GroupBy, QueryError, TimeRange, ALL_GROUP, UNKNOWN_GROUP,
};
pub use stats::{mean, percent_change, percentile, quartiles, Quartiles, Statistic, UnknownStatistic};
pub use summary::{
    data_gap, describe_age, latest_run_summary, shorten_endpoint, DataGap, MetricSummary,
    RunSummary, DEFAULT_RUN_SIZE,
};
