//! Latest-run summary, staleness check and label helpers.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use super::stats::{mean, percent_change};
use crate::ingest::{Dataset, MeasurementRecord, Metric, Timestamp};

/// Tests per run emitted by the speedtest producer
pub const DEFAULT_RUN_SIZE: usize = 5;

/// Scheme plus authority of a URL
static URL_AUTHORITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://([^/?#]*)").expect("Invalid URL regex")
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    /// Mean over the latest run, absent if no record in it has the metric
    pub latest: Option<f64>,
    pub previous: Option<f64>,
    /// Percent change from the previous run
    pub change_percent: Option<f64>,
}

/// Averages of the most recent run compared against the run before it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Timestamp of the last record in the run
    pub recorded_at: Timestamp,
    pub run_size: usize,
    pub has_previous_run: bool,
    pub metrics: BTreeMap<Metric, MetricSummary>,
    /// The tests making up the run, oldest first
    pub records: Vec<MeasurementRecord>,
}

impl RunSummary {
    pub fn metric(&self, metric: Metric) -> Option<&MetricSummary> {
        self.metrics.get(&metric)
    }
}

fn run_means(run: &[MeasurementRecord]) -> BTreeMap<Metric, f64> {
    Metric::ALL
        .iter()
        .filter_map(|&metric| {
            let values: Vec<f64> = run.iter().filter_map(|r| r.metric(metric)).collect();
            mean(&values).map(|m| (metric, m))
        })
        .collect()
}

/// Summarize the last `run_size` records against the `run_size` before them.
///
/// `run_size` is clamped to `1..=len`. The previous run only counts when the
/// dataset holds at least two full runs. Returns `None` for an empty dataset.
pub fn latest_run_summary(dataset: &Dataset, run_size: usize) -> Option<RunSummary> {
    let records = dataset.records();
    let recorded_at = records.last()?.timestamp;
    let run_size = run_size.clamp(1, records.len());

    let split = records.len() - run_size;
    let latest = run_means(&records[split..]);
    let previous = if records.len() >= run_size * 2 {
        run_means(&records[split - run_size..split])
    } else {
        BTreeMap::new()
    };

    let metrics = Metric::ALL
        .iter()
        .map(|&metric| {
            let latest = latest.get(&metric).copied();
            let previous = previous.get(&metric).copied();
            let change_percent = match (previous, latest) {
                (Some(p), Some(l)) => percent_change(p, l),
                _ => None,
            };
            (
                metric,
                MetricSummary {
                    latest,
                    previous,
                    change_percent,
                },
            )
        })
        .collect();

    Some(RunSummary {
        recorded_at,
        run_size,
        has_previous_run: !previous.is_empty(),
        metrics,
        records: records[split..].to_vec(),
    })
}

/// How long no new measurement has arrived
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataGap {
    pub latest: Timestamp,
    #[serde(with = "humantime_serde")]
    pub age: Duration,
    /// "5 hours" or "3 days"
    pub description: String,
}

/// Report a gap when the newest record is older than `threshold`
pub fn data_gap(dataset: &Dataset, now: Timestamp, threshold: Duration) -> Option<DataGap> {
    let latest = dataset.latest()?.timestamp;
    let age = (now - latest).to_std().ok()?;
    if age <= threshold {
        return None;
    }
    Some(DataGap {
        latest,
        age,
        description: describe_age(age),
    })
}

/// Whole days from 48 hours on, whole hours below
pub fn describe_age(age: Duration) -> String {
    let hours = age.as_secs_f64() / 3600.0;
    if hours >= 48.0 {
        format!("{:.0} days", (hours / 24.0).round())
    } else {
        format!("{:.0} hours", hours.round())
    }
}

/// First DNS label of an endpoint URL, for chart legends.
///
/// `https://custom-t0.speed.cloudflare.com` becomes `custom-t0`. Input
/// without a scheme is treated as a bare host.
pub fn shorten_endpoint(url: &str) -> &str {
    let host = URL_AUTHORITY
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|h| !h.is_empty())
        .unwrap_or(url);
    match host.split('.').next() {
        Some(first) if !first.is_empty() => first,
        _ => url,
    }
}
