//! Text, JSON and CSV renderings of datasets and aggregation results.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use chrono::FixedOffset;
use color_eyre::eyre::{Context, Result};
use serde::Serialize;

use crate::aggregate::{
    shorten_endpoint, AggregateSeries, BandPoint, DataGap, HourlyProfile, RunSummary,
};
use crate::cache::{CacheHealth, CacheState, CachedDataset};
use crate::ingest::{Dataset, MeasurementRecord, Metric, ParseFailureKind, Timestamp};

/// Rejected files listed individually in a summary
const MAX_LISTED_FAILURES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureLine {
    pub path: PathBuf,
    pub kind: ParseFailureKind,
    pub detail: String,
}

/// Everything the dashboard header shows about the dataset being served.
///
/// Header counts describe the served dataset, which may be older than the
/// one the cache currently holds. Only the rebuild counters and the last
/// error come from the cache itself.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    pub source: String,
    pub state: CacheState,
    /// The dataset was served past its TTL while a rebuild runs
    pub stale: bool,
    pub built_at: Timestamp,
    pub age_secs: u64,
    pub source_file_count: usize,
    pub failure_count: usize,
    pub duplicate_count: usize,
    pub record_count: usize,
    pub rebuild_count: u64,
    pub failed_rebuild_count: u64,
    pub last_error: Option<String>,
    pub first_record: Option<Timestamp>,
    pub last_record: Option<Timestamp>,
    pub routes: Vec<String>,
    pub metric_coverage: BTreeMap<Metric, usize>,
    pub latest_run: Option<RunSummary>,
    pub data_gap: Option<DataGap>,
    pub failures_by_kind: BTreeMap<String, usize>,
    pub failures: Vec<FailureLine>,
}

impl SummaryReport {
    pub fn new(
        cached: &CachedDataset,
        health: &CacheHealth,
        latest_run: Option<RunSummary>,
        data_gap: Option<DataGap>,
    ) -> Self {
        let dataset = &cached.dataset;
        let extent = dataset.time_extent();

        let mut failures_by_kind = BTreeMap::new();
        for failure in dataset.failures() {
            *failures_by_kind.entry(failure.kind.to_string()).or_insert(0) += 1;
        }

        Self {
            source: health.source.clone(),
            state: if cached.is_stale() {
                CacheState::Stale
            } else {
                CacheState::Fresh
            },
            stale: cached.is_stale(),
            built_at: dataset.built_at(),
            age_secs: cached.age.as_secs(),
            source_file_count: dataset.source_file_count(),
            failure_count: dataset.failure_count(),
            duplicate_count: dataset.duplicate_count(),
            record_count: dataset.len(),
            rebuild_count: health.rebuild_count,
            failed_rebuild_count: health.failed_rebuild_count,
            last_error: health.last_error.clone(),
            first_record: extent.map(|(first, _)| first),
            last_record: extent.map(|(_, last)| last),
            routes: dataset.routes(),
            metric_coverage: Metric::ALL
                .iter()
                .map(|&m| (m, dataset.metric_coverage(m)))
                .collect(),
            latest_run,
            data_gap,
            failures_by_kind,
            failures: dataset
                .failures()
                .iter()
                .take(MAX_LISTED_FAILURES)
                .map(|f| FailureLine {
                    path: f.path.clone(),
                    kind: f.kind,
                    detail: f.detail.clone(),
                })
                .collect(),
        }
    }
}

/// Format a timestamp in the display offset
pub fn format_timestamp(ts: Timestamp, offset: FixedOffset) -> String {
    ts.with_timezone(&offset)
        .format("%Y-%m-%d %H:%M:%S %:z")
        .to_string()
}

fn format_value(value: Option<f64>, metric: Metric) -> String {
    match value {
        Some(v) => format!("{:.2} {}", v, metric.unit()),
        None => "n/a".to_string(),
    }
}

fn heading(lines: &mut Vec<String>, title: &str) {
    lines.push("=".repeat(72));
    lines.push(format!("  {}", title));
    lines.push("=".repeat(72));
}

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialize report to JSON")
}

/// One test of the latest run: time, session, endpoint, then every present metric
fn run_record_line(record: &MeasurementRecord, offset: FixedOffset) -> String {
    let mut line = format!(
        "{}  {}  {}",
        format_timestamp(record.timestamp, offset),
        record.session_id.as_deref().unwrap_or("-"),
        record.route.as_deref().map_or("-", shorten_endpoint)
    );
    for &metric in Metric::ALL.iter() {
        if let Some(value) = record.metric(metric) {
            line.push_str(&format!("  {}={}", metric.key(), value));
        }
    }
    line
}

pub fn summary_text(report: &SummaryReport, offset: FixedOffset) -> String {
    let mut lines = Vec::new();
    heading(&mut lines, "SPEEDTEST DATA SUMMARY");

    lines.push(format!("Source: {}", report.source));
    lines.push(format!("Cache state: {}", report.state));
    lines.push(format!(
        "Built at: {} ({}s ago)",
        format_timestamp(report.built_at, offset),
        report.age_secs
    ));
    lines.push(format!(
        "Files: {} scanned, {} rejected, {} duplicates, {} records",
        report.source_file_count, report.failure_count, report.duplicate_count, report.record_count
    ));
    lines.push(String::new());

    if report.record_count == 0 {
        lines.push("No data available yet.".to_string());
    }
    if report.stale {
        lines.push(format!(
            "Serving stale data as of {} while it is refreshed.",
            format_timestamp(report.built_at, offset)
        ));
    }
    if let Some(gap) = &report.data_gap {
        lines.push(format!(
            "WARNING: No new data in the last ~{} (latest measurement {}).",
            gap.description,
            format_timestamp(gap.latest, offset)
        ));
    }

    if let (Some(first), Some(last)) = (report.first_record, report.last_record) {
        lines.push(format!(
            "Measurements: {} to {}",
            format_timestamp(first, offset),
            format_timestamp(last, offset)
        ));
    }
    if !report.routes.is_empty() {
        let short: Vec<&str> = report.routes.iter().map(|r| shorten_endpoint(r)).collect();
        lines.push(format!("Endpoints: {}", short.join(", ")));
    }

    if let Some(run) = &report.latest_run {
        lines.push(String::new());
        lines.push(format!(
            "Latest run ({} tests, recorded at {}):",
            run.run_size,
            format_timestamp(run.recorded_at, offset)
        ));
        for (metric, summary) in &run.metrics {
            if summary.latest.is_none() {
                continue;
            }
            let change = summary
                .change_percent
                .map(|c| format!(" ({:+.1}%)", c))
                .unwrap_or_default();
            lines.push(format!(
                "  {:<28} {}{}",
                metric.display_name(),
                format_value(summary.latest, *metric),
                change
            ));
        }
        if run.has_previous_run {
            lines.push("  Percent differences compare against the previous run.".to_string());
        }
        lines.push("  Tests in this run:".to_string());
        for record in &run.records {
            lines.push(format!("    {}", run_record_line(record, offset)));
        }
    }

    if !report.failures_by_kind.is_empty() {
        lines.push(String::new());
        lines.push("Rejected files:".to_string());
        for (kind, count) in &report.failures_by_kind {
            lines.push(format!("  {}: {}", kind, count));
        }
        for failure in &report.failures {
            lines.push(format!(
                "  - {} [{}] {}",
                failure.path.display(),
                failure.kind,
                failure.detail
            ));
        }
        let hidden = report.failure_count.saturating_sub(report.failures.len());
        if hidden > 0 {
            lines.push(format!("  ... and {} more", hidden));
        }
    }

    if let Some(err) = &report.last_error {
        lines.push(String::new());
        lines.push(format!("Last rebuild error: {}", err));
    }

    lines.push("=".repeat(72));
    lines.join("\n")
}

pub fn series_text(series: &[AggregateSeries], offset: FixedOffset) -> String {
    let mut lines = Vec::new();
    if series.is_empty() {
        lines.push("No data in the selected range.".to_string());
        return lines.join("\n");
    }

    for s in series {
        heading(
            &mut lines,
            &format!(
                "{} ({}) - {} - {}",
                s.metric.display_name(),
                s.metric.unit(),
                s.statistic,
                shorten_endpoint(&s.group)
            ),
        );
        for point in &s.points {
            lines.push(format!(
                "{}  {:>12.2}  (n={})",
                format_timestamp(point.bucket_start, offset),
                point.value,
                point.count
            ));
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

pub fn band_text(metric: Metric, points: &[BandPoint], offset: FixedOffset) -> String {
    let mut lines = Vec::new();
    heading(
        &mut lines,
        &format!("{} ({}) - median with 25th-75th percentile", metric.display_name(), metric.unit()),
    );
    if points.is_empty() {
        lines.push("No data in the selected range.".to_string());
    }
    for p in points {
        lines.push(format!(
            "{}  {:>10.2}  [{:.2} .. {:.2}]  (n={})",
            format_timestamp(p.bucket_start, offset),
            p.median,
            p.q25,
            p.q75,
            p.count
        ));
    }
    lines.join("\n")
}

pub fn profile_text(profile: &HourlyProfile) -> String {
    let mut lines = Vec::new();
    let offset_minutes = profile.utc_offset_secs / 60;
    heading(
        &mut lines,
        &format!(
            "{} ({}) by hour of day (UTC{:+03}:{:02})",
            profile.metric.display_name(),
            profile.metric.unit(),
            offset_minutes / 60,
            (offset_minutes % 60).abs()
        ),
    );
    lines.push(format!(
        "{:>4}  {:>10}  {:>10}  {:>10}  {:>10}  {:>6}",
        "hour", "mean", "q25", "median", "q75", "n"
    ));
    for h in &profile.hours {
        lines.push(format!(
            "{:>4}  {:>10.2}  {:>10.2}  {:>10.2}  {:>10.2}  {:>6}",
            h.hour, h.mean, h.q25, h.median, h.q75, h.count
        ));
    }
    if !profile.missing_hours.is_empty() {
        lines.push(format!(
            "{} of 24 hours have no data yet: {:?}",
            profile.missing_hours.len(),
            profile.missing_hours
        ));
    }
    lines.join("\n")
}

/// Write every record as CSV, one row per record. Returns the row count.
pub fn write_csv<W: io::Write>(dataset: &Dataset, offset: FixedOffset, writer: W) -> Result<usize> {
    let mut csv = csv::Writer::from_writer(writer);

    let mut header = vec!["timestamp", "route", "server", "session_id"];
    header.extend(Metric::ALL.iter().map(|m| m.key()));
    header.push("source_file");
    csv.write_record(&header).context("Failed to write CSV header")?;

    for record in dataset.records() {
        let mut row = vec![
            record.timestamp.with_timezone(&offset).to_rfc3339(),
            record.route.clone().unwrap_or_default(),
            record.server.clone().unwrap_or_default(),
            record.session_id.clone().unwrap_or_default(),
        ];
        row.extend(
            Metric::ALL
                .iter()
                .map(|&m| record.metric(m).map(|v| v.to_string()).unwrap_or_default()),
        );
        row.push(record.raw_source_path.display().to_string());
        csv.write_record(&row)
            .with_context(|| format!("Failed to write CSV row for {}", record.raw_source_path.display()))?;
    }

    csv.flush().context("Failed to flush CSV output")?;
    Ok(dataset.len())
}
