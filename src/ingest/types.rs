//! Core data types for speedtest result ingestion.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Measurement timestamp, always normalized to UTC
pub type Timestamp = DateTime<Utc>;

/// Maximum length in bytes of the raw excerpt kept for a rejected file
pub const EXCERPT_LIMIT: usize = 256;

/// A numeric metric reported by the speedtest producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    Download,
    Upload,
    Latency,
    Jitter,
    LoadedLatencyDown,
    LoadedJitterDown,
    LoadedLatencyUp,
    LoadedJitterUp,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::Download,
        Metric::Upload,
        Metric::Latency,
        Metric::Jitter,
        Metric::LoadedLatencyDown,
        Metric::LoadedJitterDown,
        Metric::LoadedLatencyUp,
        Metric::LoadedJitterUp,
    ];

    /// Canonical field name, also used as CSV column header
    pub fn key(&self) -> &'static str {
        match self {
            Metric::Download => "download_mbps",
            Metric::Upload => "upload_mbps",
            Metric::Latency => "latency_ms",
            Metric::Jitter => "jitter_ms",
            Metric::LoadedLatencyDown => "loaded_latency_down_ms",
            Metric::LoadedJitterDown => "loaded_jitter_down_ms",
            Metric::LoadedLatencyUp => "loaded_latency_up_ms",
            Metric::LoadedJitterUp => "loaded_jitter_up_ms",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Metric::Download => "Download",
            Metric::Upload => "Upload",
            Metric::Latency => "Latency",
            Metric::Jitter => "Jitter",
            Metric::LoadedLatencyDown => "Loaded Latency Down",
            Metric::LoadedJitterDown => "Loaded Jitter Down",
            Metric::LoadedLatencyUp => "Loaded Latency Up",
            Metric::LoadedJitterUp => "Loaded Jitter Up",
        }
    }

    pub fn unit(&self) -> &'static str {
        if self.is_throughput() {
            "Mbps"
        } else {
            "ms"
        }
    }

    /// Throughput metrics are bounded by the speed ceiling, all others by the latency ceiling
    pub fn is_throughput(&self) -> bool {
        matches!(self, Metric::Download | Metric::Upload)
    }

    /// JSON keys the producer may use for this metric, in lookup order
    pub(crate) fn json_keys(&self) -> &'static [&'static str] {
        match self {
            Metric::Download => &["download", "download_mbps", "downloadMbps"],
            Metric::Upload => &["upload", "upload_mbps", "uploadMbps"],
            Metric::Latency => &["latency", "latency_ms", "ping"],
            Metric::Jitter => &["jitter", "jitter_ms"],
            Metric::LoadedLatencyDown => &["downLoadedLatency", "loaded_latency_down_ms"],
            Metric::LoadedJitterDown => &["downLoadedJitter", "loaded_jitter_down_ms"],
            Metric::LoadedLatencyUp => &["upLoadedLatency", "loaded_latency_up_ms"],
            Metric::LoadedJitterUp => &["upLoadedJitter", "loaded_jitter_up_ms"],
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown metric '{0}' (expected one of: download, upload, latency, jitter, loaded_latency_down, loaded_jitter_down, loaded_latency_up, loaded_jitter_up)")]
pub struct UnknownMetric(pub String);

impl FromStr for Metric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let metric = match normalized.as_str() {
            "download" | "download_mbps" | "down" => Metric::Download,
            "upload" | "upload_mbps" | "up" => Metric::Upload,
            "latency" | "latency_ms" | "ping" => Metric::Latency,
            "jitter" | "jitter_ms" => Metric::Jitter,
            "loaded_latency_down" | "loaded_latency_down_ms" | "downloadedlatency" => Metric::LoadedLatencyDown,
            "loaded_jitter_down" | "loaded_jitter_down_ms" | "downloadedjitter" => Metric::LoadedJitterDown,
            "loaded_latency_up" | "loaded_latency_up_ms" | "uploadedlatency" => Metric::LoadedLatencyUp,
            "loaded_jitter_up" | "loaded_jitter_up_ms" | "uploadedjitter" => Metric::LoadedJitterUp,
            _ => return Err(UnknownMetric(s.to_string())),
        };
        Ok(metric)
    }
}

/// Per-field metric values. `None` means absent or rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub latency_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub loaded_latency_down_ms: Option<f64>,
    pub loaded_jitter_down_ms: Option<f64>,
    pub loaded_latency_up_ms: Option<f64>,
    pub loaded_jitter_up_ms: Option<f64>,
}

impl Metrics {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Download => self.download_mbps,
            Metric::Upload => self.upload_mbps,
            Metric::Latency => self.latency_ms,
            Metric::Jitter => self.jitter_ms,
            Metric::LoadedLatencyDown => self.loaded_latency_down_ms,
            Metric::LoadedJitterDown => self.loaded_jitter_down_ms,
            Metric::LoadedLatencyUp => self.loaded_latency_up_ms,
            Metric::LoadedJitterUp => self.loaded_jitter_up_ms,
        }
    }

    pub fn set(&mut self, metric: Metric, value: Option<f64>) {
        let slot = match metric {
            Metric::Download => &mut self.download_mbps,
            Metric::Upload => &mut self.upload_mbps,
            Metric::Latency => &mut self.latency_ms,
            Metric::Jitter => &mut self.jitter_ms,
            Metric::LoadedLatencyDown => &mut self.loaded_latency_down_ms,
            Metric::LoadedJitterDown => &mut self.loaded_jitter_down_ms,
            Metric::LoadedLatencyUp => &mut self.loaded_latency_up_ms,
            Metric::LoadedJitterUp => &mut self.loaded_jitter_up_ms,
        };
        *slot = value;
    }

    /// Number of metrics carrying a value
    pub fn present_count(&self) -> usize {
        Metric::ALL.iter().filter(|m| self.get(**m).is_some()).count()
    }
}

/// Why a present metric value was dropped from an accepted record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NumericIssue {
    NotANumber,
    NonFinite,
    Negative,
    AboveCeiling { ceiling: f64 },
}

impl fmt::Display for NumericIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericIssue::NotANumber => write!(f, "not a number"),
            NumericIssue::NonFinite => write!(f, "not finite"),
            NumericIssue::Negative => write!(f, "negative"),
            NumericIssue::AboveCeiling { ceiling } => write!(f, "above ceiling {}", ceiling),
        }
    }
}

/// A metric field present in the source but rejected as an invalid numeric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub metric: Metric,
    pub issue: NumericIssue,
}

/// One completed speedtest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub timestamp: Timestamp,
    /// Endpoint or network path the test ran against
    pub route: Option<String>,
    pub server: Option<String>,
    /// Measurement run this record belongs to
    pub session_id: Option<String>,
    pub metrics: Metrics,
    pub field_issues: Vec<FieldIssue>,
    pub raw_source_path: PathBuf,
    /// xxh3 of the raw file bytes
    pub content_hash: u64,
}

impl MeasurementRecord {
    pub fn metric(&self, metric: Metric) -> Option<f64> {
        self.metrics.get(metric)
    }

    /// Identity used for duplicate detection besides the content hash
    pub fn identity(&self) -> (i64, u32, Option<&str>, Option<&str>) {
        (
            self.timestamp.timestamp(),
            self.timestamp.timestamp_subsec_nanos(),
            self.route.as_deref(),
            self.server.as_deref(),
        )
    }
}

/// Reason code for a rejected result file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParseFailureKind {
    MalformedJson,
    MissingRequiredField,
    InvalidTimestamp,
    InvalidNumericValue,
    /// The file could not be read at all
    Unreadable,
}

impl fmt::Display for ParseFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseFailureKind::MalformedJson => "malformed-json",
            ParseFailureKind::MissingRequiredField => "missing-required-field",
            ParseFailureKind::InvalidTimestamp => "invalid-timestamp",
            ParseFailureKind::InvalidNumericValue => "invalid-numeric-value",
            ParseFailureKind::Unreadable => "unreadable",
        };
        write!(f, "{}", name)
    }
}

/// A rejected input file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind} in {}: {detail}", .path.display())]
pub struct ParseFailure {
    pub path: PathBuf,
    pub kind: ParseFailureKind,
    pub detail: String,
    /// Leading bytes of the file, at most `EXCERPT_LIMIT` long
    pub excerpt: String,
}

impl ParseFailure {
    pub fn new(path: &Path, kind: ParseFailureKind, detail: impl Into<String>, raw: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            kind,
            detail: detail.into(),
            excerpt: bounded_excerpt(raw, EXCERPT_LIMIT).to_string(),
        }
    }
}

/// Truncate `raw` to at most `limit` bytes without splitting a character
pub fn bounded_excerpt(raw: &str, limit: usize) -> &str {
    if raw.len() <= limit {
        return raw;
    }
    let mut end = limit;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    &raw[..end]
}
