//! Parsing of individual speedtest result files.
//!
//! Each file is expected to hold one JSON object written by the external
//! measurement process. The on-disk shape is an implicit contract, so field
//! lookup accepts the key spellings the producer has been seen to use and maps
//! them onto the explicit `MeasurementRecord` schema.
//!
//! Partial acceptance: a metric that is present but invalid (not a number,
//! negative, non-finite, above the configured ceiling) is dropped from the
//! record and listed in `field_issues`. Only when every present metric is
//! invalid is the whole file rejected.

use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use xxhash_rust::xxh3::xxh3_64;

use super::types::*;

const TIMESTAMP_KEYS: &[&str] = &["timestamp", "time"];
const ROUTE_KEYS: &[&str] = &["endpoint", "route"];
const SERVER_KEYS: &[&str] = &["server", "serverName", "server_id"];
const SESSION_KEYS: &[&str] = &["sessionID", "session_id", "sessionId"];

/// Naive formats tried after RFC 3339; interpreted as UTC
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Epoch values above this magnitude are taken as milliseconds
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Plausibility ceilings for metric values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParserLimits {
    pub max_speed_mbps: f64,
    pub max_latency_ms: f64,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_speed_mbps: 100_000.0,
            max_latency_ms: 60_000.0,
        }
    }
}

/// Turns result files into validated records
#[derive(Debug, Clone, Default)]
pub struct RecordParser {
    limits: ParserLimits,
}

impl RecordParser {
    pub fn new(limits: ParserLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> ParserLimits {
        self.limits
    }

    /// Read and parse a single result file.
    ///
    /// Never panics on malformed input; every problem becomes a `ParseFailure`.
    pub fn parse(&self, path: &Path) -> Result<MeasurementRecord, ParseFailure> {
        let bytes = fs::read(path).map_err(|e| {
            ParseFailure::new(path, ParseFailureKind::Unreadable, e.to_string(), "")
        })?;
        self.parse_bytes(path, &bytes)
    }

    /// Parse already-read file content attributed to `path`
    pub fn parse_bytes(&self, path: &Path, bytes: &[u8]) -> Result<MeasurementRecord, ParseFailure> {
        let raw = String::from_utf8_lossy(bytes);
        let fail = |kind: ParseFailureKind, detail: String| ParseFailure::new(path, kind, detail, &raw);

        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| fail(ParseFailureKind::MalformedJson, e.to_string()))?;
        let object = value.as_object().ok_or_else(|| {
            fail(
                ParseFailureKind::MalformedJson,
                format!("expected a JSON object, found {}", json_type_name(&value)),
            )
        })?;

        let timestamp_value = lookup(object, TIMESTAMP_KEYS).ok_or_else(|| {
            fail(ParseFailureKind::MissingRequiredField, "timestamp".to_string())
        })?;
        let timestamp = parse_timestamp_value(timestamp_value).ok_or_else(|| {
            fail(
                ParseFailureKind::InvalidTimestamp,
                format!("unrecognized timestamp {}", timestamp_value),
            )
        })?;

        let mut metrics = Metrics::default();
        let mut field_issues = Vec::new();
        let mut present = 0;

        for metric in Metric::ALL {
            let Some(value) = lookup(object, metric.json_keys()) else {
                continue;
            };
            present += 1;
            match self.check_value(metric, value) {
                Ok(v) => metrics.set(metric, Some(v)),
                Err(issue) => field_issues.push(FieldIssue { metric, issue }),
            }
        }

        if present == 0 {
            return Err(fail(
                ParseFailureKind::MissingRequiredField,
                "no metric field (download, upload, latency, jitter)".to_string(),
            ));
        }

        if metrics.present_count() == 0 {
            let detail = field_issues
                .iter()
                .map(|i| format!("{} {}", i.metric, i.issue))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(fail(ParseFailureKind::InvalidNumericValue, detail));
        }

        if !field_issues.is_empty() {
            log::debug!(
                "Accepted {} with {} rejected metric field(s)",
                path.display(),
                field_issues.len()
            );
        }

        Ok(MeasurementRecord {
            timestamp,
            route: lookup_string(object, ROUTE_KEYS),
            server: lookup_string(object, SERVER_KEYS),
            session_id: lookup_string(object, SESSION_KEYS),
            metrics,
            field_issues,
            raw_source_path: path.to_path_buf(),
            content_hash: xxh3_64(bytes),
        })
    }

    fn check_value(&self, metric: Metric, value: &Value) -> Result<f64, NumericIssue> {
        let v = match value {
            Value::Number(n) => n.as_f64().ok_or(NumericIssue::NotANumber)?,
            Value::String(s) => s.trim().parse::<f64>().map_err(|_| NumericIssue::NotANumber)?,
            _ => return Err(NumericIssue::NotANumber),
        };

        if !v.is_finite() {
            return Err(NumericIssue::NonFinite);
        }
        if v < 0.0 {
            return Err(NumericIssue::Negative);
        }

        let ceiling = if metric.is_throughput() {
            self.limits.max_speed_mbps
        } else {
            self.limits.max_latency_ms
        };
        if v > ceiling {
            return Err(NumericIssue::AboveCeiling { ceiling });
        }

        Ok(v)
    }
}

/// Parse a result file with default limits
pub fn parse(path: &Path) -> Result<MeasurementRecord, ParseFailure> {
    RecordParser::default().parse(path)
}

/// First non-null value among `keys`
fn lookup<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| object.get(*k))
        .find(|v| !v.is_null())
}

fn lookup_string(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match lookup(object, keys)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn parse_timestamp_value(value: &Value) -> Option<Timestamp> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => from_epoch(n.as_f64()?),
        _ => None,
    }
}

/// Parse a timestamp string.
///
/// Accepts RFC 3339, naive `YYYY-MM-DD HH:MM:SS[.fff]` (UTC) and epoch
/// seconds or milliseconds.
pub fn parse_timestamp(s: &str) -> Option<Timestamp> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc());
        }
    }

    s.parse::<f64>().ok().and_then(from_epoch)
}

fn from_epoch(value: f64) -> Option<Timestamp> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let seconds = if value > EPOCH_MILLIS_THRESHOLD {
        value / 1000.0
    } else {
        value
    };
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse_str(content: &str) -> Result<MeasurementRecord, ParseFailure> {
        RecordParser::default().parse_bytes(Path::new("/data/test.json"), content.as_bytes())
    }

    #[test]
    fn test_parse_full_record() {
        let record = parse_str(
            r#"{
                "timestamp": "2025-03-01T10:15:00Z",
                "sessionID": "abc-123",
                "endpoint": "https://custom-t0.speed.cloudflare.com",
                "download": 512.25,
                "upload": 48.5,
                "latency": 12.0,
                "jitter": 1.25,
                "downLoadedLatency": 40.0,
                "downLoadedJitter": 5.0,
                "upLoadedLatency": 30.0,
                "upLoadedJitter": 3.0
            }"#,
        )
        .unwrap();

        assert_eq!(record.timestamp, Utc.with_ymd_and_hms(2025, 3, 1, 10, 15, 0).unwrap());
        assert_eq!(record.session_id.as_deref(), Some("abc-123"));
        assert_eq!(record.route.as_deref(), Some("https://custom-t0.speed.cloudflare.com"));
        assert_eq!(record.metrics.download_mbps, Some(512.25));
        assert_eq!(record.metrics.loaded_jitter_up_ms, Some(3.0));
        assert_eq!(record.metrics.present_count(), 8);
        assert!(record.field_issues.is_empty());
        assert_eq!(record.raw_source_path, Path::new("/data/test.json"));
    }

    #[test]
    fn test_malformed_json() {
        let failure = parse_str("{\"timestamp\": ").unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::MalformedJson);
        assert_eq!(failure.excerpt, "{\"timestamp\": ");
    }

    #[test]
    fn test_non_object_is_malformed() {
        let failure = parse_str("[1, 2, 3]").unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::MalformedJson);
        assert!(failure.detail.contains("an array"));
    }

    #[test]
    fn test_missing_timestamp() {
        let failure = parse_str(r#"{"download": 100.0}"#).unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::MissingRequiredField);
        assert_eq!(failure.detail, "timestamp");
    }

    #[test]
    fn test_null_timestamp_is_missing() {
        let failure = parse_str(r#"{"timestamp": null, "download": 100.0}"#).unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::MissingRequiredField);
    }

    #[test]
    fn test_missing_all_metrics() {
        let failure = parse_str(r#"{"timestamp": "2025-03-01T10:15:00Z", "endpoint": "x"}"#).unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::MissingRequiredField);
    }

    #[test]
    fn test_invalid_timestamp() {
        let failure = parse_str(r#"{"timestamp": "yesterday", "download": 1.0}"#).unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::InvalidTimestamp);

        let failure = parse_str(r#"{"timestamp": true, "download": 1.0}"#).unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::InvalidTimestamp);
    }

    #[test]
    fn test_partial_metric_rejection_keeps_record() {
        let record = parse_str(
            r#"{"timestamp": "2025-03-01 10:15:00", "download": -5, "upload": 40.0, "latency": "fast"}"#,
        )
        .unwrap();

        assert_eq!(record.metrics.download_mbps, None);
        assert_eq!(record.metrics.upload_mbps, Some(40.0));
        assert_eq!(record.metrics.latency_ms, None);
        assert_eq!(record.field_issues.len(), 2);
        assert_eq!(record.field_issues[0].metric, Metric::Download);
        assert_eq!(record.field_issues[0].issue, NumericIssue::Negative);
        assert_eq!(record.field_issues[1].issue, NumericIssue::NotANumber);
    }

    #[test]
    fn test_all_metrics_invalid_rejects_record() {
        let failure = parse_str(
            r#"{"timestamp": "2025-03-01T10:15:00Z", "download": -1, "upload": 1e9}"#,
        )
        .unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::InvalidNumericValue);
        assert!(failure.detail.contains("download_mbps negative"));
        assert!(failure.detail.contains("upload_mbps above ceiling"));
    }

    #[test]
    fn test_custom_ceiling() {
        let parser = RecordParser::new(ParserLimits {
            max_speed_mbps: 1000.0,
            max_latency_ms: 500.0,
        });
        let record = parser
            .parse_bytes(
                Path::new("a.json"),
                br#"{"timestamp": 1740823200, "download": 1200, "latency": 499}"#,
            )
            .unwrap();
        assert_eq!(record.metrics.download_mbps, None);
        assert_eq!(record.metrics.latency_ms, Some(499.0));
        assert_eq!(
            record.field_issues[0].issue,
            NumericIssue::AboveCeiling { ceiling: 1000.0 }
        );
    }

    #[test]
    fn test_numeric_strings_accepted() {
        let record = parse_str(r#"{"timestamp": "2025-03-01T10:15:00Z", "download": " 93.4 "}"#).unwrap();
        assert_eq!(record.metrics.download_mbps, Some(93.4));
    }

    #[test]
    fn test_null_metric_treated_as_absent() {
        let record = parse_str(r#"{"timestamp": "2025-03-01T10:15:00Z", "download": null, "upload": 10}"#).unwrap();
        assert_eq!(record.metrics.download_mbps, None);
        assert!(record.field_issues.is_empty());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2025-03-01T10:00:00+01:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-01T09:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-01 09:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-01T09:00:00.000"), Some(expected));
        assert_eq!(parse_timestamp("1740819600"), Some(expected));
        assert_eq!(parse_timestamp("1740819600000"), Some(expected));
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("-5"), None);
    }

    #[test]
    fn test_epoch_number_timestamp() {
        let record = parse_str(r#"{"timestamp": 1740819600.5, "upload": 1}"#).unwrap();
        assert_eq!(record.timestamp.timestamp(), 1740819600);
        assert_eq!(record.timestamp.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_content_hash_depends_on_bytes() {
        let a = parse_str(r#"{"timestamp": 1740819600, "upload": 1}"#).unwrap();
        let b = parse_str(r#"{"timestamp": 1740819600, "upload": 1}"#).unwrap();
        let c = parse_str(r#"{"timestamp": 1740819600,  "upload": 1}"#).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.content_hash, c.content_hash);
    }

    #[test]
    fn test_unreadable_file() {
        let failure = parse(Path::new("/nonexistent/definitely/missing.json")).unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::Unreadable);
        assert!(failure.excerpt.is_empty());
    }

    #[test]
    fn test_numeric_server_identifier() {
        let record = parse_str(r#"{"timestamp": 1740819600, "upload": 1, "server": 4711}"#).unwrap();
        assert_eq!(record.server.as_deref(), Some("4711"));
    }
}
