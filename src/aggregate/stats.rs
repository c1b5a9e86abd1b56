//! Summary statistics over metric samples.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Statistic computed per bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Statistic {
    Mean,
    Median,
    /// Percentile in `0.0..=100.0`, linearly interpolated
    Percentile(f64),
    Count,
    Min,
    Max,
}

impl Statistic {
    /// Compute the statistic; `None` for an empty sample
    pub fn compute(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            Statistic::Mean => mean(values),
            Statistic::Median => percentile(values, 50.0),
            Statistic::Percentile(p) => percentile(values, *p),
            Statistic::Count => Some(values.len() as f64),
            Statistic::Min => values.iter().copied().reduce(f64::min),
            Statistic::Max => values.iter().copied().reduce(f64::max),
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statistic::Mean => write!(f, "mean"),
            Statistic::Median => write!(f, "median"),
            Statistic::Percentile(p) => write!(f, "p{}", p),
            Statistic::Count => write!(f, "count"),
            Statistic::Min => write!(f, "min"),
            Statistic::Max => write!(f, "max"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown statistic '{0}' (expected mean, median, count, min, max or p0-p100)")]
pub struct UnknownStatistic(pub String);

impl FromStr for Statistic {
    type Err = UnknownStatistic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "mean" | "avg" | "average" => return Ok(Statistic::Mean),
            "median" | "p50" => return Ok(Statistic::Median),
            "count" => return Ok(Statistic::Count),
            "min" => return Ok(Statistic::Min),
            "max" => return Ok(Statistic::Max),
            _ => {}
        }

        normalized
            .strip_prefix('p')
            .and_then(|n| n.parse::<f64>().ok())
            .filter(|p| (0.0..=100.0).contains(p))
            .map(Statistic::Percentile)
            .ok_or_else(|| UnknownStatistic(s.to_string()))
    }
}

/// Arithmetic mean
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Percentile with linear interpolation between closest ranks
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let fraction = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * fraction)
}

/// Quartiles and median of one sample, as drawn by the median band chart
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Quartiles {
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
}

pub fn quartiles(values: &[f64]) -> Option<Quartiles> {
    Some(Quartiles {
        q25: percentile(values, 25.0)?,
        median: percentile(values, 50.0)?,
        q75: percentile(values, 75.0)?,
    })
}

/// Relative change from `previous` to `latest` in percent.
///
/// `None` when the baseline is zero.
pub fn percent_change(previous: f64, latest: f64) -> Option<f64> {
    if previous == 0.0 {
        return None;
    }
    Some((latest - previous) / previous * 100.0)
}
