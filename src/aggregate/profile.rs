//! 24-hour profile: how a metric behaves by hour of day.

use std::collections::BTreeMap;

use chrono::{FixedOffset, Timelike};
use serde::Serialize;

use super::series::{GroupBy, TimeRange};
use super::stats::{mean, quartiles};
use crate::ingest::{Dataset, Metric};

/// Statistics of one hour-of-day slot across all groups
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourStats {
    pub hour: u32,
    pub mean: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyProfile {
    pub metric: Metric,
    /// Offset the hours are expressed in
    pub utc_offset_secs: i32,
    /// Only hours that have samples, ascending
    pub hours: Vec<HourStats>,
    /// Per-group mean for each hour; `None` where the group has no samples
    pub groups: BTreeMap<String, [Option<f64>; 24]>,
    /// Hours of day with no samples at all
    pub missing_hours: Vec<u32>,
}

impl HourlyProfile {
    pub fn hour(&self, hour: u32) -> Option<&HourStats> {
        self.hours.iter().find(|h| h.hour == hour)
    }

    pub fn is_complete(&self) -> bool {
        self.missing_hours.is_empty()
    }
}

/// Build the hour-of-day profile of `metric` within `range`.
///
/// Hours are taken in `offset` local time. Records without the metric are
/// skipped.
pub fn hourly_profile(
    dataset: &Dataset,
    metric: Metric,
    range: &TimeRange,
    group_by: GroupBy,
    offset: FixedOffset,
) -> HourlyProfile {
    let mut by_hour: [Vec<f64>; 24] = std::array::from_fn(|_| Vec::new());
    let mut by_group: BTreeMap<String, [Vec<f64>; 24]> = BTreeMap::new();

    for record in dataset.records().iter().filter(|r| range.contains(r.timestamp)) {
        let Some(value) = record.metric(metric) else {
            continue;
        };
        let hour = record.timestamp.with_timezone(&offset).hour() as usize;
        by_hour[hour].push(value);
        by_group
            .entry(group_by.key(record))
            .or_insert_with(|| std::array::from_fn(|_| Vec::new()))[hour]
            .push(value);
    }

    let mut hours = Vec::new();
    let mut missing_hours = Vec::new();
    for (hour, values) in by_hour.iter().enumerate() {
        match (mean(values), quartiles(values)) {
            (Some(mean), Some(q)) => hours.push(HourStats {
                hour: hour as u32,
                mean,
                q25: q.q25,
                median: q.median,
                q75: q.q75,
                count: values.len(),
            }),
            _ => missing_hours.push(hour as u32),
        }
    }

    let groups = by_group
        .into_iter()
        .map(|(group, slots)| (group, slots.map(|values| mean(&values))))
        .collect();

    if !missing_hours.is_empty() {
        log::debug!(
            "Hourly profile for {} has no samples for hours {:?}",
            metric,
            missing_hours
        );
    }

    HourlyProfile {
        metric,
        utc_offset_secs: offset.local_minus_utc(),
        hours,
        groups,
        missing_hours,
    }
}
