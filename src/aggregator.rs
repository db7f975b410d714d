//! Series aggregation
//!
//! This module turns raw readings into chart-ready series:
//! - Readings are classified and grouped into planned time buckets
//! - Each measured bucket gets mean/min/max/count and a worst-case status
//! - Gaps are filled for continuity-sensitive metrics (weight by default)

use crate::classifier::MetricClassifier;
use crate::error::EngineError;
use crate::planner::TimeBucketPlanner;
use crate::types::{
    Aggregate, BucketFill, ClassifiedReading, MetricType, Reading, Series, Status, TimeBucket,
};
use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Metrics whose empty buckets are gap-filled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpolationPolicy {
    pub metrics: BTreeSet<MetricType>,
}

impl Default for InterpolationPolicy {
    fn default() -> Self {
        Self {
            metrics: BTreeSet::from([MetricType::Weight]),
        }
    }
}

impl InterpolationPolicy {
    /// Policy that never fills gaps
    pub fn disabled() -> Self {
        Self {
            metrics: BTreeSet::new(),
        }
    }

    pub fn applies_to(&self, metric: MetricType) -> bool {
        self.metrics.contains(&metric)
    }
}

/// Builds bucketed series for one metric at a time
#[derive(Debug, Clone)]
pub struct SeriesAggregator {
    classifier: MetricClassifier,
    interpolation: InterpolationPolicy,
    offset: FixedOffset,
}

impl SeriesAggregator {
    /// Aggregator bucketing by UTC calendar day with the default interpolation policy
    pub fn new(classifier: MetricClassifier) -> Self {
        Self {
            classifier,
            interpolation: InterpolationPolicy::default(),
            offset: Utc.fix(),
        }
    }

    pub fn with_interpolation(mut self, policy: InterpolationPolicy) -> Self {
        self.interpolation = policy;
        self
    }

    /// Assign readings to calendar days shifted by `minutes` from UTC
    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Result<Self, EngineError> {
        self.offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                EngineError::InvalidInput(format!("UTC offset out of range: {minutes} minutes"))
            })?;
        Ok(self)
    }

    pub fn classifier(&self) -> &MetricClassifier {
        &self.classifier
    }

    /// Build the series of `metric` over `[start, end]`.
    ///
    /// Readings of other metrics or outside the range are ignored. Input order
    /// does not matter; the output is fully determined by the reading set and
    /// the range.
    pub fn build_series(
        &self,
        readings: &[Reading],
        metric: MetricType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Series, EngineError> {
        let plan = TimeBucketPlanner::plan_buckets(start, end)?;

        let mut in_range: Vec<(NaiveDate, &Reading)> = readings
            .iter()
            .filter(|reading| reading.metric_type() == metric)
            .map(|reading| (self.local_day(reading), reading))
            .filter(|(day, _)| *day >= start && *day <= end)
            .collect();
        in_range.sort_by(|(_, a), (_, b)| {
            a.taken_at
                .cmp(&b.taken_at)
                .then_with(|| a.source_id.cmp(&b.source_id))
                .then_with(|| compare_values(a, b))
        });

        let classified = in_range
            .iter()
            .map(|(day, reading)| {
                Ok::<_, EngineError>((*day, self.classifier.classify_reading(reading)?))
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        let grouped = classified.iter().fold(
            BTreeMap::<usize, Vec<&ClassifiedReading>>::new(),
            |mut groups, (day, reading)| {
                let index = plan.buckets.partition_point(|bucket| bucket.range_end <= *day);
                if plan.buckets.get(index).is_some_and(|bucket| bucket.contains(*day)) {
                    groups.entry(index).or_default().push(reading);
                }
                groups
            },
        );

        let mut buckets: Vec<TimeBucket> = plan
            .buckets
            .into_iter()
            .enumerate()
            .map(|(index, bucket)| match grouped.get(&index) {
                Some(members) => measured_bucket(bucket, members),
                None => bucket,
            })
            .collect();

        let interpolated = self.interpolation.applies_to(metric);
        if interpolated {
            let filled = fill_gaps(&mut buckets);
            debug!(metric = %metric, filled, "Filled empty buckets");
        }

        debug!(
            metric = %metric,
            readings = classified.len(),
            dropped = readings.iter().filter(|r| r.metric_type() == metric).count()
                - classified.len(),
            buckets = buckets.len(),
            granularity = ?plan.granularity,
            "Built series"
        );

        Ok(Series {
            metric_type: metric,
            granularity: plan.granularity,
            start,
            end,
            interpolated,
            buckets,
            readings: classified.into_iter().map(|(_, reading)| reading).collect(),
        })
    }

    fn local_day(&self, reading: &Reading) -> NaiveDate {
        reading.taken_at.with_timezone(&self.offset).date_naive()
    }
}

/// Order by primary value, then by secondary value
fn compare_values(a: &Reading, b: &Reading) -> Ordering {
    let (a, b) = (&a.measurement, &b.measurement);
    a.primary().total_cmp(&b.primary()).then_with(|| {
        a.secondary()
            .unwrap_or_default()
            .total_cmp(&b.secondary().unwrap_or_default())
    })
}

/// Summarize the member readings of a bucket
fn measured_bucket(bucket: TimeBucket, members: &[&ClassifiedReading]) -> TimeBucket {
    let primaries: Vec<f64> = members.iter().map(|r| r.primary).collect();
    let secondaries: Vec<f64> = members.iter().filter_map(|r| r.secondary).collect();
    let status = members
        .iter()
        .map(|r| r.status)
        .max()
        .unwrap_or(Status::Normal);

    TimeBucket {
        aggregate: Aggregate::from_values(&primaries),
        secondary: Aggregate::from_values(&secondaries),
        status: Some(status),
        fill: BucketFill::Measured,
        ..bucket
    }
}

/// Fill empty buckets from measured neighbours and return how many were filled.
///
/// Interior gaps are linearly interpolated by bucket position, trailing gaps
/// carry the last measured mean forward, leading gaps stay empty.
fn fill_gaps(buckets: &mut [TimeBucket]) -> usize {
    let measured: Vec<usize> = buckets
        .iter()
        .enumerate()
        .filter(|(_, bucket)| bucket.is_measured())
        .map(|(index, _)| index)
        .collect();

    let mut filled = 0;
    for index in 0..buckets.len() {
        if buckets[index].is_measured() {
            continue;
        }

        let before = measured.partition_point(|&m| m < index);
        let previous = before.checked_sub(1).map(|i| measured[i]);
        let following = measured.get(before).copied();

        match (previous, following) {
            (Some(p), Some(n)) => {
                let ratio = (index - p) as f64 / (n - p) as f64;
                let primary = lerp_means(&buckets[p].aggregate, &buckets[n].aggregate, ratio);
                let secondary = lerp_means(&buckets[p].secondary, &buckets[n].secondary, ratio);
                let bucket = &mut buckets[index];
                bucket.aggregate = primary.map(Aggregate::filled);
                bucket.secondary = secondary.map(Aggregate::filled);
                bucket.fill = BucketFill::Interpolated;
                filled += 1;
            }
            (Some(p), None) => {
                let primary = buckets[p].aggregate.map(|a| Aggregate::filled(a.mean));
                let secondary = buckets[p].secondary.map(|a| Aggregate::filled(a.mean));
                let bucket = &mut buckets[index];
                bucket.aggregate = primary;
                bucket.secondary = secondary;
                bucket.fill = BucketFill::CarriedForward;
                filled += 1;
            }
            _ => {}
        }
    }
    filled
}

fn lerp_means(from: &Option<Aggregate>, to: &Option<Aggregate>, ratio: f64) -> Option<f64> {
    match (from, to) {
        (Some(a), Some(b)) => Some(a.mean + (b.mean - a.mean) * ratio),
        _ => None,
    }
}
