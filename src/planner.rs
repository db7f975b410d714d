//! Time bucket planning
//!
//! Picks a bucket granularity from the length of a date range and lays out the
//! contiguous, non-overlapping bucket slots that cover it. Weekly buckets
//! follow ISO weeks (Monday start) and monthly buckets follow calendar months;
//! the first and last bucket are clipped to the requested range.

use crate::error::EngineError;
use crate::types::{DateRange, Granularity, TimeBucket};
use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// Longest span (`end - start` in days) still charted with daily buckets
pub const MAX_DAILY_SPAN_DAYS: i64 = 31;

/// Longest span (`end - start` in days) still charted with weekly buckets
pub const MAX_WEEKLY_SPAN_DAYS: i64 = 120;

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Bucket skeleton for a date range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketPlan {
    pub granularity: Granularity,
    pub buckets: Vec<TimeBucket>,
}

/// Planner for empty bucket skeletons
pub struct TimeBucketPlanner;

impl TimeBucketPlanner {
    /// Plan buckets covering `[start, end]`, both days included
    pub fn plan_buckets(start: NaiveDate, end: NaiveDate) -> Result<BucketPlan, EngineError> {
        let range = DateRange::new(start, end)?;
        let granularity = granularity_for(&range);
        let exclusive_end = next_day(end)?;

        let mut buckets = Vec::new();
        let mut cursor = start;
        while cursor < exclusive_end {
            let boundary = next_boundary(cursor, granularity)?.min(exclusive_end);
            let label = bucket_label(cursor, boundary, granularity)?;
            buckets.push(TimeBucket::empty(cursor, boundary, label));
            cursor = boundary;
        }

        Ok(BucketPlan {
            granularity,
            buckets,
        })
    }
}

/// Granularity policy: daily up to 31 days, weekly up to 120, monthly beyond
pub fn granularity_for(range: &DateRange) -> Granularity {
    match range.span_days() {
        days if days <= MAX_DAILY_SPAN_DAYS => Granularity::Day,
        days if days <= MAX_WEEKLY_SPAN_DAYS => Granularity::Week,
        _ => Granularity::Month,
    }
}

fn next_day(day: NaiveDate) -> Result<NaiveDate, EngineError> {
    day.checked_add_days(Days::new(1))
        .ok_or_else(|| EngineError::InvalidInput(format!("date out of range after {day}")))
}

/// First day of the bucket following the one that contains `day`
fn next_boundary(day: NaiveDate, granularity: Granularity) -> Result<NaiveDate, EngineError> {
    let boundary = match granularity {
        Granularity::Day => day.checked_add_days(Days::new(1)),
        Granularity::Week => {
            let until_monday = 7 - u64::from(day.weekday().num_days_from_monday());
            day.checked_add_days(Days::new(until_monday))
        }
        Granularity::Month => day
            .with_day(1)
            .and_then(|first| first.checked_add_months(Months::new(1))),
    };
    boundary.ok_or_else(|| EngineError::InvalidInput(format!("date out of range after {day}")))
}

fn bucket_label(
    start: NaiveDate,
    exclusive_end: NaiveDate,
    granularity: Granularity,
) -> Result<String, EngineError> {
    let label = match granularity {
        Granularity::Day => start.format("%d.%m.%Y").to_string(),
        Granularity::Week => {
            let last = exclusive_end.pred_opt().ok_or_else(|| {
                EngineError::InvalidInput(format!("date out of range before {exclusive_end}"))
            })?;
            format!("{}–{}", start.format("%d.%m"), last.format("%d.%m.%Y"))
        }
        Granularity::Month => {
            format!("{} {}", MONTH_NAMES[start.month0() as usize], start.year())
        }
    };
    Ok(label)
}
