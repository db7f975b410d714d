//! Core types for the Healthtrack engine
//!
//! This module defines the data structures that flow through each stage of the
//! engine: raw readings, classified readings, bucketed series, and the report
//! document handed to renderers and notifiers.

use crate::error::EngineError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of health measurement tracked for a family member
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Glucose,
    BloodPressure,
    HeartRate,
    Weight,
    Temperature,
    OxygenSaturation,
    StressLevel,
    Other,
}

impl MetricType {
    /// Every metric type, in report order
    pub const ALL: [MetricType; 8] = [
        MetricType::Glucose,
        MetricType::BloodPressure,
        MetricType::HeartRate,
        MetricType::Weight,
        MetricType::Temperature,
        MetricType::OxygenSaturation,
        MetricType::StressLevel,
        MetricType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Glucose => "glucose",
            MetricType::BloodPressure => "blood_pressure",
            MetricType::HeartRate => "heart_rate",
            MetricType::Weight => "weight",
            MetricType::Temperature => "temperature",
            MetricType::OxygenSaturation => "oxygen_saturation",
            MetricType::StressLevel => "stress_level",
            MetricType::Other => "other",
        }
    }

    /// Human-readable name used in section titles and messages
    pub fn display_name(&self) -> &'static str {
        match self {
            MetricType::Glucose => "Blood glucose",
            MetricType::BloodPressure => "Blood pressure",
            MetricType::HeartRate => "Heart rate",
            MetricType::Weight => "Weight",
            MetricType::Temperature => "Body temperature",
            MetricType::OxygenSaturation => "Oxygen saturation",
            MetricType::StressLevel => "Stress level",
            MetricType::Other => "Other measurements",
        }
    }

    /// Canonical unit values of this metric are expressed in
    pub fn unit(&self) -> &'static str {
        match self {
            MetricType::Glucose => "mg/dL",
            MetricType::BloodPressure => "mmHg",
            MetricType::HeartRate => "bpm",
            MetricType::Weight => "kg",
            MetricType::Temperature => "°C",
            MetricType::OxygenSaturation => "%",
            MetricType::StressLevel => "score",
            MetricType::Other => "",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "glucose" | "blood_glucose" => Ok(MetricType::Glucose),
            "blood_pressure" | "bloodpressure" => Ok(MetricType::BloodPressure),
            "heart_rate" | "heartrate" | "pulse" => Ok(MetricType::HeartRate),
            "weight" => Ok(MetricType::Weight),
            "temperature" => Ok(MetricType::Temperature),
            "oxygen_saturation" | "oxygensaturation" | "spo2" => Ok(MetricType::OxygenSaturation),
            "stress_level" | "stresslevel" | "stress" => Ok(MetricType::StressLevel),
            "other" => Ok(MetricType::Other),
            _ => Err(EngineError::UnsupportedMetricType(s.to_string())),
        }
    }
}

/// Numeric component of a measurement that a reference range applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Value,
    Systolic,
    Diastolic,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Value => "value",
            Channel::Systolic => "systolic",
            Channel::Diastolic => "diastolic",
        }
    }
}

/// Measured value(s) of a reading, tagged by metric type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Measurement {
    Glucose { value: f64 },
    BloodPressure { systolic: f64, diastolic: f64 },
    HeartRate { value: f64 },
    Weight { value: f64 },
    Temperature { value: f64 },
    OxygenSaturation { value: f64 },
    StressLevel { value: f64 },
    Other { value: f64 },
}

impl Measurement {
    pub fn metric_type(&self) -> MetricType {
        match self {
            Measurement::Glucose { .. } => MetricType::Glucose,
            Measurement::BloodPressure { .. } => MetricType::BloodPressure,
            Measurement::HeartRate { .. } => MetricType::HeartRate,
            Measurement::Weight { .. } => MetricType::Weight,
            Measurement::Temperature { .. } => MetricType::Temperature,
            Measurement::OxygenSaturation { .. } => MetricType::OxygenSaturation,
            Measurement::StressLevel { .. } => MetricType::StressLevel,
            Measurement::Other { .. } => MetricType::Other,
        }
    }

    /// Build a measurement of the given type from its primary and secondary values.
    ///
    /// Blood pressure requires both values (systolic, diastolic); every other
    /// metric uses only the primary value.
    pub fn from_parts(
        metric_type: MetricType,
        primary: f64,
        secondary: Option<f64>,
    ) -> Result<Self, EngineError> {
        let measurement = match metric_type {
            MetricType::Glucose => Measurement::Glucose { value: primary },
            MetricType::BloodPressure => Measurement::BloodPressure {
                systolic: primary,
                diastolic: secondary.ok_or_else(|| {
                    EngineError::MissingField("blood_pressure.diastolic".to_string())
                })?,
            },
            MetricType::HeartRate => Measurement::HeartRate { value: primary },
            MetricType::Weight => Measurement::Weight { value: primary },
            MetricType::Temperature => Measurement::Temperature { value: primary },
            MetricType::OxygenSaturation => Measurement::OxygenSaturation { value: primary },
            MetricType::StressLevel => Measurement::StressLevel { value: primary },
            MetricType::Other => Measurement::Other { value: primary },
        };
        Ok(measurement)
    }

    /// Primary value (systolic for blood pressure)
    pub fn primary(&self) -> f64 {
        match *self {
            Measurement::BloodPressure { systolic, .. } => systolic,
            Measurement::Glucose { value }
            | Measurement::HeartRate { value }
            | Measurement::Weight { value }
            | Measurement::Temperature { value }
            | Measurement::OxygenSaturation { value }
            | Measurement::StressLevel { value }
            | Measurement::Other { value } => value,
        }
    }

    /// Secondary value (diastolic for blood pressure, none otherwise)
    pub fn secondary(&self) -> Option<f64> {
        match *self {
            Measurement::BloodPressure { diastolic, .. } => Some(diastolic),
            _ => None,
        }
    }

    /// Every (channel, value) component of this measurement
    pub fn channels(&self) -> Vec<(Channel, f64)> {
        match *self {
            Measurement::BloodPressure {
                systolic,
                diastolic,
            } => vec![(Channel::Systolic, systolic), (Channel::Diastolic, diastolic)],
            _ => vec![(Channel::Value, self.primary())],
        }
    }
}

/// A single timestamped measurement as supplied by the data store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Measured value(s)
    pub measurement: Measurement,
    /// Measurement context, e.g. "fasting" or "postprandial" for glucose
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    /// When the measurement was taken
    pub taken_at: DateTime<Utc>,
    /// Identifier of the record in the upstream store
    pub source_id: String,
}

impl Reading {
    pub fn metric_type(&self) -> MetricType {
        self.measurement.metric_type()
    }
}

/// Clinical status tier, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Normal,
    Warning,
    Critical,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Normal => "normal",
            Status::Warning => "warning",
            Status::Critical => "critical",
        }
    }
}

/// Bucket width chosen from the length of the requested range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
    Week,
    Month,
}

/// Summary statistics of the readings that fell into a bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Number of member readings (0 for filled buckets)
    pub count: usize,
}

impl Aggregate {
    /// Aggregate over a non-empty set of values
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let sum: f64 = values.iter().sum();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            mean: sum / values.len() as f64,
            min,
            max,
            count: values.len(),
        })
    }

    /// Synthetic aggregate for a gap-filled bucket
    pub fn filled(value: f64) -> Self {
        Self {
            mean: value,
            min: value,
            max: value,
            count: 0,
        }
    }
}

/// How a bucket's aggregate came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketFill {
    /// At least one reading fell into the bucket
    Measured,
    /// Linearly interpolated between measured neighbours
    Interpolated,
    /// Last measured value carried into a trailing gap
    CarriedForward,
    /// No data and no fill
    Empty,
}

/// One slot of a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBucket {
    /// First calendar day in the bucket (inclusive)
    pub range_start: NaiveDate,
    /// First calendar day after the bucket (exclusive)
    pub range_end: NaiveDate,
    /// Display label appropriate to the granularity
    pub label: String,
    /// Primary-channel aggregate (systolic for blood pressure)
    pub aggregate: Option<Aggregate>,
    /// Diastolic aggregate for blood pressure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<Aggregate>,
    /// Worst status among member readings; absent for empty or filled buckets
    pub status: Option<Status>,
    pub fill: BucketFill,
}

impl TimeBucket {
    /// Empty bucket covering `[range_start, range_end)`
    pub fn empty(range_start: NaiveDate, range_end: NaiveDate, label: String) -> Self {
        Self {
            range_start,
            range_end,
            label,
            aggregate: None,
            secondary: None,
            status: None,
            fill: BucketFill::Empty,
        }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.range_start && day < self.range_end
    }

    pub fn is_measured(&self) -> bool {
        self.fill == BucketFill::Measured
    }
}

/// A raw reading annotated with its resolved sub-type and status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedReading {
    pub taken_at: DateTime<Utc>,
    /// Sub-type whose reference range was applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    pub primary: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<f64>,
    pub status: Status,
    pub source_id: String,
}

/// Bucketed series for one metric type over one date range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub metric_type: MetricType,
    pub granularity: Granularity,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Whether gap filling was applied
    pub interpolated: bool,
    pub buckets: Vec<TimeBucket>,
    /// In-range readings in chronological order
    pub readings: Vec<ClassifiedReading>,
}

/// Inclusive calendar date range of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, EngineError> {
        if end < start {
            return Err(EngineError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Days from `start` to `end`; a single-day range spans zero days
    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

/// Severity of a report flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSeverity {
    Warning,
    Critical,
    Improvement,
}

/// Machine-generated alert describing a noteworthy condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub severity: FlagSeverity,
    /// Metric the flag concerns; absent for adherence flags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<MetricType>,
    /// Human-readable message
    pub message: String,
    /// `key=value` pairs separated by `;`
    pub detail: String,
}

/// Medication adherence for one regimen over the report period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdherenceSummary {
    pub regimen_id: String,
    pub medication_name: String,
    pub scheduled_doses: u32,
    pub taken_doses: u32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl AdherenceSummary {
    /// Fraction of scheduled doses taken, capped at 1.0
    pub fn rate(&self) -> Option<f64> {
        if self.scheduled_doses == 0 {
            return None;
        }
        Some((self.taken_doses as f64 / self.scheduled_doses as f64).min(1.0))
    }
}

/// Reading counts per status tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub normal: usize,
    pub warning: usize,
    pub critical: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: Status) {
        match status {
            Status::Normal => self.normal += 1,
            Status::Warning => self.warning += 1,
            Status::Critical => self.critical += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.normal + self.warning + self.critical
    }

    /// Share of each tier in percent (all zero when there are no readings)
    pub fn percentages(&self) -> TierPercentages {
        let total = self.total();
        if total == 0 {
            return TierPercentages::default();
        }
        let pct = |n: usize| n as f64 * 100.0 / total as f64;
        TierPercentages {
            normal: pct(self.normal),
            warning: pct(self.warning),
            critical: pct(self.critical),
        }
    }
}

/// Share of readings per status tier, in percent
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TierPercentages {
    pub normal: f64,
    pub warning: f64,
    pub critical: f64,
}

/// Whole-range statistics for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAverages {
    pub unit: String,
    pub reading_count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Diastolic statistics for blood pressure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<Aggregate>,
}

/// Per-regimen adherence line in the report metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimenAdherence {
    pub regimen_id: String,
    pub medication_name: String,
    pub rate: f64,
    pub below_floor: bool,
}

/// Adherence metrics across active regimens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdherenceMetrics {
    /// Mean rate across active regimens, absent when none qualify
    pub mean_rate: Option<f64>,
    pub regimens: Vec<RegimenAdherence>,
}

/// Computed metrics block of a report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportMetrics {
    pub total_readings: usize,
    pub averages: BTreeMap<MetricType, MetricAverages>,
    pub status_counts: BTreeMap<MetricType, StatusCounts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adherence: Option<AdherenceMetrics>,
}

/// Narrative section of a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub title: String,
    pub narrative: String,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_series: Option<Series>,
}

/// Rolled-up findings of a report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub key_findings: Vec<String>,
    pub recommendations: Vec<String>,
    pub flags: Vec<Flag>,
}

/// Structured report consumed by renderers and notifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    pub date_range: DateRange,
    pub sections: Vec<ReportSection>,
    pub summary: ReportSummary,
    pub metrics: ReportMetrics,
}

impl ReportDocument {
    /// Flags of the given severity
    pub fn flags_with(&self, severity: FlagSeverity) -> impl Iterator<Item = &Flag> {
        self.summary
            .flags
            .iter()
            .filter(move |flag| flag.severity == severity)
    }
}

/// Report wrapped with generation provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEnvelope {
    pub report_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub engine_version: String,
    pub report: ReportDocument,
}
