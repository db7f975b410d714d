//! health.reading.v1 schema definition
//!
//! One flat row per measurement, as exported by the reading store. Blood
//! pressure rows carry `systolic` and `diastolic`; every other metric carries
//! `value`. Values may be given in any supported unit and are converted to the
//! metric's canonical unit on conversion to [`Reading`].

use crate::error::EngineError;
use crate::types::{Measurement, MetricType, Reading};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Current schema version
pub const SCHEMA_VERSION: &str = "health.reading.v1";

const MG_DL_PER_MMOL_L: f64 = 18.0182;
const KG_PER_LB: f64 = 0.453_592_37;

/// Flat reading row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingRecord {
    /// Schema version; absent rows are treated as the current version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    /// Metric name, e.g. "glucose" or "blood_pressure"
    pub metric_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub systolic: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diastolic: Option<f64>,
    /// Unit of the value; the metric's canonical unit when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub taken_at: DateTime<Utc>,
    pub source_id: String,
}

impl ReadingRecord {
    /// Row for a single-valued metric
    pub fn single(
        metric: MetricType,
        value: f64,
        taken_at: DateTime<Utc>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            schema_version: Some(SCHEMA_VERSION.to_string()),
            metric_type: metric.as_str().to_string(),
            sub_type: None,
            value: Some(value),
            systolic: None,
            diastolic: None,
            unit: None,
            taken_at,
            source_id: source_id.into(),
        }
    }

    /// Blood pressure row
    pub fn blood_pressure(
        systolic: f64,
        diastolic: f64,
        taken_at: DateTime<Utc>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            value: None,
            systolic: Some(systolic),
            diastolic: Some(diastolic),
            ..Self::single(MetricType::BloodPressure, 0.0, taken_at, source_id)
        }
    }

    pub fn with_sub_type(mut self, sub_type: impl Into<String>) -> Self {
        self.sub_type = Some(sub_type.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Check the row without converting it
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(version) = &self.schema_version {
            if version != SCHEMA_VERSION {
                return Err(ValidationError::InvalidSchemaVersion {
                    expected: SCHEMA_VERSION.to_string(),
                    actual: version.clone(),
                });
            }
        }

        let metric = MetricType::from_str(&self.metric_type)
            .map_err(|_| ValidationError::UnknownMetric(self.metric_type.clone()))?;

        let fields = match metric {
            MetricType::BloodPressure => {
                vec![("systolic", self.systolic), ("diastolic", self.diastolic)]
            }
            _ => vec![("value", self.value)],
        };
        for (name, value) in fields {
            match value {
                None => return Err(ValidationError::MissingValue(name.to_string())),
                Some(v) if !v.is_finite() => {
                    return Err(ValidationError::NonFiniteValue(name.to_string()))
                }
                Some(_) => {}
            }
        }

        if let Some(unit) = &self.unit {
            if conversion_factor(metric, unit).is_none() {
                return Err(ValidationError::UnsupportedUnit {
                    metric: metric.as_str().to_string(),
                    unit: unit.clone(),
                });
            }
        }
        Ok(())
    }
}

impl TryFrom<ReadingRecord> for Reading {
    type Error = EngineError;

    fn try_from(record: ReadingRecord) -> Result<Self, Self::Error> {
        if let Some(version) = &record.schema_version {
            if version != SCHEMA_VERSION {
                return Err(EngineError::ParseError(format!(
                    "unsupported schema version {version}, expected {SCHEMA_VERSION}"
                )));
            }
        }

        let metric = MetricType::from_str(&record.metric_type)?;
        let unit = record.unit.as_deref();
        let measurement = match metric {
            MetricType::BloodPressure => {
                let systolic = required(record.systolic, "blood_pressure.systolic")?;
                let diastolic = required(record.diastolic, "blood_pressure.diastolic")?;
                Measurement::BloodPressure {
                    systolic: to_canonical(metric, unit, systolic)?,
                    diastolic: to_canonical(metric, unit, diastolic)?,
                }
            }
            _ => {
                let value = required(record.value, &format!("{metric}.value"))?;
                Measurement::from_parts(metric, to_canonical(metric, unit, value)?, None)?
            }
        };

        Ok(Reading {
            measurement,
            sub_type: record.sub_type.filter(|s| !s.trim().is_empty()),
            taken_at: record.taken_at,
            source_id: record.source_id,
        })
    }
}

fn required(value: Option<f64>, field: &str) -> Result<f64, EngineError> {
    let value = value.ok_or_else(|| EngineError::MissingField(field.to_string()))?;
    if !value.is_finite() {
        return Err(EngineError::InvalidInput(format!(
            "{field} is not a finite number: {value}"
        )));
    }
    Ok(value)
}

/// Convert a value given in `unit` to the canonical unit of `metric`
fn to_canonical(metric: MetricType, unit: Option<&str>, value: f64) -> Result<f64, EngineError> {
    let Some(unit) = unit else { return Ok(value) };
    let conversion = conversion_factor(metric, unit).ok_or_else(|| {
        EngineError::InvalidInput(format!("unsupported unit '{unit}' for {metric}"))
    })?;
    Ok(conversion(value))
}

fn conversion_factor(metric: MetricType, unit: &str) -> Option<fn(f64) -> f64> {
    let unit = unit.trim().to_ascii_lowercase();
    let identity: fn(f64) -> f64 = |v| v;
    match (metric, unit.as_str()) {
        (MetricType::Glucose, "mg/dl") => Some(identity),
        (MetricType::Glucose, "mmol/l") => Some(|v| v * MG_DL_PER_MMOL_L),
        (MetricType::BloodPressure, "mmhg") => Some(identity),
        (MetricType::HeartRate, "bpm") => Some(identity),
        (MetricType::Weight, "kg") => Some(identity),
        (MetricType::Weight, "lb" | "lbs") => Some(|v| v * KG_PER_LB),
        (MetricType::Temperature, "c" | "°c" | "celsius") => Some(identity),
        (MetricType::Temperature, "f" | "°f" | "fahrenheit") => Some(|v| (v - 32.0) * 5.0 / 9.0),
        (MetricType::OxygenSaturation, "%" | "percent") => Some(identity),
        (MetricType::StressLevel, "score") => Some(identity),
        (MetricType::Other, _) => Some(identity),
        _ => None,
    }
}

/// Validation errors for reading rows
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid schema version: expected {expected}, got {actual}")]
    InvalidSchemaVersion { expected: String, actual: String },

    #[error("Unknown metric type: {0}")]
    UnknownMetric(String),

    #[error("Missing value: {0}")]
    MissingValue(String),

    #[error("Value is not a finite number: {0}")]
    NonFiniteValue(String),

    #[error("Unsupported unit '{unit}' for {metric}")]
    UnsupportedUnit { metric: String, unit: String },
}
