//! Engine configuration
//!
//! Everything the engine needs besides the readings themselves: reference
//! ranges, report thresholds, the gap-filling policy and the calendar offset
//! used to assign readings to days. Partial JSON documents are accepted; any
//! field left out takes its default.

use crate::aggregator::InterpolationPolicy;
use crate::error::EngineError;
use crate::reference::ReferenceTable;
use crate::types::MetricType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Thresholds driving flag and finding rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportThresholds {
    /// Minimum change in distance from the normal band, in metric units,
    /// that counts as a trend
    pub improvement: BTreeMap<MetricType, f64>,
    /// Per-regimen adherence rate below which a regimen is flagged
    pub regimen_adherence_floor: f64,
    /// Mean adherence rate below which the aggregate is flagged
    pub overall_adherence_floor: f64,
    /// Readings a sub-type group needs before trends are evaluated
    pub trend_min_readings: usize,
    /// Share of warning-tier readings that produces a finding
    pub warning_share: f64,
}

impl Default for ReportThresholds {
    fn default() -> Self {
        let improvement = BTreeMap::from([
            (MetricType::Glucose, 10.0),
            (MetricType::BloodPressure, 5.0),
            (MetricType::HeartRate, 5.0),
            (MetricType::Weight, 1.0),
            (MetricType::Temperature, 0.3),
            (MetricType::OxygenSaturation, 1.0),
            (MetricType::StressLevel, 1.0),
        ]);

        Self {
            improvement,
            regimen_adherence_floor: 0.70,
            overall_adherence_floor: 0.80,
            trend_min_readings: 4,
            warning_share: 0.25,
        }
    }
}

impl ReportThresholds {
    /// Improvement threshold for a metric, `None` when trends are not tracked
    pub fn improvement_for(&self, metric: MetricType) -> Option<f64> {
        self.improvement.get(&metric).copied()
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        for (metric, threshold) in &self.improvement {
            if !threshold.is_finite() || *threshold < 0.0 {
                return Err(EngineError::InvalidInput(format!(
                    "improvement threshold for {metric} must be a non-negative number"
                )));
            }
        }
        for (name, floor) in [
            ("regimen_adherence_floor", self.regimen_adherence_floor),
            ("overall_adherence_floor", self.overall_adherence_floor),
            ("warning_share", self.warning_share),
        ] {
            if !(0.0..=1.0).contains(&floor) {
                return Err(EngineError::InvalidInput(format!(
                    "{name} must be within 0.0..=1.0, got {floor}"
                )));
            }
        }
        if self.trend_min_readings < 2 {
            return Err(EngineError::InvalidInput(
                "trend_min_readings must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub references: ReferenceTable,
    pub thresholds: ReportThresholds,
    pub interpolation: InterpolationPolicy,
    /// Offset from UTC, in minutes, of the calendar used for day bucketing
    pub utc_offset_minutes: i32,
}

impl EngineConfig {
    /// Parse and validate a configuration document
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.references.validate()?;
        self.thresholds.validate()?;
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(EngineError::InvalidInput(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        Ok(())
    }
}
