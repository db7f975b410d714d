//! Reference range tables
//!
//! This module holds the clinically defined thresholds that partition each
//! metric's value space into normal, warning and critical tiers. Tables are
//! plain data: they are injected into the classifier, can be loaded from and
//! saved to JSON, and may be swapped between calls.

use crate::error::EngineError;
use crate::types::{Channel, MetricType, Status};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Sub-type key used for metrics that have no natural sub-types
pub const DEFAULT_SUB_TYPE: &str = "default";

/// Nested tier bounds for one metric channel.
///
/// A missing bound leaves that side unbounded. Bounds are inclusive toward the
/// more severe tier: a value equal to `warning_high` is already a warning, a
/// value equal to `critical_low` is already critical. Values between the
/// warning bounds are normal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_high: Option<f64>,
}

impl ReferenceRange {
    /// Range whose warning bounds coincide with the normal band edges
    pub fn banded(
        critical_low: Option<f64>,
        normal_min: Option<f64>,
        normal_max: Option<f64>,
        critical_high: Option<f64>,
    ) -> Self {
        Self {
            critical_low,
            warning_low: normal_min,
            normal_min,
            normal_max,
            warning_high: normal_max,
            critical_high,
        }
    }

    /// Classify a finite value, outermost tier first
    pub fn classify(&self, value: f64) -> Status {
        if self.critical_low.is_some_and(|bound| value <= bound)
            || self.critical_high.is_some_and(|bound| value >= bound)
        {
            Status::Critical
        } else if self.warning_low.is_some_and(|bound| value <= bound)
            || self.warning_high.is_some_and(|bound| value >= bound)
        {
            Status::Warning
        } else {
            Status::Normal
        }
    }

    /// Name and value of the bound that put `value` outside the normal tier
    pub fn breached_bound(&self, value: f64) -> Option<(&'static str, f64)> {
        if let Some(bound) = self.critical_high.filter(|bound| value >= *bound) {
            return Some(("critical_high", bound));
        }
        if let Some(bound) = self.critical_low.filter(|bound| value <= *bound) {
            return Some(("critical_low", bound));
        }
        if let Some(bound) = self.warning_high.filter(|bound| value >= *bound) {
            return Some(("warning_high", bound));
        }
        self.warning_low
            .filter(|bound| value <= *bound)
            .map(|bound| ("warning_low", bound))
    }

    /// Signed offset of `value` from the normal band: negative below it,
    /// positive above it, zero inside it.
    ///
    /// Returns `None` when the range declares no normal band at all.
    pub fn deviation_from_normal(&self, value: f64) -> Option<f64> {
        if self.normal_min.is_none() && self.normal_max.is_none() {
            return None;
        }
        if let Some(min) = self.normal_min.filter(|min| value < *min) {
            return Some(value - min);
        }
        if let Some(max) = self.normal_max.filter(|max| value > *max) {
            return Some(value - max);
        }
        Some(0.0)
    }

    /// Distance of `value` from the normal band, zero inside it
    pub fn distance_from_normal(&self, value: f64) -> Option<f64> {
        self.deviation_from_normal(value).map(f64::abs)
    }

    /// Check finiteness and `critical_low <= warning_low <= normal_min <=
    /// normal_max <= warning_high <= critical_high` over the present bounds
    pub fn validate(&self) -> Result<(), String> {
        let ordered = [
            ("critical_low", self.critical_low),
            ("warning_low", self.warning_low),
            ("normal_min", self.normal_min),
            ("normal_max", self.normal_max),
            ("warning_high", self.warning_high),
            ("critical_high", self.critical_high),
        ];

        let mut previous: Option<(&str, f64)> = None;
        for (name, bound) in ordered {
            let Some(bound) = bound else { continue };
            if !bound.is_finite() {
                return Err(format!("{name} is not finite"));
            }
            if let Some((prev_name, prev)) = previous {
                if bound < prev {
                    return Err(format!("{name} ({bound}) is below {prev_name} ({prev})"));
                }
            }
            previous = Some((name, bound));
        }
        Ok(())
    }
}

/// Reference ranges for one metric, keyed by sub-type then channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReference {
    /// Sub-type applied when a reading has none or an unknown one
    pub default_sub_type: String,
    pub sub_types: BTreeMap<String, BTreeMap<Channel, ReferenceRange>>,
}

impl MetricReference {
    pub fn new(default_sub_type: &str) -> Self {
        Self {
            default_sub_type: default_sub_type.to_string(),
            sub_types: BTreeMap::new(),
        }
    }

    /// Add a channel range for a sub-type
    pub fn with_range(mut self, sub_type: &str, channel: Channel, range: ReferenceRange) -> Self {
        self.sub_types
            .entry(sub_type.to_string())
            .or_default()
            .insert(channel, range);
        self
    }
}

/// Read-only mapping from `(metric, sub-type, channel)` to reference range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceTable {
    metrics: BTreeMap<MetricType, MetricReference>,
}

impl Default for ReferenceTable {
    fn default() -> Self {
        Self::clinical_defaults()
    }
}

impl ReferenceTable {
    /// Table without any ranges; every value classifies as normal
    pub fn empty() -> Self {
        Self {
            metrics: BTreeMap::new(),
        }
    }

    /// Adult clinical defaults
    pub fn clinical_defaults() -> Self {
        let glucose = MetricReference::new("fasting")
            .with_range(
                "fasting",
                Channel::Value,
                ReferenceRange::banded(Some(54.0), Some(70.0), Some(100.0), Some(180.0)),
            )
            .with_range(
                "postprandial",
                Channel::Value,
                ReferenceRange::banded(Some(54.0), Some(70.0), Some(140.0), Some(200.0)),
            )
            .with_range(
                "random",
                Channel::Value,
                ReferenceRange::banded(Some(54.0), Some(70.0), Some(140.0), Some(200.0)),
            )
            .with_range(
                "bedtime",
                Channel::Value,
                ReferenceRange::banded(Some(54.0), Some(90.0), Some(150.0), Some(200.0)),
            );

        let blood_pressure = MetricReference::new("resting")
            .with_range(
                "resting",
                Channel::Systolic,
                ReferenceRange::banded(Some(70.0), Some(90.0), Some(130.0), Some(180.0)),
            )
            .with_range(
                "resting",
                Channel::Diastolic,
                ReferenceRange::banded(Some(40.0), Some(60.0), Some(80.0), Some(120.0)),
            );

        let heart_rate = MetricReference::new("resting")
            .with_range(
                "resting",
                Channel::Value,
                ReferenceRange::banded(Some(40.0), Some(50.0), Some(100.0), Some(130.0)),
            )
            .with_range(
                "active",
                Channel::Value,
                ReferenceRange::banded(Some(40.0), Some(50.0), Some(160.0), Some(190.0)),
            );

        let temperature = MetricReference::new(DEFAULT_SUB_TYPE).with_range(
            DEFAULT_SUB_TYPE,
            Channel::Value,
            ReferenceRange::banded(Some(35.0), Some(36.0), Some(37.5), Some(39.0)),
        );

        let oxygen_saturation = MetricReference::new(DEFAULT_SUB_TYPE).with_range(
            DEFAULT_SUB_TYPE,
            Channel::Value,
            ReferenceRange {
                critical_low: Some(90.0),
                warning_low: Some(95.0),
                normal_min: Some(95.0),
                normal_max: Some(100.0),
                warning_high: None,
                critical_high: None,
            },
        );

        let stress_level = MetricReference::new(DEFAULT_SUB_TYPE).with_range(
            DEFAULT_SUB_TYPE,
            Channel::Value,
            ReferenceRange {
                normal_min: Some(0.0),
                normal_max: Some(6.0),
                warning_high: Some(6.0),
                critical_high: Some(8.0),
                ..Default::default()
            },
        );

        let mut metrics = BTreeMap::new();
        metrics.insert(MetricType::Glucose, glucose);
        metrics.insert(MetricType::BloodPressure, blood_pressure);
        metrics.insert(MetricType::HeartRate, heart_rate);
        metrics.insert(MetricType::Temperature, temperature);
        metrics.insert(MetricType::OxygenSaturation, oxygen_saturation);
        metrics.insert(MetricType::StressLevel, stress_level);
        Self { metrics }
    }

    /// Replace the ranges of one metric
    pub fn set_metric(&mut self, metric: MetricType, reference: MetricReference) {
        self.metrics.insert(metric, reference);
    }

    pub fn metric(&self, metric: MetricType) -> Option<&MetricReference> {
        self.metrics.get(&metric)
    }

    pub fn metrics(&self) -> impl Iterator<Item = (&MetricType, &MetricReference)> {
        self.metrics.iter()
    }

    /// Sub-type whose ranges apply to a reading of `metric` tagged `sub_type`.
    ///
    /// Absent or unknown sub-types resolve to the metric's default sub-type.
    /// Returns `None` when the metric has no ranges configured.
    pub fn resolve_sub_type(&self, metric: MetricType, sub_type: Option<&str>) -> Option<&str> {
        let reference = self.metrics.get(&metric)?;
        match sub_type {
            Some(name) if reference.sub_types.contains_key(name) => {
                reference.sub_types.get_key_value(name).map(|(key, _)| key.as_str())
            }
            Some(name) => {
                debug!(
                    metric = %metric,
                    sub_type = name,
                    fallback = %reference.default_sub_type,
                    "Unknown sub-type, using default reference range"
                );
                Some(reference.default_sub_type.as_str())
            }
            None => Some(reference.default_sub_type.as_str()),
        }
    }

    /// Range for a metric channel after sub-type resolution
    pub fn lookup(
        &self,
        metric: MetricType,
        sub_type: Option<&str>,
        channel: Channel,
    ) -> Option<&ReferenceRange> {
        let resolved = self.resolve_sub_type(metric, sub_type)?;
        self.metrics
            .get(&metric)?
            .sub_types
            .get(resolved)?
            .get(&channel)
    }

    /// Validate every range and default sub-type reference
    pub fn validate(&self) -> Result<(), EngineError> {
        for (metric, reference) in &self.metrics {
            if !reference.sub_types.contains_key(&reference.default_sub_type) {
                return Err(EngineError::InvalidReference(format!(
                    "{metric}: default sub-type '{}' has no ranges",
                    reference.default_sub_type
                )));
            }
            for (sub_type, channels) in &reference.sub_types {
                for (channel, range) in channels {
                    range.validate().map_err(|reason| {
                        EngineError::InvalidReference(format!(
                            "{metric}/{sub_type}/{}: {reason}",
                            channel.as_str()
                        ))
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Load and validate a table from JSON
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let table: Self = serde_json::from_str(json)?;
        table.validate()?;
        Ok(table)
    }

    /// Serialize the table to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
