//! Metric classification
//!
//! Maps raw measurement values to a status tier using an injected reference
//! table. Composite measurements (blood pressure) are classified per channel
//! and report the most severe channel status.

use crate::error::EngineError;
use crate::reference::ReferenceTable;
use crate::types::{Channel, ClassifiedReading, Measurement, MetricType, Reading, Status};
use std::sync::Arc;

/// Classifier over a shared, read-only reference table
#[derive(Debug, Clone)]
pub struct MetricClassifier {
    references: Arc<ReferenceTable>,
}

impl Default for MetricClassifier {
    fn default() -> Self {
        Self::new(ReferenceTable::default())
    }
}

impl MetricClassifier {
    pub fn new(references: ReferenceTable) -> Self {
        Self {
            references: Arc::new(references),
        }
    }

    /// Classifier sharing an existing table
    pub fn with_shared(references: Arc<ReferenceTable>) -> Self {
        Self { references }
    }

    pub fn references(&self) -> &ReferenceTable {
        &self.references
    }

    /// Classify a measurement of `metric_type` taken under `sub_type`.
    ///
    /// Fails with `InvalidInput` when any component is non-finite or when the
    /// measurement does not belong to `metric_type`.
    pub fn classify(
        &self,
        metric_type: MetricType,
        sub_type: Option<&str>,
        measurement: &Measurement,
    ) -> Result<Status, EngineError> {
        if measurement.metric_type() != metric_type {
            return Err(EngineError::InvalidInput(format!(
                "{} measurement classified as {metric_type}",
                measurement.metric_type()
            )));
        }

        measurement
            .channels()
            .into_iter()
            .map(|(channel, value)| self.classify_value(metric_type, sub_type, channel, value))
            .try_fold(Status::Normal, |worst, status| Ok(worst.max(status?)))
    }

    /// Classify a single channel value
    pub fn classify_value(
        &self,
        metric_type: MetricType,
        sub_type: Option<&str>,
        channel: Channel,
        value: f64,
    ) -> Result<Status, EngineError> {
        if !value.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "{metric_type}.{} is not a finite number: {value}",
                channel.as_str()
            )));
        }

        let status = self
            .references
            .lookup(metric_type, sub_type, channel)
            .map(|range| range.classify(value))
            .unwrap_or(Status::Normal);
        Ok(status)
    }

    /// Classify a reading and annotate it with the sub-type that was applied
    pub fn classify_reading(&self, reading: &Reading) -> Result<ClassifiedReading, EngineError> {
        let metric_type = reading.metric_type();
        let status = self.classify(metric_type, reading.sub_type.as_deref(), &reading.measurement)?;
        let sub_type = self
            .references
            .resolve_sub_type(metric_type, reading.sub_type.as_deref())
            .map(str::to_string)
            .or_else(|| reading.sub_type.clone());

        Ok(ClassifiedReading {
            taken_at: reading.taken_at,
            sub_type,
            primary: reading.measurement.primary(),
            secondary: reading.measurement.secondary(),
            status,
            source_id: reading.source_id.clone(),
        })
    }
}
