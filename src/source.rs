//! Reading sources
//!
//! The engine never talks to a database. Callers hand it readings directly or
//! through a [`ReadingSource`], which answers range queries for one subject and
//! one metric at a time.

use crate::error::EngineError;
use crate::types::{MetricType, Reading};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Upstream provider of readings
pub trait ReadingSource {
    /// Readings of `metric_type` for `subject_id` taken within `[start, end)`
    fn fetch_readings(
        &self,
        subject_id: &str,
        metric_type: MetricType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>, EngineError>;

    /// Metric types with at least one reading for `subject_id`
    fn metric_types(&self, _subject_id: &str) -> Result<Vec<MetricType>, EngineError> {
        Ok(MetricType::ALL.to_vec())
    }
}

/// Source backed by readings held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryReadingSource {
    readings: BTreeMap<String, Vec<Reading>>,
}

impl InMemoryReadingSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source holding `readings` for a single subject
    pub fn for_subject(subject_id: &str, readings: Vec<Reading>) -> Self {
        let mut source = Self::new();
        source.insert(subject_id, readings);
        source
    }

    pub fn insert(&mut self, subject_id: &str, readings: Vec<Reading>) {
        self.readings
            .entry(subject_id.to_string())
            .or_default()
            .extend(readings);
    }

    pub fn len(&self) -> usize {
        self.readings.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReadingSource for InMemoryReadingSource {
    fn fetch_readings(
        &self,
        subject_id: &str,
        metric_type: MetricType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>, EngineError> {
        let Some(readings) = self.readings.get(subject_id) else {
            return Ok(Vec::new());
        };
        Ok(readings
            .iter()
            .filter(|r| r.metric_type() == metric_type)
            .filter(|r| r.taken_at >= start && r.taken_at < end)
            .cloned()
            .collect())
    }

    fn metric_types(&self, subject_id: &str) -> Result<Vec<MetricType>, EngineError> {
        let mut metrics: Vec<MetricType> = self
            .readings
            .get(subject_id)
            .map(|readings| readings.iter().map(Reading::metric_type).collect())
            .unwrap_or_default();
        metrics.sort();
        metrics.dedup();
        Ok(metrics)
    }
}
