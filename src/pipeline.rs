//! Pipeline orchestration
//!
//! This module provides the public API for Healthtrack. It wires the
//! classifier, series aggregator and report synthesizer together and takes
//! readings from request structs, reading sources or raw JSON rows.

use crate::aggregator::SeriesAggregator;
use crate::classifier::MetricClassifier;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::reference::ReferenceTable;
use crate::schema::{ReadingAdapter, ReadingRecord};
use crate::source::ReadingSource;
use crate::synthesizer::{ReportInputs, ReportSynthesizer};
use crate::types::{
    AdherenceSummary, ClassifiedReading, DateRange, MetricType, Reading, ReportDocument,
    ReportEnvelope, Series,
};
use crate::ENGINE_VERSION;
use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Report request over typed readings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    /// First day of the report (inclusive)
    pub start: NaiveDate,
    /// Last day of the report (inclusive)
    pub end: NaiveDate,
    #[serde(default)]
    pub readings: Vec<Reading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adherence: Option<Vec<AdherenceSummary>>,
    /// Metrics to report; every metric present in `readings` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<MetricType>>,
}

impl ReportRequest {
    pub fn new(start: NaiveDate, end: NaiveDate, readings: Vec<Reading>) -> Self {
        Self {
            subject_id: None,
            start,
            end,
            readings,
            adherence: None,
            metrics: None,
        }
    }

    /// Metrics this request reports on, in report order
    pub fn requested_metrics(&self) -> BTreeSet<MetricType> {
        match &self.metrics {
            Some(metrics) => metrics.iter().copied().collect(),
            None => self.readings.iter().map(Reading::metric_type).collect(),
        }
    }
}

/// Report request as received over JSON boundaries, with flat reading rows
#[derive(Debug, Clone, Deserialize)]
pub struct ReportRequestJson {
    #[serde(default)]
    pub subject_id: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub readings: Vec<ReadingRecord>,
    #[serde(default)]
    pub adherence: Option<Vec<AdherenceSummary>>,
    #[serde(default)]
    pub metrics: Option<Vec<String>>,
}

impl TryFrom<ReportRequestJson> for ReportRequest {
    type Error = EngineError;

    fn try_from(raw: ReportRequestJson) -> Result<Self, Self::Error> {
        let metrics = raw
            .metrics
            .map(|names| {
                names
                    .iter()
                    .map(|name| MetricType::from_str(name))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        Ok(Self {
            subject_id: raw.subject_id,
            start: raw.start,
            end: raw.end,
            readings: ReadingAdapter::to_readings(raw.readings)?,
            adherence: raw.adherence,
            metrics,
        })
    }
}

/// Series request as received over JSON boundaries
#[derive(Debug, Clone, Deserialize)]
pub struct SeriesRequestJson {
    pub metric_type: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub readings: Vec<ReadingRecord>,
}

/// Stateful engine holding the configuration between calls.
///
/// Use this when reference ranges or thresholds are loaded once and many
/// reports are generated against them.
#[derive(Debug, Clone)]
pub struct ReportEngine {
    config: EngineConfig,
    aggregator: SeriesAggregator,
    synthesizer: ReportSynthesizer,
}

impl Default for ReportEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEngine {
    /// Engine with clinical default ranges and thresholds
    pub fn new() -> Self {
        let config = EngineConfig::default();
        let classifier = MetricClassifier::new(config.references.clone());
        Self {
            aggregator: SeriesAggregator::new(classifier.clone())
                .with_interpolation(config.interpolation.clone()),
            synthesizer: ReportSynthesizer::new(classifier, config.thresholds.clone()),
            config,
        }
    }

    /// Engine with a validated custom configuration
    pub fn with_config(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let classifier = MetricClassifier::with_shared(Arc::new(config.references.clone()));
        let aggregator = SeriesAggregator::new(classifier.clone())
            .with_interpolation(config.interpolation.clone())
            .with_utc_offset_minutes(config.utc_offset_minutes)?;
        let synthesizer = ReportSynthesizer::new(classifier, config.thresholds.clone());

        Ok(Self {
            config,
            aggregator,
            synthesizer,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the reference table from JSON; the engine is unchanged on error
    pub fn load_references(&mut self, json: &str) -> Result<(), EngineError> {
        let references = ReferenceTable::from_json(json)?;
        let config = EngineConfig {
            references,
            ..self.config.clone()
        };
        *self = Self::with_config(config)?;
        info!("Reference table reloaded");
        Ok(())
    }

    /// Save the active reference table to JSON
    pub fn save_references(&self) -> Result<String, EngineError> {
        Ok(self.config.references.to_json()?)
    }

    /// Classify a single reading against the active table
    pub fn classify(&self, reading: &Reading) -> Result<ClassifiedReading, EngineError> {
        self.aggregator.classifier().classify_reading(reading)
    }

    /// Build the series of one metric over `[start, end]`
    pub fn build_series(
        &self,
        readings: &[Reading],
        metric: MetricType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Series, EngineError> {
        self.aggregator.build_series(readings, metric, start, end)
    }

    /// Generate a report.
    ///
    /// Fails only on an invalid date range. A metric whose series cannot be
    /// built is left out and noted as skipped in the report.
    pub fn generate_report(&self, request: &ReportRequest) -> Result<ReportDocument, EngineError> {
        let date_range = DateRange::new(request.start, request.end)?;
        let metrics = request.requested_metrics();
        info!(
            subject = request.subject_id.as_deref().unwrap_or("-"),
            start = %request.start,
            end = %request.end,
            readings = request.readings.len(),
            metrics = metrics.len(),
            "Generating report"
        );

        let mut inputs = ReportInputs::new(date_range);
        inputs.subject_id = request.subject_id.clone();
        inputs.adherence = request.adherence.clone();

        for metric in metrics {
            match self
                .aggregator
                .build_series(&request.readings, metric, request.start, request.end)
            {
                Ok(series) => {
                    inputs.series_by_metric.insert(metric, series);
                }
                Err(e) => {
                    warn!(metric = %metric, error = %e, "Skipping metric");
                    inputs.skipped.insert(metric, e.to_string());
                }
            }
        }

        self.synthesizer.synthesize(&inputs)
    }

    /// Generate a report wrapped with an id and generation time
    pub fn generate_envelope(
        &self,
        request: &ReportRequest,
    ) -> Result<ReportEnvelope, EngineError> {
        let report = self.generate_report(request)?;
        Ok(ReportEnvelope {
            report_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            engine_version: ENGINE_VERSION.to_string(),
            report,
        })
    }

    /// Fetch every metric of `subject_id` from `source` and report on it
    pub fn generate_from_source(
        &self,
        source: &dyn ReadingSource,
        subject_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        adherence: Option<Vec<AdherenceSummary>>,
    ) -> Result<ReportDocument, EngineError> {
        DateRange::new(start, end)?;
        let window_start = self.local_midnight(start)?;
        let after_end = end
            .checked_add_days(Days::new(1))
            .ok_or_else(|| EngineError::InvalidInput(format!("date out of range after {end}")))?;
        let window_end = self.local_midnight(after_end)?;

        let metrics = source.metric_types(subject_id)?;
        let mut readings = Vec::new();
        for metric in &metrics {
            let fetched = source.fetch_readings(subject_id, *metric, window_start, window_end)?;
            debug!(metric = %metric, readings = fetched.len(), "Fetched readings");
            readings.extend(fetched);
        }

        let request = ReportRequest {
            subject_id: Some(subject_id.to_string()),
            start,
            end,
            readings,
            adherence,
            metrics: Some(metrics),
        };
        self.generate_report(&request)
    }

    /// Generate a report from a JSON request with flat reading rows
    pub fn generate_report_json(&self, request_json: &str) -> Result<String, EngineError> {
        let raw: ReportRequestJson = serde_json::from_str(request_json)?;
        let request = ReportRequest::try_from(raw)?;
        let report = self.generate_report(&request)?;
        serde_json::to_string(&report).map_err(EngineError::JsonError)
    }

    /// Build a series from a JSON request with flat reading rows
    pub fn build_series_json(&self, request_json: &str) -> Result<String, EngineError> {
        let raw: SeriesRequestJson = serde_json::from_str(request_json)?;
        let metric = MetricType::from_str(&raw.metric_type)?;
        let readings = ReadingAdapter::to_readings(raw.readings)?;
        let series = self.build_series(&readings, metric, raw.start, raw.end)?;
        serde_json::to_string(&series).map_err(EngineError::JsonError)
    }

    /// Start of `day` in the configured calendar, as a UTC instant
    fn local_midnight(&self, day: NaiveDate) -> Result<DateTime<Utc>, EngineError> {
        let offset = FixedOffset::east_opt(self.config.utc_offset_minutes * 60).ok_or_else(|| {
            EngineError::InvalidInput(format!(
                "UTC offset out of range: {} minutes",
                self.config.utc_offset_minutes
            ))
        })?;
        day.and_time(NaiveTime::MIN)
            .and_local_timezone(offset)
            .single()
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| EngineError::InvalidInput(format!("no local midnight on {day}")))
    }
}

/// Convert raw reading rows (JSON array or NDJSON) into a report.
///
/// # Arguments
/// * `raw_json` - health.reading.v1 rows
/// * `start` - First report day, `YYYY-MM-DD`
/// * `end` - Last report day, `YYYY-MM-DD`
///
/// # Example
/// ```ignore
/// let report_json = readings_to_report_json(
///     rows,
///     "2024-03-01".to_string(),
///     "2024-03-31".to_string(),
/// )?;
/// ```
pub fn readings_to_report_json(
    raw_json: String,
    start: String,
    end: String,
) -> Result<String, EngineError> {
    let readings = ReadingAdapter::to_readings(ReadingAdapter::parse_auto(&raw_json)?)?;
    let request = ReportRequest::new(parse_date(&start)?, parse_date(&end)?, readings);
    let report = ReportEngine::new().generate_report(&request)?;
    serde_json::to_string_pretty(&report).map_err(EngineError::JsonError)
}

/// Convert raw reading rows into the chart series of one metric.
///
/// # Arguments
/// * `raw_json` - health.reading.v1 rows
/// * `metric` - Metric name, e.g. "weight"
/// * `start` - First day, `YYYY-MM-DD`
/// * `end` - Last day, `YYYY-MM-DD`
pub fn readings_to_series_json(
    raw_json: String,
    metric: String,
    start: String,
    end: String,
) -> Result<String, EngineError> {
    let metric = MetricType::from_str(&metric)?;
    let readings = ReadingAdapter::to_readings(ReadingAdapter::parse_auto(&raw_json)?)?;
    let (start, end) = (parse_date(&start)?, parse_date(&end)?);
    let series = ReportEngine::new().build_series(&readings, metric, start, end)?;
    serde_json::to_string_pretty(&series).map_err(EngineError::JsonError)
}

/// Parse a `YYYY-MM-DD` calendar date
pub fn parse_date(value: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| EngineError::ParseError(format!("invalid date '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemoryReadingSource;
    use crate::types::{BucketFill, FlagSeverity, Measurement, Status};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn make_reading(measurement: Measurement, day: u32, hour: u32) -> Reading {
        Reading {
            measurement,
            sub_type: None,
            taken_at: Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap(),
            source_id: format!("{}-{day}-{hour}", measurement.metric_type()),
        }
    }

    fn sample_readings() -> Vec<Reading> {
        let mut readings: Vec<Reading> = (1..=10)
            .map(|day| {
                let value = if day % 2 == 1 { 95.0 } else { 145.0 };
                make_reading(Measurement::Glucose { value }, day, 8)
            })
            .collect();
        readings.push(make_reading(Measurement::Weight { value: 70.0 }, 1, 7));
        readings.push(make_reading(Measurement::Weight { value: 74.0 }, 5, 7));
        readings
    }

    fn sample_ndjson() -> &'static str {
        r#"{"metric_type":"glucose","value":95.0,"taken_at":"2024-03-01T08:00:00Z","source_id":"g-1"}
{"metric_type":"glucose","value":145.0,"taken_at":"2024-03-02T08:00:00Z","source_id":"g-2"}
{"metric_type":"glucose","value":95.0,"taken_at":"2024-03-03T08:00:00Z","source_id":"g-3"}
{"metric_type":"glucose","value":145.0,"taken_at":"2024-03-04T08:00:00Z","source_id":"g-4"}
{"metric_type":"weight","value":70.0,"taken_at":"2024-03-01T07:00:00Z","source_id":"w-1"}
{"metric_type":"weight","value":74.0,"taken_at":"2024-03-05T07:00:00Z","source_id":"w-2"}"#
    }

    #[test]
    fn test_generate_report() {
        let engine = ReportEngine::new();
        let request = ReportRequest::new(date(2024, 3, 1), date(2024, 3, 10), sample_readings());
        let report = engine.generate_report(&request).unwrap();

        let titles: Vec<&str> = report.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Overview", "Blood glucose", "Weight"]);
        assert_eq!(report.metrics.total_readings, 12);
        assert_eq!(report.metrics.status_counts[&MetricType::Glucose].total(), 10);
        assert!(report
            .flags_with(FlagSeverity::Warning)
            .any(|f| f.metric == Some(MetricType::Glucose)));

        let weight = report.sections[2].chart_series.as_ref().unwrap();
        assert!(weight.interpolated);
        assert_eq!(weight.buckets[2].fill, BucketFill::Interpolated);
    }

    #[test]
    fn test_explicit_metrics_limit_report() {
        let engine = ReportEngine::new();
        let mut request =
            ReportRequest::new(date(2024, 3, 1), date(2024, 3, 10), sample_readings());
        request.metrics = Some(vec![MetricType::Weight, MetricType::HeartRate]);
        let report = engine.generate_report(&request).unwrap();

        let titles: Vec<&str> = report.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Overview", "Heart rate", "Weight"]);
        assert_eq!(report.metrics.total_readings, 2);
    }

    #[test]
    fn test_failing_metric_is_skipped() {
        let engine = ReportEngine::new();
        let mut readings = sample_readings();
        readings.push(make_reading(Measurement::HeartRate { value: f64::NAN }, 2, 9));
        let request = ReportRequest::new(date(2024, 3, 1), date(2024, 3, 10), readings);

        let report = engine.generate_report(&request).unwrap();
        assert!(report.sections.iter().all(|s| s.title != "Heart rate"));
        assert!(report.sections[0].narrative.contains("Heart rate skipped"));
        assert!(report
            .summary
            .key_findings
            .iter()
            .any(|f| f.starts_with("Heart rate was skipped")));
    }

    #[test]
    fn test_inverted_range_fails() {
        let engine = ReportEngine::new();
        let request = ReportRequest::new(date(2024, 3, 10), date(2024, 3, 1), sample_readings());
        assert!(matches!(
            engine.generate_report(&request),
            Err(EngineError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_report_is_deterministic_and_envelope_wraps_it() {
        let engine = ReportEngine::new();
        let request = ReportRequest::new(date(2024, 3, 1), date(2024, 3, 10), sample_readings());

        let report = engine.generate_report(&request).unwrap();
        let first = engine.generate_envelope(&request).unwrap();
        let second = engine.generate_envelope(&request).unwrap();

        assert_eq!(first.report, report);
        assert_eq!(second.report, report);
        assert_ne!(first.report_id, second.report_id);
        assert_eq!(first.engine_version, ENGINE_VERSION);
    }

    #[test]
    fn test_load_references() {
        let mut engine = ReportEngine::new();
        let reading = make_reading(Measurement::Weight { value: 95.0 }, 1, 7);
        assert_eq!(engine.classify(&reading).unwrap().status, Status::Normal);

        let table = r#"{"weight": {"default_sub_type": "default", "sub_types": {
            "default": {"value": {"normal_min": 50.0, "normal_max": 80.0, "warning_low": 50.0,
                                  "warning_high": 80.0, "critical_high": 110.0}}}}}"#;
        engine.load_references(table).unwrap();
        assert_eq!(engine.classify(&reading).unwrap().status, Status::Warning);

        // glucose ranges are gone from the loaded table
        let glucose = make_reading(Measurement::Glucose { value: 300.0 }, 1, 8);
        assert_eq!(engine.classify(&glucose).unwrap().status, Status::Normal);
    }

    #[test]
    fn test_invalid_references_leave_engine_unchanged() {
        let mut engine = ReportEngine::new();
        let before = engine.save_references().unwrap();

        let result = engine.load_references(
            r#"{"weight": {"default_sub_type": "missing", "sub_types": {}}}"#,
        );
        assert!(matches!(result, Err(EngineError::InvalidReference(_))));
        assert_eq!(engine.save_references().unwrap(), before);
    }

    #[test]
    fn test_references_round_trip() {
        let engine = ReportEngine::new();
        let saved = engine.save_references().unwrap();

        let mut restored = ReportEngine::new();
        restored.load_references(&saved).unwrap();
        assert_eq!(restored.config().references, engine.config().references);
    }

    #[test]
    fn test_generate_from_source() {
        let source = InMemoryReadingSource::for_subject("alice", sample_readings());
        let engine = ReportEngine::new();

        let report = engine
            .generate_from_source(&source, "alice", date(2024, 3, 1), date(2024, 3, 4), None)
            .unwrap();
        assert_eq!(report.subject_id.as_deref(), Some("alice"));
        // glucose on days 1-4 and the weight reading on day 1
        assert_eq!(report.metrics.total_readings, 5);
    }

    #[test]
    fn test_utc_offset_moves_source_window() {
        let config = EngineConfig {
            utc_offset_minutes: -600,
            ..EngineConfig::default()
        };
        let engine = ReportEngine::with_config(config).unwrap();
        let readings = vec![make_reading(Measurement::HeartRate { value: 64.0 }, 2, 5)];
        let source = InMemoryReadingSource::for_subject("bob", readings);

        // 2024-03-02T05:00Z is still March 1st at UTC-10
        let report = engine
            .generate_from_source(&source, "bob", date(2024, 3, 1), date(2024, 3, 1), None)
            .unwrap();
        assert_eq!(report.metrics.total_readings, 1);
    }

    #[test]
    fn test_generate_report_json() {
        let request = r#"{
            "subject_id": "alice",
            "start": "2024-03-01",
            "end": "2024-03-07",
            "readings": [
                {"metric_type": "blood_pressure", "systolic": 150.0, "diastolic": 95.0,
                 "taken_at": "2024-03-02T07:00:00Z", "source_id": "bp-1"}
            ],
            "adherence": [
                {"regimen_id": "r1", "medication_name": "Amlodipine", "scheduled_doses": 7, "taken_doses": 7}
            ]
        }"#;
        let json = ReportEngine::new().generate_report_json(request).unwrap();
        let report: ReportDocument = serde_json::from_str(&json).unwrap();

        assert_eq!(report.subject_id.as_deref(), Some("alice"));
        assert_eq!(report.metrics.adherence.unwrap().mean_rate, Some(1.0));
        assert_eq!(report.sections.last().unwrap().title, "Medication adherence");
    }

    #[test]
    fn test_unknown_metric_in_json_request() {
        let request = r#"{"start": "2024-03-01", "end": "2024-03-07", "metrics": ["cholesterol"]}"#;
        assert!(matches!(
            ReportEngine::new().generate_report_json(request),
            Err(EngineError::UnsupportedMetricType(_))
        ));
    }

    #[test]
    fn test_readings_to_report_json() {
        let json = readings_to_report_json(
            sample_ndjson().to_string(),
            "2024-03-01".to_string(),
            "2024-03-07".to_string(),
        )
        .unwrap();

        let report: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(report["metrics"]["total_readings"], 6);
        assert_eq!(report["sections"][1]["title"], "Blood glucose");
        assert_eq!(report["metrics"]["status_counts"]["glucose"]["warning"], 2);
    }

    #[test]
    fn test_readings_to_series_json() {
        let json = readings_to_series_json(
            sample_ndjson().to_string(),
            "weight".to_string(),
            "2024-03-01".to_string(),
            "2024-03-07".to_string(),
        )
        .unwrap();

        let series: Series = serde_json::from_str(&json).unwrap();
        assert_eq!(series.buckets.len(), 7);
        assert_eq!(series.buckets[2].aggregate.unwrap().mean, 72.0);
        assert_eq!(series.buckets[6].fill, BucketFill::CarriedForward);
    }

    #[test]
    fn test_invalid_date_argument() {
        let result = readings_to_report_json(
            sample_ndjson().to_string(),
            "03/01/2024".to_string(),
            "2024-03-07".to_string(),
        );
        assert!(matches!(result, Err(EngineError::ParseError(_))));
    }

    #[test]
    fn test_invalid_json() {
        let result = readings_to_report_json(
            "[not valid json".to_string(),
            "2024-03-01".to_string(),
            "2024-03-07".to_string(),
        );
        assert!(result.is_err());
    }
}
