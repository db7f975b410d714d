//! Adapter for converting health.reading.v1 rows into readings

use crate::error::EngineError;
use crate::schema::reading_record::{ReadingRecord, ValidationError};
use crate::types::Reading;
use serde::Serialize;
use tracing::debug;

/// Adapter for parsing and converting reading rows
pub struct ReadingAdapter;

impl ReadingAdapter {
    /// Parse a JSON string containing an array of rows
    pub fn parse_array(json: &str) -> Result<Vec<ReadingRecord>, EngineError> {
        let records: Vec<ReadingRecord> = serde_json::from_str(json)?;
        Ok(records)
    }

    /// Parse NDJSON (one row per line, blank lines ignored)
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<ReadingRecord>, EngineError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record = serde_json::from_str::<ReadingRecord>(trimmed).map_err(|e| {
                EngineError::ParseError(format!("Failed to parse line {}: {}", line_num + 1, e))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Parse either a JSON array or NDJSON, judged by the first non-blank character
    pub fn parse_auto(input: &str) -> Result<Vec<ReadingRecord>, EngineError> {
        if input.trim_start().starts_with('[') {
            Self::parse_array(input)
        } else {
            Self::parse_ndjson(input)
        }
    }

    /// Convert rows into readings, failing on the first invalid row
    pub fn to_readings(records: Vec<ReadingRecord>) -> Result<Vec<Reading>, EngineError> {
        let count = records.len();
        let readings = records
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                Reading::try_from(record).map_err(|e| {
                    debug!(index, error = %e, "Rejected reading record");
                    e
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(records = count, "Converted reading records");
        Ok(readings)
    }

    /// Validate a batch of rows, returning only the failures
    pub fn validate_records(records: &[ReadingRecord]) -> Vec<ValidationResult> {
        records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| {
                record.validate().err().map(|error| ValidationResult {
                    index,
                    source_id: record.source_id.clone(),
                    error: error.to_string(),
                    kind: error,
                })
            })
            .collect()
    }
}

/// Failed validation of one row
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub index: usize,
    pub source_id: String,
    pub error: String,
    #[serde(skip)]
    pub kind: ValidationError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Measurement, MetricType};

    const NDJSON: &str = r#"{"metric_type":"glucose","value":95.0,"taken_at":"2024-03-01T08:00:00Z","source_id":"g-1"}

{"metric_type":"blood_pressure","systolic":124.0,"diastolic":82.0,"taken_at":"2024-03-01T08:05:00Z","source_id":"bp-1"}
{"metric_type":"weight","value":171.0,"unit":"lb","taken_at":"2024-03-01T07:00:00Z","source_id":"w-1"}"#;

    #[test]
    fn test_parse_ndjson() {
        let records = ReadingAdapter::parse_ndjson(NDJSON).unwrap();
        assert_eq!(records.len(), 3);

        let readings = ReadingAdapter::to_readings(records).unwrap();
        assert_eq!(readings[0].metric_type(), MetricType::Glucose);
        assert_eq!(
            readings[1].measurement,
            Measurement::BloodPressure {
                systolic: 124.0,
                diastolic: 82.0
            }
        );
        assert!((readings[2].measurement.primary() - 77.56429527).abs() < 1e-6);
    }

    #[test]
    fn test_parse_ndjson_reports_line() {
        let input = "{\"metric_type\":\"glucose\",\"value\":95.0,\"taken_at\":\"2024-03-01T08:00:00Z\",\"source_id\":\"g-1\"}\nnot json";
        match ReadingAdapter::parse_ndjson(input) {
            Err(EngineError::ParseError(message)) => assert!(message.contains("line 2")),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_auto_detects_array() {
        let array = r#"[{"metric_type":"heart_rate","value":64.0,"taken_at":"2024-03-01T08:00:00Z","source_id":"hr-1"}]"#;
        assert_eq!(ReadingAdapter::parse_auto(array).unwrap().len(), 1);
        assert_eq!(ReadingAdapter::parse_auto(NDJSON).unwrap().len(), 3);
        assert!(ReadingAdapter::parse_auto("").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_metric_propagates() {
        let records = ReadingAdapter::parse_array(
            r#"[{"metric_type":"cholesterol","value":180.0,"taken_at":"2024-03-01T08:00:00Z","source_id":"c-1"}]"#,
        )
        .unwrap();
        assert!(matches!(
            ReadingAdapter::to_readings(records),
            Err(EngineError::UnsupportedMetricType(_))
        ));
    }

    #[test]
    fn test_validate_records() {
        let records = ReadingAdapter::parse_array(
            r#"[
                {"metric_type":"glucose","value":95.0,"taken_at":"2024-03-01T08:00:00Z","source_id":"ok"},
                {"metric_type":"blood_pressure","systolic":120.0,"taken_at":"2024-03-01T08:00:00Z","source_id":"no-dia"}
            ]"#,
        )
        .unwrap();

        let failures = ReadingAdapter::validate_records(&records);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 1);
        assert_eq!(failures[0].source_id, "no-dia");
        assert_eq!(failures[0].kind, ValidationError::MissingValue("diastolic".to_string()));
    }
}
