//! Error types for Healthtrack

use chrono::NaiveDate;
use thiserror::Error;

/// Errors that can occur while classifying, aggregating or reporting
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid date range: end {end} is before start {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("Unsupported metric type: {0}")]
    UnsupportedMetricType(String),

    #[error("Invalid reference range: {0}")]
    InvalidReference(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}
