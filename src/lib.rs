//! Healthtrack - Aggregation, classification and reporting engine for family health measurements
//!
//! Healthtrack turns irregularly sampled health readings into clinical status
//! tiers, chart-ready time series and structured report documents through a
//! deterministic pipeline: classification → bucket planning → aggregation and
//! gap filling → rule-based report synthesis.
//!
//! ## Modules
//!
//! - **Classification**: reference tables and per-reading status tiers
//! - **Series**: adaptive time buckets, aggregation and interpolation
//! - **Reports**: findings, recommendations, flags and adherence

pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod planner;
pub mod reference;
pub mod schema;
pub mod source;
pub mod synthesizer;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use aggregator::{InterpolationPolicy, SeriesAggregator};
pub use classifier::MetricClassifier;
pub use config::{EngineConfig, ReportThresholds};
pub use error::EngineError;
pub use pipeline::{readings_to_report_json, readings_to_series_json, ReportEngine, ReportRequest};
pub use planner::TimeBucketPlanner;
pub use reference::ReferenceTable;
pub use source::{InMemoryReadingSource, ReadingSource};
pub use synthesizer::{ReportInputs, ReportSynthesizer};

// Schema exports
pub use schema::{ReadingAdapter, ReadingRecord, SCHEMA_VERSION};

/// Engine version recorded in report envelopes
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI and FFI
pub const PRODUCER_NAME: &str = "healthtrack-core";
