//! Unified health.reading.v1 schema
//!
//! This module defines the flat input rows produced by reading store exports
//! and the adapter that turns them into typed readings.

mod adapter;
mod reading_record;

pub use adapter::*;
pub use reading_record::*;
