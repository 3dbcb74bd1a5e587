//! Prometheus metrics for the Kafka Topic Operator
//!
//! This module exposes metrics for monitoring operator health and
//! performance: reconciliation counters and, when enabled, per-call timers
//! around every external request.

pub mod prometheus;

pub use prometheus::*;
