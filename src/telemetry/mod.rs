//! Telemetry for the offload pipeline.
//!
//! Stage latencies and device traffic counters, with JSON and log export.
//! Human-readable logging goes through `tracing`.

pub mod export;
pub mod metrics;

pub use export::{JsonExporter, LogExporter, MetricsExporter};
pub use metrics::{Metrics, MetricsSnapshot, Stage};
