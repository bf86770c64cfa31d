//! Monitoring for the cache framework
//!
//! - Per-cache counters
//! - Prometheus text export
//! - Structured logging with tracing and slow load tracking

pub mod logging;
pub mod metrics;
pub mod prometheus_exporter;

pub use logging::*;
pub use metrics::*;
pub use prometheus_exporter::*;
