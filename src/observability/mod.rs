//! Observability infrastructure.
//!
//! Provides:
//! - Structured tracing via tracing-subscriber
//! - OpenTelemetry metrics for store operations

pub mod metrics;
pub mod tracing;
