//! Observability: structured logging and process-wide metrics
//!
//! Logging is configured once at startup from the environment; metrics are
//! counted in a global collector and logged as a snapshot when a run ends.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{command_span, lifecycle_span, mqtt_span, sweep_span};
