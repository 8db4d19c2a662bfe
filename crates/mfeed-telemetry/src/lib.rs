//! Prometheus metrics and structured logging for mfeed.
//!
//! - Structured logging with tracing (JSON in production, pretty otherwise)
//! - Prometheus metrics mirroring the realtime counters
//! - `PrometheusCounters`: a counter sink that feeds both

pub mod counters;
pub mod error;
pub mod logging;
pub mod metrics;

pub use counters::PrometheusCounters;
pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::{gather_text, Metrics};
