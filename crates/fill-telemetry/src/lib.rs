//! Prometheus metrics, structured logging and operator alerts.

pub mod alert;
pub mod error;
pub mod logging;
pub mod metrics;

pub use alert::{Alert, AlertKind, AlertSink, RecordingAlertSink, TracingAlertSink};
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, DEFAULT_FILTER};
pub use metrics::Metrics;
