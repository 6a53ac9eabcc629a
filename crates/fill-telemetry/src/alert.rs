//! Operator alerts.
//!
//! Alert transport is external; [`TracingAlertSink`] emits an error-level
//! event tagged `alert = true` for the log pipeline to route.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::error;

use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// Operator wallet below the balance floor.
    LowBalance,
    /// Service stopping.
    Shutdown,
}

impl AlertKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::LowBalance => "low_balance",
            AlertKind::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}

/// Destination for operator alerts.
pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: Alert);
}

/// Emits alerts as tracing events.
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn alert(&self, alert: Alert) {
        Metrics::alert_raised(alert.kind.as_str());
        error!(
            alert = true,
            kind = %alert.kind,
            raised_at = %alert.raised_at.to_rfc3339(),
            "{}",
            alert.message
        );
    }
}

/// Records alerts for assertions.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn count(&self, kind: AlertKind) -> usize {
        self.alerts
            .lock()
            .iter()
            .filter(|alert| alert.kind == kind)
            .count()
    }
}

impl AlertSink for RecordingAlertSink {
    fn alert(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_counts_by_kind() {
        let sink = RecordingAlertSink::new();
        sink.alert(Alert::new(AlertKind::LowBalance, "low"));
        sink.alert(Alert::new(AlertKind::Shutdown, "bye"));
        sink.alert(Alert::new(AlertKind::LowBalance, "still low"));

        assert_eq!(sink.count(AlertKind::LowBalance), 2);
        assert_eq!(sink.count(AlertKind::Shutdown), 1);
        assert_eq!(sink.alerts()[1].message, "bye");
    }
}
