//! Alerting for human-required re-authorization
//!
//! Only clients configured as live emit alerts, and only when a fallback to
//! interactive authorization is triggered by a missing or rejected refresh
//! token.

use tracing::error;

/// Receiver of operator alerts.
pub trait AlertSink: Send + Sync {
    fn notify(&self, message: &str);
}

/// Default sink: emits the alert as an `error` level tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn notify(&self, message: &str) {
        error!(alert = true, "{message}");
    }
}
