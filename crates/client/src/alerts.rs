//! User-facing alerts raised when a notification arrives.
//!
//! Raising an alert never blocks: the sink either logs it or hands it to
//! whatever UI drains the channel.

use bazaar_shared::Severity;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};

/// A toast-style alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub severity: Severity,
    pub title: String,
    pub message: String,
}

pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: Alert);
}

/// Writes alerts to the log at a level matching their severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerts;

impl AlertSink for LogAlerts {
    fn alert(&self, alert: Alert) {
        match alert.severity {
            Severity::Error => tracing::error!("{}: {}", alert.title, alert.message),
            Severity::Warning => tracing::warn!("{}: {}", alert.title, alert.message),
            Severity::Success | Severity::Info => {
                tracing::info!("{}: {}", alert.title, alert.message)
            }
        }
    }
}

/// Queues alerts for a UI to drain.
#[derive(Debug, Clone)]
pub struct ChannelAlerts {
    sender: UnboundedSender<Alert>,
}

impl ChannelAlerts {
    pub fn channel() -> (Self, UnboundedReceiver<Alert>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }
}

impl AlertSink for ChannelAlerts {
    fn alert(&self, alert: Alert) {
        if self.sender.unbounded_send(alert).is_err() {
            tracing::debug!("Alert receiver gone, dropping alert");
        }
    }
}
