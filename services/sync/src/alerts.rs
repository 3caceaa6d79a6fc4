//! Alert notification and throttling
//!
//! Alerts are raised when a check result reports a monitor down or
//! degraded. Delivery goes
//! through the [`Notifier`] trait so tests and alternative channels can plug
//! in; a per-monitor sliding window throttle caps how often one monitor can
//! alert, so a flapping target cannot drown out the rest.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::AlertConfig;
use crate::error::Result;

/// Why an alert was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// A probe reported the target down
    Down,
    /// A probe reported the target degraded
    Degraded,
}

/// One alert, ready for delivery
#[derive(Debug, Clone)]
pub struct Notification {
    pub monitor_id: String,
    pub url: String,
    pub kind: AlertKind,
    pub message: String,
    pub timestamp_epoch_ms: u64,
}

/// Trait for delivering notifications
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Notifier that writes alerts to the log
#[derive(Default, Clone)]
pub struct TracingNotifier;

impl TracingNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        warn!(
            monitor_id = %notification.monitor_id,
            url = %notification.url,
            kind = ?notification.kind,
            "{}",
            notification.message
        );
        Ok(())
    }
}

/// Per-monitor sliding window throttle
///
/// Each monitor gets its own window, so one noisy monitor never suppresses
/// alerts for the others. Windows are pruned lazily on access.
pub struct AlertThrottle {
    window_ms: u64,
    max_per_window: usize,
    sent: HashMap<String, VecDeque<u64>>,
}

impl AlertThrottle {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            window_ms: config.window_seconds * 1000,
            max_per_window: config.max_per_window,
            sent: HashMap::new(),
        }
    }

    /// Decide whether an alert for this monitor may go out now.
    ///
    /// Records the alert timestamp when allowed. Timestamps older than the
    /// window are discarded first, so the decision only sees the last
    /// `window_ms` of history.
    pub fn allow(&mut self, monitor_id: &str, now_ms: u64) -> bool {
        let window_start = now_ms.saturating_sub(self.window_ms);
        let timestamps = self.sent.entry(monitor_id.to_string()).or_default();
        while timestamps.front().is_some_and(|&ts| ts < window_start) {
            timestamps.pop_front();
        }
        if timestamps.len() >= self.max_per_window {
            return false;
        }
        timestamps.push_back(now_ms);
        true
    }

    /// Drop throttle history for a removed monitor
    pub fn forget(&mut self, monitor_id: &str) {
        self.sent.remove(monitor_id);
    }
}

/// Throttled notification front-end used by the reconciler
pub struct Alerter {
    throttle: Mutex<AlertThrottle>,
    notifier: Box<dyn Notifier>,
}

impl Alerter {
    pub fn new(config: &AlertConfig, notifier: Box<dyn Notifier>) -> Self {
        Self {
            throttle: Mutex::new(AlertThrottle::new(config)),
            notifier,
        }
    }

    /// Raise an alert unless the monitor's window is exhausted.
    ///
    /// Returns true if the notification was delivered.
    pub async fn raise(&self, notification: Notification) -> bool {
        let allowed = {
            let mut throttle = match self.throttle.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            throttle.allow(&notification.monitor_id, notification.timestamp_epoch_ms)
        };
        if !allowed {
            debug!(
                monitor_id = %notification.monitor_id,
                "Alert suppressed by throttle"
            );
            return false;
        }
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!("Failed to deliver notification: {}", e);
        }
        true
    }

    /// Drop throttle history for a removed monitor
    pub fn forget(&self, monitor_id: &str) {
        let mut throttle = match self.throttle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        throttle.forget(monitor_id);
    }
}
