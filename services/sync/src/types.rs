//! Monitor state and check result types

use std::collections::VecDeque;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// How many check results are retained per monitor
pub const HISTORY_CAPACITY: usize = 1000;

/// The reported status of a monitored target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    Pending,
    Up,
    Down,
    Degraded,
    Unknown,
}

impl MonitorStatus {
    /// Derive a status from an HTTP status code: 2xx is up, anything else down
    pub fn from_status_code(code: u16) -> Self {
        if (200..300).contains(&code) {
            MonitorStatus::Up
        } else {
            MonitorStatus::Down
        }
    }
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorStatus::Pending => write!(f, "pending"),
            MonitorStatus::Up => write!(f, "up"),
            MonitorStatus::Down => write!(f, "down"),
            MonitorStatus::Degraded => write!(f, "degraded"),
            MonitorStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// One probe outcome for a monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub timestamp_epoch_ms: u64,
    pub response_time_ms: u64,
    pub status_code: u16,
}

/// Local state for one monitored target
///
/// `id` is assigned client-side when the monitor is created and never reused.
/// `url` is immutable for the lifetime of the record. `history` is newest
/// first and capped at [`HISTORY_CAPACITY`]; the oldest entries are evicted
/// on overflow. `last_update_epoch_ms` records the *arrival* time of the most
/// recent check result, which is what the freshness watchdog compares
/// against, not the event's own timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorState {
    pub id: String,
    pub url: String,
    pub interval_seconds: u64,
    pub status: MonitorStatus,
    pub is_active: bool,
    #[serde(default)]
    pub history: VecDeque<CheckResult>,
    #[serde(default)]
    pub last_update_epoch_ms: Option<u64>,
}

impl MonitorState {
    /// Create a fresh monitor record with empty history
    pub fn new(id: impl Into<String>, url: impl Into<String>, interval_seconds: u64) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            interval_seconds,
            status: MonitorStatus::Pending,
            is_active: true,
            history: VecDeque::new(),
            last_update_epoch_ms: None,
        }
    }

    /// Prepend a check result, evicting the oldest entry at capacity
    pub fn push_check(&mut self, check: CheckResult) {
        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_back();
        }
        self.history.push_front(check);
    }
}

/// Current wall-clock time as milliseconds since the Unix epoch
pub fn current_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(ts: u64) -> CheckResult {
        CheckResult {
            timestamp_epoch_ms: ts,
            response_time_ms: 42,
            status_code: 200,
        }
    }

    #[test]
    fn status_from_2xx_is_up() {
        assert_eq!(MonitorStatus::from_status_code(200), MonitorStatus::Up);
        assert_eq!(MonitorStatus::from_status_code(204), MonitorStatus::Up);
        assert_eq!(MonitorStatus::from_status_code(299), MonitorStatus::Up);
    }

    #[test]
    fn status_from_non_2xx_is_down() {
        assert_eq!(MonitorStatus::from_status_code(199), MonitorStatus::Down);
        assert_eq!(MonitorStatus::from_status_code(301), MonitorStatus::Down);
        assert_eq!(MonitorStatus::from_status_code(404), MonitorStatus::Down);
        assert_eq!(MonitorStatus::from_status_code(500), MonitorStatus::Down);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&MonitorStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[test]
    fn new_monitor_is_pending_and_active() {
        let m = MonitorState::new("m1", "http://a", 30);
        assert_eq!(m.status, MonitorStatus::Pending);
        assert!(m.is_active);
        assert!(m.history.is_empty());
        assert!(m.last_update_epoch_ms.is_none());
    }

    #[test]
    fn push_check_is_newest_first() {
        let mut m = MonitorState::new("m1", "http://a", 30);
        m.push_check(check(1));
        m.push_check(check(2));
        assert_eq!(m.history[0].timestamp_epoch_ms, 2);
        assert_eq!(m.history[1].timestamp_epoch_ms, 1);
    }

    #[test]
    fn history_never_exceeds_capacity_and_keeps_newest() {
        let mut m = MonitorState::new("m1", "http://a", 30);
        for ts in 0..(HISTORY_CAPACITY as u64 + 100) {
            m.push_check(check(ts));
            assert!(m.history.len() <= HISTORY_CAPACITY);
        }
        assert_eq!(m.history.len(), HISTORY_CAPACITY);
        // Newest entry first, and the oldest retained is the 100th
        assert_eq!(m.history[0].timestamp_epoch_ms, HISTORY_CAPACITY as u64 + 99);
        assert_eq!(
            m.history[HISTORY_CAPACITY - 1].timestamp_epoch_ms,
            100
        );
    }

    #[test]
    fn monitor_state_roundtrips_through_json() {
        let mut m = MonitorState::new("m1", "http://a", 30);
        m.push_check(check(1));
        m.last_update_epoch_ms = Some(5000);
        let json = serde_json::to_string(&m).unwrap();
        let back: MonitorState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "m1");
        assert_eq!(back.history.len(), 1);
        assert_eq!(back.last_update_epoch_ms, Some(5000));
    }
}
