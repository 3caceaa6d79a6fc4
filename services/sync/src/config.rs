//! Configuration types for the sync service

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sync service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Account id stamped into every outbound command
    #[serde(default = "default_user_id")]
    pub user_id: u64,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    /// Optional HTTP fallback endpoint for one-shot checks
    #[serde(default)]
    pub fallback: Option<FallbackConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            watchdog: WatchdogConfig::default(),
            alerts: AlertConfig::default(),
            fallback: None,
        }
    }
}

fn default_user_id() -> u64 {
    1
}

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Configuration for automatic reconnection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Enable automatic reconnection when connection is lost
    #[serde(default = "default_reconnect_enabled")]
    pub enabled: bool,
    /// Interval between reconnection attempts in seconds
    #[serde(default = "default_reconnect_interval")]
    pub interval_seconds: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: default_reconnect_enabled(),
            interval_seconds: default_reconnect_interval(),
        }
    }
}

fn default_reconnect_enabled() -> bool {
    true
}

fn default_reconnect_interval() -> u64 {
    3
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connection_timeout_seconds: default_connection_timeout(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_connection_timeout() -> u64 {
    10
}

/// Local persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the JSON state file
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("uplert-sync-state.json")
}

/// Freshness watchdog settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// How often the sweep runs, in seconds
    #[serde(default = "default_watchdog_tick")]
    pub tick_seconds: u64,
    /// A monitor is stale once silent for `interval * stale_factor`
    #[serde(default = "default_stale_factor")]
    pub stale_factor: f64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_watchdog_tick(),
            stale_factor: default_stale_factor(),
        }
    }
}

fn default_watchdog_tick() -> u64 {
    1
}

fn default_stale_factor() -> f64 {
    1.5
}

/// Alert throttle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Sliding window length in seconds
    #[serde(default = "default_alert_window")]
    pub window_seconds: u64,
    /// Maximum alerts per monitor within one window
    #[serde(default = "default_alert_max")]
    pub max_per_window: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_alert_window(),
            max_per_window: default_alert_max(),
        }
    }
}

fn default_alert_window() -> u64 {
    120
}

fn default_alert_max() -> usize {
    2
}

/// HTTP fallback endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Base URL of the fallback checker, e.g. `http://localhost:9090`
    pub base_url: String,
    #[serde(default = "default_fallback_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_fallback_timeout() -> u64 {
    30
}

/// Load configuration from a JSON file
pub fn load_config(path: &PathBuf) -> std::result::Result<Config, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 8080);
        assert!(config.server.reconnect.enabled);
        assert_eq!(config.server.reconnect.interval_seconds, 3);
        assert_eq!(config.watchdog.tick_seconds, 1);
        assert_eq!(config.watchdog.stale_factor, 1.5);
        assert_eq!(config.alerts.window_seconds, 120);
        assert_eq!(config.alerts.max_per_window, 2);
        assert!(config.fallback.is_none());
    }

    #[test]
    fn empty_json_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.store.state_path, PathBuf::from("uplert-sync-state.json"));
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let json = r#"{"server":{"port":9000},"alerts":{"max_per_window":5}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.alerts.max_per_window, 5);
        assert_eq!(config.alerts.window_seconds, 120);
    }

    #[test]
    fn fallback_section_parses() {
        let json = r#"{"fallback":{"base_url":"http://localhost:9090"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let fallback = config.fallback.unwrap();
        assert_eq!(fallback.base_url, "http://localhost:9090");
        assert_eq!(fallback.request_timeout_seconds, 30);
    }
}
