//! Error types for the sync client

/// Errors that can occur while synchronizing with the monitoring backend
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Not connected to monitoring backend")]
    NotConnected,

    #[error("No session established yet")]
    NoSession,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Failed to send message: {0}")]
    SendError(String),

    #[error("Invalid monitor: {0}")]
    InvalidMonitor(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
