//! Sync client facade over the backend connection

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::connection::{
    install_connection, spawn_reconnect_task, ConnectionConfig, Inbound, PhaseEvent,
    SharedConnectionState,
};
use crate::error::Result;
use crate::io::{ConnectionFactory, TcpConnectionFactory};
use crate::protocol::{Command, CommandAction, WebsitePayload};

/// Client for the backend's realtime monitoring channel
///
/// Owns the connection lifecycle (connect, session resume, reconnect) and
/// the optimistic command path. State reconciliation lives in
/// [`crate::sync::SyncEngine`], which consumes this client's inbound stream.
pub struct SyncClient {
    config: ServerConfig,
    shared: SharedConnectionState,
    reconnect_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    connection_factory: Arc<dyn ConnectionFactory>,
}

impl SyncClient {
    /// Create a client that dials the backend over TCP
    pub fn new(config: ServerConfig) -> Self {
        Self::with_connection_factory(config, Arc::new(TcpConnectionFactory::new()))
    }

    /// Create a client over an injected transport; tests script the
    /// factory instead of opening sockets
    pub fn with_connection_factory(
        config: ServerConfig,
        connection_factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        let auto_reconnect_enabled = config.reconnect.enabled;
        Self {
            config,
            shared: SharedConnectionState::with_factory(
                auto_reconnect_enabled,
                connection_factory.clone(),
            ),
            reconnect_handle: tokio::sync::Mutex::new(None),
            connection_factory,
        }
    }

    fn get_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.config.host.clone(),
            port: self.config.port,
            connection_timeout_seconds: self.config.connection_timeout_seconds,
            reconnect: self.config.reconnect.clone(),
        }
    }

    /// Seed the session id from persisted state, before the first connect.
    ///
    /// With a seeded session the first connection sends a resume frame
    /// instead of waiting for a fresh assignment.
    pub async fn seed_session(&self, session_id: Option<String>) {
        self.shared.set_session_id(session_id).await;
    }

    /// Connect to the backend
    ///
    /// On failure with auto-reconnect enabled, the retry loop takes over and
    /// this returns `Ok`; the caller observes progress through the inbound
    /// stream. With auto-reconnect disabled the error is returned directly.
    pub async fn connect(&self) -> Result<()> {
        // Stop any ongoing reconnection attempt
        self.shared.stop_reconnect.notify_waiters();
        {
            let mut handle = self.reconnect_handle.lock().await;
            if let Some(h) = handle.take() {
                h.abort();
            }
        }

        let config = self.get_connection_config();
        debug!("Connecting to backend at {}", config.addr());
        self.shared.transition(PhaseEvent::DialStarted).await;

        let timeout_duration =
            std::time::Duration::from_secs(self.config.connection_timeout_seconds);

        match self
            .connection_factory
            .connect(&config.addr(), timeout_duration)
            .await
        {
            Ok(pair) => {
                install_connection(pair, config, self.shared.clone()).await;
                debug!("Sync client connected and reader task started");
                Ok(())
            }
            Err(e) if self.shared.is_auto_reconnect_enabled() => {
                warn!("Initial connection failed, entering retry loop: {}", e);
                let task = spawn_reconnect_task(config, self.shared.clone());
                let mut handle = self.reconnect_handle.lock().await;
                *handle = Some(task);
                Ok(())
            }
            Err(e) => {
                self.shared
                    .transition(PhaseEvent::Lost { retry: false })
                    .await;
                Err(e)
            }
        }
    }

    /// Tear the connection down deliberately.
    ///
    /// Stops the retry loop and keeps auto-reconnect off until the next
    /// `connect()`. The session id survives so a later connect can resume
    /// it.
    pub async fn disconnect(&self) -> Result<()> {
        debug!("Disconnecting from backend");

        self.shared.set_auto_reconnect_enabled(false);
        self.shared.stop_reconnect.notify_waiters();
        self.shared.transition(PhaseEvent::ShutdownRequested).await;
        {
            let mut handle = self.reconnect_handle.lock().await;
            if let Some(h) = handle.take() {
                h.abort();
            }
        }

        // Abort the reader task
        {
            let mut handle = self.shared.reader_handle.lock().await;
            if let Some(h) = handle.take() {
                h.abort();
            }
        }

        // Close the writer
        {
            let mut writer = self.shared.writer.lock().await;
            if let Some(mut w) = writer.take() {
                let _ = w.shutdown().await;
            }
        }

        // The session id survives so a later connect can resume it
        self.shared.transition(PhaseEvent::Closed).await;

        debug!("Disconnected from backend");
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.is_connected().await
    }

    /// True while the retry loop is between the old connection and a new one
    pub async fn is_reconnecting(&self) -> bool {
        self.shared.is_reconnecting().await
    }

    /// The current session id, if one was assigned or seeded
    pub async fn session_id(&self) -> Option<String> {
        self.shared.session_id().await
    }

    /// Number of commands waiting for a session or connection
    pub async fn pending_command_count(&self) -> usize {
        self.shared.pending_commands.lock().await.len()
    }

    /// Subscribe to the inbound message stream
    pub fn subscribe(&self) -> broadcast::Receiver<Inbound> {
        self.shared.inbound_sender.subscribe()
    }

    // ========================================================================
    // Command issuance
    // ========================================================================

    /// Issue a command for a monitor.
    ///
    /// Optimistic: the command is sent if a session and connection exist,
    /// queued for in-order replay otherwise. The returned error tells the
    /// caller the command is riding the queue, not that it was lost.
    pub async fn issue(&self, action: CommandAction, website: WebsitePayload) -> Result<()> {
        self.shared.send_command(Command::new(action, website)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectConfig;
    use crate::error::SyncError;

    fn config() -> ServerConfig {
        ServerConfig {
            reconnect: ReconnectConfig {
                enabled: false,
                interval_seconds: 3,
            },
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn issue_without_session_queues_and_reports() {
        let client = SyncClient::new(config());
        let website = WebsitePayload {
            project_id: "m1".to_string(),
            url: "http://a".to_string(),
            interval: 30,
            user_id: 1,
        };
        let result = client.issue(CommandAction::Start, website).await;
        assert!(matches!(result, Err(SyncError::NoSession)));
        assert_eq!(client.pending_command_count().await, 1);
    }

    #[tokio::test]
    async fn seeded_session_is_visible() {
        let client = SyncClient::new(config());
        client.seed_session(Some("S1".to_string())).await;
        assert_eq!(client.session_id().await.as_deref(), Some("S1"));
    }

    #[tokio::test]
    async fn disconnect_preserves_session_id() {
        let client = SyncClient::new(config());
        client.seed_session(Some("S1".to_string())).await;
        client.disconnect().await.unwrap();
        assert_eq!(client.session_id().await.as_deref(), Some("S1"));
        assert!(!client.is_connected().await);
    }
}
