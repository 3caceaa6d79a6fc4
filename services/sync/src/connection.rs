//! Connection management for the backend sync client
//!
//! This module handles TCP connection establishment, session assignment and
//! resumption, reconnection logic, and message reading from the backend.
//! The connection lifecycle itself is a pure phase machine ([`next_phase`]),
//! kept separate from the transport so it can be tested without I/O.
//!
//! Commands issued while no session exists are queued and replayed, in
//! issue order, once the server assigns or resumes a session.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;
use crate::error::{Result, SyncError};
#[cfg(test)]
use crate::io::TcpConnectionFactory;
use crate::io::{ConnectionFactory, LineReader, MessageWriter};
use crate::protocol::{CheckEvent, Command, RunningMonitor, ServerMessage, SessionFrame};

/// Lifecycle phase of the backend connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Lifecycle events that drive phase transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// A dial attempt (or retry loop) started
    DialStarted,
    /// The transport came up
    Established,
    /// The transport dropped; `retry` says whether the retry loop takes over
    Lost { retry: bool },
    /// A deliberate shutdown began
    ShutdownRequested,
    /// Shutdown finished, transport released
    Closed,
}

/// Pure phase transition function.
///
/// Events that make no sense in the current phase leave it unchanged, so a
/// late `Lost` after a deliberate shutdown cannot resurrect the connection.
pub fn next_phase(phase: ConnectionPhase, event: PhaseEvent) -> ConnectionPhase {
    use ConnectionPhase::*;
    use PhaseEvent::*;
    match (phase, event) {
        (Disconnected, DialStarted) => Connecting,
        (Connecting, Established) => Open,
        (Connecting, Lost { retry: true }) => Connecting,
        (Connecting, Lost { retry: false }) => Disconnected,
        (Connecting, ShutdownRequested) => Disconnected,
        (Open, Lost { retry: true }) => Connecting,
        (Open, Lost { retry: false }) => Disconnected,
        (Open, ShutdownRequested) => Closing,
        (Closing, Closed) => Disconnected,
        (current, _) => current,
    }
}

/// Message forwarded from the reader task to the reconciliation layer
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A new connection started reading; a snapshot must follow before
    /// any check event from this connection is trusted
    Connected,
    /// The server assigned or confirmed a session id
    SessionEstablished { session_id: String },
    /// The server's authoritative list of running monitors
    Snapshot(Vec<RunningMonitor>),
    /// A pushed probe outcome
    Check(CheckEvent),
    /// The connection dropped; reconnection may already be underway
    ConnectionLost { reason: String },
}

/// Internal connection state
#[derive(Debug, Clone, Default)]
pub(crate) struct ConnectionState {
    pub phase: ConnectionPhase,
    pub session_id: Option<String>,
}

/// State shared between the client facade, the reader task, and the
/// retry loop: phase and session, the live writer, the pending command
/// queue, and the inbound broadcast channel.
#[derive(Clone)]
pub(crate) struct SharedConnectionState {
    pub state: Arc<RwLock<ConnectionState>>,
    pub writer: Arc<Mutex<Option<Box<dyn MessageWriter>>>>,
    pub pending_commands: Arc<Mutex<VecDeque<Command>>>,
    pub inbound_sender: broadcast::Sender<Inbound>,
    pub reader_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
    pub auto_reconnect_enabled: Arc<AtomicBool>,
    pub stop_reconnect: Arc<Notify>,
    pub connection_factory: Arc<dyn ConnectionFactory>,
}

impl SharedConnectionState {
    #[cfg(test)]
    pub fn new(auto_reconnect_enabled: bool) -> Self {
        Self::with_factory(
            auto_reconnect_enabled,
            Arc::new(TcpConnectionFactory::new()),
        )
    }

    pub fn with_factory(
        auto_reconnect_enabled: bool,
        connection_factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        let (inbound_sender, _) = broadcast::channel(1024);
        Self {
            state: Arc::new(RwLock::new(ConnectionState::default())),
            writer: Arc::new(Mutex::new(None)),
            pending_commands: Arc::new(Mutex::new(VecDeque::new())),
            inbound_sender,
            reader_handle: Arc::new(Mutex::new(None)),
            auto_reconnect_enabled: Arc::new(AtomicBool::new(auto_reconnect_enabled)),
            stop_reconnect: Arc::new(Notify::new()),
            connection_factory,
        }
    }

    /// Apply a lifecycle event to the phase machine
    pub async fn transition(&self, event: PhaseEvent) -> ConnectionPhase {
        let mut state = self.state.write().await;
        let from = state.phase;
        state.phase = next_phase(from, event);
        if state.phase != from {
            debug!("Connection phase {:?} -> {:?} on {:?}", from, state.phase, event);
        }
        state.phase
    }

    /// Current lifecycle phase
    pub async fn phase(&self) -> ConnectionPhase {
        self.state.read().await.phase
    }

    pub async fn is_connected(&self) -> bool {
        self.phase().await == ConnectionPhase::Open
    }

    pub async fn is_reconnecting(&self) -> bool {
        self.phase().await == ConnectionPhase::Connecting
    }

    /// Current session id, if one was ever assigned
    pub async fn session_id(&self) -> Option<String> {
        self.state.read().await.session_id.clone()
    }

    /// Seed the session id from persisted state before the first connect
    pub async fn set_session_id(&self, id: Option<String>) {
        self.state.write().await.session_id = id;
    }

    pub fn is_auto_reconnect_enabled(&self) -> bool {
        self.auto_reconnect_enabled.load(Ordering::SeqCst)
    }

    /// Flip auto-reconnect; disabling also wakes a sleeping retry loop
    pub fn set_auto_reconnect_enabled(&self, enabled: bool) {
        debug!("Setting auto-reconnect enabled: {}", enabled);
        self.auto_reconnect_enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.stop_reconnect.notify_waiters();
        }
    }

    /// Send a command, stamping it with the current session id.
    ///
    /// Without a session, or without a live connection, the command is
    /// queued for replay and the caller gets the corresponding error so it
    /// can report the degraded state. Queued commands are not lost.
    pub async fn send_command(&self, mut command: Command) -> Result<()> {
        let session_id = self.session_id().await;
        match session_id {
            None => {
                debug!("No session yet, queueing {:?} command", command.action);
                self.pending_commands.lock().await.push_back(command);
                Err(SyncError::NoSession)
            }
            Some(id) => {
                command.session_id = Some(id);
                let mut writer_guard = self.writer.lock().await;
                match writer_guard.as_mut() {
                    None => {
                        drop(writer_guard);
                        debug!("Not connected, queueing {:?} command", command.action);
                        command.session_id = None;
                        self.pending_commands.lock().await.push_back(command);
                        Err(SyncError::NotConnected)
                    }
                    Some(writer) => {
                        let json = serde_json::to_string(&command)?;
                        writer.write_message(&json).await
                    }
                }
            }
        }
    }

    /// Replay queued commands in issue order, stamped with the session id.
    ///
    /// A command that fails to send goes back to the front of the queue for
    /// the next connection.
    pub async fn drain_pending(&self) {
        let session_id = match self.session_id().await {
            Some(id) => id,
            None => return,
        };
        loop {
            let next = self.pending_commands.lock().await.pop_front();
            let mut command = match next {
                Some(command) => command,
                None => break,
            };
            command.session_id = Some(session_id.clone());
            let json = match serde_json::to_string(&command) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Dropping unserializable queued command: {}", e);
                    continue;
                }
            };
            let mut writer_guard = self.writer.lock().await;
            let sent = match writer_guard.as_mut() {
                Some(writer) => writer.write_message(&json).await,
                None => Err(SyncError::NotConnected),
            };
            drop(writer_guard);
            if let Err(e) = sent {
                debug!("Replay interrupted, re-queueing command: {}", e);
                command.session_id = None;
                self.pending_commands.lock().await.push_front(command);
                break;
            }
            debug!("Replayed queued {:?} command", command.action);
        }
    }
}

/// Configuration for connection attempts
#[derive(Clone)]
pub(crate) struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub connection_timeout_seconds: u64,
    pub reconnect: ReconnectConfig,
}

impl ConnectionConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Install a freshly established connection: store the writer, send the
/// resume frame if a session is known, mark the phase open, and start
/// reading.
pub(crate) async fn install_connection(
    pair: crate::io::ConnectionPair,
    config: ConnectionConfig,
    shared: SharedConnectionState,
) {
    {
        let mut writer_guard = shared.writer.lock().await;
        *writer_guard = Some(pair.writer);
    }

    // Resuming: identify ourselves before the server assigns a new session
    if let Some(session_id) = shared.session_id().await {
        let frame = SessionFrame {
            session_id: session_id.clone(),
        };
        let resumed = {
            let mut writer_guard = shared.writer.lock().await;
            match writer_guard.as_mut() {
                Some(writer) => match serde_json::to_string(&frame) {
                    Ok(json) => writer.write_message(&json).await,
                    Err(e) => Err(SyncError::Json(e)),
                },
                None => Err(SyncError::NotConnected),
            }
        };
        match resumed {
            Ok(()) => info!("Resumed session {}", session_id),
            Err(e) => warn!("Failed to send session resume frame: {}", e),
        }
    }

    shared.transition(PhaseEvent::Established).await;

    let reader_handle = spawn_reader_task(pair.reader, config, shared.clone());
    {
        let mut handle = shared.reader_handle.lock().await;
        *handle = Some(reader_handle);
    }

    // With a resumed session the queue can drain immediately; with a fresh
    // one it drains when the assignment frame arrives.
    shared.drain_pending().await;
}

/// Spawn the retry loop: redial at a fixed interval, without bound, until
/// a connection lands or reconnection is stopped.
pub(crate) fn spawn_reconnect_task(
    config: ConnectionConfig,
    shared: SharedConnectionState,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        shared.transition(PhaseEvent::DialStarted).await;

        let addr = config.addr();
        let interval = std::time::Duration::from_secs(config.reconnect.interval_seconds);
        let timeout_duration = std::time::Duration::from_secs(config.connection_timeout_seconds);
        let mut attempt = 0u64;

        loop {
            attempt += 1;

            if !shared.auto_reconnect_enabled.load(Ordering::SeqCst) {
                debug!("Auto-reconnect disabled, stopping reconnection attempts");
                break;
            }

            info!("Attempting to reconnect to backend (attempt {})", attempt);

            // First attempt dials immediately, later ones wait out the interval
            if attempt > 1 {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shared.stop_reconnect.notified() => {
                        debug!("Reconnection stopped");
                        break;
                    }
                }
            }

            debug!("Attempting connection to {}", addr);
            match shared
                .connection_factory
                .connect(&addr, timeout_duration)
                .await
            {
                Ok(pair) => {
                    info!("Successfully reconnected to backend");
                    install_connection(pair, config.clone(), shared.clone()).await;
                    return;
                }
                Err(e) => {
                    debug!("Connection attempt {} failed: {}", attempt, e);
                }
            }
        }

        // Reconnection stopped without a connection
        shared.transition(PhaseEvent::Lost { retry: false }).await;
    })
}

/// Spawn the reader task: parse inbound frames, fan them out on the
/// broadcast channel, and kick off the retry loop when the stream drops.
pub(crate) fn spawn_reader_task(
    mut reader: Box<dyn LineReader>,
    config: ConnectionConfig,
    shared: SharedConnectionState,
) -> tokio::task::JoinHandle<()> {
    let reconnect_handle = Arc::new(Mutex::new(None));

    tokio::spawn(async move {
        let _ = shared.inbound_sender.send(Inbound::Connected);

        let disconnect_reason;

        loop {
            match reader.read_line().await {
                Ok(None) => {
                    debug!("Backend connection closed");
                    disconnect_reason = "Connection closed by remote".to_string();
                    break;
                }
                Ok(Some(line)) => {
                    if line.is_empty() {
                        continue;
                    }

                    debug!("Received from backend: {}", line);

                    match serde_json::from_str::<ServerMessage>(&line) {
                        Ok(ServerMessage::Session(frame)) => {
                            info!("Session established: {}", frame.session_id);
                            {
                                let mut state_guard = shared.state.write().await;
                                state_guard.session_id = Some(frame.session_id.clone());
                            }
                            let _ = shared.inbound_sender.send(Inbound::SessionEstablished {
                                session_id: frame.session_id,
                            });
                            shared.drain_pending().await;
                        }
                        Ok(ServerMessage::Snapshot(entries)) => {
                            debug!("Run snapshot with {} entries", entries.len());
                            let _ = shared.inbound_sender.send(Inbound::Snapshot(entries));
                        }
                        Ok(ServerMessage::Check(event)) => {
                            let _ = shared.inbound_sender.send(Inbound::Check(event));
                        }
                        Err(e) => {
                            debug!("Failed to parse backend message: {} ({})", line, e);
                        }
                    }
                }
                Err(e) => {
                    debug!("Error reading from backend: {}", e);
                    disconnect_reason = format!("Read error: {}", e);
                    break;
                }
            }
        }

        let retry = shared.auto_reconnect_enabled.load(Ordering::SeqCst);
        let phase = shared.transition(PhaseEvent::Lost { retry }).await;

        warn!("Backend connection lost: {}", disconnect_reason);
        let _ = shared.inbound_sender.send(Inbound::ConnectionLost {
            reason: disconnect_reason.clone(),
        });

        {
            let mut writer_guard = shared.writer.lock().await;
            if let Some(mut w) = writer_guard.take() {
                let _ = w.shutdown().await;
            }
        }

        // The phase check keeps a loss racing a deliberate shutdown from
        // restarting the retry loop
        if retry && phase == ConnectionPhase::Connecting {
            debug!("Auto-reconnect enabled, starting reconnection task");
            let reconnect_task = spawn_reconnect_task(config, shared);
            let mut handle = reconnect_handle.lock().await;
            *handle = Some(reconnect_task);
        }
    })
}
