//! Reconciliation between backend events, local commands, and the store
//!
//! The engine is the single writer of monitor state. It merges run
//! snapshots (server wins on activity and interval, client wins on url and
//! history), applies check events, performs optimistic local mutations for
//! issued commands, and enforces the snapshot barrier: after every
//! (re)connect, check events are buffered until that connection's snapshot
//! has been reconciled.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alerts::{AlertKind, Alerter, Notification};
use crate::client::SyncClient;
use crate::connection::Inbound;
use crate::error::Result;
use crate::protocol::{CheckEvent, CommandAction, CommandEcho, RunningMonitor, WebsitePayload};
use crate::store::MonitorStore;
use crate::types::{current_epoch_ms, CheckResult, MonitorState, MonitorStatus};

/// Status carried by a check event, falling back to the status code
fn status_from_event(event: &CheckEvent) -> MonitorStatus {
    match event.status.as_deref() {
        Some("degraded") => MonitorStatus::Degraded,
        Some("pending") => MonitorStatus::Pending,
        Some("up") => MonitorStatus::Up,
        Some("down") => MonitorStatus::Down,
        _ => MonitorStatus::from_status_code(event.status_code),
    }
}

/// The reconciliation engine
pub struct SyncEngine {
    store: Arc<MonitorStore>,
    alerter: Arc<Alerter>,
    client: Arc<SyncClient>,
    user_id: u64,
}

impl SyncEngine {
    pub fn new(
        store: Arc<MonitorStore>,
        alerter: Arc<Alerter>,
        client: Arc<SyncClient>,
        user_id: u64,
    ) -> Self {
        Self {
            store,
            alerter,
            client,
            user_id,
        }
    }

    fn payload_for(&self, monitor: &MonitorState) -> WebsitePayload {
        WebsitePayload {
            project_id: monitor.id.clone(),
            url: monitor.url.clone(),
            interval: monitor.interval_seconds,
            user_id: self.user_id,
        }
    }

    // ========================================================================
    // Inbound reconciliation
    // ========================================================================

    /// Merge a run snapshot into the store.
    ///
    /// For each entry matched by id the server's activity (`status == null`
    /// means running) and interval win; local url, history, and probe status
    /// survive. Unmatched entries create fresh records. Local monitors the
    /// snapshot does not mention are left untouched. Applying the same
    /// snapshot twice changes nothing the second time.
    pub fn apply_snapshot(&self, entries: &[RunningMonitor]) {
        for entry in entries {
            let running = entry.status.is_none();
            let updated = self.store.update(&entry.project_id, |m| {
                m.is_active = running;
                m.interval_seconds = entry.interval;
            });
            if !updated {
                debug!(monitor_id = %entry.project_id, "Snapshot introduced a new monitor");
                let mut monitor =
                    MonitorState::new(entry.project_id.clone(), entry.url.clone(), entry.interval);
                monitor.is_active = running;
                self.store.insert(monitor);
            }
        }
        info!("Applied run snapshot with {} entries", entries.len());
    }

    /// Resume monitors that were running at the last shutdown.
    ///
    /// Called once per snapshot: ids from the persisted unload set that the
    /// snapshot also lists get a resume command and optimistic activation;
    /// ids the snapshot omits are left alone. The set is consumed either
    /// way.
    pub async fn consume_resume_set(&self, entries: &[RunningMonitor]) {
        let resume_ids = self.store.take_resume_ids();
        if resume_ids.is_empty() {
            return;
        }
        for id in resume_ids {
            if !entries.iter().any(|e| e.project_id == id) {
                debug!(monitor_id = %id, "Not auto-resuming monitor absent from snapshot");
                continue;
            }
            let Some(monitor) = self.store.get(&id) else {
                continue;
            };
            info!(monitor_id = %id, "Auto-resuming monitor from last session");
            self.store.update(&id, |m| m.is_active = true);
            if let Err(e) = self
                .client
                .issue(CommandAction::Resume, self.payload_for(&monitor))
                .await
            {
                debug!(monitor_id = %id, "Resume command queued: {}", e);
            }
        }
    }

    /// Apply one check event that arrived at `now_ms`.
    ///
    /// Events for unknown monitor ids are dropped; the server may still be
    /// pushing results for a monitor deleted locally.
    pub async fn apply_check(&self, event: &CheckEvent, now_ms: u64) {
        if self.store.get(&event.project_id).is_none() {
            debug!(monitor_id = %event.project_id, "Dropping check event for unknown monitor");
            return;
        }

        let status = status_from_event(event);
        self.store.update(&event.project_id, |m| {
            m.push_check(CheckResult {
                timestamp_epoch_ms: now_ms,
                response_time_ms: event.response_time,
                status_code: event.status_code,
            });
            m.status = status;
            m.last_update_epoch_ms = Some(now_ms);
            match event.action {
                Some(CommandEcho::Resume) => m.is_active = true,
                Some(CommandEcho::Pause) => {
                    debug!(monitor_id = %m.id, "Server echoed pause for monitor")
                }
                None => {}
            }
        });

        if status != MonitorStatus::Up {
            if let Some(monitor) = self.store.get(&event.project_id) {
                let kind = if status == MonitorStatus::Degraded {
                    AlertKind::Degraded
                } else {
                    AlertKind::Down
                };
                self.alerter
                    .raise(Notification {
                        monitor_id: monitor.id.clone(),
                        url: monitor.url.clone(),
                        kind,
                        message: format!(
                            "{} reported {} (HTTP {})",
                            monitor.url, status, event.status_code
                        ),
                        timestamp_epoch_ms: now_ms,
                    })
                    .await;
            }
        }
    }

    // ========================================================================
    // Optimistic command issuance
    // ========================================================================

    /// Create a monitor and ask the server to start probing it.
    ///
    /// The record lands in the store immediately with a fresh id that is
    /// never reused; deleting and re-adding the same url yields a distinct
    /// monitor. The returned error means the start command is queued, not
    /// lost.
    pub async fn add_monitor(&self, url: &str, interval_seconds: u64) -> (String, Result<()>) {
        let id = Uuid::new_v4().to_string();
        let monitor = MonitorState::new(id.clone(), url, interval_seconds);
        let payload = self.payload_for(&monitor);
        self.store.insert(monitor);
        let sent = self.client.issue(CommandAction::Start, payload).await;
        (id, sent)
    }

    /// Pause probing; the local record deactivates immediately
    pub async fn pause_monitor(&self, id: &str) -> Result<()> {
        let Some(monitor) = self.store.get(id) else {
            return Err(crate::error::SyncError::InvalidMonitor(id.to_string()));
        };
        self.store.update(id, |m| m.is_active = false);
        self.client
            .issue(CommandAction::Pause, self.payload_for(&monitor))
            .await
    }

    /// Resume probing; the local record activates immediately
    pub async fn resume_monitor(&self, id: &str) -> Result<()> {
        let Some(monitor) = self.store.get(id) else {
            return Err(crate::error::SyncError::InvalidMonitor(id.to_string()));
        };
        self.store.update(id, |m| m.is_active = true);
        self.client
            .issue(CommandAction::Resume, self.payload_for(&monitor))
            .await
    }

    /// Stop probing without removing the record
    pub async fn stop_monitor(&self, id: &str) -> Result<()> {
        let Some(monitor) = self.store.get(id) else {
            return Err(crate::error::SyncError::InvalidMonitor(id.to_string()));
        };
        self.store.update(id, |m| m.is_active = false);
        self.client
            .issue(CommandAction::Stop, self.payload_for(&monitor))
            .await
    }

    /// Remove a monitor locally and on the server
    pub async fn delete_monitor(&self, id: &str) -> Result<()> {
        let Some(monitor) = self.store.get(id) else {
            return Err(crate::error::SyncError::InvalidMonitor(id.to_string()));
        };
        self.store.remove(id);
        self.alerter.forget(id);
        self.client
            .issue(CommandAction::Delete, self.payload_for(&monitor))
            .await
    }

    /// Request an immediate one-off probe
    pub async fn ping_monitor(&self, id: &str) -> Result<()> {
        let Some(monitor) = self.store.get(id) else {
            return Err(crate::error::SyncError::InvalidMonitor(id.to_string()));
        };
        self.client
            .issue(CommandAction::Ping, self.payload_for(&monitor))
            .await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Record the active set and pause everything before a deliberate stop.
    ///
    /// The persisted id list is what `consume_resume_set` replays on the
    /// next start. The pause commands are best-effort; a dead connection
    /// just means the server notices the silence on its own.
    pub async fn prepare_shutdown(&self) {
        let active = self.store.active_ids();
        info!("Persisting {} active monitors for next session", active.len());
        self.store.save_active_ids(active.clone());
        for id in active {
            let Some(monitor) = self.store.get(&id) else {
                continue;
            };
            if let Err(e) = self
                .client
                .issue(CommandAction::Pause, self.payload_for(&monitor))
                .await
            {
                debug!(monitor_id = %id, "Shutdown pause not delivered: {}", e);
            }
        }
    }

    /// Drive the reconciliation loop until cancellation.
    ///
    /// Holds the snapshot barrier: between a `Connected` marker and that
    /// connection's snapshot, check events are buffered and applied, in
    /// arrival order, only after the snapshot lands.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: broadcast::Receiver<Inbound>,
        cancel: CancellationToken,
    ) {
        let mut awaiting_snapshot = true;
        let mut buffered: Vec<CheckEvent> = Vec::new();

        loop {
            let message = tokio::select! {
                message = inbound.recv() => message,
                _ = cancel.cancelled() => {
                    debug!("Reconciler stopped");
                    return;
                }
            };

            match message {
                Ok(Inbound::Connected) => {
                    debug!("New connection, holding check events until snapshot");
                    awaiting_snapshot = true;
                    buffered.clear();
                }
                Ok(Inbound::SessionEstablished { session_id }) => {
                    self.store.set_session_id(&session_id);
                }
                Ok(Inbound::Snapshot(entries)) => {
                    self.apply_snapshot(&entries);
                    self.consume_resume_set(&entries).await;
                    awaiting_snapshot = false;
                    if !buffered.is_empty() {
                        debug!("Replaying {} buffered check events", buffered.len());
                        for event in buffered.drain(..) {
                            self.apply_check(&event, current_epoch_ms()).await;
                        }
                    }
                }
                Ok(Inbound::Check(event)) => {
                    if awaiting_snapshot {
                        buffered.push(event);
                    } else {
                        self.apply_check(&event, current_epoch_ms()).await;
                    }
                }
                Ok(Inbound::ConnectionLost { reason }) => {
                    warn!("Reconciler saw connection loss: {}", reason);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Resync from the next snapshot rather than trust a
                    // stream with holes in it
                    warn!("Inbound stream lagged, {} messages dropped", skipped);
                    awaiting_snapshot = true;
                    buffered.clear();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Inbound stream closed, reconciler exiting");
                    return;
                }
            }
        }
    }
}
