//! Wire types for the monitoring backend protocol
//!
//! Frames are newline-delimited JSON over a persistent bidirectional
//! stream. The first inbound payload after an anonymous connect is the
//! session assignment; every (re)connect is followed by a run snapshot
//! before any check events.

use serde::{Deserialize, Serialize};

/// Session frame: inbound as the server's session assignment, outbound as
/// the resume frame sent when reconnecting with a known session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFrame {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// One entry of the server's authoritative run snapshot.
///
/// `status == None` means the server is actively probing the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningMonitor {
    #[serde(rename = "siteId")]
    pub site_id: String,
    #[serde(rename = "projectId")]
    pub project_id: String,
    pub url: String,
    pub interval: u64,
    #[serde(default)]
    pub status: Option<String>,
}

/// A pushed probe outcome, optionally echoing a pause/resume command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckEvent {
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(rename = "responseTime")]
    pub response_time: u64,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub action: Option<CommandEcho>,
}

/// Command echoes the server may attach to a check event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandEcho {
    Pause,
    Resume,
}

/// Incoming message from the backend
///
/// Discriminated structurally: snapshots are arrays, session frames carry
/// only `sessionId`, everything else with a `projectId` is a check event.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Snapshot(Vec<RunningMonitor>),
    Check(CheckEvent),
    Session(SessionFrame),
}

/// Actions a client can request of the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandAction {
    Start,
    Pause,
    Resume,
    Stop,
    Delete,
    Ping,
}

/// The monitor payload carried by every command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsitePayload {
    #[serde(rename = "projectId")]
    pub project_id: String,
    pub url: String,
    pub interval: u64,
    #[serde(rename = "userId")]
    pub user_id: u64,
}

/// Outbound command frame
///
/// `session_id` is filled in by the connection manager once a session
/// exists; commands are never sent without one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub action: CommandAction,
    pub website: WebsitePayload,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Command {
    pub fn new(action: CommandAction, website: WebsitePayload) -> Self {
        Self {
            action,
            website,
            session_id: None,
        }
    }
}

/// One entry on the companion per-monitor log channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub website: String,
    pub timestamp: String,
    #[serde(rename = "responseTime")]
    pub response_time: u64,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
}

/// Log channel frame: an initial backlog array or a single increment
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LogMessage {
    Batch(Vec<LogEntry>),
    Entry(LogEntry),
}
