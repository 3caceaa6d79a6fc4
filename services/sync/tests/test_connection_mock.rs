//! Mock-factory tests for connection management
//!
//! These tests drive the real client, reader task, and reconnect loop
//! against scripted connections, without any network operations.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use uplert_sync::config::{ReconnectConfig, ServerConfig};
use uplert_sync::io::{ConnectionFactory, ConnectionPair, LineReader, MessageWriter};
use uplert_sync::protocol::{CommandAction, WebsitePayload};
use uplert_sync::{client::SyncClient, SyncError};

// ============================================================================
// Mock implementations
// ============================================================================

struct MockLineReaderWithResponses {
    responses: StdMutex<VecDeque<Option<String>>>,
    /// When the script runs out: park forever (stable connection) if true,
    /// report EOF (drops the connection) if false
    hang_when_empty: bool,
}

impl MockLineReaderWithResponses {
    fn new(responses: Vec<Option<String>>, hang_when_empty: bool) -> Self {
        Self {
            responses: StdMutex::new(responses.into_iter().collect()),
            hang_when_empty,
        }
    }
}

#[async_trait]
impl LineReader for MockLineReaderWithResponses {
    async fn read_line(&mut self) -> uplert_sync::Result<Option<String>> {
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(response) => Ok(response),
            None if self.hang_when_empty => std::future::pending().await,
            None => Ok(None),
        }
    }
}

struct MockMessageWriterWithRecorder {
    sent_messages: Arc<StdMutex<Vec<String>>>,
}

#[async_trait]
impl MessageWriter for MockMessageWriterWithRecorder {
    async fn write_message(&mut self, message: &str) -> uplert_sync::Result<()> {
        self.sent_messages.lock().unwrap().push(message.to_string());
        Ok(())
    }

    async fn shutdown(&mut self) -> uplert_sync::Result<()> {
        Ok(())
    }
}

type MockScript = (Vec<Option<String>>, bool, Arc<StdMutex<Vec<String>>>);

struct MockConnectionFactory {
    scripts: StdMutex<VecDeque<MockScript>>,
    connect_count: StdMutex<u32>,
    fail_connect: StdMutex<bool>,
}

impl MockConnectionFactory {
    fn new() -> Self {
        Self {
            scripts: StdMutex::new(VecDeque::new()),
            connect_count: StdMutex::new(0),
            fail_connect: StdMutex::new(false),
        }
    }

    /// Queue a connection whose reader stays open after the script ends
    fn add_connection(&self, responses: Vec<Option<String>>) -> Arc<StdMutex<Vec<String>>> {
        self.push_script(responses, true)
    }

    /// Queue a connection whose reader reports EOF after the script ends
    fn add_connection_then_eof(
        &self,
        responses: Vec<Option<String>>,
    ) -> Arc<StdMutex<Vec<String>>> {
        self.push_script(responses, false)
    }

    fn push_script(
        &self,
        responses: Vec<Option<String>>,
        hang: bool,
    ) -> Arc<StdMutex<Vec<String>>> {
        let sent_messages = Arc::new(StdMutex::new(Vec::new()));
        self.scripts
            .lock()
            .unwrap()
            .push_back((responses, hang, sent_messages.clone()));
        sent_messages
    }

    fn set_fail_connect(&self, fail: bool) {
        *self.fail_connect.lock().unwrap() = fail;
    }

    fn get_connect_count(&self) -> u32 {
        *self.connect_count.lock().unwrap()
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(
        &self,
        _addr: &str,
        _timeout: Duration,
    ) -> uplert_sync::Result<ConnectionPair> {
        *self.connect_count.lock().unwrap() += 1;

        if *self.fail_connect.lock().unwrap() {
            return Err(SyncError::ConnectionFailed(
                "Mock connection failure".to_string(),
            ));
        }

        let mut scripts = self.scripts.lock().unwrap();
        if let Some((responses, hang, sent_messages)) = scripts.pop_front() {
            Ok(ConnectionPair {
                reader: Box::new(MockLineReaderWithResponses::new(responses, hang)),
                writer: Box::new(MockMessageWriterWithRecorder { sent_messages }),
            })
        } else {
            Err(SyncError::ConnectionFailed(
                "No mock connections available".to_string(),
            ))
        }
    }
}

fn session_frame(id: &str) -> String {
    format!(r#"{{"sessionId":"{id}"}}"#)
}

fn empty_snapshot() -> String {
    "[]".to_string()
}

fn website(id: &str) -> WebsitePayload {
    WebsitePayload {
        project_id: id.to_string(),
        url: format!("http://{id}"),
        interval: 30,
        user_id: 1,
    }
}

fn config(reconnect_enabled: bool) -> ServerConfig {
    ServerConfig {
        connection_timeout_seconds: 1,
        reconnect: ReconnectConfig {
            enabled: reconnect_enabled,
            // Keep retry latency out of the tests
            interval_seconds: 0,
        },
        ..ServerConfig::default()
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

// ============================================================================
// Handshake and session tests
// ============================================================================

#[tokio::test]
async fn test_initial_connection_state() {
    let factory = Arc::new(MockConnectionFactory::new());
    let client = SyncClient::with_connection_factory(config(false), factory);

    assert!(!client.is_connected().await);
    assert!(!client.is_reconnecting().await);
    assert!(client.session_id().await.is_none());
}

#[tokio::test]
async fn test_fresh_connect_adopts_assigned_session() {
    let factory = Arc::new(MockConnectionFactory::new());
    factory.add_connection(vec![Some(session_frame("S1")), Some(empty_snapshot())]);

    let client = SyncClient::with_connection_factory(config(false), factory);
    client.connect().await.unwrap();
    settle().await;

    assert!(client.is_connected().await);
    assert_eq!(client.session_id().await.as_deref(), Some("S1"));
}

#[tokio::test]
async fn test_seeded_session_sends_resume_frame_first() {
    let factory = Arc::new(MockConnectionFactory::new());
    let sent = factory.add_connection(vec![Some(empty_snapshot())]);

    let client = SyncClient::with_connection_factory(config(false), factory);
    client.seed_session(Some("S-old".to_string())).await;
    client.connect().await.unwrap();
    settle().await;

    let messages = sent.lock().unwrap();
    assert_eq!(messages[0], r#"{"sessionId":"S-old"}"#);
}

#[tokio::test]
async fn test_anonymous_connect_sends_nothing_unprompted() {
    let factory = Arc::new(MockConnectionFactory::new());
    let sent = factory.add_connection(vec![Some(session_frame("S1")), Some(empty_snapshot())]);

    let client = SyncClient::with_connection_factory(config(false), factory);
    client.connect().await.unwrap();
    settle().await;

    assert!(sent.lock().unwrap().is_empty());
}

// ============================================================================
// Command queue tests
// ============================================================================

#[tokio::test]
async fn test_commands_queued_before_session_drain_in_order() {
    let factory = Arc::new(MockConnectionFactory::new());
    let sent = factory.add_connection(vec![Some(session_frame("S1")), Some(empty_snapshot())]);

    let client = SyncClient::with_connection_factory(config(false), factory.clone());

    // No connection yet: every issue reports the degraded state but queues
    for action in [
        CommandAction::Start,
        CommandAction::Pause,
        CommandAction::Resume,
    ] {
        let result = client.issue(action, website("m1")).await;
        assert!(result.is_err());
    }
    assert_eq!(client.pending_command_count().await, 3);

    client.connect().await.unwrap();
    settle().await;

    assert_eq!(client.pending_command_count().await, 0);
    let messages = sent.lock().unwrap();
    assert_eq!(messages.len(), 3);
    assert!(messages[0].contains(r#""action":"start""#));
    assert!(messages[1].contains(r#""action":"pause""#));
    assert!(messages[2].contains(r#""action":"resume""#));
    // Replayed commands carry the session assigned after they were issued
    for message in messages.iter() {
        assert!(message.contains(r#""sessionId":"S1""#), "{message}");
    }
}

#[tokio::test]
async fn test_command_with_live_session_is_sent_directly() {
    let factory = Arc::new(MockConnectionFactory::new());
    let sent = factory.add_connection(vec![Some(session_frame("S1")), Some(empty_snapshot())]);

    let client = SyncClient::with_connection_factory(config(false), factory);
    client.connect().await.unwrap();
    settle().await;

    client
        .issue(CommandAction::Ping, website("m1"))
        .await
        .unwrap();

    let messages = sent.lock().unwrap();
    let last = messages.last().unwrap();
    assert!(last.contains(r#""action":"ping""#));
    assert!(last.contains(r#""projectId":"m1""#));
    assert!(last.contains(r#""sessionId":"S1""#));
}

#[tokio::test]
async fn test_no_session_error_still_queues() {
    let factory = Arc::new(MockConnectionFactory::new());
    let client = SyncClient::with_connection_factory(config(false), factory);

    let result = client.issue(CommandAction::Start, website("m1")).await;
    assert!(matches!(result, Err(SyncError::NoSession)));
    assert_eq!(client.pending_command_count().await, 1);
}

// ============================================================================
// Reconnect tests
// ============================================================================

#[tokio::test]
async fn test_reconnect_resumes_previous_session() {
    let factory = Arc::new(MockConnectionFactory::new());
    // First connection assigns a session, then drops
    factory.add_connection_then_eof(vec![Some(session_frame("S1")), Some(empty_snapshot())]);
    // Second connection stays up
    let second_sent = factory.add_connection(vec![Some(empty_snapshot())]);

    let client = SyncClient::with_connection_factory(config(true), factory.clone());
    client.connect().await.unwrap();

    // Let the drop and the retry loop play out
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(factory.get_connect_count(), 2);
    assert!(client.is_connected().await);
    // The reconnect identified itself with the session from the first connection
    let messages = second_sent.lock().unwrap();
    assert_eq!(messages[0], r#"{"sessionId":"S1"}"#);
}

#[tokio::test]
async fn test_connect_failure_without_reconnect_is_an_error() {
    let factory = Arc::new(MockConnectionFactory::new());
    factory.set_fail_connect(true);

    let client = SyncClient::with_connection_factory(config(false), factory);
    let result = client.connect().await;
    assert!(matches!(result, Err(SyncError::ConnectionFailed(_))));
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn test_connect_failure_with_reconnect_keeps_retrying() {
    let factory = Arc::new(MockConnectionFactory::new());
    factory.set_fail_connect(true);

    let client = SyncClient::with_connection_factory(config(true), factory.clone());
    // Hands over to the retry loop instead of failing
    client.connect().await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(factory.get_connect_count() >= 2);
    assert!(client.is_reconnecting().await);

    // Once the backend comes back the loop lands a connection
    factory.add_connection(vec![Some(session_frame("S1")), Some(empty_snapshot())]);
    factory.set_fail_connect(false);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(client.is_connected().await);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_stops_reconnection() {
    let factory = Arc::new(MockConnectionFactory::new());
    factory.set_fail_connect(true);

    let client = SyncClient::with_connection_factory(config(true), factory.clone());
    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    client.disconnect().await.unwrap();
    let count_at_disconnect = factory.get_connect_count();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(factory.get_connect_count(), count_at_disconnect);
    assert!(!client.is_connected().await);
    assert!(!client.is_reconnecting().await);
}

#[tokio::test]
async fn test_queued_commands_survive_a_dropped_connection() {
    let factory = Arc::new(MockConnectionFactory::new());
    // First connection drops before any session is assigned
    factory.add_connection_then_eof(vec![]);
    let second_sent =
        factory.add_connection(vec![Some(session_frame("S1")), Some(empty_snapshot())]);

    let client = SyncClient::with_connection_factory(config(true), factory.clone());
    let _ = client.issue(CommandAction::Start, website("m1")).await;

    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(client.pending_command_count().await, 0);
    let messages = second_sent.lock().unwrap();
    assert!(messages
        .iter()
        .any(|m| m.contains(r#""action":"start""#) && m.contains(r#""sessionId":"S1""#)));
}

// ============================================================================
// Subscription tests
// ============================================================================

#[tokio::test]
async fn test_multiple_subscribers() {
    let factory = Arc::new(MockConnectionFactory::new());
    let client = SyncClient::with_connection_factory(config(false), factory);

    let _receiver1 = client.subscribe();
    let _receiver2 = client.subscribe();
    // Multiple subscribers should be allowed
}
