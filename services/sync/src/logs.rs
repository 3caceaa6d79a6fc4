//! Companion per-monitor log channel
//!
//! Next to the main sync stream the backend exposes a log channel per
//! monitor: the first frame after connecting is a JSON array with the
//! historical entries, every later frame is a single incremental entry.
//! Both shapes funnel into one ordered stream of [`LogEntry`] values.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Result;
use crate::io::{ConnectionFactory, LineReader};
use crate::protocol::{LogEntry, LogMessage};

/// Parse one log channel frame into its entries
pub fn parse_frame(line: &str) -> Result<Vec<LogEntry>> {
    let message: LogMessage = serde_json::from_str(line)?;
    Ok(match message {
        LogMessage::Batch(entries) => entries,
        LogMessage::Entry(entry) => vec![entry],
    })
}

/// An open log stream for one monitor
pub struct LogStream {
    receiver: mpsc::UnboundedReceiver<LogEntry>,
    handle: tokio::task::JoinHandle<()>,
}

impl LogStream {
    /// Connect to a log endpoint and start streaming entries.
    ///
    /// Historical entries arrive first, in server order, followed by
    /// incremental ones. The stream ends when the server closes the
    /// connection; log channels do not reconnect, callers reopen on demand.
    pub async fn open(
        factory: Arc<dyn ConnectionFactory>,
        addr: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let pair = factory.connect(addr, timeout).await?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(pump(pair.reader, sender));
        Ok(Self { receiver, handle })
    }

    /// Next log entry, `None` once the channel is closed and drained
    pub async fn recv(&mut self) -> Option<LogEntry> {
        self.receiver.recv().await
    }

    /// Stop streaming
    pub fn close(self) {
        self.handle.abort();
    }
}

/// Forward parsed log entries from the reader into the channel
async fn pump(mut reader: Box<dyn LineReader>, sender: mpsc::UnboundedSender<LogEntry>) {
    loop {
        match reader.read_line().await {
            Ok(None) => {
                debug!("Log channel closed by remote");
                return;
            }
            Ok(Some(line)) => {
                if line.is_empty() {
                    continue;
                }
                match parse_frame(&line) {
                    Ok(entries) => {
                        for entry in entries {
                            if sender.send(entry).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        debug!("Failed to parse log frame: {} ({})", line, e);
                    }
                }
            }
            Err(e) => {
                debug!("Error reading log channel: {}", e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MockLineReader;

    const BATCH: &str = r#"[{"website":"http://a","timestamp":"t1","responseTime":10,"statusCode":200},{"website":"http://a","timestamp":"t2","responseTime":20,"statusCode":200}]"#;
    const SINGLE: &str =
        r#"{"website":"http://a","timestamp":"t3","responseTime":30,"statusCode":503}"#;

    #[test]
    fn batch_frame_yields_all_entries() {
        let entries = parse_frame(BATCH).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].timestamp, "t1");
        assert_eq!(entries[1].timestamp, "t2");
    }

    #[test]
    fn single_frame_yields_one_entry() {
        let entries = parse_frame(SINGLE).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status_code, 503);
    }

    #[test]
    fn garbage_frame_is_an_error() {
        assert!(parse_frame("not json").is_err());
    }

    #[tokio::test]
    async fn pump_orders_batch_before_increments() {
        let mut reader = MockLineReader::new();
        let mut lines = vec![
            Ok(Some(BATCH.to_string())),
            Ok(Some(SINGLE.to_string())),
            Ok(None),
        ]
        .into_iter();
        reader
            .expect_read_line()
            .times(3)
            .returning(move || lines.next().unwrap_or(Ok(None)));

        let (sender, mut receiver) = mpsc::unbounded_channel();
        pump(Box::new(reader), sender).await;

        let timestamps: Vec<String> = std::iter::from_fn(|| receiver.try_recv().ok())
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(timestamps, vec!["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn pump_skips_malformed_frames() {
        let mut reader = MockLineReader::new();
        let mut lines = vec![
            Ok(Some("garbage".to_string())),
            Ok(Some(SINGLE.to_string())),
            Ok(None),
        ]
        .into_iter();
        reader
            .expect_read_line()
            .times(3)
            .returning(move || lines.next().unwrap_or(Ok(None)));

        let (sender, mut receiver) = mpsc::unbounded_channel();
        pump(Box::new(reader), sender).await;

        assert_eq!(receiver.try_recv().unwrap().timestamp, "t3");
        assert!(receiver.try_recv().is_err());
    }
}
