//! Transport seam for the backend connection
//!
//! The backend speaks newline-delimited JSON over a persistent byte
//! stream. Reading, writing, and dialing each sit behind a small trait so
//! the connection manager and the tests never care whether the other end
//! is a real TCP socket or a scripted mock.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Result, SyncError};

/// Both halves of a freshly dialed connection
pub struct ConnectionPair {
    pub reader: Box<dyn LineReader>,
    pub writer: Box<dyn MessageWriter>,
}

impl std::fmt::Debug for ConnectionPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPair").finish_non_exhaustive()
    }
}

/// Inbound side: one NDJSON frame per call
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LineReader: Send {
    /// Next frame off the stream, trimmed of its terminator.
    ///
    /// `Ok(None)` means the remote closed the stream.
    async fn read_line(&mut self) -> Result<Option<String>>;
}

/// Outbound side: frames go out terminated and flushed
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageWriter: Send {
    /// Write one frame, appending the newline terminator, and flush
    async fn write_message(&mut self, message: &str) -> Result<()>;

    /// Release the underlying stream
    async fn shutdown(&mut self) -> Result<()>;
}

/// Dials the backend and hands back a [`ConnectionPair`]
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, addr: &str, timeout: Duration) -> Result<ConnectionPair>;
}

/// [`LineReader`] over the read half of a TCP stream
pub struct TcpLineReader {
    reader: BufReader<ReadHalf<TcpStream>>,
    line: String,
}

impl TcpLineReader {
    pub fn new(half: ReadHalf<TcpStream>) -> Self {
        Self {
            reader: BufReader::new(half),
            line: String::new(),
        }
    }
}

#[async_trait]
impl LineReader for TcpLineReader {
    async fn read_line(&mut self) -> Result<Option<String>> {
        self.line.clear();
        match self.reader.read_line(&mut self.line).await? {
            0 => Ok(None),
            _ => Ok(Some(self.line.trim().to_string())),
        }
    }
}

/// [`MessageWriter`] over the write half of a TCP stream
pub struct TcpMessageWriter {
    writer: WriteHalf<TcpStream>,
}

impl TcpMessageWriter {
    pub fn new(writer: WriteHalf<TcpStream>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl MessageWriter for TcpMessageWriter {
    async fn write_message(&mut self, message: &str) -> Result<()> {
        self.writer
            .write_all(format!("{}\n", message).as_bytes())
            .await
            .map_err(|e| SyncError::SendError(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| SyncError::SendError(e.to_string()))?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await.map_err(SyncError::Io)
    }
}

/// Production [`ConnectionFactory`] dialing plain TCP
#[derive(Default, Clone)]
pub struct TcpConnectionFactory;

impl TcpConnectionFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionFactory for TcpConnectionFactory {
    async fn connect(&self, addr: &str, timeout: Duration) -> Result<ConnectionPair> {
        debug!("Dialing {} (timeout {:?})", addr, timeout);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SyncError::Timeout(format!("Connection to {} timed out", addr)))?
            .map_err(|e| {
                SyncError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e))
            })?;

        let (reader, writer) = tokio::io::split(stream);

        Ok(ConnectionPair {
            reader: Box::new(TcpLineReader::new(reader)),
            writer: Box::new(TcpMessageWriter::new(writer)),
        })
    }
}
