//! Trait abstraction for the network transport to enable testing.
//!
//! The buffer/delivery core only needs a "send this batch, tell me if it
//! arrived" contract; session management, authentication and broker
//! specifics live behind this seam.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Result, TelelogError};
use crate::record::Record;

/// One-shot batch delivery to a remote collector.
#[async_trait]
pub trait TelemetryTransport: Send {
    /// Deliver `batch` as a unit. `Ok` means the collector confirmed
    /// receipt; any error means the caller must not remove the batch from
    /// the pending queue.
    async fn send(&mut self, batch: &[Record]) -> Result<()>;
}

/// Newline-delimited JSON over TCP.
///
/// Connects per batch; a collector that accepts the full write and the
/// stream shutdown counts as confirmation.
pub struct TcpLineTransport {
    endpoint: String,
}

impl TcpLineTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl TelemetryTransport for TcpLineTransport {
    async fn send(&mut self, batch: &[Record]) -> Result<()> {
        let mut payload = String::new();
        for record in batch {
            payload.push_str(&record.to_line()?);
            payload.push('\n');
        }

        let mut stream = TcpStream::connect(&self.endpoint)
            .await
            .map_err(|e| TelelogError::Transport(format!("connect {}: {}", self.endpoint, e)))?;

        stream
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| TelelogError::Transport(format!("write: {}", e)))?;
        stream
            .shutdown()
            .await
            .map_err(|e| TelelogError::Transport(format!("shutdown: {}", e)))?;

        debug!(count = batch.len(), bytes = payload.len(), "batch transmitted");
        Ok(())
    }
}
