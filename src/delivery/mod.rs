//! # Delivery Module
//!
//! Pulls unsent batches out of the record buffer, hands them to the network
//! transport, and commits the removal only after the transport confirms the
//! batch. Removal is all-or-nothing per flush: a transport failure leaves
//! the queue untouched and the same prefix is retried on the next flush.
//! Together with the buffer's durable prefix removal this gives
//! at-least-once delivery — duplicates on the collector are possible, loss
//! is not.

pub mod transport;

pub use transport::{TcpLineTransport, TelemetryTransport};

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::record::Record;
use crate::storage::RecordBuffer;

/// Outcome counters for one flush call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Records handed to the transport and confirmed
    pub sent: usize,
    /// Physical lines removed from the pending queue (includes corrupt
    /// lines skipped during the drain)
    pub consumed: usize,
    /// Corrupt lines dropped from this batch
    pub skipped: usize,
}

/// Drains the pending queue toward a remote collector.
pub struct DeliveryCoordinator<T: TelemetryTransport> {
    buffer: Arc<RecordBuffer>,
    transport: T,
}

impl<T: TelemetryTransport> DeliveryCoordinator<T> {
    pub fn new(buffer: Arc<RecordBuffer>, transport: T) -> Self {
        Self { buffer, transport }
    }

    /// Attempt to deliver up to `max_batch` pending records as one batch.
    ///
    /// On transport-confirmed success the drained prefix (valid and corrupt
    /// lines alike) is removed from the queue. On transport failure nothing
    /// is removed; the batch stays pending for the next call. A corrupt
    /// prefix with no valid records still gets committed so the queue can
    /// make progress past it.
    pub async fn flush(&mut self, max_batch: usize) -> Result<FlushReport> {
        let batch = self.buffer.drain_pending_batch(max_batch).await?;

        if batch.consumed == 0 {
            debug!("nothing pending to flush");
            return Ok(FlushReport::default());
        }

        if !batch.records.is_empty() {
            let delivered = mark_delivered(&batch.records);
            if let Err(e) = self.transport.send(&delivered).await {
                warn!(error = %e, count = batch.records.len(), "batch delivery failed, will retry");
                return Ok(FlushReport::default());
            }
        }

        self.buffer.commit_pending_removal(batch.consumed).await?;

        let report = FlushReport {
            sent: batch.records.len(),
            consumed: batch.consumed,
            skipped: batch.skipped,
        };
        info!(
            sent = report.sent,
            skipped = report.skipped,
            "flushed pending batch"
        );
        Ok(report)
    }
}

/// Copies with the delivery flag set, as transmitted to the collector.
fn mark_delivered(records: &[Record]) -> Vec<Record> {
    records
        .iter()
        .cloned()
        .map(|mut r| {
            r.delivered = true;
            r
        })
        .collect()
}
