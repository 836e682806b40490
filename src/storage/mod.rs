//! # Storage Module
//!
//! The store-and-forward record buffer: a power-loss-safe pending FIFO plus
//! a rotating forensic archive, both on the same storage medium.
//!
//! This module owns the medium. Every operation that touches flash is
//! serialized behind one async mutex: normal read-side operations take the
//! lock with a bounded wait, while appends and the FIFO compaction rewrite
//! wait unboundedly — abandoning those mid-write risks a truncated file.
//!
//! Medium failures are never fatal. An open failure flips the buffer to
//! not-ready; [`RecordBuffer::ensure_ready`] probes the medium and attempts
//! a re-initialization, rate-limited by a cooldown so an absent medium does
//! not spin the recovery path on every call.

pub mod archive;
pub mod pending;

pub use archive::{ArchiveOutcome, ArchiveWriter};
pub use pending::{DrainedBatch, PendingQueue};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::clock::ClockAuthority;
use crate::config::StorageConfig;
use crate::error::{Result, TelelogError};
use crate::record::Record;

/// Bounded wait for read-side storage operations.
const LOCK_WAIT: Duration = Duration::from_secs(5);

/// Probe file used to verify the medium accepts writes.
const PROBE_FILE: &str = ".telelog-probe";

/// Counters surfaced to operators (spec: counts, not raw errors).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    /// Records currently awaiting delivery
    pub pending: usize,
    /// Archive batches deferred while the clock was unsynchronized
    pub archive_deferred: u64,
}

struct StoreInner {
    root: PathBuf,
    pending: PendingQueue,
    archive: ArchiveWriter,
    ready: bool,
    last_recovery: Option<Instant>,
    recovery_cooldown: Duration,
}

impl StoreInner {
    /// Verify the medium accepts writes by round-tripping a probe file.
    fn probe(&self) -> std::io::Result<()> {
        let probe = self.root.join(PROBE_FILE);
        std::fs::write(&probe, b"ok")?;
        std::fs::remove_file(&probe)
    }

    /// Bounded-rate recovery: re-create the storage root and re-probe.
    fn try_recover(&mut self, force: bool) -> Result<()> {
        if !force {
            if let Some(last) = self.last_recovery {
                if last.elapsed() < self.recovery_cooldown {
                    return Err(TelelogError::NotReady(
                        "medium unavailable, recovery cooling down".to_string(),
                    ));
                }
            }
        }
        self.last_recovery = Some(Instant::now());

        info!(root = %self.root.display(), "attempting storage recovery");
        std::fs::create_dir_all(&self.root)?;
        self.probe().map_err(|e| {
            warn!(error = %e, "storage recovery failed");
            TelelogError::NotReady(format!("probe failed after recovery: {}", e))
        })?;

        self.ready = true;
        info!("storage recovered");
        Ok(())
    }
}

/// The persistent store-and-forward buffer.
///
/// Single instance per device; share via `Arc`. Owns all file handles and
/// the on-flash representation of both the pending queue and the archive.
pub struct RecordBuffer {
    clock: Arc<ClockAuthority>,
    inner: Mutex<StoreInner>,
}

impl RecordBuffer {
    /// Open (or lazily create) the buffer under `config.data_dir`.
    ///
    /// Cleans up any compaction scratch file left by an interrupted
    /// removal; see [`PendingQueue::open`].
    pub fn open(config: &StorageConfig, clock: Arc<ClockAuthority>) -> Result<Self> {
        let root = PathBuf::from(&config.data_dir);
        std::fs::create_dir_all(&root)?;

        let pending = PendingQueue::open(root.join(&config.pending_file))?;
        let archive = ArchiveWriter::new(&root, config.archive_max_bytes);

        Ok(Self {
            clock,
            inner: Mutex::new(StoreInner {
                root,
                pending,
                archive,
                ready: true,
                last_recovery: None,
                recovery_cooldown: Duration::from_millis(config.recovery_cooldown_ms),
            }),
        })
    }

    /// Take the storage lock with a bounded wait.
    async fn lock_bounded(&self) -> Result<MutexGuard<'_, StoreInner>> {
        tokio::time::timeout(LOCK_WAIT, self.inner.lock())
            .await
            .map_err(|_| TelelogError::NotReady("storage lock busy".to_string()))
    }

    /// Verify the medium is mounted and healthy; attempt recovery if not.
    ///
    /// Recovery is rate-limited by the configured cooldown unless `force`
    /// is set. Returns `Ok` when the buffer is ready for writes.
    pub async fn ensure_ready(&self, force: bool) -> Result<()> {
        let mut inner = self.lock_bounded().await?;

        if inner.ready && !force {
            match inner.probe() {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(error = %e, "storage probe failed, marking not ready");
                    inner.ready = false;
                }
            }
        }

        inner.try_recover(force)
    }

    /// Durably append records to the pending queue.
    ///
    /// Batch-level result: either every record was appended and synced, or
    /// the batch failed as a whole. An open failure marks the buffer
    /// not-ready so the caller can trigger [`Self::ensure_ready`] before
    /// retrying.
    pub async fn append_pending(&self, records: &[Record]) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if !inner.ready {
            return Err(TelelogError::NotReady("medium not ready".to_string()));
        }

        match inner.pending.append(records) {
            Ok(()) => Ok(()),
            Err(e @ TelelogError::OpenFailure { .. }) => {
                warn!(error = %e, "pending append failed, marking not ready");
                inner.ready = false;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Return up to `max` records from the FIFO head without removing them.
    ///
    /// Corrupt lines are counted in `consumed` but excluded from
    /// `records`; pass `consumed` (not `records.len()`) to
    /// [`Self::commit_pending_removal`].
    pub async fn drain_pending_batch(&self, max: usize) -> Result<DrainedBatch> {
        let inner = self.lock_bounded().await?;
        inner.pending.drain_batch(max)
    }

    /// Remove exactly `count` records from the FIFO head.
    ///
    /// Two-phase rewrite; crash-safe in both directions (see
    /// [`pending`] module docs). A failed rename leaves the original data
    /// valid and the whole removal must be retried.
    pub async fn commit_pending_removal(&self, count: usize) -> Result<()> {
        let inner = self.inner.lock().await;
        inner.pending.commit_removal(count)
    }

    /// Append records to the rotating archive.
    ///
    /// Rotation (and the initial file binding) needs a synchronized clock
    /// for the filename; without one the write is deferred and the records
    /// survive in the pending queue only.
    pub async fn append_archive(&self, records: &[Record]) -> Result<ArchiveOutcome> {
        let mut inner = self.inner.lock().await;

        if !inner.ready {
            return Err(TelelogError::NotReady("medium not ready".to_string()));
        }

        let now_ms = if self.clock.is_synchronized() {
            Some(self.clock.now().epoch_ms)
        } else {
            None
        };

        match inner.archive.append(records, now_ms) {
            Ok(outcome) => Ok(outcome),
            Err(e @ TelelogError::OpenFailure { .. }) => {
                warn!(error = %e, "archive append failed, marking not ready");
                inner.ready = false;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Operator-facing counters.
    pub async fn stats(&self) -> Result<BufferStats> {
        let inner = self.lock_bounded().await?;
        Ok(BufferStats {
            pending: inner.pending.len()?,
            archive_deferred: inner.archive.deferred_batches(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ClockSettings, TimeSource};
    use crate::record::test_support::record_at;
    use tempfile::TempDir;

    const VALID_EPOCH: u64 = 1_763_700_000_000;

    fn storage_config(dir: &TempDir) -> StorageConfig {
        StorageConfig {
            data_dir: dir.path().to_string_lossy().into_owned(),
            pending_file: "pending.jsonl".to_string(),
            archive_max_bytes: 5 * 1024 * 1024,
            recovery_cooldown_ms: 10_000,
        }
    }

    fn unsynced_clock() -> Arc<ClockAuthority> {
        Arc::new(ClockAuthority::new(ClockSettings::default()))
    }

    fn synced_clock() -> Arc<ClockAuthority> {
        let clock = unsynced_clock();
        clock.update_from_source(VALID_EPOCH, TimeSource::Gps);
        clock
    }

    #[tokio::test]
    async fn test_append_drain_commit_fifo() {
        let dir = TempDir::new().unwrap();
        let buffer = RecordBuffer::open(&storage_config(&dir), synced_clock()).unwrap();

        buffer
            .append_pending(&[record_at(100), record_at(200), record_at(300)])
            .await
            .unwrap();

        let batch = buffer.drain_pending_batch(2).await.unwrap();
        assert_eq!(batch.records.len(), 2);
        buffer.commit_pending_removal(batch.consumed).await.unwrap();

        let rest = buffer.drain_pending_batch(5).await.unwrap();
        assert_eq!(rest.records.len(), 1);
        assert_eq!(rest.records[0].ts, 300);
    }

    #[tokio::test]
    async fn test_archive_deferred_keeps_pending_intact() {
        // Clock never synchronized: archive defers, pending keeps all 5
        let dir = TempDir::new().unwrap();
        let buffer = RecordBuffer::open(&storage_config(&dir), unsynced_clock()).unwrap();

        let records: Vec<_> = (0..5).map(|i| record_at(i)).collect();
        buffer.append_pending(&records).await.unwrap();

        let outcome = buffer.append_archive(&records).await.unwrap();
        assert_eq!(outcome, ArchiveOutcome::Deferred);

        let stats = buffer.stats().await.unwrap();
        assert_eq!(stats.pending, 5);
        assert_eq!(stats.archive_deferred, 1);
    }

    #[tokio::test]
    async fn test_archive_written_when_synchronized() {
        let dir = TempDir::new().unwrap();
        let buffer = RecordBuffer::open(&storage_config(&dir), synced_clock()).unwrap();

        let outcome = buffer.append_archive(&[record_at(1)]).await.unwrap();
        assert_eq!(outcome, ArchiveOutcome::Written);

        // Exactly one LOG_ file appeared next to the pending file
        let logs: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("LOG_"))
            .collect();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_ready_on_healthy_medium() {
        let dir = TempDir::new().unwrap();
        let buffer = RecordBuffer::open(&storage_config(&dir), synced_clock()).unwrap();
        assert!(buffer.ensure_ready(false).await.is_ok());
    }

    #[tokio::test]
    async fn test_recovery_recreates_missing_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("data");
        let config = StorageConfig {
            data_dir: root.to_string_lossy().into_owned(),
            pending_file: "pending.jsonl".to_string(),
            archive_max_bytes: 5 * 1024 * 1024,
            recovery_cooldown_ms: 0,
        };
        let buffer = RecordBuffer::open(&config, synced_clock()).unwrap();

        // Medium "removed"
        std::fs::remove_dir_all(&root).unwrap();
        assert!(buffer.ensure_ready(false).await.is_ok());
        assert!(root.exists());

        buffer.append_pending(&[record_at(1)]).await.unwrap();
    }

    #[tokio::test]
    async fn test_recovery_cooldown_limits_retry_rate() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("data");
        let mut config = storage_config(&dir);
        config.data_dir = root.to_string_lossy().into_owned();
        let buffer = RecordBuffer::open(&config, synced_clock()).unwrap();

        std::fs::remove_dir_all(&root).unwrap();

        // First probe failure triggers a recovery attempt (succeeds by
        // recreating the dir); remove again and verify the cooldown blocks
        // the immediate next attempt
        buffer.ensure_ready(false).await.unwrap();
        std::fs::remove_dir_all(&root).unwrap();

        let err = buffer.ensure_ready(false).await.unwrap_err();
        assert!(matches!(err, TelelogError::NotReady(_)));
        assert!(!root.exists());

        // force bypasses the cooldown
        assert!(buffer.ensure_ready(true).await.is_ok());
        assert!(root.exists());
    }

    #[tokio::test]
    async fn test_append_after_not_ready_is_rejected() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("data");
        let mut config = storage_config(&dir);
        config.data_dir = root.to_string_lossy().into_owned();
        let buffer = RecordBuffer::open(&config, synced_clock()).unwrap();

        // Medium removed: the open fails and flips the buffer to not-ready
        std::fs::remove_dir_all(&root).unwrap();
        let err = buffer.append_pending(&[record_at(1)]).await.unwrap_err();
        assert!(matches!(err, TelelogError::OpenFailure { .. }));

        let err = buffer.append_pending(&[record_at(2)]).await.unwrap_err();
        assert!(matches!(err, TelelogError::NotReady(_)));
    }

    #[tokio::test]
    async fn test_stats_counts_pending() {
        let dir = TempDir::new().unwrap();
        let buffer = RecordBuffer::open(&storage_config(&dir), synced_clock()).unwrap();

        buffer
            .append_pending(&[record_at(1), record_at(2)])
            .await
            .unwrap();
        let stats = buffer.stats().await.unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.archive_deferred, 0);
    }
}
