//! # Pending Queue
//!
//! File-backed FIFO of not-yet-delivered records.
//!
//! The queue is a single append-only JSONL file, oldest record first. It
//! grows by appending and shrinks only by whole-prefix removal, implemented
//! as a two-phase rewrite:
//!
//! 1. stream every line past the removed prefix into a fresh temp file in
//!    the same directory and sync it to the medium,
//! 2. atomically rename the temp file over the original.
//!
//! Power loss before the rename leaves the original file untouched — the
//! next boot re-reads (and re-delivers) the same batch. Power loss after the
//! rename leaves the shortened file in place. Duplicate delivery is
//! possible, loss is not. In-place truncation is deliberately not used; it
//! has no such recovery story.
//!
//! All methods here are synchronous and expect to run under the storage
//! lock held by [`RecordBuffer`](super::RecordBuffer).

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, TelelogError};
use crate::record::Record;

/// Suffix of the compaction scratch file, kept next to the queue file.
const TEMP_SUFFIX: &str = ".tmp";

/// Result of draining the FIFO head.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DrainedBatch {
    /// Parsed records, append order preserved
    pub records: Vec<Record>,
    /// Physical lines consumed from the head, including corrupt ones.
    /// This is the value to hand to `commit_removal`.
    pub consumed: usize,
    /// Corrupt lines skipped (`consumed - records.len()`)
    pub skipped: usize,
}

/// The on-flash pending FIFO.
pub struct PendingQueue {
    path: PathBuf,
}

impl PendingQueue {
    /// Bind to the queue file at `path`. The file itself is created lazily
    /// on first append. A scratch file left over from an interrupted
    /// compaction is discarded here: the rename never happened, so the
    /// original file is still the authoritative queue.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let queue = Self { path: path.into() };

        let temp = queue.temp_path();
        if temp.exists() {
            warn!(path = %temp.display(), "discarding stale compaction scratch file");
            std::fs::remove_file(&temp)?;
        }

        Ok(queue)
    }

    /// Path of the queue file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(TEMP_SUFFIX);
        self.path.with_file_name(name)
    }

    /// Durably append a batch, one JSONL frame per record.
    ///
    /// Succeeds or fails as a whole batch. The file is synced before
    /// returning so an acknowledged append survives power loss.
    pub fn append(&self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| TelelogError::OpenFailure {
                path: self.path.display().to_string(),
                source: e,
            })?;

        let mut writer = BufWriter::new(file);
        for record in records {
            writer.write_all(record.to_line()?.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;

        debug!(count = records.len(), "appended to pending queue");
        Ok(())
    }

    /// Read up to `max` physical lines from the FIFO head.
    ///
    /// A line that fails to parse is counted as consumed but excluded from
    /// the returned records, keeping `consumed` in lockstep with the
    /// physical file prefix so that `commit_removal(consumed)` advances
    /// past corrupt lines too. Lines are read as raw bytes first: flash
    /// corruption can leave non-UTF-8 garbage in the file, and that must
    /// skip like any other unreadable frame instead of erroring the drain.
    pub fn drain_batch(&self, max: usize) -> Result<DrainedBatch> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            // No file yet means an empty queue, not an error
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(DrainedBatch::default())
            }
            Err(e) => {
                return Err(TelelogError::OpenFailure {
                    path: self.path.display().to_string(),
                    source: e,
                })
            }
        };

        let mut batch = DrainedBatch::default();
        for frame in BufReader::new(file).split(b'\n') {
            if batch.consumed == max {
                break;
            }
            let frame = frame?;
            batch.consumed += 1;

            let parsed = std::str::from_utf8(&frame)
                .map_err(|e| e.to_string())
                .and_then(|line| Record::from_line(line).map_err(|e| e.to_string()));
            match parsed {
                Ok(record) => batch.records.push(record),
                Err(e) => {
                    batch.skipped += 1;
                    warn!(error = %e, "skipping corrupt pending record");
                }
            }
        }

        Ok(batch)
    }

    /// Remove exactly `count` lines from the FIFO head via the two-phase
    /// rewrite described in the module docs.
    ///
    /// On any failure before the rename the original file is untouched and
    /// the removal must be retried in full; a failed rename surfaces as
    /// [`TelelogError::RenameFailure`].
    pub fn commit_removal(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }

        let source = File::open(&self.path).map_err(|e| TelelogError::OpenFailure {
            path: self.path.display().to_string(),
            source: e,
        })?;

        let temp = self.temp_path();
        let mut writer = BufWriter::new(File::create(&temp)?);

        // Byte-level copy: lines past the prefix go over verbatim, so a
        // corrupt (even non-UTF-8) line in the remainder survives untouched
        // for a later drain to account for
        let mut kept = 0usize;
        for (index, frame) in BufReader::new(source).split(b'\n').enumerate() {
            let frame = frame?;
            if index < count {
                continue;
            }
            writer.write_all(&frame)?;
            writer.write_all(b"\n")?;
            kept += 1;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        // The commit point. Before this the original is authoritative,
        // after it the shortened file is.
        std::fs::rename(&temp, &self.path).map_err(TelelogError::RenameFailure)?;

        debug!(removed = count, kept, "compacted pending queue");
        Ok(())
    }

    /// Number of records currently queued (line count; corrupt lines
    /// included since they still occupy the prefix).
    pub fn len(&self) -> Result<usize> {
        match File::open(&self.path) {
            Ok(f) => Ok(BufReader::new(f).split(b'\n').count()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// True when no records are queued.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
