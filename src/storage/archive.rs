//! # Archive Writer
//!
//! Append-only, size-rotated JSONL log of every record ever produced,
//! independent of delivery outcome. The archive exists for offline forensic
//! recovery; the pending queue remains the primary delivery path.
//!
//! Filenames embed the synchronized wall-clock time at rotation,
//! `LOG_<YYYY-MM-DD>_<HH-MM-SS>.jsonl`, so lexicographic ordering equals
//! chronological ordering and "find latest" is a string comparison. Because
//! the name needs a presentable date, binding or rotating requires a
//! synchronized clock; until then archive writes are deferred (records stay
//! safe in the pending queue, which has no naming dependency).
//!
//! A file rotated away from is never reopened for writing.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use tracing::{debug, info};

use crate::error::{Result, TelelogError};
use crate::record::Record;

/// Archive filename prefix
const FILE_PREFIX: &str = "LOG_";
/// Archive filename extension
const FILE_EXT: &str = "jsonl";

/// Whether an archive append actually hit the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// Batch appended to the current archive file
    Written,
    /// Clock not yet synchronized and a (re)bind was needed; nothing written
    Deferred,
}

/// Size-rotated archive of all produced records.
pub struct ArchiveWriter {
    dir: PathBuf,
    max_bytes: u64,
    /// File currently bound for appends; `None` until the first
    /// synchronized write
    current: Option<PathBuf>,
    /// Batches deferred while waiting for clock synchronization
    deferred_batches: u64,
}

impl ArchiveWriter {
    /// Create a writer rooted at `dir` with the given per-file byte cap.
    /// No file is bound yet; binding happens on the first synchronized
    /// append.
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
            current: None,
            deferred_batches: 0,
        }
    }

    /// Currently bound archive file, if any.
    pub fn current_file(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    /// Batches deferred so far for lack of a synchronized clock.
    pub fn deferred_batches(&self) -> u64 {
        self.deferred_batches
    }

    /// Append a batch to the current archive file.
    ///
    /// `now_ms` is the synchronized epoch, or `None` when the clock has no
    /// valid calibration yet. Before writing, the current file's size is
    /// checked against the cap and the writer rotates if it is exceeded, or
    /// binds a file if none is bound. Both require `now_ms`; without it the
    /// write is deferred and [`ArchiveOutcome::Deferred`] is returned.
    pub fn append(&mut self, records: &[Record], now_ms: Option<u64>) -> Result<ArchiveOutcome> {
        if records.is_empty() {
            return Ok(ArchiveOutcome::Written);
        }

        if self.needs_rotation()? {
            match now_ms {
                Some(epoch_ms) => self.rotate(epoch_ms)?,
                None => {
                    self.deferred_batches += 1;
                    debug!("archive write deferred: clock not synchronized");
                    return Ok(ArchiveOutcome::Deferred);
                }
            }
        }

        // Bound above: needs_rotation() is false only with a current file
        let path = self.current.as_ref().ok_or_else(|| {
            TelelogError::NotReady("no archive file bound".to_string())
        })?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| TelelogError::OpenFailure {
                path: path.display().to_string(),
                source: e,
            })?;

        for record in records {
            file.write_all(record.to_line()?.as_bytes())?;
            file.write_all(b"\n")?;
        }
        file.sync_all()?;

        Ok(ArchiveOutcome::Written)
    }

    /// True when no file is bound or the bound file has reached the cap.
    fn needs_rotation(&self) -> Result<bool> {
        match &self.current {
            None => Ok(true),
            Some(path) => match std::fs::metadata(path) {
                Ok(meta) => Ok(meta.len() >= self.max_bytes),
                // Someone removed the file underneath us; rebind
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Close the current file and bind a new one named after `epoch_ms`.
    ///
    /// On the very first bind of a session, the most recent pre-existing
    /// archive file still under the cap is reused instead of starting a new
    /// one. After that, rotation always moves forward.
    fn rotate(&mut self, epoch_ms: u64) -> Result<()> {
        if self.current.is_none() {
            if let Some(latest) = self.find_latest()? {
                let size = std::fs::metadata(&latest)?.len();
                if size < self.max_bytes {
                    info!(file = %latest.display(), size, "reusing latest archive file");
                    self.current = Some(latest);
                    return Ok(());
                }
            }
        }

        // Filenames have one-second granularity; two cap crossings inside
        // the same second would otherwise rebind the file just rotated
        // away from. Bump until the name is neither the current file nor
        // an existing one.
        let mut epoch = epoch_ms;
        let mut path = self.dir.join(Self::filename_for(epoch));
        while self.current.as_deref() == Some(path.as_path()) || path.exists() {
            epoch += 1000;
            path = self.dir.join(Self::filename_for(epoch));
        }

        info!(file = %path.display(), "rotating archive");
        self.current = Some(path);
        Ok(())
    }

    /// `LOG_<date>_<time>.jsonl`, lexicographically ordered by time.
    fn filename_for(epoch_ms: u64) -> String {
        let when = Utc
            .timestamp_millis_opt(epoch_ms as i64)
            .single()
            .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap());
        format!(
            "{}{}.{}",
            FILE_PREFIX,
            when.format("%Y-%m-%d_%H-%M-%S"),
            FILE_EXT
        )
    }

    /// Latest archive file by name, exploiting the lexicographic-equals-
    /// chronological filename property.
    fn find_latest(&self) -> Result<Option<PathBuf>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut latest: Option<String> = None;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(FILE_PREFIX) && name.ends_with(FILE_EXT) {
                if latest.as_deref().map_or(true, |l| name.as_str() > l) {
                    latest = Some(name);
                }
            }
        }

        Ok(latest.map(|name| self.dir.join(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::test_support::record_at;
    use tempfile::TempDir;

    const NOW: u64 = 1_763_700_000_000;

    fn line_count(path: &Path) -> usize {
        std::fs::read_to_string(path).unwrap().lines().count()
    }

    #[test]
    fn test_unsynchronized_append_is_deferred() {
        let dir = TempDir::new().unwrap();
        let mut archive = ArchiveWriter::new(dir.path(), 1024);

        let outcome = archive.append(&[record_at(1)], None).unwrap();
        assert_eq!(outcome, ArchiveOutcome::Deferred);
        assert_eq!(archive.deferred_batches(), 1);
        assert!(archive.current_file().is_none());

        // Nothing on disk
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_synchronized_append_binds_and_writes() {
        let dir = TempDir::new().unwrap();
        let mut archive = ArchiveWriter::new(dir.path(), 1024 * 1024);

        let outcome = archive
            .append(&[record_at(1), record_at(2)], Some(NOW))
            .unwrap();
        assert_eq!(outcome, ArchiveOutcome::Written);

        let current = archive.current_file().unwrap().to_path_buf();
        assert_eq!(line_count(&current), 2);
    }

    #[test]
    fn test_bound_file_accepts_writes_without_clock() {
        // Once bound and under the cap, no rotation is needed so a write
        // may proceed even if the clock has since lost its meaning here
        let dir = TempDir::new().unwrap();
        let mut archive = ArchiveWriter::new(dir.path(), 1024 * 1024);

        archive.append(&[record_at(1)], Some(NOW)).unwrap();
        let outcome = archive.append(&[record_at(2)], None).unwrap();
        assert_eq!(outcome, ArchiveOutcome::Written);
        assert_eq!(line_count(archive.current_file().unwrap()), 2);
    }

    #[test]
    fn test_filename_format() {
        // 2025-11-20 14:23:47 UTC
        let name = ArchiveWriter::filename_for(1_763_648_627_000);
        assert_eq!(name, "LOG_2025-11-20_14-23-47.jsonl");
    }

    #[test]
    fn test_filename_order_is_chronological() {
        let earlier = ArchiveWriter::filename_for(NOW);
        let later = ArchiveWriter::filename_for(NOW + 86_400_000);
        assert!(later > earlier);
    }

    #[test]
    fn test_rotation_once_per_cap_crossing() {
        let dir = TempDir::new().unwrap();
        // Cap small enough that one record crosses it
        let mut archive = ArchiveWriter::new(dir.path(), 64);

        archive.append(&[record_at(1)], Some(NOW)).unwrap();
        let first = archive.current_file().unwrap().to_path_buf();

        // File now exceeds 64 bytes; next append must rotate exactly once
        archive.append(&[record_at(2)], Some(NOW + 3_600_000)).unwrap();
        let second = archive.current_file().unwrap().to_path_buf();
        assert_ne!(first, second);

        assert_eq!(line_count(&first), 1);
        assert_eq!(line_count(&second), 1);
    }

    #[test]
    fn test_same_second_rotation_binds_fresh_file() {
        // Two cap crossings inside the same wall-clock second must not
        // rebind the file just rotated away from
        let dir = TempDir::new().unwrap();
        let mut archive = ArchiveWriter::new(dir.path(), 64);

        archive.append(&[record_at(1)], Some(NOW)).unwrap();
        let first = archive.current_file().unwrap().to_path_buf();

        // Cap crossed; same epoch, 500ms later within the same second
        archive.append(&[record_at(2)], Some(NOW + 500)).unwrap();
        let second = archive.current_file().unwrap().to_path_buf();

        assert_ne!(first, second);
        assert_eq!(line_count(&first), 1);
        assert_eq!(line_count(&second), 1);
    }

    #[test]
    fn test_repeated_same_second_rotations_never_rebind() {
        let dir = TempDir::new().unwrap();
        let mut archive = ArchiveWriter::new(dir.path(), 64);

        let mut seen = Vec::new();
        for i in 0..3 {
            archive.append(&[record_at(i)], Some(NOW)).unwrap();
            let bound = archive.current_file().unwrap().to_path_buf();
            assert!(!seen.contains(&bound), "rebound {}", bound.display());
            seen.push(bound);
        }

        // One record per file, none grown past its rotation point
        for path in &seen {
            assert_eq!(line_count(path), 1);
        }
    }

    #[test]
    fn test_rotation_needed_but_unsynchronized_defers() {
        let dir = TempDir::new().unwrap();
        let mut archive = ArchiveWriter::new(dir.path(), 64);

        archive.append(&[record_at(1)], Some(NOW)).unwrap();
        let bound = archive.current_file().unwrap().to_path_buf();

        // Cap crossed, but no clock: defer rather than rotate blindly
        let outcome = archive.append(&[record_at(2)], None).unwrap();
        assert_eq!(outcome, ArchiveOutcome::Deferred);
        assert_eq!(line_count(&bound), 1);
    }

    #[test]
    fn test_first_bind_reuses_latest_under_cap() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("LOG_2025-11-19_08-00-00.jsonl");
        let newest = dir.path().join("LOG_2025-11-20_09-30-00.jsonl");
        std::fs::write(&old, "x\n").unwrap();
        std::fs::write(&newest, "y\n").unwrap();

        let mut archive = ArchiveWriter::new(dir.path(), 1024);
        archive.append(&[record_at(1)], Some(NOW)).unwrap();

        assert_eq!(archive.current_file().unwrap(), newest.as_path());
        assert_eq!(line_count(&newest), 2);
    }

    #[test]
    fn test_first_bind_skips_latest_over_cap() {
        let dir = TempDir::new().unwrap();
        let full = dir.path().join("LOG_2025-11-20_09-30-00.jsonl");
        std::fs::write(&full, vec![b'x'; 128]).unwrap();

        let mut archive = ArchiveWriter::new(dir.path(), 64);
        archive.append(&[record_at(1)], Some(NOW)).unwrap();

        // A fresh file was bound; the full one was left alone
        let current = archive.current_file().unwrap();
        assert_ne!(current, full.as_path());
        assert_eq!(std::fs::metadata(&full).unwrap().len(), 128);
    }

    #[test]
    fn test_rotated_file_never_reopened() {
        let dir = TempDir::new().unwrap();
        let mut archive = ArchiveWriter::new(dir.path(), 64);

        archive.append(&[record_at(1)], Some(NOW)).unwrap();
        let first = archive.current_file().unwrap().to_path_buf();
        archive.append(&[record_at(2)], Some(NOW + 3_600_000)).unwrap();

        // Subsequent appends land in the new file only
        archive.append(&[record_at(3)], None).unwrap();
        assert_eq!(line_count(&first), 1);
    }

    #[test]
    fn test_empty_batch_is_written_noop() {
        let dir = TempDir::new().unwrap();
        let mut archive = ArchiveWriter::new(dir.path(), 1024);
        let outcome = archive.append(&[], None).unwrap();
        assert_eq!(outcome, ArchiveOutcome::Written);
        assert!(archive.current_file().is_none());
    }
}
