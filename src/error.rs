//! # Error Types
//!
//! Custom error types for Telelog using `thiserror`.
//!
//! The variants follow the failure taxonomy of the storage core: transient
//! medium faults are retried with a cooldown, per-record corruption is
//! skipped, and a failed compaction rename aborts the whole attempt while
//! leaving the pre-rename file valid.

use thiserror::Error;

/// Main error type for Telelog
#[derive(Debug, Error)]
pub enum TelelogError {
    /// Storage medium is absent or not yet (re)initialized
    #[error("storage not ready: {0}")]
    NotReady(String),

    /// A path exists but could not be opened for the requested mode
    #[error("failed to open {path}: {source}")]
    OpenFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The rename step of a pending-queue compaction failed; the original
    /// file is still intact and the removal must be retried in full
    #[error("compaction rename failed: {0}")]
    RenameFailure(std::io::Error),

    /// A stored record frame could not be parsed (non-fatal, skipped)
    #[error("unreadable record frame: {0}")]
    ParseFailure(#[from] serde_json::Error),

    /// Batch could not be handed to the remote collector; nothing was
    /// removed from the pending queue
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Telelog
pub type Result<T> = std::result::Result<T, TelelogError>;
