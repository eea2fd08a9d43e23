//! Typed error taxonomy matching the scope tags every metric and log line
//! is counted/tagged under.

use std::path::PathBuf;
use thiserror::Error;

/// One variant per error scope a caller can match on. `anyhow::Error` is
/// still used at the CLI boundary and for ad hoc `.context(...)` wrapping
/// inside implementation details that aren't part of this public contract.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("traversal error at {path}: {source}")]
    Traversal {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("read error for {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive skipped: {path}: {reason}")]
    ArchiveSkip { path: PathBuf, reason: String },

    #[error("archive read error in {archive} entry {entry}: {source}")]
    ArchiveRead {
        archive: PathBuf,
        entry: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("transient write error after {attempts} attempts: {source}")]
    WriteTransient {
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("fatal write error for {path}: {source}")]
    WriteFatal {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("scan interrupted by signal")]
    InterruptRequested,
}

impl ScanError {
    /// The `scope` label used for `errors_total{scope=...}`.
    pub fn scope(&self) -> &'static str {
        match self {
            ScanError::Traversal { .. } => "dir_iter",
            ScanError::Read { .. } => "scan_file",
            ScanError::ArchiveSkip { .. } => "archive_skip",
            ScanError::ArchiveRead { .. } => "archive_read",
            ScanError::WriteTransient { .. } => "db_flush",
            ScanError::WriteFatal { .. } => "db_flush",
            ScanError::InterruptRequested => "db_flush",
        }
    }
}
