//! Scan configuration: constants, the on-disk `indexer.toml` file, and the
//! `INDEXER_`-prefixed environment override pass.

use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;

/// Default file names, fixed by the external interface (§6), cached the
/// way the teacher caches its package-derived paths in a `OnceLock`.
pub struct PackagePaths {
    db_filename: &'static str,
    log_filename: &'static str,
    ignore_filename: &'static str,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| PackagePaths {
            db_filename: "indexer.db",
            log_filename: "indexer.log",
            ignore_filename: "indexer.ignore",
        })
    }

    pub fn db_filename(&self) -> &str {
        self.db_filename
    }

    pub fn log_filename(&self) -> &str {
        self.log_filename
    }

    pub fn ignore_filename(&self) -> &str {
        self.ignore_filename
    }
}

/// Hashing I/O thresholds and buffer sizes.
pub struct HashingConsts;

impl HashingConsts {
    /// File size above which hashing uses memory-mapped I/O (bytes). 100 MB.
    pub const HASH_MMAP_THRESHOLD: u64 = 100 * 1024 * 1024;
    /// Chunk size for reading files below the mmap threshold (bytes). 1 MB.
    pub const HASH_READ_CHUNK_SIZE: usize = 1024 * 1024;
}

/// Batch writer tuning (§4.7/§5).
pub struct WriterConsts;

impl WriterConsts {
    pub const DEFAULT_FLUSH_THRESHOLD: usize = 500;
    pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;
    pub const DEFAULT_CHUNK_SIZE: usize = 200;
    pub const RETRY_ATTEMPTS: u32 = 5;
    pub const RETRY_BASE_BACKOFF_MS: u64 = 500;
}

/// Pipeline queue bounds (§5).
pub struct QueueConsts;

impl QueueConsts {
    pub const PATH_QUEUE_CAPACITY: usize = 10_000;
    pub const RECORD_QUEUE_CAPACITY: usize = 2_000;
    pub const SHUTDOWN_FLUSH_DEADLINE_SECS: u64 = 30;
}

/// The `[scan]` table of `indexer.toml`, mirroring the external interface
/// in SPEC_FULL.md §6.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub scan_archives: bool,
    pub max_archive_size: u64,
    pub max_archive_file_size: u64,
    pub enable_ignore_rules: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            scan_archives: true,
            max_archive_size: 524_288_000,
            max_archive_file_size: 104_857_600,
            enable_ignore_rules: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct IndexerToml {
    #[serde(default)]
    scan: ScanConfig,
}

impl ScanConfig {
    /// Load `indexer.toml` from `dir` if present, then apply `INDEXER_`
    /// environment overrides. Missing or unreadable file falls back to
    /// defaults; a malformed file is a hard error (misconfiguration at
    /// startup, not a per-scan condition).
    pub fn load(dir: &Path) -> anyhow::Result<ScanConfig> {
        let path = dir.join("indexer.toml");
        let mut cfg = match std::fs::read_to_string(&path) {
            Ok(s) => toml::from_str::<IndexerToml>(&s)
                .map(|f| f.scan)
                .map_err(|e| anyhow::anyhow!("parse {}: {e}", path.display()))?,
            Err(_) => ScanConfig::default(),
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_bool("INDEXER_SCAN_ARCHIVES") {
            self.scan_archives = v;
        }
        if let Some(v) = env_u64("INDEXER_MAX_ARCHIVE_SIZE") {
            self.max_archive_size = v;
        }
        if let Some(v) = env_u64("INDEXER_MAX_ARCHIVE_FILE_SIZE") {
            self.max_archive_file_size = v;
        }
        if let Some(v) = env_bool("INDEXER_ENABLE_IGNORE_RULES") {
            self.enable_ignore_rules = v;
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
