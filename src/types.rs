//! Core data model: content identity, file records, and the pending records
//! that flow between workers and the batch writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A unique content identity: size plus three lowercase hex digests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hash {
    pub id: i64,
    pub size: u64,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

/// The (md5, sha1, sha256) triple used as the dedup key, without a row id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContentTriple {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

impl From<&Hash> for ContentTriple {
    fn from(h: &Hash) -> Self {
        ContentTriple {
            md5: h.md5.clone(),
            sha1: h.sha1.clone(),
            sha256: h.sha256.clone(),
        }
    }
}

/// ADD for a never-before-seen path, MOD for a path whose prior record no
/// longer matches size+mtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Add,
    Mod,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Add => "ADD",
            Operation::Mod => "MOD",
        })
    }
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Add => "ADD",
            Operation::Mod => "MOD",
        }
    }
}

/// One observation of a file at a location on a machine, persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub hash_id: i64,
    pub name: String,
    /// Absolute path, or `<archive>::<entry>` for archived entries.
    pub path: String,
    pub machine: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub scanned: DateTime<Utc>,
    pub operation: Operation,
    pub is_archived: bool,
    pub archive_path: Option<String>,
}

/// The prior record the decider and batch writer need for one path: just
/// enough of the catalog's state to decide ADD/MOD/SKIP without a live row.
#[derive(Clone, Debug)]
pub struct PriorRecord {
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// A tuple {metadata, computed digest, operation} handed from a worker to
/// the batch writer. Lives only until the flush containing it commits.
#[derive(Clone, Debug)]
pub struct PendingRecord {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub modified: DateTime<Utc>,
    pub scanned: DateTime<Utc>,
    pub operation: Operation,
    pub is_archived: bool,
    pub archive_path: Option<String>,
}

impl PendingRecord {
    pub fn triple(&self) -> ContentTriple {
        ContentTriple {
            md5: self.md5.clone(),
            sha1: self.sha1.clone(),
            sha256: self.sha256.clone(),
        }
    }
}

/// Outcome of a single flush: how many rows were inserted/updated, and
/// which paths could not be written even after per-record retry.
#[derive(Debug, Default, Serialize)]
pub struct FlushResult {
    pub inserted: usize,
    pub updated: usize,
    pub failed_paths: Vec<String>,
}

/// A single group of FileRecords sharing a hash_id, for `duplicates()`.
#[derive(Debug, Serialize)]
pub struct DuplicateGroup {
    pub hash: Hash,
    pub paths: Vec<String>,
}

/// Snapshot counters returned by `Catalog::statistics`.
#[derive(Debug, Default, Serialize)]
pub struct CatalogStatistics {
    pub hash_count: i64,
    pub file_count: i64,
    pub archived_file_count: i64,
    pub total_bytes: i64,
}
