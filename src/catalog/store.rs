//! Catalog store (C3): the hashes/files schema, scoped-session opens, and
//! the chunked hash-dedup upsert algorithm (§4.7).

use crate::config::WriterConsts;
use crate::error::ScanError;
use crate::types::{
    CatalogStatistics, ContentTriple, DuplicateGroup, FileRecord, FlushResult, Hash, Operation,
    PendingRecord,
};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

const WAL_PRAGMAS: &str = r#"
    PRAGMA synchronous = NORMAL;
    PRAGMA wal_autocheckpoint = 10000;
    PRAGMA journal_size_limit = 67108864;
    "#;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS hashes (
    id INTEGER PRIMARY KEY,
    size INTEGER NOT NULL,
    md5 TEXT NOT NULL,
    sha1 TEXT NOT NULL,
    sha256 TEXT NOT NULL,
    UNIQUE(md5, sha1, sha256)
);

CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    hash_id INTEGER NOT NULL REFERENCES hashes(id),
    name TEXT NOT NULL,
    path TEXT NOT NULL UNIQUE,
    machine TEXT NOT NULL,
    created TEXT NOT NULL,
    modified TEXT NOT NULL,
    scanned TEXT NOT NULL,
    operation TEXT NOT NULL,
    is_archived INTEGER NOT NULL,
    archive_path TEXT
);
CREATE INDEX IF NOT EXISTS idx_files_hash_id ON files(hash_id);
CREATE INDEX IF NOT EXISTS idx_files_name ON files(name);
CREATE INDEX IF NOT EXISTS idx_files_path ON files(path);
"#;

fn apply_wal_and_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
    conn.execute_batch(WAL_PRAGMAS)?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Open a connection with WAL mode and the schema applied. Each call is a
/// fresh, scoped session (§4.3's "own scoped session" contract); the
/// coordinator and batch writer keep one connection alive across many
/// calls, readers may open their own.
pub fn open_db(path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)
        .map_err(|e| anyhow::anyhow!("open database at {}: {e}", path.display()))?;
    apply_wal_and_schema(&conn)
        .map_err(|e| anyhow::anyhow!("apply schema at {}: {e}", path.display()))?;
    Ok(conn)
}

/// Handle to the catalog's location; connections are opened per operation.
pub struct Catalog {
    pub db_path: PathBuf,
}

impl Catalog {
    /// Ensure the database file and schema exist, then return a handle.
    pub fn open(db_path: &Path) -> anyhow::Result<Catalog> {
        let _conn = open_db(db_path)?;
        Ok(Catalog {
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn connect(&self) -> anyhow::Result<Connection> {
        open_db(&self.db_path)
    }

    pub fn lookup_by_path(
        conn: &Connection,
        path: &str,
    ) -> anyhow::Result<Option<(FileRecord, Hash)>> {
        conn.query_row(
            "SELECT f.id, f.hash_id, f.name, f.path, f.machine, f.created, f.modified, \
             f.scanned, f.operation, f.is_archived, f.archive_path, \
             h.id, h.size, h.md5, h.sha1, h.sha256 \
             FROM files f JOIN hashes h ON h.id = f.hash_id WHERE f.path = ?1",
            params![path],
            row_to_record_and_hash,
        )
        .optional()
        .map_err(|e| anyhow::anyhow!("lookup_by_path {path}: {e}"))
    }

    pub fn lookup_by_paths(
        conn: &Connection,
        paths: &[String],
    ) -> anyhow::Result<HashMap<String, (FileRecord, Hash)>> {
        let mut out = HashMap::with_capacity(paths.len());
        for path in paths {
            if let Some(found) = Self::lookup_by_path(conn, path)? {
                out.insert(path.clone(), found);
            }
        }
        Ok(out)
    }

    /// Flush up to `records.len()` pending records in chunks of
    /// `WriterConsts::DEFAULT_CHUNK_SIZE`, each chunk in its own
    /// transaction. On a chunk failure, rolls back and retries the
    /// chunk's records one at a time in isolated transactions; records
    /// that still fail land in `failed_paths` and are not retried again.
    pub fn upsert_batch(
        conn: &mut Connection,
        records: &[PendingRecord],
        machine: &str,
    ) -> FlushResult {
        let mut result = FlushResult::default();
        for chunk in records.chunks(WriterConsts::DEFAULT_CHUNK_SIZE) {
            match upsert_chunk(conn, chunk, machine) {
                Ok((inserted, updated)) => {
                    result.inserted += inserted;
                    result.updated += updated;
                }
                Err(_) => {
                    for record in chunk {
                        match upsert_one_isolated(conn, record, machine) {
                            Ok(Operation::Add) => result.inserted += 1,
                            Ok(Operation::Mod) => result.updated += 1,
                            Err(_) => result.failed_paths.push(record.path.clone()),
                        }
                    }
                }
            }
        }
        result
    }

    pub fn statistics(conn: &Connection) -> anyhow::Result<CatalogStatistics> {
        let hash_count = conn.query_row("SELECT COUNT(*) FROM hashes", [], |r| r.get(0))?;
        let file_count = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
        let archived_file_count = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE is_archived = 1",
            [],
            |r| r.get(0),
        )?;
        let total_bytes = conn.query_row(
            "SELECT COALESCE(SUM(h.size), 0) FROM files f JOIN hashes h ON h.id = f.hash_id",
            [],
            |r| r.get(0),
        )?;
        Ok(CatalogStatistics {
            hash_count,
            file_count,
            archived_file_count,
            total_bytes,
        })
    }

    /// Paths whose `path` or `name` contains `pattern` (simple substring
    /// search; the browsing UI that composes richer queries is out of
    /// scope, see §4.3.1).
    pub fn search(conn: &Connection, pattern: &str) -> anyhow::Result<Vec<FileRecord>> {
        let like = format!("%{pattern}%");
        let mut stmt = conn.prepare(
            "SELECT f.id, f.hash_id, f.name, f.path, f.machine, f.created, f.modified, \
             f.scanned, f.operation, f.is_archived, f.archive_path, \
             h.id, h.size, h.md5, h.sha1, h.sha256 \
             FROM files f JOIN hashes h ON h.id = f.hash_id \
             WHERE f.path LIKE ?1 OR f.name LIKE ?1 ORDER BY f.path",
        )?;
        let rows = stmt.query_map(params![like], |row| row_to_record_and_hash(row).map(|(r, _)| r))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("search: {e}"))
    }

    /// All records whose path begins with `prefix`.
    pub fn tree(conn: &Connection, prefix: &str) -> anyhow::Result<Vec<FileRecord>> {
        let like = format!("{prefix}%");
        let mut stmt = conn.prepare(
            "SELECT f.id, f.hash_id, f.name, f.path, f.machine, f.created, f.modified, \
             f.scanned, f.operation, f.is_archived, f.archive_path, \
             h.id, h.size, h.md5, h.sha1, h.sha256 \
             FROM files f JOIN hashes h ON h.id = f.hash_id \
             WHERE f.path LIKE ?1 ORDER BY f.path",
        )?;
        let rows = stmt.query_map(params![like], |row| row_to_record_and_hash(row).map(|(r, _)| r))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("tree: {e}"))
    }

    /// Hash groups referenced by more than one FileRecord.
    pub fn duplicates(conn: &Connection, min_group_size: i64) -> anyhow::Result<Vec<DuplicateGroup>> {
        let mut stmt = conn.prepare(
            "SELECT h.id, h.size, h.md5, h.sha1, h.sha256, COUNT(f.id) as n \
             FROM hashes h JOIN files f ON f.hash_id = h.id \
             GROUP BY h.id HAVING n >= ?1 ORDER BY n DESC",
        )?;
        let hash_rows: Vec<Hash> = stmt
            .query_map(params![min_group_size], |row| {
                Ok(Hash {
                    id: row.get(0)?,
                    size: row.get::<_, i64>(1)?.max(0) as u64,
                    md5: row.get(2)?,
                    sha1: row.get(3)?,
                    sha256: row.get(4)?,
                })
            })?
            .collect::<Result<_, _>>()?;

        let mut groups = Vec::with_capacity(hash_rows.len());
        for hash in hash_rows {
            let mut path_stmt = conn.prepare("SELECT path FROM files WHERE hash_id = ?1 ORDER BY path")?;
            let paths = path_stmt
                .query_map(params![hash.id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            groups.push(DuplicateGroup { hash, paths });
        }
        Ok(groups)
    }
}

fn row_to_record_and_hash(row: &rusqlite::Row) -> rusqlite::Result<(FileRecord, Hash)> {
    let operation_str: String = row.get(8)?;
    let operation = if operation_str == "MOD" {
        Operation::Mod
    } else {
        Operation::Add
    };
    let record = FileRecord {
        id: row.get(0)?,
        hash_id: row.get(1)?,
        name: row.get(2)?,
        path: row.get(3)?,
        machine: row.get(4)?,
        created: parse_ts(row.get(5)?),
        modified: parse_ts(row.get(6)?),
        scanned: parse_ts(row.get(7)?),
        operation,
        is_archived: row.get::<_, i64>(9)? != 0,
        archive_path: row.get(10)?,
    };
    let hash = Hash {
        id: row.get(11)?,
        size: row.get::<_, i64>(12)?.max(0) as u64,
        md5: row.get(13)?,
        sha1: row.get(14)?,
        sha256: row.get(15)?,
    };
    Ok((record, hash))
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap())
}

/// Resolve the hash id for one content triple, inserting it if novel.
fn resolve_hash_id(
    tx: &rusqlite::Transaction,
    triple: &ContentTriple,
    size: u64,
) -> rusqlite::Result<i64> {
    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM hashes WHERE md5 = ?1 AND sha1 = ?2 AND sha256 = ?3",
            params![triple.md5, triple.sha1, triple.sha256],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    tx.execute(
        "INSERT INTO hashes (size, md5, sha1, sha256) VALUES (?1, ?2, ?3, ?4)",
        params![size as i64, triple.md5, triple.sha1, triple.sha256],
    )?;
    Ok(tx.last_insert_rowid())
}

fn upsert_chunk(
    conn: &mut Connection,
    chunk: &[PendingRecord],
    machine: &str,
) -> rusqlite::Result<(usize, usize)> {
    with_retry(|| {
        let tx = conn.transaction()?;
        let mut triples: HashMap<ContentTriple, i64> = HashMap::new();
        for record in chunk {
            let triple = record.triple();
            if !triples.contains_key(&triple) {
                let id = resolve_hash_id(&tx, &triple, record.size)?;
                triples.insert(triple, id);
            }
        }

        let mut inserted = 0usize;
        let mut updated = 0usize;
        for record in chunk {
            let hash_id = triples[&record.triple()];
            match record.operation {
                Operation::Add => {
                    tx.execute(
                        "INSERT INTO files (hash_id, name, path, machine, created, modified, \
                         scanned, operation, is_archived, archive_path) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'ADD', ?8, ?9)",
                        params![
                            hash_id,
                            record.name,
                            record.path,
                            machine,
                            record.modified.to_rfc3339(),
                            record.modified.to_rfc3339(),
                            record.scanned.to_rfc3339(),
                            record.is_archived as i64,
                            record.archive_path,
                        ],
                    )?;
                    inserted += 1;
                }
                Operation::Mod => {
                    tx.execute(
                        "UPDATE files SET hash_id = ?1, modified = ?2, scanned = ?3, \
                         operation = 'MOD' WHERE path = ?4",
                        params![
                            hash_id,
                            record.modified.to_rfc3339(),
                            record.scanned.to_rfc3339(),
                            record.path,
                        ],
                    )?;
                    updated += 1;
                }
            }
        }
        tx.commit()?;
        Ok((inserted, updated))
    })
}

fn upsert_one_isolated(
    conn: &mut Connection,
    record: &PendingRecord,
    machine: &str,
) -> Result<Operation, ScanError> {
    upsert_chunk(conn, std::slice::from_ref(record), machine)
        .map(|_| record.operation)
        .map_err(|source| ScanError::WriteFatal {
            path: record.path.clone(),
            source,
        })
}

/// Retry a fallible DB operation on transient "database is locked"/"busy"
/// errors with exponential backoff (suggested 5 attempts, 0.5 s doubling).
fn with_retry<T>(mut op: impl FnMut() -> rusqlite::Result<T>) -> rusqlite::Result<T> {
    let mut attempt = 0;
    let mut backoff = Duration::from_millis(WriterConsts::RETRY_BASE_BACKOFF_MS);
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if is_transient(&e) && attempt + 1 < WriterConsts::RETRY_ATTEMPTS => {
                attempt += 1;
                thread::sleep(backoff);
                backoff *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn record(path: &str, md5: &str) -> PendingRecord {
        PendingRecord {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            size: 1024,
            md5: md5.to_string(),
            sha1: format!("sha1-{md5}"),
            sha256: format!("sha256-{md5}"),
            modified: ts(1000),
            scanned: ts(2000),
            operation: Operation::Add,
            is_archived: false,
            archive_path: None,
        }
    }

    #[test]
    fn dedups_identical_content_into_one_hash_row() {
        let mut conn = open_db(Path::new(":memory:")).unwrap();
        let records = vec![record("/a.bin", "deadbeef"), record("/b.bin", "deadbeef")];
        let result = Catalog::upsert_batch(&mut conn, &records, "host1");
        assert_eq!(result.inserted, 2);
        assert!(result.failed_paths.is_empty());
        let stats = Catalog::statistics(&conn).unwrap();
        assert_eq!(stats.hash_count, 1);
        assert_eq!(stats.file_count, 2);
    }

    #[test]
    fn mod_record_updates_existing_path_in_place() {
        let mut conn = open_db(Path::new(":memory:")).unwrap();
        Catalog::upsert_batch(&mut conn, &[record("/a.bin", "aaa")], "host1");
        let mut modded = record("/a.bin", "bbb");
        modded.operation = Operation::Mod;
        let result = Catalog::upsert_batch(&mut conn, &[modded], "host1");
        assert_eq!(result.updated, 1);
        let stats = Catalog::statistics(&conn).unwrap();
        assert_eq!(stats.file_count, 1);
        assert_eq!(stats.hash_count, 2);
    }

    #[test]
    fn lookup_by_path_round_trips() {
        let mut conn = open_db(Path::new(":memory:")).unwrap();
        Catalog::upsert_batch(&mut conn, &[record("/a.bin", "aaa")], "host1");
        let (rec, hash) = Catalog::lookup_by_path(&conn, "/a.bin").unwrap().unwrap();
        assert_eq!(rec.path, "/a.bin");
        assert_eq!(hash.md5, "aaa");
    }

    #[test]
    fn duplicates_reports_groups_of_at_least_two() {
        let mut conn = open_db(Path::new(":memory:")).unwrap();
        let records = vec![
            record("/a.bin", "x"),
            record("/b.bin", "x"),
            record("/c.bin", "y"),
        ];
        Catalog::upsert_batch(&mut conn, &records, "host1");
        let groups = Catalog::duplicates(&conn, 2).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].paths, vec!["/a.bin", "/b.bin"]);
    }
}
