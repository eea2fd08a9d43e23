//! Metadata/hashing workers (C8 step 2-6) — grounded in the teacher's
//! `metadata_worker_loop`/`spawn_metadata_workers`, generalized from a pure
//! metadata reader into the full decide-then-hash-then-submit path,
//! including the C4 archive detour.

use super::context::PipelineContext;
use crate::archive::{self, ArchiveKind};
use crate::catalog::{decide, Catalog, Decision};
use crate::hashing;
use crate::types::{Operation, PendingRecord, PriorRecord};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Spawn `num_threads` workers sharing one path receiver and one record
/// sender. Each worker opens its own catalog connection; reads are cheap
/// and the store's contract already expects scoped per-operation sessions.
pub fn spawn_workers(
    path_rx: Receiver<PathBuf>,
    record_tx: Sender<PendingRecord>,
    catalog: &Catalog,
    ctx: &PipelineContext,
    num_threads: usize,
) -> Vec<JoinHandle<()>> {
    (0..num_threads)
        .map(|_| {
            let path_rx = path_rx.clone();
            let record_tx = record_tx.clone();
            let db_path = catalog.db_path.clone();
            let ctx = ctx.clone();
            thread::spawn(move || worker_loop(path_rx, record_tx, db_path, ctx))
        })
        .collect()
}

fn worker_loop(
    path_rx: Receiver<PathBuf>,
    record_tx: Sender<PendingRecord>,
    db_path: PathBuf,
    ctx: PipelineContext,
) {
    let conn = match crate::catalog::open_db(&db_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("worker: failed to open catalog connection: {e}");
            return;
        }
    };

    while let Ok(path) = path_rx.recv() {
        if ctx.cancel.load(std::sync::atomic::Ordering::Relaxed) {
            break;
        }
        let started = Instant::now();
        process_path(&conn, &path, &ctx, &record_tx);
        ctx.metrics
            .observe_scan_file_duration(started.elapsed().as_secs_f64());
    }
    drop(record_tx);
}

fn process_path(
    conn: &rusqlite::Connection,
    path: &Path,
    ctx: &PipelineContext,
    record_tx: &Sender<PendingRecord>,
) {
    let kind = ArchiveKind::for_path(path);
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            log::warn!("stat failed for {}: {e}", path.display());
            ctx.metrics
                .inc_errors(if kind.is_some() { "scan_archive" } else { "scan_file" });
            return;
        }
    };
    let size = meta.len();
    let modified = system_time_to_utc(meta.modified().ok());

    if let Some(kind) = kind {
        if ctx.scan.scan_archives {
            process_archive(conn, path, kind, size, modified, ctx, record_tx);
        }
        return;
    }

    process_regular_file(conn, path, size, modified, ctx, record_tx);
}

fn process_regular_file(
    conn: &rusqlite::Connection,
    path: &Path,
    size: u64,
    modified: DateTime<Utc>,
    ctx: &PipelineContext,
    record_tx: &Sender<PendingRecord>,
) {
    let path_str = path.to_string_lossy().into_owned();
    let prior = prior_record(conn, &path_str, ctx);
    let decision = decide(size, modified, prior.as_ref());
    if decision == Decision::Skip {
        ctx.metrics.inc_files_scanned();
        return;
    }

    let digests = match hashing::hash_file(path, size) {
        Ok(d) => d,
        Err(e) => {
            log::warn!("hash failed for {}: {e}", path.display());
            ctx.metrics.inc_errors("scan_file");
            return;
        }
    };
    ctx.metrics.inc_bytes_hashed(digests.size);
    ctx.metrics.inc_files_scanned();

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_str.clone());

    let record = PendingRecord {
        path: path_str,
        name,
        size: digests.size,
        md5: digests.md5,
        sha1: digests.sha1,
        sha256: digests.sha256,
        modified,
        scanned: Utc::now(),
        operation: to_operation(decision),
        is_archived: false,
        archive_path: None,
    };
    let _ = record_tx.send(record);
}

#[allow(clippy::too_many_arguments)]
fn process_archive(
    conn: &rusqlite::Connection,
    path: &Path,
    kind: ArchiveKind,
    container_size: u64,
    container_modified: DateTime<Utc>,
    ctx: &PipelineContext,
    record_tx: &Sender<PendingRecord>,
) {
    if container_size > ctx.scan.max_archive_size {
        ctx.metrics.inc_errors("archive_skip");
        log::debug!(
            "skipping archive {} ({container_size} bytes over max_archive_size)",
            path.display()
        );
        return;
    }

    let entries = match archive::entries(path, kind, container_modified) {
        Ok(it) => it,
        Err(archive::ArchiveError::Unsupported(reason)) => {
            ctx.metrics.inc_errors("archive_skip");
            log::debug!("archive unsupported, skipping {}: {reason}", path.display());
            return;
        }
        Err(e) => {
            ctx.metrics.inc_errors("archive_read");
            log::warn!("failed to open archive {}: {e}", path.display());
            return;
        }
    };

    ctx.metrics.inc_archives_scanned(kind.label());
    let archive_path_str = path.to_string_lossy().into_owned();
    let mut entries_submitted = 0u64;

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                ctx.metrics.inc_errors("archive_read");
                log::warn!("archive entry read error in {}: {e}", path.display());
                continue;
            }
        };
        let internal_path = entry.internal_path.clone();
        let size = entry.size;
        let modified = entry.modified;

        // Both checks happen before `open_stream`, so an oversized or
        // unchanged entry's bytes are never read off disk or decompressed.
        if size > ctx.scan.max_archive_file_size {
            ctx.metrics.inc_errors("archive_skip");
            continue;
        }

        let vpath = archive::virtual_path(path, &internal_path);
        let prior = prior_record(conn, &vpath, ctx);
        let decision = decide(size, modified, prior.as_ref());
        if decision == Decision::Skip {
            continue;
        }

        let reader = match entry.open_stream() {
            Ok(r) => r,
            Err(e) => {
                ctx.metrics.inc_errors("archive_read");
                log::warn!("failed to open entry {} in {}: {e}", internal_path, path.display());
                continue;
            }
        };
        let digests = match hashing::hash_stream(reader, Some(size)) {
            Ok(d) => d,
            Err(e) => {
                ctx.metrics.inc_errors("archive_read");
                log::warn!(
                    "hash failed for entry {} in {}: {e}",
                    internal_path,
                    path.display()
                );
                continue;
            }
        };
        ctx.metrics.inc_bytes_hashed(digests.size);

        let name = internal_path
            .rsplit('/')
            .next()
            .unwrap_or(&internal_path)
            .to_string();

        let record = PendingRecord {
            path: vpath,
            name,
            size: digests.size,
            md5: digests.md5,
            sha1: digests.sha1,
            sha256: digests.sha256,
            modified,
            scanned: Utc::now(),
            operation: to_operation(decision),
            is_archived: true,
            archive_path: Some(archive_path_str.clone()),
        };
        if record_tx.send(record).is_err() {
            return;
        }
        entries_submitted += 1;
    }
    ctx.metrics
        .inc_archive_entries(kind.label(), entries_submitted);
}

fn prior_record(conn: &rusqlite::Connection, path: &str, ctx: &PipelineContext) -> Option<PriorRecord> {
    match Catalog::lookup_by_path(conn, path) {
        Ok(Some((record, hash))) => Some(PriorRecord {
            size: hash.size,
            modified: record.modified,
        }),
        Ok(None) => None,
        Err(e) => {
            log::warn!("prior record lookup failed for {path}: {e}");
            ctx.metrics.inc_errors("worker");
            None
        }
    }
}

fn to_operation(decision: Decision) -> Operation {
    match decision {
        Decision::Add => Operation::Add,
        Decision::Mod => Operation::Mod,
        Decision::Skip => unreachable!("callers filter Skip before building a record"),
    }
}

fn system_time_to_utc(t: Option<std::time::SystemTime>) -> DateTime<Utc> {
    t.map(DateTime::<Utc>::from).unwrap_or_else(Utc::now)
}
