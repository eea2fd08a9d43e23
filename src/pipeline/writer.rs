//! Batch writer (C7) — grounded in the teacher's
//! `engine::db_ops::indexer::flush_batch`/`apply_index_diff_streaming`
//! (chunked-transaction loop, `crossbeam_channel::recv_timeout` for
//! cancellation polling), generalized from one `INSERT OR REPLACE`
//! statement into the two-phase hash-dedup-then-upsert algorithm of §4.7,
//! and from "abandon batch on error" to the per-record-retry-then-quarantine
//! fallback already implemented in `catalog::store::Catalog::upsert_batch`.
//!
//! Single-threaded: workers submit over a bounded channel, this is the only
//! writer of the catalog's `hashes`/`files` tables.

use super::context::CompletedCounter;
use crate::catalog::Catalog;
use crate::config::{QueueConsts, WriterConsts};
use crate::metrics::Metrics;
use crate::types::{FlushResult, PendingRecord};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Spawn the writer thread. Returns a handle yielding the cumulative
/// `FlushResult` across every flush once `record_rx` disconnects (all
/// workers have exited) and the final flush has run.
pub fn spawn_writer(
    record_rx: Receiver<PendingRecord>,
    db_path: PathBuf,
    machine: String,
    metrics: Arc<Metrics>,
    completed: CompletedCounter,
) -> JoinHandle<FlushResult> {
    thread::spawn(move || writer_loop(record_rx, db_path, machine, metrics, completed))
}

fn writer_loop(
    record_rx: Receiver<PendingRecord>,
    db_path: PathBuf,
    machine: String,
    metrics: Arc<Metrics>,
    completed: CompletedCounter,
) -> FlushResult {
    let mut conn = match crate::catalog::open_db(&db_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("writer: failed to open catalog connection: {e}");
            return FlushResult::default();
        }
    };

    let mut buffer: Vec<PendingRecord> = Vec::with_capacity(WriterConsts::DEFAULT_FLUSH_THRESHOLD);
    let mut total = FlushResult::default();
    let interval = Duration::from_secs(WriterConsts::DEFAULT_FLUSH_INTERVAL_SECS);
    let mut last_flush = Instant::now();

    loop {
        match record_rx.recv_timeout(interval) {
            Ok(record) => {
                buffer.push(record);
                if buffer.len() >= WriterConsts::DEFAULT_FLUSH_THRESHOLD {
                    flush(&mut conn, &mut buffer, &machine, &metrics, &completed, &mut total);
                    last_flush = Instant::now();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !buffer.is_empty() && last_flush.elapsed() >= interval {
                    flush(&mut conn, &mut buffer, &machine, &metrics, &completed, &mut total);
                    last_flush = Instant::now();
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    final_flush(&mut conn, &mut buffer, &machine, &metrics, &completed, &mut total);
    total
}

/// One flush: up to `records.len()` pending records through
/// `Catalog::upsert_batch`'s chunked hash-dedup-then-upsert algorithm, in
/// one call. Records metrics and clears the buffer unconditionally —
/// records that still failed after `upsert_batch`'s internal per-record
/// retry are quarantined in `result.failed_paths`, not retried again here.
fn flush(
    conn: &mut rusqlite::Connection,
    buffer: &mut Vec<PendingRecord>,
    machine: &str,
    metrics: &Metrics,
    completed: &CompletedCounter,
    total: &mut FlushResult,
) {
    let started = Instant::now();
    let batch_len = buffer.len();
    let result = Catalog::upsert_batch(conn, buffer, machine);
    metrics.observe_db_flush_duration(started.elapsed().as_secs_f64());
    metrics.observe_batch_size(batch_len);
    metrics.inc_db_writes((result.inserted + result.updated) as u64);
    for path in &result.failed_paths {
        metrics.inc_errors("db_flush");
        log::warn!("record permanently failed to write: {path}");
    }
    completed.fetch_add(batch_len, Ordering::Relaxed);
    total.inserted += result.inserted;
    total.updated += result.updated;
    total.failed_paths.extend(result.failed_paths);
    buffer.clear();
}

/// Final flush on shutdown, bounded by
/// `QueueConsts::SHUTDOWN_FLUSH_DEADLINE_SECS` (§5). Flushes in the same
/// chunk size as a steady-state flush, checking the deadline between
/// chunks; records still buffered once the deadline elapses are dropped
/// with a `db_flush` error counter increment rather than attempted
/// further (§7 `InterruptRequested`).
fn final_flush(
    conn: &mut rusqlite::Connection,
    buffer: &mut Vec<PendingRecord>,
    machine: &str,
    metrics: &Metrics,
    completed: &CompletedCounter,
    total: &mut FlushResult,
) {
    let deadline = Instant::now() + Duration::from_secs(QueueConsts::SHUTDOWN_FLUSH_DEADLINE_SECS);
    while !buffer.is_empty() {
        if Instant::now() >= deadline {
            log::error!(
                "flush-on-shutdown deadline elapsed with {} records still buffered; dropping",
                buffer.len()
            );
            for record in buffer.drain(..) {
                metrics.inc_errors("db_flush");
                total.failed_paths.push(record.path);
            }
            break;
        }
        let take = buffer.len().min(WriterConsts::DEFAULT_CHUNK_SIZE);
        let mut chunk: Vec<PendingRecord> = buffer.drain(..take).collect();
        flush(conn, &mut chunk, machine, metrics, completed, total);
    }
}
