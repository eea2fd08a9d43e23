//! Scan coordinator (C8) — grounded in the teacher's
//! `index::nefax_dir_with_opts`/`pipeline::orchestrator::run_pipeline`
//! (establish store → spawn walk/workers/writer → join → final flush
//! lifecycle) plus `engine::tools::setup_ctrlc_handler`/`check_for_cancel`
//! (`ctrlc` crate, `Arc<AtomicBool>` flag polled between iterations) and
//! `engine::progress` (`kdam` bar, `try_lock` non-blocking updates).
//! Generalized to also own the metrics listener's lifetime and to route
//! archive entries through C4 before C2 (done inside the worker, §4.8).

use crate::catalog::Catalog;
use crate::config::{PackagePaths, ScanConfig};
use crate::ignore::IgnoreMatcher;
use crate::metrics::{Metrics, MetricsServer};
use crate::pipeline::context::{create_pipeline_channels, PipelineContext};
use crate::pipeline::walk::spawn_walk_thread;
use crate::pipeline::worker::spawn_workers;
use crate::pipeline::writer::spawn_writer;
use crate::types::FlushResult;
use kdam::{Animation, BarExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Everything the CLI/caller supplies beyond the scan-behavior config
/// already held in `ScanConfig` (§6).
pub struct ScanOptions {
    pub machine: String,
    pub db_path: PathBuf,
    pub metrics_host: String,
    /// `None` disables the metrics endpoint; `Some(0)` auto-selects a port
    /// starting at 9000; `Some(p)` binds exactly `p`.
    pub metrics_port: Option<u16>,
    /// `None` defaults to `min(available parallelism, 8)` (§4.8).
    pub num_threads: Option<usize>,
    pub show_progress: bool,
}

/// How the scan ended. `Interrupted` still carries whatever got flushed
/// before the shutdown deadline — exit code 2 is the caller's job, not
/// this function's (§6).
pub enum ScanOutcome {
    Completed(FlushResult),
    Interrupted(FlushResult),
}

/// Run one full scan of `root` to completion or interruption. Establishes
/// the catalog, ignore matcher, and metrics registry; spawns the walk,
/// worker, and writer threads; joins them in order; and tears down the
/// metrics listener before returning.
pub fn run_scan(root: &Path, scan: ScanConfig, opts: ScanOptions) -> anyhow::Result<ScanOutcome> {
    let root = root
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("canonicalize {}: {e}", root.display()))?;

    let ignore = Arc::new(IgnoreMatcher::load(
        &root,
        scan.enable_ignore_rules,
        PackagePaths::get().ignore_filename(),
    ));

    let metrics = Metrics::install(&opts.machine)?;
    metrics.set_scan_in_progress(true);

    let mut metrics_server = match opts.metrics_port {
        None => None,
        Some(0) => Some(start_metrics_auto(metrics.clone(), &opts.metrics_host)?),
        Some(port) => Some(MetricsServer::start(metrics.clone(), &opts.metrics_host, port)?),
    };

    // §3: catalog establishment is the startup health check — a failure
    // here is fatal-at-init (§7), not a per-record condition.
    let catalog = Catalog::open(&opts.db_path)?;

    let cancel = setup_ctrlc_handler()?;
    let num_threads = opts.num_threads.unwrap_or_else(|| num_cpus::get().min(8));
    metrics.set_workers_running(num_threads);

    let ctx = PipelineContext {
        root: root.clone(),
        ignore,
        scan,
        machine: opts.machine.clone(),
        cancel: cancel.clone(),
        metrics: metrics.clone(),
        enqueued: Arc::new(AtomicUsize::new(0)),
    };
    let completed = Arc::new(AtomicUsize::new(0));

    let channels = create_pipeline_channels();
    let path_rx_for_gauge = channels.path_rx.clone();

    let walk_handle = spawn_walk_thread(channels.path_tx, ctx.clone());
    let worker_handles = spawn_workers(channels.path_rx, channels.record_tx, &catalog, &ctx, num_threads);
    let writer_handle = spawn_writer(
        channels.record_rx,
        catalog.db_path.clone(),
        opts.machine.clone(),
        metrics.clone(),
        completed.clone(),
    );

    let progress = opts
        .show_progress
        .then(|| spawn_progress_thread(ctx.enqueued.clone(), completed.clone(), path_rx_for_gauge, metrics.clone()));

    let scanned = walk_handle.join().unwrap_or(0);
    for handle in worker_handles {
        let _ = handle.join();
    }
    let result = writer_handle.join().unwrap_or_default();

    if let Some(p) = progress {
        p.stop();
    }

    metrics.set_scan_in_progress(false);
    metrics.set_queue_files_pending(0);
    if let Some(server) = metrics_server.as_mut() {
        server.stop();
    }

    log::info!(
        "scan of {} finished: {scanned} paths walked, {} inserted, {} updated, {} failed",
        root.display(),
        result.inserted,
        result.updated,
        result.failed_paths.len(),
    );

    if cancel.load(Ordering::Relaxed) {
        Ok(ScanOutcome::Interrupted(result))
    } else {
        Ok(ScanOutcome::Completed(result))
    }
}

/// Try binding `9000, 9001, ...` until one succeeds, matching the CLI
/// surface's "0 = auto-select starting at 9000" contract (§6).
fn start_metrics_auto(metrics: Arc<Metrics>, host: &str) -> anyhow::Result<MetricsServer> {
    const MAX_ATTEMPTS: u16 = 200;
    let mut last_err = None;
    for offset in 0..MAX_ATTEMPTS {
        let port = 9000u16.saturating_add(offset);
        match MetricsServer::start(metrics.clone(), host, port) {
            Ok(server) => {
                log::info!("metrics endpoint listening on {host}:{port}");
                return Ok(server);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(anyhow::anyhow!(
        "could not auto-select a metrics port starting at 9000: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    ))
}

/// The process-wide cancellation flag. `ctrlc::set_handler` can only be
/// installed once per process, so the handler itself is installed lazily
/// and reused; each `run_scan` call resets the flag to `false` before
/// spawning its own pipeline so a prior scan's interrupt can't bleed into
/// the next one in the same process (relevant to running several `Library`
/// scans, or several integration tests, back to back).
static CANCEL_FLAG: std::sync::OnceLock<Arc<AtomicBool>> = std::sync::OnceLock::new();

fn setup_ctrlc_handler() -> anyhow::Result<Arc<AtomicBool>> {
    if let Some(flag) = CANCEL_FLAG.get() {
        flag.store(false, Ordering::Relaxed);
        return Ok(flag.clone());
    }
    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
    })
    .map_err(|e| anyhow::anyhow!("install Ctrl+C handler: {e}"))?;
    let _ = CANCEL_FLAG.set(cancel.clone());
    Ok(cancel)
}

/// A handle to the progress-bar thread; `stop` joins it so the bar's final
/// state is flushed before the coordinator returns.
struct ProgressHandle {
    done: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ProgressHandle {
    fn stop(mut self) {
        self.done.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Single-line progress updater (§4.8), refreshed at most 10 Hz from the
/// walker's enqueue counter and the writer's completion counter. Also
/// republishes `queue_files_pending` from the path channel's current
/// length — cheap to read, never blocks a hot path.
fn spawn_progress_thread(
    enqueued: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    path_rx_for_gauge: crossbeam_channel::Receiver<PathBuf>,
    metrics: Arc<Metrics>,
) -> ProgressHandle {
    let done = Arc::new(AtomicBool::new(false));
    let thread_done = done.clone();
    let bar = Arc::new(Mutex::new(kdam::tqdm!(
        total = 0,
        desc = "scanning",
        animation = Animation::Classic,
        unit = " files"
    )));
    let handle = thread::spawn(move || {
        let mut last_completed = 0usize;
        while !thread_done.load(Ordering::Relaxed) {
            let enq = enqueued.load(Ordering::Relaxed);
            let done_count = completed.load(Ordering::Relaxed);
            metrics.set_queue_files_pending(path_rx_for_gauge.len());
            if let Ok(mut b) = bar.try_lock() {
                b.total = enq;
                let delta = done_count.saturating_sub(last_completed);
                if delta > 0 {
                    let _ = b.update(delta);
                }
            }
            last_completed = done_count;
            thread::sleep(Duration::from_millis(100));
        }
        if let Ok(mut b) = bar.try_lock() {
            let _ = b.refresh();
        }
        eprintln!();
    });
    ProgressHandle {
        done,
        handle: Some(handle),
    }
}
