//! Metrics exporter (C9): the counters/gauges/histograms of §6, built fresh
//! per scan and threaded through `PipelineContext` as an `Arc<Metrics>`
//! (the "shared mutable store across tasks" design note in §9 — a capability
//! handed to each worker, not an ambient singleton, since a process may run
//! more than one scan in its lifetime, e.g. back-to-back test scans or a
//! long-lived host issuing repeated scans), plus a hand-rolled `GET /metrics`
//! scrape listener on its own thread.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub struct Metrics {
    machine: String,
    registry: Registry,
    files_scanned_total: IntCounterVec,
    directories_scanned_total: IntCounterVec,
    archives_scanned_total: IntCounterVec,
    archive_entries_total: IntCounterVec,
    errors_total: IntCounterVec,
    db_writes_total: IntCounterVec,
    bytes_hashed_total: IntCounterVec,
    scan_in_progress: IntGaugeVec,
    queue_files_pending: IntGaugeVec,
    workers_running: IntGaugeVec,
    scan_file_duration_seconds: HistogramVec,
    db_flush_duration_seconds: HistogramVec,
    batch_size: HistogramVec,
}

macro_rules! register_counter {
    ($registry:expr, $name:expr, $help:expr, $labels:expr) => {{
        let v = IntCounterVec::new(Opts::new($name, $help), $labels)?;
        $registry.register(Box::new(v.clone()))?;
        v
    }};
}

macro_rules! register_gauge {
    ($registry:expr, $name:expr, $help:expr, $labels:expr) => {{
        let v = IntGaugeVec::new(Opts::new($name, $help), $labels)?;
        $registry.register(Box::new(v.clone()))?;
        v
    }};
}

macro_rules! register_histogram {
    ($registry:expr, $name:expr, $help:expr, $labels:expr) => {{
        let v = HistogramVec::new(HistogramOpts::new($name, $help), $labels)?;
        $registry.register(Box::new(v.clone()))?;
        v
    }};
}

impl Metrics {
    /// Build a fresh registry for one scan. The coordinator calls this once
    /// per `run_scan` invocation, before spawning the walk, worker, or
    /// writer threads, and hands the returned `Arc` to every task via
    /// `PipelineContext`.
    pub fn install(machine: &str) -> anyhow::Result<Arc<Metrics>> {
        Ok(Arc::new(Self::build(machine)?))
    }

    fn build(machine: &str) -> anyhow::Result<Metrics> {
        let registry = Registry::new();
        let m = &["machine"];
        let mt = &["machine", "type"];
        let ms = &["machine", "scope"];

        Ok(Metrics {
            machine: machine.to_string(),
            files_scanned_total: register_counter!(
                registry,
                "files_scanned_total",
                "Files that completed a scan decision (ADD, MOD, or SKIP).",
                m
            ),
            directories_scanned_total: register_counter!(
                registry,
                "directories_scanned_total",
                "Directories entered by the walker.",
                m
            ),
            archives_scanned_total: register_counter!(
                registry,
                "archives_scanned_total",
                "Archive files opened for entry enumeration, by format.",
                mt
            ),
            archive_entries_total: register_counter!(
                registry,
                "archive_entries_total",
                "Archive entries hashed and submitted, by format.",
                mt
            ),
            errors_total: register_counter!(
                registry,
                "errors_total",
                "Errors encountered, by scope.",
                ms
            ),
            db_writes_total: register_counter!(
                registry,
                "db_writes_total",
                "FileRecord rows inserted or updated by the batch writer.",
                m
            ),
            bytes_hashed_total: register_counter!(
                registry,
                "bytes_hashed_total",
                "Bytes consumed by the hasher across all files and archive entries.",
                m
            ),
            scan_in_progress: register_gauge!(
                registry,
                "scan_in_progress",
                "1 while a scan is running, 0 otherwise.",
                m
            ),
            queue_files_pending: register_gauge!(
                registry,
                "queue_files_pending",
                "Paths currently buffered in the walker-to-worker queue.",
                m
            ),
            workers_running: register_gauge!(
                registry,
                "workers_running",
                "Worker threads currently alive.",
                m
            ),
            scan_file_duration_seconds: register_histogram!(
                registry,
                "scan_file_duration_seconds",
                "Wall time to stat, decide, and hash one file or archive entry.",
                m
            ),
            db_flush_duration_seconds: register_histogram!(
                registry,
                "db_flush_duration_seconds",
                "Wall time for one batch writer flush transaction.",
                m
            ),
            batch_size: register_histogram!(
                registry,
                "batch_size",
                "Number of records committed per flush.",
                m
            ),
            registry,
        })
    }

    pub fn inc_files_scanned(&self) {
        self.files_scanned_total.with_label_values(&[&self.machine]).inc();
    }

    pub fn inc_directories_scanned(&self) {
        self.directories_scanned_total
            .with_label_values(&[&self.machine])
            .inc();
    }

    pub fn inc_archives_scanned(&self, kind: &str) {
        self.archives_scanned_total
            .with_label_values(&[&self.machine, kind])
            .inc();
    }

    pub fn inc_archive_entries(&self, kind: &str, count: u64) {
        self.archive_entries_total
            .with_label_values(&[&self.machine, kind])
            .inc_by(count);
    }

    pub fn inc_errors(&self, scope: &str) {
        self.errors_total
            .with_label_values(&[&self.machine, scope])
            .inc();
    }

    pub fn inc_db_writes(&self, count: u64) {
        self.db_writes_total.with_label_values(&[&self.machine]).inc_by(count);
    }

    pub fn inc_bytes_hashed(&self, bytes: u64) {
        self.bytes_hashed_total
            .with_label_values(&[&self.machine])
            .inc_by(bytes);
    }

    pub fn set_scan_in_progress(&self, running: bool) {
        self.scan_in_progress
            .with_label_values(&[&self.machine])
            .set(running as i64);
    }

    pub fn set_queue_files_pending(&self, n: usize) {
        self.queue_files_pending
            .with_label_values(&[&self.machine])
            .set(n as i64);
    }

    pub fn set_workers_running(&self, n: usize) {
        self.workers_running
            .with_label_values(&[&self.machine])
            .set(n as i64);
    }

    pub fn observe_scan_file_duration(&self, secs: f64) {
        self.scan_file_duration_seconds
            .with_label_values(&[&self.machine])
            .observe(secs);
    }

    pub fn observe_db_flush_duration(&self, secs: f64) {
        self.db_flush_duration_seconds
            .with_label_values(&[&self.machine])
            .observe(secs);
    }

    pub fn observe_batch_size(&self, size: usize) {
        self.batch_size
            .with_label_values(&[&self.machine])
            .observe(size as f64);
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder.encode(&families, &mut buf).unwrap_or_default();
        buf
    }
}

/// Handle to the scrape listener thread; dropping or calling `stop` closes
/// the socket and joins the thread, matching the coordinator's "closes the
/// metrics endpoint" shutdown step (§4.8).
pub struct MetricsServer {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MetricsServer {
    /// Bind `host:port` and serve `GET /metrics` until `stop` is called.
    /// `port == 0` lets the OS pick a free port starting from its ephemeral
    /// range; callers that need the deterministic "auto-select starting at
    /// 9000" behavior should probe ports themselves and pass a concrete one.
    pub fn start(metrics: Arc<Metrics>, host: &str, port: u16) -> std::io::Result<MetricsServer> {
        let listener = TcpListener::bind((host, port))?;
        listener.set_nonblocking(true)?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let handle = thread::spawn(move || serve_loop(listener, metrics, thread_shutdown));
        Ok(MetricsServer {
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MetricsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve_loop(listener: TcpListener, metrics: Arc<Metrics>, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        match listener.accept() {
            Ok((stream, _addr)) => handle_connection(stream, &metrics),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(std::time::Duration::from_millis(50));
            }
            Err(e) => {
                log::warn!("metrics listener accept error: {e}");
                thread::sleep(std::time::Duration::from_millis(50));
            }
        }
    }
}

/// Parse only enough of the request to recognize `GET /metrics`; any other
/// method or path gets a bare 404. There is no keep-alive, no headers
/// parsing beyond the request line: the route surface is exactly one path.
fn handle_connection(mut stream: TcpStream, metrics: &Metrics) {
    let mut reader = BufReader::new(&stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }

    let mut parts = request_line.split_whitespace();
    let is_metrics_get = parts.next() == Some("GET") && parts.next() == Some("/metrics");

    let response = if is_metrics_get {
        let body = metrics.encode();
        let mut head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        head.extend_from_slice(&body);
        head
    } else {
        b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec()
    };

    let _ = stream.write_all(&response);
    let _ = stream.flush();
}
