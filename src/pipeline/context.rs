//! Shared pipeline context and channel wiring — grounded in the teacher's
//! `PipelineContext`/`PipelineChannels`/`create_pipeline_channels` shape,
//! generalized with the archive-scan settings and cancellation/metrics
//! handles this spec's coordinator needs.

use crate::config::{QueueConsts, ScanConfig};
use crate::ignore::IgnoreMatcher;
use crate::metrics::Metrics;
use crate::types::PendingRecord;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Arc;

/// Context shared by the walk thread and every worker thread.
#[derive(Clone)]
pub struct PipelineContext {
    pub root: PathBuf,
    pub ignore: Arc<IgnoreMatcher>,
    pub scan: ScanConfig,
    pub machine: String,
    pub cancel: Arc<AtomicBool>,
    pub metrics: Arc<Metrics>,
    /// Monotonic count of paths the walker has enqueued so far. Read by the
    /// coordinator's progress bar at a fixed rate; never locked on a hot
    /// path (§9 "Progress bar" design note).
    pub enqueued: Arc<AtomicUsize>,
}

pub struct PipelineChannels {
    pub path_tx: Sender<PathBuf>,
    pub path_rx: Receiver<PathBuf>,
    pub record_tx: Sender<PendingRecord>,
    pub record_rx: Receiver<PendingRecord>,
}

/// A counter handed to the batch writer so the progress bar can also show
/// completion (flush) rate alongside the walker's enqueue rate.
pub type CompletedCounter = Arc<AtomicUsize>;

pub fn create_pipeline_channels() -> PipelineChannels {
    let (path_tx, path_rx) = bounded(QueueConsts::PATH_QUEUE_CAPACITY);
    let (record_tx, record_rx) = bounded(QueueConsts::RECORD_QUEUE_CAPACITY);
    PipelineChannels {
        path_tx,
        path_rx,
        record_tx,
        record_rx,
    }
}
