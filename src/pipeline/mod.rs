//! Pipeline components: shared context, the directory walker (C5), scan
//! workers (C6 decision + C2/C4 hashing), the batch writer (C7), and the
//! coordinator (C8) that wires them together.

pub mod context;
pub mod coordinator;
pub mod walk;
pub mod worker;
pub mod writer;

pub use context::{create_pipeline_channels, PipelineChannels, PipelineContext};
pub use coordinator::{run_scan, ScanOptions, ScanOutcome};
pub use walk::spawn_walk_thread;
pub use worker::spawn_workers;
pub use writer::spawn_writer;
