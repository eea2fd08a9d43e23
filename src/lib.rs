//! catascan: multi-device file catalog scan engine.
//!
//! Walks a directory tree (including archive interiors), computes content
//! digests, and persists an incremental catalog to SQLite behind a
//! Prometheus scrape endpoint. See [`pipeline::run_scan`] for the single
//! entry point a caller needs.

pub mod archive;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod hashing;
pub mod ignore;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod types;

pub use error::ScanError;
pub use pipeline::{run_scan, ScanOptions, ScanOutcome};
pub use types::*;
