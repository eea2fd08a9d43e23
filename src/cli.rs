//! CLI surface (§6) — grounded on the teacher's `engine::arg_parser::Cli`
//! (`clap` derive, short+long flags, positional path, `value_name`).

use clap::Parser;
use std::path::PathBuf;

/// Multi-device file catalog scan engine: walk a tree, hash unchanged-aware,
/// descend into archives, and persist an incremental catalog.
#[derive(Parser, Debug)]
#[command(name = "catascan")]
#[command(about = "Scan a directory tree into a content-addressed file catalog.")]
pub struct Cli {
    /// Root directory to scan.
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Label stored in every written FileRecord, identifying this host.
    #[arg(long, default_value = "unknown-host")]
    pub machine_name: String,

    /// Catalog file location.
    #[arg(long, value_name = "DB", default_value = "indexer.db")]
    pub db_path: PathBuf,

    /// Scan log file.
    #[arg(long, value_name = "LOG", default_value = "indexer.log")]
    pub log_path: PathBuf,

    /// Bind address for the metrics endpoint.
    #[arg(long, default_value = "0.0.0.0")]
    pub metrics_host: String,

    /// Bind port for the metrics endpoint. 0 auto-selects starting at 9000;
    /// omit to disable the endpoint entirely.
    #[arg(long, value_name = "PORT")]
    pub metrics_port: Option<u16>,

    /// Worker thread count. Default: min(available parallelism, 8).
    #[arg(long)]
    pub threads: Option<usize>,

    /// Verbose (debug-level) logging.
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Suppress the progress bar (useful when stderr isn't a terminal).
    #[arg(long)]
    pub no_progress: bool,
}
