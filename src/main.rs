//! catascan CLI: thin dispatch over [`catascan::pipeline::run_scan`], with
//! the exit codes the external interface fixes (§6).

use catascan::catalog::Catalog;
use catascan::cli::Cli;
use catascan::config::ScanConfig;
use catascan::logging::setup_logging;
use catascan::pipeline::{run_scan, ScanOptions, ScanOutcome};
use clap::Parser;
use std::process::ExitCode;
use std::time::Instant;

const EXIT_OK: u8 = 0;
const EXIT_FATAL_INIT: u8 = 1;
const EXIT_INTERRUPTED: u8 = 2;
const EXIT_HEALTH_CHECK_FAILED: u8 = 3;

fn main() -> ExitCode {
    let start = Instant::now();
    let cli = Cli::parse();

    if let Err(e) = setup_logging(cli.verbose, Some(&cli.log_path)) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::from(EXIT_FATAL_INIT);
    }

    let scan_config = match ScanConfig::load(&cli.path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to load configuration: {e}");
            return ExitCode::from(EXIT_FATAL_INIT);
        }
    };

    // Health check at start (§6 exit code 3): open/create the catalog and
    // apply its schema before committing to a scan. `run_scan` reopens the
    // same database; the open is idempotent.
    if let Err(e) = Catalog::open(&cli.db_path) {
        log::error!("catalog health check failed at {}: {e}", cli.db_path.display());
        return ExitCode::from(EXIT_HEALTH_CHECK_FAILED);
    }

    let options = ScanOptions {
        machine: cli.machine_name.clone(),
        db_path: cli.db_path.clone(),
        metrics_host: cli.metrics_host.clone(),
        metrics_port: cli.metrics_port,
        num_threads: cli.threads,
        show_progress: !cli.no_progress,
    };

    match run_scan(&cli.path, scan_config, options) {
        Ok(ScanOutcome::Completed(result)) => {
            log::debug!("total time: {:?}", start.elapsed());
            if !result.failed_paths.is_empty() {
                log::warn!("{} records failed to write", result.failed_paths.len());
            }
            ExitCode::from(EXIT_OK)
        }
        Ok(ScanOutcome::Interrupted(result)) => {
            log::warn!(
                "scan interrupted; {} inserted, {} updated, {} failed before shutdown",
                result.inserted,
                result.updated,
                result.failed_paths.len()
            );
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            log::error!("fatal error: {e}");
            ExitCode::from(EXIT_FATAL_INIT)
        }
    }
}
