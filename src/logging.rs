//! Logging setup: colored level-tagged stderr output (the teacher's own
//! style) plus a file sink, since the external interface requires a
//! `--log-path` that the teacher never needed.

use colored::Colorize;
use env_logger::Builder;
use log::Level;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Install the global logger. `verbose` raises this crate's own level to
/// Debug; dependencies stay at Warn. `log_path`, when present, tees every
/// record to that file in addition to the colored stderr line.
pub fn setup_logging(verbose: bool, log_path: Option<&Path>) -> anyhow::Result<()> {
    use log::LevelFilter;

    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let file = match log_path {
        Some(p) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(p)
                .map_err(|e| anyhow::anyhow!("open log file {}: {e}", p.display()))?,
        ),
        None => None,
    };
    let file = std::sync::Mutex::new(file);

    Builder::from_default_env()
        .filter_level(LevelFilter::Warn)
        .filter_module(env!("CARGO_PKG_NAME"), level)
        .format(move |buf, record| {
            let name = env!("CARGO_PKG_NAME");
            let plain = format!("[{}] {}", name, record.args());
            if let Ok(mut guard) = file.lock()
                && let Some(f) = guard.as_mut()
            {
                let _ = writeln!(f, "{}", plain);
            }

            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = match record.level() {
                        Level::Warn => "WARN".yellow(),
                        Level::Error => "ERROR".red(),
                        _ => unreachable!(),
                    };
                    let path = record.target().to_string().white();
                    format!("[{} {} {}] {}", name.cyan(), level_str, path, record.args())
                }
                _ => format!("[{}] {}", name.cyan(), record.args()),
            };
            writeln!(buf, "{}", line)
        })
        .init();

    Ok(())
}
