//! Directory walker (C5) — grounded directly in the teacher's
//! `run_walk_loop`/`to_outcome_walkdir`/`spawn_walk_thread`, using
//! `walkdir` in sorted-per-directory mode only. The teacher's `jwalk`
//! parallel-walk path is dropped: this spec requires deterministic
//! lexicographic, depth-first order, which a parallel walk cannot
//! guarantee.

use super::context::PipelineContext;
use crossbeam_channel::Sender;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use walkdir::WalkDir;

pub fn spawn_walk_thread(path_tx: Sender<PathBuf>, ctx: PipelineContext) -> JoinHandle<usize> {
    thread::spawn(move || run_walk_loop(path_tx, ctx))
}

fn run_walk_loop(path_tx: Sender<PathBuf>, ctx: PipelineContext) -> usize {
    let mut count = 0usize;
    let walker = WalkDir::new(&ctx.root)
        .follow_links(false)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter()
        .filter_entry(|entry| {
            entry.path() == ctx.root
                || !ctx.ignore.excluded(entry.path(), entry.file_type().is_dir())
        });

    for entry in walker {
        if ctx.cancel.load(Ordering::Relaxed) {
            break;
        }
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                log::warn!("traversal error: {}", err);
                ctx.metrics.inc_errors("dir_iter");
                continue;
            }
        };

        let path = entry.path();

        if entry.file_type().is_dir() {
            // The root itself counts as an entered directory (§8 scenario 1:
            // an empty root still reports `directories_scanned_total=1`).
            ctx.metrics.inc_directories_scanned();
            continue;
        }
        if path == ctx.root || !entry.file_type().is_file() {
            continue;
        }

        if path_tx.send(path.to_path_buf()).is_err() {
            break;
        }
        count += 1;
        ctx.enqueued.fetch_add(1, Ordering::Relaxed);
    }
    drop(path_tx);
    count
}
