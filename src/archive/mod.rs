//! Archive readers (C4): a closed set of format handlers behind one
//! contract, dispatched by extension the way the teacher dispatches
//! `DriveType` — a small match, not a trait-object registry, since the
//! set of formats is fixed at compile time.

mod rar;
mod tar;
mod zip;

use chrono::{DateTime, Utc};
use std::io::Read;
use std::path::Path;

/// One entry inside an archive: metadata the caller can inspect (and gate
/// on, e.g. `max_archive_file_size`) before deciding whether to pay for the
/// bytes at all. `open_stream` is the only way to get at the entry's
/// content; it consumes the entry and may be called at most once (§4.4).
/// An entry dropped without calling `open_stream` never reads or
/// decompresses a single byte of its content — readers that need to know
/// this (the thread-backed TAR reader, so it can move its cursor past the
/// unread entry) are notified via the optional skip hook.
pub struct ArchiveEntry {
    pub internal_path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    open: Option<Box<dyn FnOnce() -> Result<Box<dyn Read>, ArchiveError>>>,
    on_skip: Option<Box<dyn FnOnce()>>,
}

impl ArchiveEntry {
    pub fn new(
        internal_path: String,
        size: u64,
        modified: DateTime<Utc>,
        open: impl FnOnce() -> Result<Box<dyn Read>, ArchiveError> + 'static,
    ) -> ArchiveEntry {
        ArchiveEntry {
            internal_path,
            size,
            modified,
            open: Some(Box::new(open)),
            on_skip: None,
        }
    }

    /// Run `on_skip` if this entry is dropped without `open_stream` ever
    /// being called. Readers whose entries come from a stream that must be
    /// advanced past unread content (TAR) use this; readers that can
    /// re-seek by index (ZIP) don't need it.
    pub fn on_skip(mut self, on_skip: impl FnOnce() + 'static) -> ArchiveEntry {
        self.on_skip = Some(Box::new(on_skip));
        self
    }

    /// Obtain the entry's byte stream. Consumes the entry; calling this is
    /// how a caller signals "I want this entry's content" after inspecting
    /// `size`/`modified`/`internal_path`.
    pub fn open_stream(mut self) -> Result<Box<dyn Read>, ArchiveError> {
        self.on_skip = None;
        (self.open.take().expect("open_stream invoked more than once"))()
    }
}

impl Drop for ArchiveEntry {
    fn drop(&mut self) {
        if let Some(on_skip) = self.on_skip.take() {
            on_skip();
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("unsupported archive: {0}")]
    Unsupported(String),
    #[error("read error: {0}")]
    Read(#[from] std::io::Error),
    #[error("archive format error: {0}")]
    Format(String),
}

/// The label used in `archives_scanned_total{type}`/`archive_entries_total{type}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    Rar,
}

impl ArchiveKind {
    pub fn label(&self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::Tar => "tar",
            ArchiveKind::Rar => "rar",
        }
    }

    /// Classify by extension; `None` means "not a recognized archive" and
    /// the path is treated as a regular file.
    pub fn for_path(path: &Path) -> Option<ArchiveKind> {
        let lower = path.to_string_lossy().to_lowercase();
        if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if lower.ends_with(".tar")
            || lower.ends_with(".tar.gz")
            || lower.ends_with(".tgz")
            || lower.ends_with(".tar.xz")
            || lower.ends_with(".tar.bz2")
        {
            Some(ArchiveKind::Tar)
        } else if lower.ends_with(".rar") {
            Some(ArchiveKind::Rar)
        } else {
            None
        }
    }
}

/// Enumerate the entries of `path` (already classified as `kind`). Each
/// yielded entry's reader may be consumed at most once by the caller.
/// Directories and zero-byte metadata entries are skipped by the
/// implementation, never yielded here. `container_modified` is the
/// archive file's own mtime, used as a fallback for formats/entries that
/// don't carry a usable per-entry timestamp (RAR, and any zip/tar entry
/// whose stored timestamp fails to parse).
pub fn entries(
    path: &Path,
    kind: ArchiveKind,
    container_modified: DateTime<Utc>,
) -> Result<Box<dyn Iterator<Item = Result<ArchiveEntry, ArchiveError>>>, ArchiveError> {
    match kind {
        ArchiveKind::Zip => zip::open(path, container_modified),
        ArchiveKind::Tar => tar::open(path, container_modified),
        ArchiveKind::Rar => rar::open(path, container_modified),
    }
}

/// Build the virtual path `<archive>::<internal>` (§3/§6), always using
/// `/` for the internal-path portion regardless of host OS.
pub fn virtual_path(archive_path: &Path, internal_path: &str) -> String {
    format!(
        "{}::{}",
        archive_path.display(),
        internal_path.replace('\\', "/")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_extensions() {
        assert_eq!(ArchiveKind::for_path(Path::new("a.zip")), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::for_path(Path::new("a.tar.gz")), Some(ArchiveKind::Tar));
        assert_eq!(ArchiveKind::for_path(Path::new("a.rar")), Some(ArchiveKind::Rar));
        assert_eq!(ArchiveKind::for_path(Path::new("a.txt")), None);
    }

    #[test]
    fn virtual_path_uses_double_colon_and_forward_slashes() {
        let vp = virtual_path(Path::new("/data/a.zip"), "dir/y.txt");
        assert_eq!(vp, "/data/a.zip::dir/y.txt");
    }
}
