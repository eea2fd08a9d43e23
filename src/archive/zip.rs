//! ZIP entries via `zip::ZipArchive`, grounded on the corpus's usage
//! pattern (`Gankra-uv`, `baszalmstra-rattler`): `by_index` plus `ZipFile`
//! implementing `Read` directly.

use super::{ArchiveEntry, ArchiveError};
use chrono::{DateTime, TimeZone, Utc};
use std::cell::RefCell;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use std::rc::Rc;
use zip::ZipArchive;

pub fn open(
    path: &Path,
    container_modified: DateTime<Utc>,
) -> Result<Box<dyn Iterator<Item = Result<ArchiveEntry, ArchiveError>>>, ArchiveError> {
    let file = File::open(path)?;
    let archive = ZipArchive::new(file).map_err(|e| ArchiveError::Format(e.to_string()))?;
    Ok(Box::new(ZipEntryIter {
        archive: Rc::new(RefCell::new(archive)),
        index: 0,
        container_modified,
    }))
}

struct ZipEntryIter {
    archive: Rc<RefCell<ZipArchive<File>>>,
    index: usize,
    container_modified: DateTime<Utc>,
}

impl Iterator for ZipEntryIter {
    type Item = Result<ArchiveEntry, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.index >= self.archive.borrow().len() {
                return None;
            }
            let i = self.index;
            self.index += 1;

            // Only the central-directory metadata (`name`/`size`/`is_dir`/
            // `last_modified`, already parsed when `ZipArchive::new` ran) is
            // touched here; decompression is deferred to `open_stream`, so a
            // caller can reject an oversized entry (`max_archive_file_size`)
            // before a single byte of it is read.
            let (internal_path, size, is_dir, modified) = {
                let mut archive = self.archive.borrow_mut();
                let zf = match archive.by_index(i) {
                    Ok(zf) => zf,
                    Err(e) => return Some(Err(ArchiveError::Format(e.to_string()))),
                };
                let modified =
                    dos_datetime_to_utc(zf.last_modified()).unwrap_or(self.container_modified);
                (zf.name().to_string(), zf.size(), zf.is_dir(), modified)
            };
            if is_dir || size == 0 {
                continue;
            }

            let archive = self.archive.clone();
            return Some(Ok(ArchiveEntry::new(
                internal_path,
                size,
                modified,
                move || {
                    let mut archive = archive.borrow_mut();
                    let mut zf = archive
                        .by_index(i)
                        .map_err(|e| ArchiveError::Format(e.to_string()))?;
                    let mut buf = Vec::with_capacity(zf.size() as usize);
                    zf.read_to_end(&mut buf).map_err(ArchiveError::Read)?;
                    Ok(Box::new(Cursor::new(buf)) as Box<dyn Read>)
                },
            )));
        }
    }
}

/// ZIP's DOS-epoch timestamp has no timezone; treated as UTC, matching the
/// corpus's other naive-timestamp handling.
fn dos_datetime_to_utc(dt: zip::DateTime) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(
        dt.year() as i32,
        dt.month() as u32,
        dt.day() as u32,
        dt.hour() as u32,
        dt.minute() as u32,
        dt.second() as u32,
    )
    .single()
}
