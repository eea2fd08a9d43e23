//! Hasher (C2): one pass over a byte stream producing (size, md5, sha1,
//! sha256). Mmap above a size threshold, buffered reads below it — the
//! same split the teacher uses for its single blake3 digest.

use crate::config::HashingConsts;
use crate::error::ScanError;
use digest::Digest;
use md5::Md5;
use memmap2::Mmap;
use sha1::Sha1;
use sha2::Sha256;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// The three digests plus the observed byte count.
pub struct Digests {
    pub size: u64,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

struct Hashers {
    md5: Md5,
    sha1: Sha1,
    sha256: Sha256,
}

impl Hashers {
    fn new() -> Self {
        Hashers {
            md5: Md5::new(),
            sha1: Sha1::new(),
            sha256: Sha256::new(),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        self.md5.update(chunk);
        self.sha1.update(chunk);
        self.sha256.update(chunk);
    }

    fn finish(self, size: u64) -> Digests {
        Digests {
            size,
            md5: hex::encode(self.md5.finalize()),
            sha1: hex::encode(self.sha1.finalize()),
            sha256: hex::encode(self.sha256.finalize()),
        }
    }
}

/// Hash a regular file on disk, choosing mmap vs. buffered reads by size.
pub fn hash_file(path: &Path, size: u64) -> Result<Digests, ScanError> {
    let file = File::open(path).map_err(|source| ScanError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hashers = Hashers::new();
    if size > HashingConsts::HASH_MMAP_THRESHOLD {
        let mmap = unsafe { Mmap::map(&file) }.map_err(|source| ScanError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        hashers.update(&mmap);
    } else {
        let mut reader =
            std::io::BufReader::with_capacity(HashingConsts::HASH_READ_CHUNK_SIZE, file);
        let mut buffer = vec![0u8; HashingConsts::HASH_READ_CHUNK_SIZE];
        loop {
            let n = reader
                .read(&mut buffer)
                .map_err(|source| ScanError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
            if n == 0 {
                break;
            }
            hashers.update(&buffer[..n]);
        }
    }
    Ok(hashers.finish(size))
}

/// Hash an arbitrary byte stream (used for archive entries, where there is
/// no path to open — only the already-opened entry reader). `expected_size`,
/// when given, is checked against the observed count after the stream is
/// exhausted.
pub fn hash_stream<R: Read>(
    mut reader: R,
    expected_size: Option<u64>,
) -> std::io::Result<Digests> {
    let mut hashers = Hashers::new();
    let mut buffer = vec![0u8; HashingConsts::HASH_READ_CHUNK_SIZE];
    let mut size: u64 = 0;
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hashers.update(&buffer[..n]);
        size += n as u64;
    }
    if let Some(expected) = expected_size
        && expected != size
    {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("size mismatch: expected {expected}, observed {size}"),
        ));
    }
    Ok(hashers.finish(size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_has_well_known_digests() {
        let d = hash_stream(&b""[..], None).unwrap();
        assert_eq!(d.size, 0);
        assert_eq!(d.md5, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(d.sha1, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(
            d.sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85"
        );
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let err = hash_stream(&b"hello"[..], Some(10)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
