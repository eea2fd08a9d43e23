//! End-to-end pipeline tests: `run_scan` over real temporary directories,
//! covering the ADD/MOD/SKIP contract, content dedup, and archive descent.
//! No checked-in fixtures — every archive and tree is built in the test
//! itself with `tempfile`/`zip`, per the external interface's own
//! no-binary-fixtures stance on test tooling.

use catascan::catalog::Catalog;
use catascan::config::ScanConfig;
use catascan::pipeline::{run_scan, ScanOptions, ScanOutcome};
use catascan::Operation;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

fn scan_opts(db_path: PathBuf) -> ScanOptions {
    ScanOptions {
        machine: "test-host".to_string(),
        db_path,
        metrics_host: "127.0.0.1".to_string(),
        metrics_port: None,
        num_threads: Some(2),
        show_progress: false,
    }
}

fn set_mtime(path: &Path, secs_from_epoch: u64) {
    let file = fs::File::options().write(true).open(path).unwrap();
    let t = SystemTime::UNIX_EPOCH + Duration::from_secs(secs_from_epoch);
    file.set_times(fs::FileTimes::new().set_modified(t)).unwrap();
}

#[test]
fn empty_root_completes_with_nothing_written() {
    let root = tempdir().unwrap();
    let db_dir = tempdir().unwrap();
    let db_path = db_dir.path().join("indexer.db");

    let config = ScanConfig::load(root.path()).unwrap();
    let outcome = run_scan(root.path(), config, scan_opts(db_path)).unwrap();

    match outcome {
        ScanOutcome::Completed(result) => {
            assert_eq!(result.inserted, 0);
            assert_eq!(result.updated, 0);
            assert!(result.failed_paths.is_empty());
        }
        ScanOutcome::Interrupted(_) => panic!("scan of an empty tree should complete, not be interrupted"),
    }
}

#[test]
fn identical_files_dedup_to_one_hash_row() {
    let root = tempdir().unwrap();
    fs::write(root.path().join("a.bin"), b"same bytes").unwrap();
    fs::write(root.path().join("b.bin"), b"same bytes").unwrap();

    let db_dir = tempdir().unwrap();
    let db_path = db_dir.path().join("indexer.db");
    let config = ScanConfig::load(root.path()).unwrap();
    let outcome = run_scan(root.path(), config, scan_opts(db_path.clone())).unwrap();

    let result = match outcome {
        ScanOutcome::Completed(r) => r,
        ScanOutcome::Interrupted(_) => panic!("unexpected interruption"),
    };
    assert_eq!(result.inserted, 2);

    let catalog = Catalog::open(&db_path).unwrap();
    let conn = catalog.connect().unwrap();
    let stats = Catalog::statistics(&conn).unwrap();
    assert_eq!(stats.hash_count, 1);
    assert_eq!(stats.file_count, 2);

    let groups = Catalog::duplicates(&conn, 2).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].paths.len(), 2);
}

#[test]
fn unchanged_corpus_rescans_to_zero_writes() {
    let root = tempdir().unwrap();
    fs::write(root.path().join("a.bin"), b"unchanging content").unwrap();
    fs::write(root.path().join("b.bin"), b"also unchanging").unwrap();

    let db_dir = tempdir().unwrap();
    let db_path = db_dir.path().join("indexer.db");
    let config = ScanConfig::load(root.path()).unwrap();

    let first = run_scan(root.path(), config.clone(), scan_opts(db_path.clone())).unwrap();
    match first {
        ScanOutcome::Completed(r) => assert_eq!(r.inserted, 2),
        ScanOutcome::Interrupted(_) => panic!("unexpected interruption"),
    }

    let second = run_scan(root.path(), config, scan_opts(db_path)).unwrap();
    match second {
        ScanOutcome::Completed(r) => {
            assert_eq!(r.inserted, 0);
            assert_eq!(r.updated, 0);
        }
        ScanOutcome::Interrupted(_) => panic!("unexpected interruption"),
    }
}

#[test]
fn modifying_one_file_produces_exactly_one_mod() {
    let root = tempdir().unwrap();
    let changed = root.path().join("changed.bin");
    let stable = root.path().join("stable.bin");
    fs::write(&changed, b"version one").unwrap();
    fs::write(&stable, b"never touched").unwrap();
    set_mtime(&changed, 1_700_000_000);
    set_mtime(&stable, 1_700_000_000);

    let db_dir = tempdir().unwrap();
    let db_path = db_dir.path().join("indexer.db");
    let config = ScanConfig::load(root.path()).unwrap();
    run_scan(root.path(), config.clone(), scan_opts(db_path.clone())).unwrap();

    fs::write(&changed, b"version two, longer than before").unwrap();
    set_mtime(&changed, 1_700_000_500);

    let outcome = run_scan(root.path(), config, scan_opts(db_path.clone())).unwrap();
    let result = match outcome {
        ScanOutcome::Completed(r) => r,
        ScanOutcome::Interrupted(_) => panic!("unexpected interruption"),
    };
    assert_eq!(result.inserted, 0);
    assert_eq!(result.updated, 1);

    let catalog = Catalog::open(&db_path).unwrap();
    let conn = catalog.connect().unwrap();
    let (record, hash) = Catalog::lookup_by_path(&conn, &changed.to_string_lossy())
        .unwrap()
        .unwrap();
    assert_eq!(record.operation, Operation::Mod);
    assert_eq!(hash.size, b"version two, longer than before".len() as u64);
}

#[test]
fn zip_archive_entries_become_virtual_path_records() {
    let root = tempdir().unwrap();
    let archive_path = root.path().join("bundle.zip");
    {
        let file = fs::File::create(&archive_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        writer.start_file("one.txt", options).unwrap();
        writer.write_all(b"first entry").unwrap();
        writer.start_file("nested/two.txt", options).unwrap();
        writer.write_all(b"second entry").unwrap();
        writer.start_file("nested/three.txt", options).unwrap();
        writer.write_all(b"third entry, a bit longer").unwrap();
        writer.finish().unwrap();
    }

    let db_dir = tempdir().unwrap();
    let db_path = db_dir.path().join("indexer.db");
    let config = ScanConfig::load(root.path()).unwrap();
    let outcome = run_scan(root.path(), config, scan_opts(db_path.clone())).unwrap();
    let result = match outcome {
        ScanOutcome::Completed(r) => r,
        ScanOutcome::Interrupted(_) => panic!("unexpected interruption"),
    };
    assert_eq!(result.inserted, 3, "three archive entries, zero-byte entries excluded, no outer record for the archive itself beyond its entries");

    let catalog = Catalog::open(&db_path).unwrap();
    let conn = catalog.connect().unwrap();
    let archive_str = archive_path.to_string_lossy().into_owned();
    let expected_vpath = format!("{archive_str}::nested/two.txt");
    let (record, _hash) = Catalog::lookup_by_path(&conn, &expected_vpath)
        .unwrap()
        .expect("nested entry should be recorded under its virtual path");
    assert!(record.is_archived);
    assert_eq!(record.archive_path.as_deref(), Some(archive_str.as_str()));

    let tree = Catalog::tree(&conn, &format!("{archive_str}::")).unwrap();
    assert_eq!(tree.len(), 3);
}

use std::io::Write as _;
