//! Catalog store integration tests: dedup, incremental rescan, and the
//! search/tree/duplicates read paths, exercised against an on-disk SQLite
//! file (not `:memory:`) the way a real scan would use it.

use catascan::catalog::{open_db, Catalog};
use catascan::{Operation, PendingRecord};
use chrono::{TimeZone, Utc};
use tempfile::tempdir;

fn ts(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn add(path: &str, md5: &str, size: u64, modified: i64) -> PendingRecord {
    PendingRecord {
        path: path.to_string(),
        name: path.rsplit('/').next().unwrap_or(path).to_string(),
        size,
        md5: md5.to_string(),
        sha1: format!("sha1-{md5}"),
        sha256: format!("sha256-{md5}"),
        modified: ts(modified),
        scanned: ts(modified + 1),
        operation: Operation::Add,
        is_archived: false,
        archive_path: None,
    }
}

#[test]
fn open_creates_schema_on_disk() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("indexer.db");
    let catalog = Catalog::open(&db_path).unwrap();
    assert!(db_path.exists());
    let conn = catalog.connect().unwrap();
    let stats = Catalog::statistics(&conn).unwrap();
    assert_eq!(stats.file_count, 0);
    assert_eq!(stats.hash_count, 0);
}

#[test]
fn reopen_reuses_existing_database() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("indexer.db");
    let catalog = Catalog::open(&db_path).unwrap();
    let mut conn = catalog.connect().unwrap();
    Catalog::upsert_batch(&mut conn, &[add("/a.bin", "aaa", 10, 100)], "host1");
    drop(conn);

    let reopened = Catalog::open(&db_path).unwrap();
    let conn = reopened.connect().unwrap();
    let stats = Catalog::statistics(&conn).unwrap();
    assert_eq!(stats.file_count, 1);
}

#[test]
fn identical_content_at_two_paths_shares_one_hash_row() {
    let mut conn = open_db(std::path::Path::new(":memory:")).unwrap();
    let records = vec![add("/a.bin", "deadbeef", 10, 100), add("/b.bin", "deadbeef", 10, 100)];
    let result = Catalog::upsert_batch(&mut conn, &records, "host1");
    assert_eq!(result.inserted, 2);

    let stats = Catalog::statistics(&conn).unwrap();
    assert_eq!(stats.hash_count, 1);
    assert_eq!(stats.file_count, 2);

    let groups = Catalog::duplicates(&conn, 2).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].paths, vec!["/a.bin", "/b.bin"]);
}

#[test]
fn lookup_by_paths_returns_only_found_entries() {
    let mut conn = open_db(std::path::Path::new(":memory:")).unwrap();
    Catalog::upsert_batch(&mut conn, &[add("/a.bin", "aaa", 10, 100)], "host1");
    let found = Catalog::lookup_by_paths(
        &conn,
        &["/a.bin".to_string(), "/missing.bin".to_string()],
    )
    .unwrap();
    assert_eq!(found.len(), 1);
    assert!(found.contains_key("/a.bin"));
}

#[test]
fn search_matches_path_or_name_substring() {
    let mut conn = open_db(std::path::Path::new(":memory:")).unwrap();
    Catalog::upsert_batch(
        &mut conn,
        &[add("/data/report.pdf", "aaa", 10, 100), add("/data/photo.png", "bbb", 20, 100)],
        "host1",
    );
    let hits = Catalog::search(&conn, "report").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "/data/report.pdf");
}

#[test]
fn tree_matches_path_prefix() {
    let mut conn = open_db(std::path::Path::new(":memory:")).unwrap();
    Catalog::upsert_batch(
        &mut conn,
        &[add("/data/a/x.bin", "aaa", 10, 100), add("/data/b/y.bin", "bbb", 20, 100)],
        "host1",
    );
    let hits = Catalog::tree(&conn, "/data/a").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "/data/a/x.bin");
}

#[test]
fn mod_operation_replaces_hash_id_and_keeps_single_row() {
    let mut conn = open_db(std::path::Path::new(":memory:")).unwrap();
    Catalog::upsert_batch(&mut conn, &[add("/a.bin", "aaa", 10, 100)], "host1");

    let mut modded = add("/a.bin", "bbb", 12, 200);
    modded.operation = Operation::Mod;
    let result = Catalog::upsert_batch(&mut conn, &[modded], "host1");
    assert_eq!(result.updated, 1);

    let (record, hash) = Catalog::lookup_by_path(&conn, "/a.bin").unwrap().unwrap();
    assert_eq!(record.operation, Operation::Mod);
    assert_eq!(hash.md5, "bbb");

    let stats = Catalog::statistics(&conn).unwrap();
    assert_eq!(stats.file_count, 1, "MOD must not create a second row for the same path");
    assert_eq!(stats.hash_count, 2, "the old hash row stays, orphaned, once nothing references it");
}
