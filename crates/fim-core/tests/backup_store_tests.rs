//! Integration tests for the snapshot store.
//!
//! Tests cover:
//!  1. Latest snapshot wins on restore
//!  2. Restored bytes equal snapshot bytes
//!  3. Empty catalog leaves the target untouched
//!  4. Retention never drops the newest snapshot
//!  5. Restore works from a fresh store instance (process restart)

use chrono::{Duration, TimeZone, Utc};
use fim_core::atomic::STAGING_PREFIX;
use fim_core::backup_store::{BackupStore, RestoreOutcome};
use fim_core::hasher::{digest_bytes, digest_file};
use std::fs;
use tempfile::tempdir;

fn store_in(dir: &std::path::Path) -> BackupStore {
    BackupStore::new(dir.join("backups"), "secret").unwrap()
}

// ─── Test 1: ordering ───────────────────────────────────────────────────────

#[test]
fn restore_picks_most_recent_snapshot() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("secret.txt");
    let store = store_in(dir.path());

    let t1 = Utc.with_ymd_and_hms(2026, 1, 31, 23, 59, 58).unwrap();
    let t2 = t1 + Duration::seconds(1);
    let t3 = t1 + Duration::days(3);
    // create out of order to prove the catalog, not insertion order, decides
    for (body, at) in [("t3", t3), ("t1", t1), ("t2", t2)] {
        fs::write(&target, body).unwrap();
        store.create_snapshot_at(&target, at).unwrap();
    }

    fs::write(&target, "garbage").unwrap();
    let outcome = store.restore_latest(&target);
    match outcome {
        RestoreOutcome::Restored { snapshot, digest } => {
            assert_eq!(snapshot.as_str(), "secret_20260203_235958");
            assert_eq!(digest, digest_bytes(b"t3"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(fs::read_to_string(&target).unwrap(), "t3");
}

// ─── Test 2: round trip ─────────────────────────────────────────────────────

#[test]
fn restored_bytes_equal_snapshot_bytes() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("secret.txt");
    let store = store_in(dir.path());

    let body: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 256) as u8).collect();
    fs::write(&target, &body).unwrap();
    let id = store.create_snapshot(&target).unwrap();

    fs::remove_file(&target).unwrap();
    let (snapshot, digest) = match store.restore_latest(&target) {
        RestoreOutcome::Restored { snapshot, digest } => (snapshot, digest),
        other => panic!("restore failed: {other:?}"),
    };
    assert_eq!(snapshot, id);
    assert_eq!(fs::read(&target).unwrap(), store.read_snapshot(&id).unwrap());
    assert_eq!(Some(digest), digest_file(&target));

    let stray = fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .any(|e| e.file_name().to_string_lossy().starts_with(STAGING_PREFIX));
    assert!(!stray);
}

// ─── Test 3: no backups ─────────────────────────────────────────────────────

#[test]
fn empty_catalog_reports_no_backups_and_leaves_target() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("secret.txt");
    let store = store_in(dir.path());
    store.ensure_store_exists().unwrap();

    fs::write(&target, "HACKED BY GHOST!\n").unwrap();
    assert_eq!(store.restore_latest(&target), RestoreOutcome::NoBackups);
    assert_eq!(fs::read_to_string(&target).unwrap(), "HACKED BY GHOST!\n");

    let missing = dir.path().join("gone.txt");
    assert_eq!(store.restore_latest(&missing), RestoreOutcome::NoBackups);
    assert!(!missing.exists());
}

#[test]
fn missing_store_directory_reports_no_backups() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("secret.txt");
    fs::write(&target, "x").unwrap();
    let store = BackupStore::new(dir.path().join("nowhere"), "secret").unwrap();
    assert_eq!(store.restore_latest(&target), RestoreOutcome::NoBackups);
}

// ─── Test 4: retention ──────────────────────────────────────────────────────

#[test]
fn prune_removes_oldest_first() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("secret.txt");
    let store = store_in(dir.path());
    let start = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();

    let mut ids = Vec::new();
    for i in 0..5 {
        fs::write(&target, format!("v{i}")).unwrap();
        ids.push(
            store
                .create_snapshot_at(&target, start + Duration::seconds(i * 10))
                .unwrap(),
        );
    }

    let removed = store.prune(3).unwrap();
    assert_eq!(removed, ids[..2].to_vec());
    let left: Vec<_> = store.catalog().unwrap().into_iter().map(|s| s.id).collect();
    assert_eq!(left, ids[2..].to_vec());

    // keep = 0 is clamped: the newest survives
    store.prune(0).unwrap();
    let left: Vec<_> = store.catalog().unwrap().into_iter().map(|s| s.id).collect();
    assert_eq!(left, vec![ids[4].clone()]);
    assert!(store.prune(1).unwrap().is_empty());
}

// ─── Test 5: restart ────────────────────────────────────────────────────────

#[test]
fn restore_survives_new_store_instance() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("secret.txt");
    fs::write(&target, "secret-A").unwrap();
    store_in(dir.path()).create_snapshot(&target).unwrap();

    fs::write(&target, "secret-B").unwrap();
    let reopened = store_in(dir.path());
    assert!(matches!(
        reopened.restore_latest(&target),
        RestoreOutcome::Restored { .. }
    ));
    assert_eq!(fs::read_to_string(&target).unwrap(), "secret-A");
}

#[test]
fn orphaned_staging_files_are_swept() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    fs::create_dir_all(store.root()).unwrap();
    let orphan = store.root().join(format!("{STAGING_PREFIX}deadbeef"));
    fs::write(&orphan, b"half").unwrap();
    store.ensure_store_exists().unwrap();
    assert!(!orphan.exists());
    assert!(store.catalog().unwrap().is_empty());
}
