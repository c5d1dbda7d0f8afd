//! Fingerprint revalidation: touched files stay valid, edits go stale.

use serde_json::json;
use std::fs::{FileTimes, OpenOptions};
use std::time::{Duration, SystemTime};

use vasco::cache::{CacheStore, CacheValidity, Fingerprint};

fn bump_mtime(path: &std::path::Path, offset: Duration) {
    let file = OpenOptions::new().write(true).open(path).unwrap();
    let times = FileTimes::new().set_modified(SystemTime::now() + offset);
    file.set_times(times).unwrap();
}

#[test]
fn test_capture_records_size_and_mtime() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.c");
    std::fs::write(&path, "int main() { return 0; }").unwrap();

    let fingerprint = Fingerprint::capture(&path).unwrap();
    assert_eq!(fingerprint.size, 24);
    assert!(fingerprint.content_hash.is_none());

    let hashed = Fingerprint::capture_with_hash(&path).unwrap();
    assert!(hashed.content_hash.is_some());
    assert_eq!(hashed.size, fingerprint.size);
}

#[test]
fn test_touched_file_revalidates_by_hash() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("main.c");
    std::fs::write(&source, "int main() { return 0; }").unwrap();
    let store = CacheStore::open(dir.path()).unwrap();
    store.store("k", &source, &json!({"v": 1})).unwrap();

    // New mtime, identical bytes.
    bump_mtime(&source, Duration::from_secs(7));
    let entry = store.lookup("k").unwrap().unwrap();
    assert_eq!(store.check_validity(&entry), CacheValidity::ValidTouched);
}

#[test]
fn test_mtime_refresh_short_circuits_next_check() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("main.c");
    std::fs::write(&source, "int main() { return 0; }").unwrap();
    let store = CacheStore::open(dir.path()).unwrap();
    store.store("k", &source, &json!({"v": 1})).unwrap();

    bump_mtime(&source, Duration::from_secs(7));
    store.refresh_mtime("k").unwrap();
    let entry = store.lookup("k").unwrap().unwrap();
    // Stored mtime now matches; no hashing needed.
    assert_eq!(store.check_validity(&entry), CacheValidity::Valid);
}

#[test]
fn test_same_size_edit_detected_by_hash() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("main.c");
    std::fs::write(&source, "int a() { return 1; }").unwrap();
    let store = CacheStore::open(dir.path()).unwrap();
    store.store("k", &source, &json!({"v": 1})).unwrap();

    // Same byte length, different content.
    std::fs::write(&source, "int b() { return 2; }").unwrap();
    let entry = store.lookup("k").unwrap().unwrap();
    assert_eq!(store.check_validity(&entry), CacheValidity::Stale);
}

#[test]
fn test_size_change_is_stale_without_hashing() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("main.c");
    std::fs::write(&source, "int main() { return 0; }").unwrap();
    let store = CacheStore::open(dir.path()).unwrap();
    store.store("k", &source, &json!({"v": 1})).unwrap();

    std::fs::write(&source, "int main() { return 0; } // longer now").unwrap();
    let entry = store.lookup("k").unwrap().unwrap();
    assert_eq!(store.check_validity(&entry), CacheValidity::Stale);
}

#[test]
fn test_stale_entry_count() {
    let dir = tempfile::tempdir().unwrap();
    let fresh = dir.path().join("fresh.c");
    let edited = dir.path().join("edited.c");
    std::fs::write(&fresh, "int f() {}").unwrap();
    std::fs::write(&edited, "int e() {}").unwrap();
    let store = CacheStore::open(dir.path()).unwrap();
    store.store("fresh", &fresh, &json!({})).unwrap();
    store.store("edited", &edited, &json!({})).unwrap();

    std::fs::write(&edited, "int e() { return 1; }").unwrap();
    assert_eq!(store.stale_entries().unwrap(), 1);
}
