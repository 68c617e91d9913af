//! State folder durability tests

mod helpers;

use helpers::cid;
use tempfile::TempDir;
use tza_archiver::state::{ERRORS_FILE, PROCESSED_FILE};
use tza_archiver::StateStore;

#[test]
fn test_mark_survives_reload() {
    let dir = TempDir::new().unwrap();

    let store = StateStore::load(dir.path());
    store.mark_processed(&cid(1)).unwrap();
    store.mark_errored(&cid(2)).unwrap();
    // No flush: each mark is already on disk
    drop(store);

    let reloaded = StateStore::load(dir.path());
    assert!(reloaded.is_processed(&cid(1)));
    assert!(reloaded.is_errored(&cid(2)));
    assert_eq!(reloaded.counts(), (1, 1));
}

#[test]
fn test_no_temp_files_left_behind() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::load(dir.path());
    for n in 0..5 {
        store.mark_processed(&cid(n)).unwrap();
    }

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec![PROCESSED_FILE.to_string()]);
}

#[test]
fn test_corrupt_processed_file_is_tolerated() {
    let dir = TempDir::new().unwrap();
    let errored = cid(7);
    std::fs::write(dir.path().join(PROCESSED_FILE), "[\"QmTrunc").unwrap();
    std::fs::write(
        dir.path().join(ERRORS_FILE),
        serde_json::to_string(&vec![errored.to_string()]).unwrap(),
    )
    .unwrap();

    let store = StateStore::load(dir.path());

    assert!(store.snapshot().processed().is_empty());
    assert!(store.is_errored(&errored));
    assert_eq!(store.counts(), (0, 1));
}

#[test]
fn test_corrupt_file_is_replaced_on_next_mark() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(PROCESSED_FILE), "not json at all").unwrap();

    let store = StateStore::load(dir.path());
    store.mark_processed(&cid(1)).unwrap();

    let content = std::fs::read_to_string(dir.path().join(PROCESSED_FILE)).unwrap();
    let stored: Vec<String> = serde_json::from_str(&content).unwrap();
    assert_eq!(stored, vec![cid(1).to_string()]);
}

#[test]
fn test_concurrent_marks_are_all_persisted() {
    let dir = TempDir::new().unwrap();
    let store = std::sync::Arc::new(StateStore::load(dir.path()));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = std::sync::Arc::clone(&store);
            std::thread::spawn(move || {
                for n in 0..10 {
                    store.mark_processed(&cid(t * 10 + n)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let reloaded = StateStore::load(dir.path());
    assert_eq!(reloaded.counts(), (80, 0));
}
