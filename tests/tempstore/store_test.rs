//! Temp-download ownership and the orphan sweep.

use std::time::Duration;

use tempfile::tempdir;
use warelay::tempstore::{sweep_orphans, TempDownload, DOWNLOAD_PREFIX};

#[test]
fn release_deletes_the_file() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{DOWNLOAD_PREFIX}abc.tmp"));
    std::fs::write(&path, b"payload").expect("write");

    let handle = TempDownload::adopt(path.clone(), 7, None);
    handle.release();
    assert!(!path.exists(), "release must delete the file");
}

#[test]
fn dropping_an_unreleased_handle_also_deletes() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{DOWNLOAD_PREFIX}drop.tmp"));
    std::fs::write(&path, b"payload").expect("write");

    {
        let _handle = TempDownload::adopt(path.clone(), 7, None);
        // Early exit path: handle dropped without release().
    }
    assert!(!path.exists(), "drop must delete the file");
}

#[test]
fn sweep_matches_only_the_download_prefix() {
    let dir = tempdir().expect("tempdir");
    let orphan = dir.path().join(format!("{DOWNLOAD_PREFIX}old.tmp"));
    let unrelated = dir.path().join("keep-me.txt");
    std::fs::write(&orphan, b"x").expect("write orphan");
    std::fs::write(&unrelated, b"x").expect("write unrelated");

    // A zero TTL makes every prefixed file an orphan.
    let removed = sweep_orphans(dir.path(), Duration::ZERO);
    assert_eq!(removed, 1);
    assert!(!orphan.exists());
    assert!(unrelated.exists());
}

#[test]
fn sweep_respects_the_ttl() {
    let dir = tempdir().expect("tempdir");
    let fresh = dir.path().join(format!("{DOWNLOAD_PREFIX}fresh.tmp"));
    std::fs::write(&fresh, b"x").expect("write");

    let removed = sweep_orphans(dir.path(), Duration::from_secs(3_600));
    assert_eq!(removed, 0);
    assert!(fresh.exists());
}

#[test]
fn sweep_of_missing_directory_is_a_noop() {
    let dir = tempdir().expect("tempdir");
    let missing = dir.path().join("nope");
    assert_eq!(sweep_orphans(&missing, Duration::ZERO), 0);
}
