#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

mod common;

use bucket_fs::fs::{FsError, NodeKind, OpenFlags, ROOT_ID};

use common::{Harness, caller, lookup_path, read_to_end};

/// Listing a directory materializes placeholders carrying the remote size,
/// without downloading any content.
#[tokio::test(flavor = "multi_thread")]
async fn listing_materializes_placeholders() {
    let h = Harness::new();
    h.store.put_object("data/a.txt", "hello");
    h.store.put_object("data/nested/b.txt", "world!");

    let root = h.fs.readdir(ROOT_ID).await.expect("readdir root");
    assert_eq!(root.len(), 1);
    assert_eq!(root[0].name, "data");
    assert_eq!(root[0].kind, NodeKind::Directory);

    let data = lookup_path(&h.fs, "data").await.expect("lookup data");
    let entries = h.fs.readdir(data.ino).await.expect("readdir data");
    let names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
    assert_eq!(names, ["a.txt", "nested"]);

    let a = lookup_path(&h.fs, "data/a.txt").await.expect("lookup a.txt");
    assert_eq!(a.kind, NodeKind::RegularFile);
    assert_eq!(a.size, 5, "placeholder must carry the remote size");

    assert_eq!(h.store.list_calls(), 2);
    assert_eq!(h.store.get_calls(), 0, "listing must not download content");
}

/// A directory is listed remotely exactly once; later reads come from the
/// mirror.
#[tokio::test(flavor = "multi_thread")]
async fn relisting_hits_the_mirror() {
    let h = Harness::new();
    h.store.put_object("a.txt", "hello");

    for _ in 0..3 {
        let entries = h.fs.readdir(ROOT_ID).await.expect("readdir");
        assert_eq!(entries.len(), 1);
    }
    assert_eq!(h.store.list_calls(), 1);
}

/// Opening a file downloads it once; the placeholder is replaced by the
/// real content and stays local afterwards.
#[tokio::test(flavor = "multi_thread")]
async fn open_downloads_content_once() {
    let h = Harness::new();
    h.store.put_object("a.txt", "hello remote");

    let content = read_to_end(&h.fs, "a.txt").await.expect("first read");
    assert_eq!(&content[..], b"hello remote");
    assert_eq!(h.store.get_calls(), 1);

    let content = read_to_end(&h.fs, "a.txt").await.expect("second read");
    assert_eq!(&content[..], b"hello remote");
    assert_eq!(h.store.get_calls(), 1, "content must not be re-downloaded");
}

/// An entry authored through the mount shadows a remote object of the same
/// name: hydration never overwrites local state.
#[tokio::test(flavor = "multi_thread")]
async fn local_entries_win_over_remote() {
    let h = Harness::new();
    h.store.put_object("a.txt", "remote content");

    let (_, fh) = h
        .fs
        .create(
            ROOT_ID,
            "a.txt".as_ref(),
            0o644,
            0,
            OpenFlags::RDWR,
            caller(),
        )
        .await
        .expect("create");
    h.fs.write(fh, 0, b"local content").await.expect("write");
    h.fs.release(fh).await.expect("release");

    let entries = h.fs.readdir(ROOT_ID).await.expect("readdir");
    assert_eq!(entries.len(), 1);

    let content = read_to_end(&h.fs, "a.txt").await.expect("read");
    assert_eq!(&content[..], b"local content");
    assert_eq!(h.store.get_calls(), 0, "local file must never be fetched");
}

/// A name absent both locally and remotely resolves to `NotFound` after one
/// listing attempt.
#[tokio::test(flavor = "multi_thread")]
async fn absent_name_is_not_found() {
    let h = Harness::new();
    h.store.put_object("a.txt", "hello");

    let err = lookup_path(&h.fs, "missing.txt")
        .await
        .expect_err("should not resolve");
    assert!(matches!(err, FsError::NotFound));
    assert_eq!(i32::from(err), libc::ENOENT);
    assert_eq!(h.store.list_calls(), 1);
}

/// The reserved bookkeeping name does not exist through the mount, even when
/// a directory by that name is physically present in the mirror.
#[tokio::test(flavor = "multi_thread")]
async fn reserved_name_is_opaque() {
    let h = Harness::new();
    std::fs::create_dir(h.mirror.join(".bucketfs")).expect("mkdir");

    let err = h
        .fs
        .lookup(ROOT_ID, ".bucketfs".as_ref())
        .await
        .expect_err("reserved name must not resolve");
    assert!(matches!(err, FsError::NotFound));

    let entries = h.fs.readdir(ROOT_ID).await.expect("readdir");
    assert!(
        entries.iter().all(|e| e.name != ".bucketfs"),
        "reserved name must be filtered from listings"
    );

    let err = h
        .fs
        .mkdir(ROOT_ID, ".bucketfs".as_ref(), 0o755, 0, caller())
        .await
        .expect_err("reserved name must not be creatable");
    assert!(matches!(err, FsError::PermissionDenied));

    let err = h
        .fs
        .unlink(ROOT_ID, ".bucketfs".as_ref())
        .await
        .expect_err("reserved name must not be removable");
    assert!(matches!(err, FsError::NotFound));
}

/// A remote prefix named like the reserved directory is skipped during
/// hydration.
#[tokio::test(flavor = "multi_thread")]
async fn reserved_remote_prefix_is_skipped() {
    let h = Harness::new();
    h.store.put_object(".bucketfs/state", "not for the mount");
    h.store.put_object("a.txt", "hello");

    let entries = h.fs.readdir(ROOT_ID).await.expect("readdir");
    let names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
    assert_eq!(names, ["a.txt"]);
}

/// A mount rooted at a key prefix sees only that subtree: listings are
/// issued under the prefix, downloads use fully prefixed keys, and sibling
/// prefixes never leak in.
#[tokio::test(flavor = "multi_thread")]
async fn prefixed_mount_end_to_end() {
    let h = Harness::with_prefix("data/");
    h.store.put_object("data/report.csv", "id,total\n1,9\n");
    h.store.put_object("data/archive/old.csv", "id,total\n");
    h.store.put_object("other/secret.txt", "outside the mount");

    let root = h.fs.readdir(ROOT_ID).await.expect("readdir root");
    let names: Vec<_> = root.iter().map(|e| e.name.clone()).collect();
    assert_eq!(names, ["archive", "report.csv"]);
    assert_eq!(h.store.list_calls(), 1);

    let content = read_to_end(&h.fs, "report.csv").await.expect("read");
    assert_eq!(&content[..], b"id,total\n1,9\n");
    assert_eq!(h.store.get_calls(), 1, "one download, under the full key");

    let nested = read_to_end(&h.fs, "archive/old.csv")
        .await
        .expect("read nested");
    assert_eq!(&nested[..], b"id,total\n");
    assert_eq!(h.store.list_calls(), 2, "one listing per directory");
    assert_eq!(h.store.get_calls(), 2);

    let err = lookup_path(&h.fs, "other").await.expect_err("out of scope");
    assert!(matches!(err, FsError::NotFound));
}

/// Opening a directory as a file is refused.
#[tokio::test(flavor = "multi_thread")]
async fn open_directory_is_refused() {
    let h = Harness::new();
    h.store.put_object("data/a.txt", "hello");

    let data = lookup_path(&h.fs, "data").await.expect("lookup data");
    let err = h
        .fs
        .open(data.ino, OpenFlags::RDONLY)
        .await
        .expect_err("directory open should fail");
    assert!(matches!(err, FsError::IsADirectory));
    assert_eq!(i32::from(err), libc::EISDIR);
}
