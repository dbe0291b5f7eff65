#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

mod common;

use bucket_fs::fs::ROOT_ID;

use common::{Harness, lookup_path, read_to_end, xattr_supported};

/// Hydrated content survives a remount: the durable marker keeps the second
/// instance from re-downloading anything.
#[tokio::test(flavor = "multi_thread")]
async fn remount_reuses_hydrated_file() {
    let h = Harness::new();
    if !xattr_supported(&h.mirror) {
        eprintln!("skipping: filesystem does not support user xattrs");
        return;
    }
    h.store.put_object("a.txt", "durable content");

    let content = read_to_end(&h.fs, "a.txt").await.expect("first mount read");
    assert_eq!(&content[..], b"durable content");
    assert_eq!(h.store.get_calls(), 1);

    let second = h.remount();
    let content = read_to_end(&second, "a.txt")
        .await
        .expect("second mount read");
    assert_eq!(&content[..], b"durable content");
    assert_eq!(
        h.store.get_calls(),
        1,
        "remount must trust the durable marker"
    );
}

/// A materialized directory listing survives a remount the same way.
#[tokio::test(flavor = "multi_thread")]
async fn remount_reuses_materialized_listing() {
    let h = Harness::new();
    if !xattr_supported(&h.mirror) {
        eprintln!("skipping: filesystem does not support user xattrs");
        return;
    }
    h.store.put_object("one.txt", "1");
    h.store.put_object("two.txt", "2");

    assert_eq!(h.fs.readdir(ROOT_ID).await.expect("readdir").len(), 2);
    assert_eq!(h.store.list_calls(), 1);

    let second = h.remount();
    assert_eq!(second.readdir(ROOT_ID).await.expect("readdir").len(), 2);
    assert_eq!(
        h.store.list_calls(),
        1,
        "remount must not re-list a complete directory"
    );
}

/// Without the durable marker (fresh in-memory state, no xattr written) a
/// placeholder file is still fetched on open after a remount.
#[tokio::test(flavor = "multi_thread")]
async fn remount_fetches_unhydrated_placeholder() {
    let h = Harness::new();
    h.store.put_object("cold.txt", "never opened");

    // Materialize the placeholder but never open it.
    lookup_path(&h.fs, "cold.txt").await.expect("lookup");
    assert_eq!(h.store.get_calls(), 0);

    let second = h.remount();
    let content = read_to_end(&second, "cold.txt").await.expect("read");
    assert_eq!(&content[..], b"never opened");
    assert_eq!(h.store.get_calls(), 1, "placeholder must still be fetched");
}
