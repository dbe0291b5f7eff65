//! Cache completeness tracking.
//!
//! [`CacheMarkers`] answers one question: is the mirror entry at a path a
//! faithful, fully hydrated copy of the remote? The hot path is an in-memory
//! concurrent set; the durable source of truth is an extended attribute on
//! the entry itself, so markers survive a remount without any index file.
//! It is safe to use from many async tasks simultaneously because every
//! method takes `&self`.

use std::path::{Path, PathBuf};

use scc::HashMap as ConcurrentHashMap;
use tracing::warn;

use crate::fs::MARKER_XATTR;

const MARKER_VALUE: &[u8] = b"1";

/// Tracks which mirror paths hold complete local copies of remote state.
///
/// For a directory the marker means "the listing has been materialized"; for
/// a file it means "the content has been downloaded" (or was authored
/// locally and has no remote original to fetch).
pub struct CacheMarkers {
    complete: ConcurrentHashMap<PathBuf, ()>,
}

impl CacheMarkers {
    /// Create a tracker with an empty in-memory set. Durable markers left by
    /// a previous process are discovered lazily through [`Self::is_complete`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            complete: ConcurrentHashMap::new(),
        }
    }

    /// Whether `path` is known to be fully hydrated.
    ///
    /// Misses in memory fall back to the xattr and promote a durable hit
    /// into the in-memory set.
    pub fn is_complete(&self, path: &Path) -> bool {
        if self.complete.read_sync(path, |_, ()| ()).is_some() {
            return true;
        }

        match xattr::get(path, MARKER_XATTR) {
            Ok(Some(value)) if value == MARKER_VALUE => {
                let _ = self.complete.insert_sync(path.to_path_buf(), ());
                true
            }
            _ => false,
        }
    }

    /// Record that `path` is fully hydrated.
    ///
    /// The durable marker is written first; if the filesystem does not
    /// support user xattrs the in-memory marker still takes effect and the
    /// path will simply re-hydrate after a remount.
    pub fn mark(&self, path: &Path) {
        if let Err(e) = xattr::set(path, MARKER_XATTR, MARKER_VALUE) {
            warn!(path = %path.display(), error = %e, "failed to persist completeness marker");
        }
        let _ = self.complete.insert_sync(path.to_path_buf(), ());
    }

    /// Forget the marker for `path`. Used when the entry is removed; the
    /// xattr dies with the entry itself.
    pub fn clear(&self, path: &Path) {
        let _ = self.complete.remove_sync(path);
    }

    /// Move the marker from `old` to `new` after a rename. The xattr travels
    /// with the inode; only the in-memory keys need fixing up. Any marker
    /// previously held by an overwritten `new` is dropped.
    pub fn rename(&self, old: &Path, new: &Path) {
        let was_complete = self.complete.remove_sync(old).is_some();
        let _ = self.complete.remove_sync(new);
        if was_complete {
            let _ = self.complete.insert_sync(new.to_path_buf(), ());
        }
    }

    /// Swap the markers of two paths after a rename-exchange.
    pub fn swap(&self, a: &Path, b: &Path) {
        let had_a = self.complete.remove_sync(a).is_some();
        let had_b = self.complete.remove_sync(b).is_some();
        if had_a {
            let _ = self.complete.insert_sync(b.to_path_buf(), ());
        }
        if had_b {
            let _ = self.complete.insert_sync(a.to_path_buf(), ());
        }
    }
}

impl Default for CacheMarkers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xattr_supported(dir: &Path) -> bool {
        let probe = dir.join(".probe");
        std::fs::write(&probe, b"x").expect("probe file");
        xattr::set(&probe, "user.bucketfs.probe", b"1").is_ok()
    }

    #[tokio::test]
    async fn unmarked_path_is_incomplete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("f");
        std::fs::write(&file, b"data").expect("write");

        let markers = CacheMarkers::new();
        assert!(!markers.is_complete(&file), "fresh file should be unmarked");
    }

    #[tokio::test]
    async fn mark_then_query_is_complete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("f");
        std::fs::write(&file, b"data").expect("write");

        let markers = CacheMarkers::new();
        markers.mark(&file);
        assert!(markers.is_complete(&file), "marked file should be complete");
    }

    #[tokio::test]
    async fn marker_survives_new_tracker_via_xattr() {
        let dir = tempfile::tempdir().expect("tempdir");
        if !xattr_supported(dir.path()) {
            eprintln!("skipping: filesystem does not support user xattrs");
            return;
        }
        let file = dir.path().join("f");
        std::fs::write(&file, b"data").expect("write");

        let first = CacheMarkers::new();
        first.mark(&file);
        drop(first);

        let second = CacheMarkers::new();
        assert!(
            second.is_complete(&file),
            "durable marker should be visible to a fresh tracker"
        );
    }

    #[tokio::test]
    async fn clear_forgets_in_memory_marker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("f");
        std::fs::write(&file, b"data").expect("write");

        let markers = CacheMarkers::new();
        markers.mark(&file);
        std::fs::remove_file(&file).expect("remove");
        markers.clear(&file);
        assert!(
            !markers.is_complete(&file),
            "cleared path should read incomplete"
        );
    }

    #[tokio::test]
    async fn rename_moves_marker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let old = dir.path().join("old");
        let new = dir.path().join("new");
        std::fs::write(&old, b"data").expect("write");

        let markers = CacheMarkers::new();
        markers.mark(&old);
        std::fs::rename(&old, &new).expect("rename");
        markers.rename(&old, &new);

        assert!(!markers.is_complete(&old), "old path should be forgotten");
        assert!(markers.is_complete(&new), "new path should carry the marker");
    }

    #[tokio::test]
    async fn rename_over_marked_target_drops_stale_marker() {
        let dir = tempfile::tempdir().expect("tempdir");
        if !xattr_supported(dir.path()) {
            eprintln!("skipping: filesystem does not support user xattrs");
            return;
        }
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        std::fs::write(&src, b"new content").expect("write src");
        std::fs::write(&dst, b"old content").expect("write dst");

        let markers = CacheMarkers::new();
        markers.mark(&dst);
        std::fs::rename(&src, &dst).expect("rename");
        markers.rename(&src, &dst);

        assert!(
            !markers.is_complete(&dst),
            "unmarked source must not inherit the overwritten target's marker"
        );
    }

    #[tokio::test]
    async fn swap_exchanges_markers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, b"a").expect("write a");
        std::fs::write(&b, b"b").expect("write b");

        let markers = CacheMarkers::new();
        markers.mark(&a);

        // Exchange the entries the long way; the xattr travels with each inode.
        let tmp = dir.path().join("tmp");
        std::fs::rename(&a, &tmp).expect("a -> tmp");
        std::fs::rename(&b, &a).expect("b -> a");
        std::fs::rename(&tmp, &b).expect("tmp -> b");
        markers.swap(&a, &b);

        assert!(markers.is_complete(&b), "marker should move to b");
        assert!(!markers.is_complete(&a), "a should no longer be marked");
    }
}
