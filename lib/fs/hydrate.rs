//! The hydration engine: remote listings and objects become mirror entries.
//!
//! Hydration is idempotent and races are resolved per path: a concurrent
//! hash map hands out one async mutex per mount-relative path, the
//! completeness marker is re-checked under the lock, and exactly one task
//! performs the remote fetch while the rest wait and then observe the
//! marker. Lock entries are never removed; the table is bounded by the
//! number of distinct paths touched over the mount's life.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt as _;
use scc::HashMap as ConcurrentHashMap;
use tokio::io::AsyncWriteExt as _;
use tracing::{debug, instrument, warn};

use crate::fs::node::RootContext;
use crate::fs::tracker::CacheMarkers;
use crate::fs::{FsError, RESERVED_DIR};

pub struct Hydrator {
    ctx: Arc<RootContext>,
    markers: Arc<CacheMarkers>,
    locks: ConcurrentHashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>,
}

impl Hydrator {
    #[must_use]
    pub fn new(ctx: Arc<RootContext>, markers: Arc<CacheMarkers>) -> Self {
        Self {
            ctx,
            markers,
            locks: ConcurrentHashMap::new(),
        }
    }

    fn path_lock(&self, rel: &Path) -> Arc<tokio::sync::Mutex<()>> {
        use scc::hash_map::Entry;

        if let Some(lock) = self.locks.read_sync(rel, |_, lock| Arc::clone(lock)) {
            return lock;
        }
        match self.locks.entry_sync(rel.to_path_buf()) {
            Entry::Occupied(occ) => Arc::clone(occ.get()),
            Entry::Vacant(vac) => {
                let lock = Arc::new(tokio::sync::Mutex::new(()));
                vac.insert_entry(Arc::clone(&lock));
                lock
            }
        }
    }

    /// Materialize the immediate children of the directory at `rel`.
    ///
    /// Remote subdirectory prefixes become local directories; remote objects
    /// become sparse placeholder files carrying the remote size and mtime.
    /// Entries that already exist locally are left untouched, so local edits
    /// win over the remote listing. On success the directory is marked
    /// complete and subsequent calls return without a remote round trip.
    #[instrument(name = "Hydrator::hydrate_dir", skip(self))]
    pub async fn hydrate_dir(&self, rel: &Path) -> Result<(), FsError> {
        let local = self.ctx.full_path(rel);
        if self.markers.is_complete(&local) {
            return Ok(());
        }

        let lock = self.path_lock(rel);
        let _guard = lock.lock().await;
        // Another task may have finished the listing while we waited.
        if self.markers.is_complete(&local) {
            return Ok(());
        }

        let prefix = self.ctx.dir_key(rel);
        let listing = self.ctx.store.list(&prefix, "/").await?;
        debug!(
            prefixes = listing.common_prefixes.len(),
            objects = listing.objects.len(),
            "materializing directory listing"
        );

        tokio::fs::create_dir_all(&local).await?;

        for common in &listing.common_prefixes {
            let Some(name) = last_segment(common) else {
                continue;
            };
            if name == RESERVED_DIR {
                continue;
            }
            match tokio::fs::create_dir(local.join(name)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }

        for obj in &listing.objects {
            let Some(name) = last_segment(&obj.key) else {
                continue;
            };
            if name == RESERVED_DIR {
                continue;
            }
            let path = local.join(name);
            match tokio::fs::symlink_metadata(&path).await {
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }

            // Sparse placeholder: correct size and mtime, no content yet.
            let file = tokio::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .await?;
            file.set_len(obj.size).await?;
            if let Some(mtime) = obj.last_modified {
                let std_file = file.into_std().await;
                if let Err(e) = std_file.set_modified(mtime) {
                    warn!(path = %path.display(), error = %e, "failed to stamp placeholder mtime");
                }
            }
        }

        self.markers.mark(&local);
        Ok(())
    }

    /// Download the object backing the file at `rel` into the mirror.
    ///
    /// The content replaces any placeholder. A failed or cancelled transfer
    /// removes the partial file and leaves the marker unset, so the next
    /// open retries from scratch.
    #[instrument(name = "Hydrator::hydrate_file", skip(self))]
    pub async fn hydrate_file(&self, rel: &Path) -> Result<(), FsError> {
        let local = self.ctx.full_path(rel);
        if self.markers.is_complete(&local) {
            return Ok(());
        }

        let lock = self.path_lock(rel);
        let _guard = lock.lock().await;
        if self.markers.is_complete(&local) {
            return Ok(());
        }

        let key = self.ctx.object_key(rel);
        let mut body = self.ctx.store.get(&key).await?;

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let cleanup = PartialCleanup::arm(&local);
        let mut file = tokio::fs::File::create(&local).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;
        drop(file);
        cleanup.defuse();

        debug!(bytes = written, "download complete");
        self.markers.mark(&local);
        Ok(())
    }
}

/// Removes a partially written download on drop unless defused.
///
/// Drop also runs when the hydrating task is cancelled mid-transfer, so a
/// torn file can never be mistaken for hydrated content later.
struct PartialCleanup<'a> {
    path: &'a Path,
    armed: bool,
}

impl<'a> PartialCleanup<'a> {
    fn arm(path: &'a Path) -> Self {
        Self { path, armed: true }
    }

    fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialCleanup<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = std::fs::remove_file(self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove partial download");
            }
        }
    }
}

/// Final path segment of a (possibly delimiter-terminated) object key.
fn last_segment(key: &str) -> Option<&str> {
    key.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::last_segment;

    #[test]
    fn last_segment_of_nested_key() {
        assert_eq!(last_segment("data/sub/file.bin"), Some("file.bin"));
    }

    #[test]
    fn last_segment_of_prefix() {
        assert_eq!(last_segment("data/sub/"), Some("sub"));
    }

    #[test]
    fn last_segment_of_bare_name() {
        assert_eq!(last_segment("file.bin"), Some("file.bin"));
    }

    #[test]
    fn last_segment_of_empty_key() {
        assert_eq!(last_segment(""), None);
        assert_eq!(last_segment("/"), None);
    }
}
