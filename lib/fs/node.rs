//! Node tree: path resolution and stable identifiers.
//!
//! Every inode the kernel knows about maps to a [`Node`] holding the path of
//! the entry relative to the mount root. Renames rewrite those paths in
//! place, so an open node keeps pointing at the right mirror entry.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use scc::HashMap as ConcurrentHashMap;
use tracing::warn;

use crate::fs::{NodeKind, ROOT_ID};
use crate::store::ObjectStore;

/// Mount-wide state shared by every node. Immutable after mount.
pub struct RootContext {
    /// Absolute path of the local mirror root.
    pub mirror_root: PathBuf,
    /// Remote bucket name.
    pub bucket: String,
    /// Key prefix within the bucket. Either empty or delimiter-terminated.
    pub prefix: String,
    /// Handle to the remote store.
    pub store: Arc<dyn ObjectStore>,
    /// Device id of the filesystem holding the mirror root.
    dev: u64,
}

impl RootContext {
    pub fn new(
        mirror_root: impl Into<PathBuf>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        store: Arc<dyn ObjectStore>,
    ) -> io::Result<Arc<Self>> {
        use std::os::unix::fs::MetadataExt as _;

        let mirror_root = mirror_root.into();
        let prefix = prefix.into();
        debug_assert!(
            prefix.is_empty() || prefix.ends_with('/'),
            "prefix must be empty or delimiter-terminated: {prefix:?}"
        );

        let meta = std::fs::metadata(&mirror_root)?;
        Ok(Arc::new(Self {
            mirror_root,
            bucket: bucket.into(),
            prefix,
            store,
            dev: meta.dev(),
        }))
    }

    /// Absolute mirror path for a mount-relative path.
    #[must_use]
    pub fn full_path(&self, rel: &Path) -> PathBuf {
        self.mirror_root.join(rel)
    }

    /// Remote listing prefix for a mount-relative directory. The root maps to
    /// the mount prefix itself.
    #[must_use]
    pub fn dir_key(&self, rel: &Path) -> String {
        let mut key = self.prefix.clone();
        let rel = rel.to_string_lossy();
        if !rel.is_empty() {
            key.push_str(&rel);
            key.push('/');
        }
        key
    }

    /// Remote object key for a mount-relative file path.
    #[must_use]
    pub fn object_key(&self, rel: &Path) -> String {
        let mut key = self.prefix.clone();
        key.push_str(&rel.to_string_lossy());
        key
    }

    /// Derive the stable identifier for an on-disk inode.
    ///
    /// The device id is folded in with its halves swapped so that inode
    /// numbers (which cluster in the low bits) rarely collide across devices,
    /// and xor'd against the root device so entries on the mirror's own
    /// device report their plain inode number.
    #[must_use]
    pub fn stable_id(&self, dev: u64, ino: u64) -> u64 {
        let swapped = (dev << 32) | (dev >> 32);
        let swapped_root = (self.dev << 32) | (self.dev >> 32);
        (swapped ^ swapped_root) ^ ino
    }

    /// Stable identifier from local metadata.
    #[must_use]
    pub fn stable_id_of(&self, meta: &std::fs::Metadata) -> u64 {
        use std::os::unix::fs::MetadataExt as _;
        self.stable_id(meta.dev(), meta.ino())
    }
}

/// One entry in the mounted namespace.
pub struct Node {
    ctx: Arc<RootContext>,
    /// Mount-relative path. Rewritten by renames.
    rel: RwLock<PathBuf>,
    kind: NodeKind,
    id: u64,
    /// Kernel lookup count. The node is evicted when `forget` drains it.
    rc: AtomicU64,
}

impl Node {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    #[must_use]
    pub fn context(&self) -> &Arc<RootContext> {
        &self.ctx
    }

    /// Current mount-relative path.
    #[must_use]
    pub fn rel_path(&self) -> PathBuf {
        self.rel
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Current absolute mirror path.
    #[must_use]
    pub fn full_path(&self) -> PathBuf {
        self.ctx.full_path(&self.rel_path())
    }

    pub(crate) fn set_rel(&self, rel: PathBuf) {
        *self
            .rel
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = rel;
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("rel", &self.rel_path())
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Concurrent id-to-node map.
///
/// All methods take `&self`; the map is safe to share across the per-request
/// tasks without external locking.
pub struct NodeTree {
    nodes: ConcurrentHashMap<u64, Arc<Node>>,
}

impl NodeTree {
    /// Create a tree seeded with the root node at [`ROOT_ID`].
    #[must_use]
    pub fn new(ctx: &Arc<RootContext>) -> Self {
        let tree = Self {
            nodes: ConcurrentHashMap::new(),
        };
        let root = Arc::new(Node {
            ctx: Arc::clone(ctx),
            rel: RwLock::new(PathBuf::new()),
            kind: NodeKind::Directory,
            id: ROOT_ID,
            rc: AtomicU64::new(1),
        });
        let _ = tree.nodes.insert_sync(ROOT_ID, root);
        tree
    }

    #[must_use]
    pub fn get(&self, id: u64) -> Option<Arc<Node>> {
        self.nodes.read_sync(&id, |_, node| Arc::clone(node))
    }

    /// Register (or refresh) the node for a looked-up entry, bumping its
    /// kernel lookup count. An existing node is repointed at `rel` since the
    /// underlying inode may have been renamed by another process.
    pub fn adopt(&self, ctx: &Arc<RootContext>, id: u64, rel: PathBuf, kind: NodeKind) -> Arc<Node> {
        use scc::hash_map::Entry;

        match self.nodes.entry_sync(id) {
            Entry::Occupied(occ) => {
                let node = Arc::clone(occ.get());
                node.set_rel(rel);
                node.rc.fetch_add(1, Ordering::Relaxed);
                node
            }
            Entry::Vacant(vac) => {
                let node = Arc::new(Node {
                    ctx: Arc::clone(ctx),
                    rel: RwLock::new(rel),
                    kind,
                    id,
                    rc: AtomicU64::new(1),
                });
                vac.insert_entry(Arc::clone(&node));
                node
            }
        }
    }

    /// Drop `nlookups` kernel references from a node, evicting it when the
    /// count drains to zero. The root is never evicted.
    pub fn forget(&self, id: u64, nlookups: u64) {
        use scc::hash_map::Entry;

        if id == ROOT_ID {
            return;
        }

        match self.nodes.entry_sync(id) {
            Entry::Occupied(entry) => {
                if entry.get().rc.load(Ordering::Relaxed) <= nlookups {
                    let _ = entry.remove();
                } else {
                    entry.get().rc.fetch_sub(nlookups, Ordering::Relaxed);
                }
            }
            Entry::Vacant(_) => {
                warn!("Forget called on unknown node {id}. This is a programming bug");
            }
        }
    }

    /// Rewrite the paths of the node at `old` and everything under it to
    /// live under `new`. Called after a rename; the nodes are unchanged.
    pub async fn rename_rebase(&self, old: &Path, new: &Path) {
        // An empty prefix would match every node.
        debug_assert!(!old.as_os_str().is_empty() && !new.as_os_str().is_empty());
        self.nodes
            .iter_async(|_, node| {
                let rel = node.rel_path();
                if let Ok(suffix) = rel.strip_prefix(old) {
                    node.set_rel(rejoin(new, suffix));
                }
                true
            })
            .await;
    }

    /// Swap the paths of the two subtrees rooted at `a` and `b` after a
    /// rename-exchange. A single pass so neither side is rewritten twice.
    pub async fn exchange_rebase(&self, a: &Path, b: &Path) {
        debug_assert!(!a.as_os_str().is_empty() && !b.as_os_str().is_empty());
        self.nodes
            .iter_async(|_, node| {
                let rel = node.rel_path();
                if let Ok(suffix) = rel.strip_prefix(a) {
                    node.set_rel(rejoin(b, suffix));
                } else if let Ok(suffix) = rel.strip_prefix(b) {
                    node.set_rel(rejoin(a, suffix));
                }
                true
            })
            .await;
    }
}

fn rejoin(base: &Path, suffix: &Path) -> PathBuf {
    if suffix.as_os_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(suffix)
    }
}
