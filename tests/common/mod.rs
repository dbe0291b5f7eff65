#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use bucket_fs::fs::node::RootContext;
use bucket_fs::fs::passthrough::MirrorFs;
use bucket_fs::fs::{Caller, FsError, NodeAttr, OpenFlags, ROOT_ID};
use bucket_fs::store::{Listing, ObjectBody, ObjectStore, RemoteObject, StoreError};
use bytes::Bytes;
use futures::StreamExt as _;

#[derive(Clone)]
struct MockObject {
    content: Bytes,
    last_modified: Option<SystemTime>,
    /// When set, `get` streams this many bytes and then fails.
    fail_after: Option<usize>,
    /// When set, `get` streams this many bytes and then never completes.
    stall_after: Option<usize>,
}

/// An in-memory object store that derives delimited listings from its keys,
/// the way a real bucket does, and counts every remote round trip.
pub struct MockStore {
    objects: Mutex<BTreeMap<String, MockObject>>,
    list_calls: AtomicU64,
    get_calls: AtomicU64,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            objects: Mutex::new(BTreeMap::new()),
            list_calls: AtomicU64::new(0),
            get_calls: AtomicU64::new(0),
        })
    }

    pub fn put_object(&self, key: &str, content: impl Into<Bytes>) {
        self.objects.lock().unwrap().insert(
            key.to_owned(),
            MockObject {
                content: content.into(),
                last_modified: Some(SystemTime::now()),
                fail_after: None,
                stall_after: None,
            },
        );
    }

    /// Make future downloads of `key` fail after streaming `bytes` bytes.
    pub fn fail_get_after(&self, key: &str, bytes: usize) {
        let mut objects = self.objects.lock().unwrap();
        objects
            .get_mut(key)
            .expect("fail_get_after on unknown key")
            .fail_after = Some(bytes);
    }

    /// Make future downloads of `key` stream `bytes` bytes and then hang.
    pub fn stall_get_after(&self, key: &str, bytes: usize) {
        let mut objects = self.objects.lock().unwrap();
        objects
            .get_mut(key)
            .expect("stall_get_after on unknown key")
            .stall_after = Some(bytes);
    }

    /// Clear a previously injected download failure or stall.
    pub fn fix_get(&self, key: &str) {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects.get_mut(key).expect("fix_get on unknown key");
        obj.fail_after = None;
        obj.stall_after = None;
    }

    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ObjectStore for MockStore {
    async fn list(&self, prefix: &str, delimiter: &str) -> Result<Listing, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let objects = self.objects.lock().unwrap();
        let mut listing = Listing::default();
        for (key, obj) in objects.range(prefix.to_owned()..) {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };
            if let Some(idx) = rest.find(delimiter) {
                let common = format!("{prefix}{}", &rest[..idx + delimiter.len()]);
                if listing.common_prefixes.last() != Some(&common) {
                    listing.common_prefixes.push(common);
                }
            } else {
                listing.objects.push(RemoteObject {
                    key: key.clone(),
                    size: obj.content.len() as u64,
                    last_modified: obj.last_modified,
                });
            }
        }
        Ok(listing)
    }

    async fn get(&self, key: &str) -> Result<ObjectBody, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);

        let objects = self.objects.lock().unwrap();
        let Some(obj) = objects.get(key) else {
            return Err(StoreError::NotFound);
        };

        if let Some(n) = obj.stall_after {
            let head = obj.content.slice(..n.min(obj.content.len()));
            return Ok(futures::stream::iter([Ok(head)])
                .chain(futures::stream::pending())
                .boxed());
        }

        let chunks: Vec<Result<Bytes, StoreError>> = match obj.fail_after {
            Some(n) => vec![
                Ok(obj.content.slice(..n.min(obj.content.len()))),
                Err(StoreError::transport(std::io::Error::other(
                    "injected mid-stream failure",
                ))),
            ],
            None => vec![Ok(obj.content.clone())],
        };
        Ok(futures::stream::iter(chunks).boxed())
    }
}

/// A [`MirrorFs`] over a fresh temporary mirror, backed by a [`MockStore`].
pub struct Harness {
    pub store: Arc<MockStore>,
    pub fs: Arc<MirrorFs>,
    pub mirror: PathBuf,
    prefix: String,
    _tmp: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(MockStore::new())
    }

    pub fn with_store(store: Arc<MockStore>) -> Self {
        Self::build(store, "")
    }

    /// Mount a delimiter-terminated key prefix instead of the whole bucket.
    pub fn with_prefix(prefix: &str) -> Self {
        Self::build(MockStore::new(), prefix)
    }

    fn build(store: Arc<MockStore>, prefix: &str) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mirror = tmp.path().join("mirror");
        std::fs::create_dir(&mirror).expect("mirror dir");
        let fs = mount(&mirror, &store, prefix);
        Self {
            store,
            fs,
            mirror,
            prefix: prefix.to_owned(),
            _tmp: tmp,
        }
    }

    /// Build a second filesystem instance over the same mirror and store,
    /// simulating a stop and remount of the daemon.
    pub fn remount(&self) -> Arc<MirrorFs> {
        mount(&self.mirror, &self.store, &self.prefix)
    }
}

fn mount(mirror: &Path, store: &Arc<MockStore>, prefix: &str) -> Arc<MirrorFs> {
    let ctx = RootContext::new(
        mirror,
        "test-bucket",
        prefix,
        Arc::clone(store) as Arc<dyn ObjectStore>,
    )
    .expect("root context");
    Arc::new(MirrorFs::new(ctx))
}

/// Resolve a slash-separated path from the root, registering every node.
pub async fn lookup_path(fs: &MirrorFs, path: &str) -> Result<NodeAttr, FsError> {
    let mut ino = ROOT_ID;
    let mut attr = fs.getattr(ino, None).await?;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        attr = fs.lookup(ino, segment.as_ref()).await?;
        ino = attr.ino;
    }
    Ok(attr)
}

/// Open the file at `path` read-only and return its full content.
pub async fn read_to_end(fs: &MirrorFs, path: &str) -> Result<Bytes, FsError> {
    let attr = lookup_path(fs, path).await?;
    let fh = fs.open(attr.ino, OpenFlags::RDONLY).await?;
    let data = fs.read(fh, 0, u32::try_from(attr.size).unwrap()).await;
    fs.release(fh).await?;
    data
}

pub fn caller() -> Caller {
    Caller {
        uid: nix::unistd::getuid().as_raw(),
        gid: nix::unistd::getgid().as_raw(),
    }
}

/// Whether the filesystem backing `dir` supports user extended attributes.
pub fn xattr_supported(dir: &Path) -> bool {
    let probe = dir.join(".xattr-probe");
    std::fs::write(&probe, b"x").expect("probe file");
    let ok = xattr::set(&probe, "user.bucketfs.probe", b"1").is_ok();
    let _ = std::fs::remove_file(&probe);
    ok
}
