//! Passthrough operations against the local mirror.
//!
//! Every operation resolves a node to a mirror path and then performs plain
//! filesystem work, hydrating from the remote first where the cache marker
//! says the local copy is not complete yet. Entries created through the
//! mount are marked complete immediately; the driver never fetches content
//! it authored itself.

use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use scc::HashMap as ConcurrentHashMap;
use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _, AsyncWriteExt as _};
use tracing::{debug, instrument, warn};

use crate::fs::hydrate::Hydrator;
use crate::fs::node::{Node, NodeTree, RootContext};
use crate::fs::tracker::CacheMarkers;
use crate::fs::{
    Caller, DirEntry, FileHandle, FsError, FsStats, NodeAttr, NodeKind, OpenFlags, RESERVED_DIR,
    ROOT_ID, SetAttrs,
};

/// The mounted filesystem: a node tree over the local mirror, hydrated
/// lazily from the remote store.
///
/// All methods take `&self` and all shared state is internally synchronized,
/// so one instance serves every in-flight request task concurrently.
pub struct MirrorFs {
    ctx: Arc<RootContext>,
    tree: NodeTree,
    hydrator: Hydrator,
    markers: Arc<CacheMarkers>,
    open_files: ConcurrentHashMap<FileHandle, Arc<tokio::sync::Mutex<tokio::fs::File>>>,
    next_fh: AtomicU64,
}

fn is_reserved(name: &OsStr) -> bool {
    name == OsStr::new(RESERVED_DIR)
}

fn no_data() -> FsError {
    FsError::Io(std::io::Error::from_raw_os_error(libc::ENODATA))
}

impl MirrorFs {
    #[must_use]
    pub fn new(ctx: Arc<RootContext>) -> Self {
        let markers = Arc::new(CacheMarkers::new());
        Self {
            tree: NodeTree::new(&ctx),
            hydrator: Hydrator::new(Arc::clone(&ctx), Arc::clone(&markers)),
            markers,
            ctx,
            open_files: ConcurrentHashMap::new(),
            next_fh: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn context(&self) -> &Arc<RootContext> {
        &self.ctx
    }

    fn node(&self, ino: u64) -> Result<Arc<Node>, FsError> {
        self.tree.get(ino).ok_or_else(|| {
            warn!("Operation on unknown node {ino}. This is a programming bug");
            FsError::NotFound
        })
    }

    fn dir_node(&self, ino: u64) -> Result<Arc<Node>, FsError> {
        let node = self.node(ino)?;
        if node.kind() != NodeKind::Directory {
            return Err(FsError::NotADirectory);
        }
        Ok(node)
    }

    fn file_handle(
        &self,
        fh: FileHandle,
    ) -> Result<Arc<tokio::sync::Mutex<tokio::fs::File>>, FsError> {
        self.open_files
            .read_sync(&fh, |_, file| Arc::clone(file))
            .ok_or_else(|| {
                warn!("Operation on unknown file handle {fh}. This is a programming bug");
                FsError::NotOpen
            })
    }

    fn register_file(&self, file: tokio::fs::File) -> FileHandle {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .open_files
            .insert_sync(fh, Arc::new(tokio::sync::Mutex::new(file)));
        fh
    }

    /// Chown a freshly created entry to the requesting process when running
    /// privileged. Unprivileged mounts silently keep the daemon's identity;
    /// this is the one intentional silent no-op in the driver.
    fn preserve_owner(&self, path: &Path, caller: Caller) {
        if !nix::unistd::Uid::effective().is_root() {
            return;
        }
        if let Err(e) = std::os::unix::fs::lchown(path, Some(caller.uid), Some(caller.gid)) {
            warn!(path = %path.display(), error = %e, "failed to preserve caller ownership");
        }
    }

    async fn attr_for(&self, rel: &Path) -> Result<NodeAttr, FsError> {
        let full = self.ctx.full_path(rel);
        let meta = tokio::fs::symlink_metadata(&full)
            .await
            .map_err(FsError::from_resolve_io)?;
        let id = if rel.as_os_str().is_empty() {
            ROOT_ID
        } else {
            self.ctx.stable_id_of(&meta)
        };
        NodeAttr::from_meta(&meta, id)
    }

    /// Resolve `name` under `parent`, hydrating the parent directory when
    /// the entry is locally absent, and register the node with the tree.
    #[instrument(name = "MirrorFs::lookup", skip(self))]
    pub async fn lookup(&self, parent: u64, name: &OsStr) -> Result<NodeAttr, FsError> {
        // The reserved name does not exist, no matter what is on disk.
        if is_reserved(name) {
            return Err(FsError::NotFound);
        }

        let parent_node = self.dir_node(parent)?;
        let parent_rel = parent_node.rel_path();
        let rel = parent_rel.join(name);
        let full = self.ctx.full_path(&rel);

        let meta = match tokio::fs::symlink_metadata(&full).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.hydrator.hydrate_dir(&parent_rel).await?;
                tokio::fs::symlink_metadata(&full)
                    .await
                    .map_err(FsError::from_resolve_io)?
            }
            Err(e) => return Err(e.into()),
        };

        let kind = NodeKind::try_from(meta.file_type()).map_err(|()| FsError::NotFound)?;
        let id = self.ctx.stable_id_of(&meta);
        self.tree.adopt(&self.ctx, id, rel, kind);
        NodeAttr::from_meta(&meta, id)
    }

    #[instrument(name = "MirrorFs::getattr", skip(self))]
    pub async fn getattr(&self, ino: u64, fh: Option<FileHandle>) -> Result<NodeAttr, FsError> {
        if let Some(fh) = fh {
            // The file is open; fstat through the handle.
            let file = self.file_handle(fh)?;
            let meta = file.lock().await.metadata().await?;
            return NodeAttr::from_meta(&meta, ino);
        }

        let node = self.node(ino)?;
        let rel = node.rel_path();
        let full = self.ctx.full_path(&rel);
        let meta = match tokio::fs::symlink_metadata(&full).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let Some(parent_rel) = rel.parent() else {
                    return Err(FsError::NotFound);
                };
                self.hydrator.hydrate_dir(parent_rel).await?;
                tokio::fs::symlink_metadata(&full)
                    .await
                    .map_err(FsError::from_resolve_io)?
            }
            Err(e) => return Err(e.into()),
        };
        NodeAttr::from_meta(&meta, ino)
    }

    #[instrument(name = "MirrorFs::setattr", skip(self, changes))]
    pub async fn setattr(
        &self,
        ino: u64,
        fh: Option<FileHandle>,
        changes: SetAttrs,
    ) -> Result<NodeAttr, FsError> {
        use std::os::unix::fs::PermissionsExt as _;

        let node = self.node(ino)?;
        let rel = node.rel_path();
        let full = self.ctx.full_path(&rel);

        if let Some(mode) = changes.mode {
            tokio::fs::set_permissions(&full, std::fs::Permissions::from_mode(mode)).await?;
        }

        if changes.uid.is_some() || changes.gid.is_some() {
            std::os::unix::fs::chown(&full, changes.uid, changes.gid)?;
        }

        if let Some(size) = changes.size {
            match fh {
                Some(fh) => {
                    let file = self.file_handle(fh)?;
                    file.lock().await.set_len(size).await?;
                }
                None => {
                    let file = tokio::fs::OpenOptions::new()
                        .write(true)
                        .open(&full)
                        .await?;
                    file.set_len(size).await?;
                }
            }
        }

        if changes.atime.is_some() || changes.mtime.is_some() {
            let mut times = std::fs::FileTimes::new();
            if let Some(atime) = changes.atime {
                times = times.set_accessed(atime);
            }
            if let Some(mtime) = changes.mtime {
                times = times.set_modified(mtime);
            }
            let file = std::fs::File::options()
                .write(true)
                .open(&full)
                .or_else(|_| std::fs::File::open(&full))?;
            file.set_times(times)?;
        }

        self.attr_for(&rel).await
    }

    /// List a directory, hydrating it first. The reserved bookkeeping name
    /// is filtered out of the result.
    #[instrument(name = "MirrorFs::readdir", skip(self))]
    pub async fn readdir(&self, ino: u64) -> Result<Vec<DirEntry>, FsError> {
        let node = self.dir_node(ino)?;
        let rel = node.rel_path();
        self.hydrator.hydrate_dir(&rel).await?;

        let full = self.ctx.full_path(&rel);
        let mut read_dir = tokio::fs::read_dir(&full).await?;
        let mut entries: Vec<DirEntry> = Vec::new();
        while let Some(dirent) = read_dir.next_entry().await? {
            let name = dirent.file_name();
            if is_reserved(&name) {
                continue;
            }
            let meta = dirent.metadata().await?;
            let Ok(kind) = NodeKind::try_from(meta.file_type()) else {
                warn!(name = ?name, "skipping entry with unrepresentable file type");
                continue;
            };
            entries.push(DirEntry {
                ino: self.ctx.stable_id_of(&meta),
                name,
                kind,
            });
        }
        // Deterministic order keeps resumed readdir offsets meaningful.
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Open a file, downloading its content first if it is not hydrated.
    #[instrument(name = "MirrorFs::open", skip(self, flags))]
    pub async fn open(&self, ino: u64, flags: OpenFlags) -> Result<FileHandle, FsError> {
        let node = self.node(ino)?;
        match node.kind() {
            NodeKind::Directory => return Err(FsError::IsADirectory),
            NodeKind::RegularFile => {
                self.hydrator.hydrate_file(&node.rel_path()).await?;
            }
            _ => {}
        }

        let full = node.full_path();
        let write = flags.contains(OpenFlags::WRONLY) || flags.contains(OpenFlags::RDWR);
        // O_APPEND is handled by the kernel: every write arrives with an
        // explicit offset, so the fd itself must not be in append mode.
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(write)
            .truncate(write && flags.contains(OpenFlags::TRUNC))
            .open(&full)
            .await
            .map_err(FsError::from_resolve_io)?;

        let fh = self.register_file(file);
        debug!(fh, "opened");
        Ok(fh)
    }

    #[instrument(name = "MirrorFs::read", skip(self))]
    pub async fn read(&self, fh: FileHandle, offset: u64, size: u32) -> Result<Bytes, FsError> {
        let file = self.file_handle(fh)?;
        let mut file = file.lock().await;

        let mut buffer = vec![0u8; size as usize];
        let mut filled = 0;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        while filled < buffer.len() {
            let n = file.read(&mut buffer[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buffer.truncate(filled);
        Ok(Bytes::from(buffer))
    }

    #[instrument(name = "MirrorFs::write", skip(self, data))]
    pub async fn write(&self, fh: FileHandle, offset: u64, data: &[u8]) -> Result<u32, FsError> {
        let file = self.file_handle(fh)?;
        let mut file = file.lock().await;

        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        u32::try_from(data.len()).map_err(|_| {
            FsError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "write larger than 4GiB",
            ))
        })
    }

    pub async fn flush(&self, fh: FileHandle) -> Result<(), FsError> {
        let file = self.file_handle(fh)?;
        file.lock().await.flush().await?;
        Ok(())
    }

    pub async fn fsync(&self, fh: FileHandle, datasync: bool) -> Result<(), FsError> {
        let file = self.file_handle(fh)?;
        let file = file.lock().await;
        if datasync {
            file.sync_data().await?;
        } else {
            file.sync_all().await?;
        }
        Ok(())
    }

    pub async fn release(&self, fh: FileHandle) -> Result<(), FsError> {
        self.open_files
            .remove_sync(&fh)
            .ok_or(FsError::NotOpen)
            .map(|_| ())
    }

    /// Create and open a regular file. The new file is born hydrated: it has
    /// no remote original, so it must never be fetched.
    #[instrument(name = "MirrorFs::create", skip(self, flags, caller))]
    pub async fn create(
        &self,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: OpenFlags,
        caller: Caller,
    ) -> Result<(NodeAttr, FileHandle), FsError> {
        if is_reserved(name) {
            return Err(FsError::PermissionDenied);
        }

        let parent_node = self.dir_node(parent)?;
        let rel = parent_node.rel_path().join(name);
        let full = self.ctx.full_path(&rel);

        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .create_new(flags.contains(OpenFlags::EXCL))
            .truncate(flags.contains(OpenFlags::TRUNC))
            .mode(mode & !umask)
            .open(&full)
            .await?;

        self.preserve_owner(&full, caller);
        self.markers.mark(&full);

        let meta = file.metadata().await?;
        let id = self.ctx.stable_id_of(&meta);
        self.tree.adopt(&self.ctx, id, rel, NodeKind::RegularFile);
        let attr = NodeAttr::from_meta(&meta, id)?;
        let fh = self.register_file(file);
        Ok((attr, fh))
    }

    #[instrument(name = "MirrorFs::mkdir", skip(self, caller))]
    pub async fn mkdir(
        &self,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        caller: Caller,
    ) -> Result<NodeAttr, FsError> {
        if is_reserved(name) {
            return Err(FsError::PermissionDenied);
        }

        let parent_node = self.dir_node(parent)?;
        let rel = parent_node.rel_path().join(name);
        let full = self.ctx.full_path(&rel);

        let mut builder = tokio::fs::DirBuilder::new();
        builder.mode(mode & !umask);
        builder.create(&full).await?;

        self.preserve_owner(&full, caller);
        // A directory created through the mount has nothing to list remotely.
        self.markers.mark(&full);

        let meta = tokio::fs::symlink_metadata(&full).await?;
        let id = self.ctx.stable_id_of(&meta);
        self.tree.adopt(&self.ctx, id, rel, NodeKind::Directory);
        NodeAttr::from_meta(&meta, id)
    }

    #[instrument(name = "MirrorFs::mknod", skip(self, caller))]
    pub async fn mknod(
        &self,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        caller: Caller,
    ) -> Result<NodeAttr, FsError> {
        use nix::sys::stat::{Mode, SFlag, mknod};

        if is_reserved(name) {
            return Err(FsError::PermissionDenied);
        }

        let parent_node = self.dir_node(parent)?;
        let rel = parent_node.rel_path().join(name);
        let full = self.ctx.full_path(&rel);

        let kind = SFlag::from_bits_truncate(mode & libc::S_IFMT);
        let perm = Mode::from_bits_truncate((mode & 0o7777) & !umask);
        mknod(&full, kind, perm, libc::dev_t::from(rdev)).map_err(std::io::Error::from)?;

        self.preserve_owner(&full, caller);

        let meta = tokio::fs::symlink_metadata(&full).await?;
        let node_kind = NodeKind::try_from(meta.file_type()).map_err(|()| {
            FsError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unrepresentable file type",
            ))
        })?;
        if node_kind == NodeKind::RegularFile {
            self.markers.mark(&full);
        }
        let id = self.ctx.stable_id_of(&meta);
        self.tree.adopt(&self.ctx, id, rel, node_kind);
        NodeAttr::from_meta(&meta, id)
    }

    #[instrument(name = "MirrorFs::symlink", skip(self, caller))]
    pub async fn symlink(
        &self,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        caller: Caller,
    ) -> Result<NodeAttr, FsError> {
        if is_reserved(link_name) {
            return Err(FsError::PermissionDenied);
        }

        let parent_node = self.dir_node(parent)?;
        let rel = parent_node.rel_path().join(link_name);
        let full = self.ctx.full_path(&rel);

        tokio::fs::symlink(target, &full).await?;
        self.preserve_owner(&full, caller);

        let meta = tokio::fs::symlink_metadata(&full).await?;
        let id = self.ctx.stable_id_of(&meta);
        self.tree.adopt(&self.ctx, id, rel, NodeKind::Symlink);
        NodeAttr::from_meta(&meta, id)
    }

    pub async fn readlink(&self, ino: u64) -> Result<OsString, FsError> {
        let node = self.node(ino)?;
        let target = tokio::fs::read_link(node.full_path()).await?;
        Ok(target.into_os_string())
    }

    /// Create a hard link to an existing node. The link shares the inode,
    /// the stable id and (through the inode's xattr) the cache marker.
    #[instrument(name = "MirrorFs::link", skip(self))]
    pub async fn link(
        &self,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
    ) -> Result<NodeAttr, FsError> {
        if is_reserved(newname) {
            return Err(FsError::PermissionDenied);
        }

        let source = self.node(ino)?;
        let parent_node = self.dir_node(newparent)?;
        let rel = parent_node.rel_path().join(newname);
        let full = self.ctx.full_path(&rel);
        let src_full = source.full_path();

        tokio::fs::hard_link(&src_full, &full).await?;
        if self.markers.is_complete(&src_full) {
            self.markers.mark(&full);
        }

        let meta = tokio::fs::symlink_metadata(&full).await?;
        let id = self.ctx.stable_id_of(&meta);
        self.tree.adopt(&self.ctx, id, rel, source.kind());
        NodeAttr::from_meta(&meta, id)
    }

    #[instrument(name = "MirrorFs::unlink", skip(self))]
    pub async fn unlink(&self, parent: u64, name: &OsStr) -> Result<(), FsError> {
        if is_reserved(name) {
            return Err(FsError::NotFound);
        }

        let parent_node = self.dir_node(parent)?;
        let full = self.ctx.full_path(&parent_node.rel_path().join(name));
        tokio::fs::remove_file(&full)
            .await
            .map_err(FsError::from_resolve_io)?;
        self.markers.clear(&full);
        Ok(())
    }

    #[instrument(name = "MirrorFs::rmdir", skip(self))]
    pub async fn rmdir(&self, parent: u64, name: &OsStr) -> Result<(), FsError> {
        if is_reserved(name) {
            return Err(FsError::NotFound);
        }

        let parent_node = self.dir_node(parent)?;
        let full = self.ctx.full_path(&parent_node.rel_path().join(name));
        tokio::fs::remove_dir(&full)
            .await
            .map_err(FsError::from_resolve_io)?;
        self.markers.clear(&full);
        Ok(())
    }

    /// Rename an entry. `RENAME_EXCHANGE` dispatches to [`Self::exchange`];
    /// `RENAME_NOREPLACE` refuses to overwrite an existing target.
    #[instrument(name = "MirrorFs::rename", skip(self))]
    pub async fn rename(
        &self,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
    ) -> Result<(), FsError> {
        if flags & libc::RENAME_EXCHANGE != 0 {
            return self.exchange(parent, name, self, newparent, newname).await;
        }

        if is_reserved(name) || is_reserved(newname) {
            return Err(FsError::PermissionDenied);
        }

        let old_parent = self.dir_node(parent)?;
        let new_parent = self.dir_node(newparent)?;
        let old_rel = old_parent.rel_path().join(name);
        let new_rel = new_parent.rel_path().join(newname);
        let old_full = self.ctx.full_path(&old_rel);
        let new_full = self.ctx.full_path(&new_rel);

        if flags & libc::RENAME_NOREPLACE != 0
            && tokio::fs::symlink_metadata(&new_full).await.is_ok()
        {
            return Err(FsError::Io(std::io::Error::from_raw_os_error(libc::EEXIST)));
        }

        tokio::fs::rename(&old_full, &new_full)
            .await
            .map_err(FsError::from_resolve_io)?;

        self.markers.rename(&old_full, &new_full);
        self.tree.rename_rebase(&old_rel, &new_rel).await;
        Ok(())
    }

    /// Atomically swap two entries (`RENAME_EXCHANGE`).
    ///
    /// Both endpoints must live under the same root context; an exchange
    /// across mounts is a cross-device operation. Before issuing the swap,
    /// the parent directories are re-verified against the stable ids
    /// captured at lookup time and both endpoints are confirmed to still
    /// exist; a concurrent modification fails with [`FsError::Busy`] rather
    /// than exchanging the wrong entries.
    #[instrument(name = "MirrorFs::exchange", skip(self, other))]
    pub async fn exchange(
        &self,
        parent: u64,
        name: &OsStr,
        other: &MirrorFs,
        newparent: u64,
        newname: &OsStr,
    ) -> Result<(), FsError> {
        use nix::fcntl::{RenameFlags, renameat2};

        if is_reserved(name) || is_reserved(newname) {
            return Err(FsError::PermissionDenied);
        }
        if !Arc::ptr_eq(&self.ctx, &other.ctx) {
            return Err(FsError::CrossDevice);
        }

        let p1 = self.dir_node(parent)?;
        let p2 = other.dir_node(newparent)?;
        let d1 = p1.full_path();
        let d2 = p2.full_path();

        let dir1 = std::fs::File::open(&d1).map_err(|_| FsError::Busy)?;
        let dir2 = std::fs::File::open(&d2).map_err(|_| FsError::Busy)?;
        self.verify_dir_unchanged(&p1, &dir1)?;
        other.verify_dir_unchanged(&p2, &dir2)?;

        let e1 = d1.join(name);
        let e2 = d2.join(newname);
        std::fs::symlink_metadata(&e1).map_err(|_| FsError::Busy)?;
        std::fs::symlink_metadata(&e2).map_err(|_| FsError::Busy)?;

        renameat2(&dir1, name, &dir2, newname, RenameFlags::RENAME_EXCHANGE)
            .map_err(std::io::Error::from)?;

        self.markers.swap(&e1, &e2);
        let rel1 = p1.rel_path().join(name);
        let rel2 = p2.rel_path().join(newname);
        self.tree.exchange_rebase(&rel1, &rel2).await;
        if !std::ptr::eq(self, other) {
            other.tree.exchange_rebase(&rel1, &rel2).await;
        }
        Ok(())
    }

    /// Confirm a directory node still names the directory it named when the
    /// kernel looked it up.
    fn verify_dir_unchanged(&self, node: &Node, dir: &std::fs::File) -> Result<(), FsError> {
        if node.id() == ROOT_ID {
            return Ok(());
        }
        let meta = dir.metadata().map_err(|_| FsError::Busy)?;
        if self.ctx.stable_id_of(&meta) != node.id() {
            return Err(FsError::Busy);
        }
        Ok(())
    }

    pub async fn getxattr(&self, ino: u64, name: &OsStr) -> Result<Vec<u8>, FsError> {
        if name == OsStr::new(crate::fs::MARKER_XATTR) {
            return Err(no_data());
        }
        let node = self.node(ino)?;
        match xattr::get(node.full_path(), name)? {
            Some(value) => Ok(value),
            None => Err(no_data()),
        }
    }

    pub async fn setxattr(&self, ino: u64, name: &OsStr, value: &[u8]) -> Result<(), FsError> {
        // The marker is driver-internal state; it cannot be forged or
        // clobbered through the mount.
        if name == OsStr::new(crate::fs::MARKER_XATTR) {
            return Err(FsError::PermissionDenied);
        }
        let node = self.node(ino)?;
        xattr::set(node.full_path(), name, value)?;
        Ok(())
    }

    pub async fn removexattr(&self, ino: u64, name: &OsStr) -> Result<(), FsError> {
        if name == OsStr::new(crate::fs::MARKER_XATTR) {
            return Err(FsError::PermissionDenied);
        }
        let node = self.node(ino)?;
        xattr::remove(node.full_path(), name)?;
        Ok(())
    }

    /// Null-separated xattr name list, with the marker filtered out.
    pub async fn listxattr(&self, ino: u64) -> Result<Vec<u8>, FsError> {
        use std::os::unix::ffi::OsStrExt as _;

        let node = self.node(ino)?;
        let mut out = Vec::new();
        for attr_name in xattr::list(node.full_path())? {
            if attr_name == OsStr::new(crate::fs::MARKER_XATTR) {
                continue;
            }
            out.extend_from_slice(attr_name.as_bytes());
            out.push(0);
        }
        Ok(out)
    }

    pub async fn statfs(&self) -> Result<FsStats, FsError> {
        let stat = nix::sys::statvfs::statvfs(self.ctx.mirror_root.as_path())
            .map_err(std::io::Error::from)?;

        Ok(FsStats {
            block_size: u32::try_from(stat.block_size()).map_err(|_| {
                FsError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "block size too large to fit into u32",
                ))
            })?,
            #[allow(clippy::allow_attributes)]
            #[allow(clippy::useless_conversion)]
            total_blocks: u64::from(stat.blocks()),
            #[allow(clippy::allow_attributes)]
            #[allow(clippy::useless_conversion)]
            free_blocks: u64::from(stat.blocks_free()),
            #[allow(clippy::allow_attributes)]
            #[allow(clippy::useless_conversion)]
            available_blocks: u64::from(stat.blocks_available()),
            #[allow(clippy::allow_attributes)]
            #[allow(clippy::useless_conversion)]
            total_inodes: u64::from(stat.files()),
            #[allow(clippy::allow_attributes)]
            #[allow(clippy::useless_conversion)]
            free_inodes: u64::from(stat.files_free()),
            #[expect(
                clippy::cast_possible_truncation,
                reason = "max filename length always fits in u32"
            )]
            max_filename_length: stat.name_max() as u32,
        })
    }

    pub async fn forget(&self, ino: u64, nlookups: u64) {
        self.tree.forget(ino, nlookups);
    }
}
