//! FUSE adapter: maps [`fuser::Filesystem`] callbacks to [`MirrorFs`].
//!
//! `fuser` drives callbacks from its own session thread; each callback
//! spawns one task onto the shared tokio runtime and replies from there, so
//! a slow hydration never blocks the kernel queue.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use fuser::TimeOrNow;
use tracing::{debug, instrument};

use crate::fs::passthrough::MirrorFs;
use crate::fs::{Caller, NodeAttr, NodeKind, OpenFlags, SetAttrs};

impl From<NodeKind> for fuser::FileType {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::RegularFile => Self::RegularFile,
            NodeKind::Directory => Self::Directory,
            NodeKind::Symlink => Self::Symlink,
            NodeKind::CharDevice => Self::CharDevice,
            NodeKind::BlockDevice => Self::BlockDevice,
            NodeKind::NamedPipe => Self::NamedPipe,
            NodeKind::Socket => Self::Socket,
        }
    }
}

impl From<NodeAttr> for fuser::FileAttr {
    fn from(attr: NodeAttr) -> Self {
        fuser::FileAttr {
            ino: attr.ino,
            size: attr.size,
            blocks: attr.blocks,
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
            crtime: std::time::UNIX_EPOCH,
            kind: attr.kind.into(),
            perm: attr.perm,
            nlink: attr.nlink,
            uid: attr.uid,
            gid: attr.gid,
            rdev: u32::try_from(attr.rdev).unwrap_or(0),
            blksize: attr.blksize,
            flags: 0,
        }
    }
}

impl From<i32> for OpenFlags {
    fn from(val: i32) -> Self {
        Self::from_bits_truncate(val)
    }
}

fn caller_of(req: &fuser::Request<'_>) -> Caller {
    Caller {
        uid: req.uid(),
        gid: req.gid(),
    }
}

fn systime(t: TimeOrNow) -> SystemTime {
    match t {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

pub struct FuserAdapter {
    fs: Arc<MirrorFs>,
    runtime: tokio::runtime::Handle,
}

impl FuserAdapter {
    // TODO(invalidation): raise this once hydration issues
    // notify_inval_entry for the placeholders it replaces.
    const ENTRY_TTL: std::time::Duration = std::time::Duration::from_secs(1);

    pub fn new(fs: Arc<MirrorFs>, runtime: tokio::runtime::Handle) -> Self {
        Self { fs, runtime }
    }
}

impl fuser::Filesystem for FuserAdapter {
    #[instrument(name = "FuserAdapter::lookup", skip(self, _req, reply))]
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let fs = Arc::clone(&self.fs);
        let name = name.to_owned();
        let ttl = Self::ENTRY_TTL;
        self.runtime.spawn(async move {
            match fs.lookup(parent, &name).await {
                Ok(attr) => reply.entry(&ttl, &attr.into(), 0),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::getattr", skip(self, _req, reply))]
    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        let fs = Arc::clone(&self.fs);
        let ttl = Self::ENTRY_TTL;
        self.runtime.spawn(async move {
            match fs.getattr(ino, fh).await {
                Ok(attr) => reply.attr(&ttl, &attr.into()),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[expect(clippy::too_many_arguments, reason = "mirrors fuser setattr API")]
    #[instrument(name = "FuserAdapter::setattr", skip_all, fields(ino))]
    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        let fs = Arc::clone(&self.fs);
        let ttl = Self::ENTRY_TTL;
        let changes = SetAttrs {
            mode,
            uid,
            gid,
            size,
            atime: atime.map(systime),
            mtime: mtime.map(systime),
        };
        self.runtime.spawn(async move {
            match fs.setattr(ino, fh, changes).await {
                Ok(attr) => reply.attr(&ttl, &attr.into()),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::readlink", skip(self, _req, reply))]
    fn readlink(&mut self, _req: &fuser::Request<'_>, ino: u64, reply: fuser::ReplyData) {
        use std::os::unix::ffi::OsStrExt as _;

        let fs = Arc::clone(&self.fs);
        self.runtime.spawn(async move {
            match fs.readlink(ino).await {
                Ok(target) => reply.data(target.as_os_str().as_bytes()),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::mknod", skip(self, req, reply))]
    fn mknod(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: fuser::ReplyEntry,
    ) {
        let fs = Arc::clone(&self.fs);
        let name = name.to_owned();
        let caller = caller_of(req);
        let ttl = Self::ENTRY_TTL;
        self.runtime.spawn(async move {
            match fs.mknod(parent, &name, mode, umask, rdev, caller).await {
                Ok(attr) => reply.entry(&ttl, &attr.into(), 0),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::mkdir", skip(self, req, reply))]
    fn mkdir(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        let fs = Arc::clone(&self.fs);
        let name = name.to_owned();
        let caller = caller_of(req);
        let ttl = Self::ENTRY_TTL;
        self.runtime.spawn(async move {
            match fs.mkdir(parent, &name, mode, umask, caller).await {
                Ok(attr) => reply.entry(&ttl, &attr.into(), 0),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::unlink", skip(self, _req, reply))]
    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        let fs = Arc::clone(&self.fs);
        let name = name.to_owned();
        self.runtime.spawn(async move {
            match fs.unlink(parent, &name).await {
                Ok(()) => reply.ok(),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::rmdir", skip(self, _req, reply))]
    fn rmdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        let fs = Arc::clone(&self.fs);
        let name = name.to_owned();
        self.runtime.spawn(async move {
            match fs.rmdir(parent, &name).await {
                Ok(()) => reply.ok(),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::symlink", skip(self, req, reply))]
    fn symlink(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: fuser::ReplyEntry,
    ) {
        let fs = Arc::clone(&self.fs);
        let link_name = link_name.to_owned();
        let target = target.to_owned();
        let caller = caller_of(req);
        let ttl = Self::ENTRY_TTL;
        self.runtime.spawn(async move {
            match fs.symlink(parent, &link_name, &target, caller).await {
                Ok(attr) => reply.entry(&ttl, &attr.into(), 0),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::rename", skip(self, _req, reply))]
    fn rename(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: fuser::ReplyEmpty,
    ) {
        let fs = Arc::clone(&self.fs);
        let name = name.to_owned();
        let newname = newname.to_owned();
        self.runtime.spawn(async move {
            match fs.rename(parent, &name, newparent, &newname, flags).await {
                Ok(()) => reply.ok(),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::link", skip(self, _req, reply))]
    fn link(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let fs = Arc::clone(&self.fs);
        let newname = newname.to_owned();
        let ttl = Self::ENTRY_TTL;
        self.runtime.spawn(async move {
            match fs.link(ino, newparent, &newname).await {
                Ok(attr) => reply.entry(&ttl, &attr.into(), 0),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::open", skip(self, _req, reply))]
    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        let fs = Arc::clone(&self.fs);
        let flags: OpenFlags = flags.into();
        self.runtime.spawn(async move {
            match fs.open(ino, flags).await {
                Ok(fh) => reply.opened(fh, 0),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[expect(clippy::too_many_arguments, reason = "mirrors fuser read API")]
    #[instrument(name = "FuserAdapter::read", skip(self, _req, reply))]
    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        let fs = Arc::clone(&self.fs);
        self.runtime.spawn(async move {
            match fs.read(fh, offset.cast_unsigned(), size).await {
                Ok(data) => reply.data(&data),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[expect(clippy::too_many_arguments, reason = "mirrors fuser write API")]
    #[instrument(name = "FuserAdapter::write", skip(self, _req, data, reply))]
    fn write(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        let fs = Arc::clone(&self.fs);
        let data = data.to_vec();
        self.runtime.spawn(async move {
            match fs.write(fh, offset.cast_unsigned(), &data).await {
                Ok(written) => reply.written(written),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::flush", skip(self, _req, reply))]
    fn flush(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        _lock_owner: u64,
        reply: fuser::ReplyEmpty,
    ) {
        let fs = Arc::clone(&self.fs);
        self.runtime.spawn(async move {
            match fs.flush(fh).await {
                Ok(()) => reply.ok(),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::release", skip(self, _req, reply))]
    fn release(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        let fs = Arc::clone(&self.fs);
        self.runtime.spawn(async move {
            match fs.release(fh).await {
                Ok(()) => reply.ok(),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::fsync", skip(self, _req, reply))]
    fn fsync(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        datasync: bool,
        reply: fuser::ReplyEmpty,
    ) {
        let fs = Arc::clone(&self.fs);
        self.runtime.spawn(async move {
            match fs.fsync(fh, datasync).await {
                Ok(()) => reply.ok(),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::readdir", skip(self, _req, _fh, reply))]
    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        let fs = Arc::clone(&self.fs);
        self.runtime.spawn(async move {
            let entries = match fs.readdir(ino).await {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                    return;
                }
            };

            #[expect(
                clippy::cast_possible_truncation,
                reason = "fuser offset is i64 but always non-negative"
            )]
            for (i, entry) in entries
                .iter()
                .enumerate()
                .skip(offset.cast_unsigned() as usize)
            {
                let kind: fuser::FileType = entry.kind.into();
                let Ok(idx) = i64::try_from(i + 1) else {
                    reply.error(libc::EIO);
                    return;
                };
                if reply.add(entry.ino, idx, kind, &entry.name) {
                    break;
                }
            }
            reply.ok();
        });
    }

    #[instrument(name = "FuserAdapter::statfs", skip(self, _req, _ino, reply))]
    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let fs = Arc::clone(&self.fs);
        self.runtime.spawn(async move {
            match fs.statfs().await {
                Ok(stats) => reply.statfs(
                    stats.total_blocks,
                    stats.free_blocks,
                    stats.available_blocks,
                    stats.total_inodes,
                    stats.free_inodes,
                    stats.block_size,
                    stats.max_filename_length,
                    0,
                ),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::setxattr", skip(self, _req, value, reply))]
    fn setxattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        _flags: i32,
        _position: u32,
        reply: fuser::ReplyEmpty,
    ) {
        let fs = Arc::clone(&self.fs);
        let name = name.to_owned();
        let value = value.to_vec();
        self.runtime.spawn(async move {
            match fs.setxattr(ino, &name, &value).await {
                Ok(()) => reply.ok(),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::getxattr", skip(self, _req, reply))]
    fn getxattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: fuser::ReplyXattr,
    ) {
        let fs = Arc::clone(&self.fs);
        let name = name.to_owned();
        self.runtime.spawn(async move {
            match fs.getxattr(ino, &name).await {
                Ok(value) => reply_xattr(reply, &value, size),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::listxattr", skip(self, _req, reply))]
    fn listxattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        size: u32,
        reply: fuser::ReplyXattr,
    ) {
        let fs = Arc::clone(&self.fs);
        self.runtime.spawn(async move {
            match fs.listxattr(ino).await {
                Ok(names) => reply_xattr(reply, &names, size),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::removexattr", skip(self, _req, reply))]
    fn removexattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        let fs = Arc::clone(&self.fs);
        let name = name.to_owned();
        self.runtime.spawn(async move {
            match fs.removexattr(ino, &name).await {
                Ok(()) => reply.ok(),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[expect(clippy::too_many_arguments, reason = "mirrors fuser create API")]
    #[instrument(name = "FuserAdapter::create", skip(self, req, reply))]
    fn create(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        let fs = Arc::clone(&self.fs);
        let name = name.to_owned();
        let flags: OpenFlags = flags.into();
        let caller = caller_of(req);
        let ttl = Self::ENTRY_TTL;
        self.runtime.spawn(async move {
            match fs.create(parent, &name, mode, umask, flags, caller).await {
                Ok((attr, fh)) => reply.created(&ttl, &attr.into(), 0, fh, 0),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    #[instrument(name = "FuserAdapter::forget", skip(self, _req))]
    fn forget(&mut self, _req: &fuser::Request<'_>, ino: u64, nlookup: u64) {
        let fs = Arc::clone(&self.fs);
        self.runtime.spawn(async move {
            fs.forget(ino, nlookup).await;
        });
    }
}

/// Implements the two-phase xattr size protocol: a zero-size probe asks for
/// the value's length, a sized request returns the value or `ERANGE`.
fn reply_xattr(reply: fuser::ReplyXattr, value: &[u8], size: u32) {
    let len = match u32::try_from(value.len()) {
        Ok(len) => len,
        Err(_) => {
            reply.error(libc::E2BIG);
            return;
        }
    };
    if size == 0 {
        reply.size(len);
    } else if len <= size {
        reply.data(value);
    } else {
        reply.error(libc::ERANGE);
    }
}
