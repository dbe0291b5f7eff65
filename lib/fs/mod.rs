//! The lazy-hydration caching filesystem.
//!
//! The mount is a thin view over a local mirror directory. Remote state is
//! pulled in on demand: listing a directory materializes its entries, opening
//! a file downloads its content. Once a path carries the completeness marker
//! it is never fetched again until the marker is cleared.

/// FUSE adapter: maps [`fuser::Filesystem`] callbacks to [`passthrough::MirrorFs`].
pub mod fuser;
/// The hydration engine: remote listings and objects become mirror entries.
pub mod hydrate;
/// Node tree: path resolution and stable identifiers.
pub mod node;
/// Passthrough operations against the local mirror.
pub mod passthrough;
/// Cache completeness tracking.
pub mod tracker;

use std::time::{Duration, SystemTime};

use bitflags::bitflags;
use thiserror::Error;

use crate::store::StoreError;

/// Name reserved for driver bookkeeping. Never listed, never resolvable,
/// never creatable through the mount.
pub const RESERVED_DIR: &str = ".bucketfs";

/// Extended attribute carrying the durable completeness marker.
pub const MARKER_XATTR: &str = "user.bucketfs.complete";

/// FUSE inode number of the mount root.
pub const ROOT_ID: u64 = 1;

/// Type representing a file handle.
pub type FileHandle = u64;

/// The credentials of the process issuing a filesystem request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Caller {
    pub uid: u32,
    pub gid: u32,
}

bitflags! {
    /// Flags for opening a file, similar to Unix open(2) flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: i32 {
        /// Open for reading only.
        const RDONLY = libc::O_RDONLY;
        /// Open for writing only.
        const WRONLY = libc::O_WRONLY;
        /// Open for reading and writing.
        const RDWR = libc::O_RDWR;

        /// Append on each write.
        const APPEND = libc::O_APPEND;
        /// Truncate to zero length.
        const TRUNC = libc::O_TRUNC;
        /// Create file if it does not exist.
        const CREAT = libc::O_CREAT;
        /// Error if file already exists (with `CREAT`).
        const EXCL = libc::O_EXCL;

        /// Do not follow symlinks.
        const NOFOLLOW = libc::O_NOFOLLOW;
        /// Fail if not a directory.
        const DIRECTORY = libc::O_DIRECTORY;
    }
}

/// The kind of entry a node refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    RegularFile,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    NamedPipe,
    Socket,
}

impl TryFrom<std::fs::FileType> for NodeKind {
    type Error = ();

    fn try_from(ft: std::fs::FileType) -> Result<Self, ()> {
        use std::os::unix::fs::FileTypeExt as _;

        if ft.is_file() {
            Ok(Self::RegularFile)
        } else if ft.is_dir() {
            Ok(Self::Directory)
        } else if ft.is_symlink() {
            Ok(Self::Symlink)
        } else if ft.is_char_device() {
            Ok(Self::CharDevice)
        } else if ft.is_block_device() {
            Ok(Self::BlockDevice)
        } else if ft.is_fifo() {
            Ok(Self::NamedPipe)
        } else if ft.is_socket() {
            Ok(Self::Socket)
        } else {
            Err(())
        }
    }
}

/// Stat-shaped attributes of a node, with the stable identifier already
/// substituted for the raw on-disk inode number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeAttr {
    pub ino: u64,
    pub kind: NodeKind,
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub blksize: u32,
}

impl NodeAttr {
    /// Build attributes from local metadata, reporting `ino` as the identity.
    pub fn from_meta(meta: &std::fs::Metadata, ino: u64) -> Result<Self, FsError> {
        use std::os::unix::fs::MetadataExt as _;

        let kind = NodeKind::try_from(meta.file_type()).map_err(|()| {
            FsError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unrepresentable file type",
            ))
        })?;

        #[expect(
            clippy::cast_possible_truncation,
            reason = "metadata mode/nlink/blksize narrowing is intentional"
        )]
        Ok(Self {
            ino,
            kind,
            size: meta.len(),
            blocks: meta.blocks(),
            atime: to_systime(meta.atime(), meta.atime_nsec()),
            mtime: to_systime(meta.mtime(), meta.mtime_nsec()),
            ctime: to_systime(meta.ctime(), meta.ctime_nsec()),
            perm: (meta.mode() & 0o7777) as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev(),
            blksize: meta.blksize() as u32,
        })
    }
}

#[expect(
    clippy::cast_sign_loss,
    reason = "nsecs from MetadataExt is always in [0, 999_999_999]"
)]
fn to_systime(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        std::time::UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
    } else {
        std::time::UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
            + Duration::from_nanos(nsecs as u64)
    }
}

/// A directory entry yielded by [`passthrough::MirrorFs::readdir`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirEntry {
    pub ino: u64,
    pub name: std::ffi::OsString,
    pub kind: NodeKind,
}

/// Filesystem statistics returned by [`passthrough::MirrorFs::statfs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FsStats {
    /// Filesystem block size (bytes).
    pub block_size: u32,
    /// Total number of data blocks.
    pub total_blocks: u64,
    /// Number of free blocks.
    pub free_blocks: u64,
    /// Number of blocks available to unprivileged users.
    pub available_blocks: u64,
    /// Total number of file nodes (inodes).
    pub total_inodes: u64,
    /// Number of free file nodes.
    pub free_inodes: u64,
    /// Maximum filename length (bytes).
    pub max_filename_length: u32,
}

/// Attribute changes requested by setattr. `None` fields are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetAttrs {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
}

#[derive(Debug, Error)]
pub enum FsError {
    #[error("entry not found")]
    NotFound,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote store: {0}")]
    Store(#[source] StoreError),

    #[error("file handle not open")]
    NotOpen,

    #[error("entry changed underneath the operation")]
    Busy,

    #[error("operation crosses mount roots")]
    CrossDevice,

    #[error("permission denied")]
    PermissionDenied,

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,
}

impl From<StoreError> for FsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::NotFound,
            other => Self::Store(other),
        }
    }
}

impl From<FsError> for i32 {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound => libc::ENOENT,
            FsError::Io(ref io_err) => io_err.raw_os_error().unwrap_or(libc::EIO),
            FsError::Store(_) => libc::EIO,
            FsError::NotOpen => libc::EBADF,
            FsError::Busy => libc::EBUSY,
            FsError::CrossDevice => libc::EXDEV,
            FsError::PermissionDenied => libc::EPERM,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
        }
    }
}

impl FsError {
    /// Map a stat/open failure during path resolution: a missing local entry
    /// is an ordinary `NotFound`, everything else passes through.
    pub(crate) fn from_resolve_io(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::Io(e)
        }
    }
}
