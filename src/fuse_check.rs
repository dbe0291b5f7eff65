//! FUSE availability checks.

/// Errors that can occur when verifying FUSE availability.
#[derive(Debug, thiserror::Error)]
pub enum FuseCheckError {
    /// The FUSE character device is missing.
    #[cfg(target_os = "linux")]
    #[error(
        "/dev/fuse is not available. bucket-fs requires the fuse kernel module; \
         try `modprobe fuse` or install the fuse3 package."
    )]
    DeviceMissing,

    /// macFUSE is not installed.
    #[cfg(target_os = "macos")]
    #[error(
        "macFUSE is not installed. bucket-fs requires macFUSE to mount filesystems.\n\
         Install it from: https://macfuse.github.io/"
    )]
    NotInstalled,
}

/// Verify that FUSE is usable before attempting a mount, so the user gets an
/// actionable message instead of a raw mount failure.
#[cfg(target_os = "linux")]
pub fn ensure_fuse() -> Result<(), FuseCheckError> {
    if std::path::Path::new("/dev/fuse").exists() {
        Ok(())
    } else {
        Err(FuseCheckError::DeviceMissing)
    }
}

/// Verify that FUSE is usable before attempting a mount.
#[cfg(target_os = "macos")]
pub fn ensure_fuse() -> Result<(), FuseCheckError> {
    if std::path::Path::new("/Library/Filesystems/macfuse.fs").is_dir()
        || std::path::Path::new("/Library/Filesystems/osxfuse.fs").is_dir()
    {
        Ok(())
    } else {
        Err(FuseCheckError::NotInstalled)
    }
}
