use std::path::{Path, PathBuf};
use std::sync::Arc;

use bucket_fs::fs::fuser::FuserAdapter;
use bucket_fs::fs::node::RootContext;
use bucket_fs::fs::passthrough::MirrorFs;
use bucket_fs::store::s3::S3Store;
use tokio::select;
use tracing::{debug, error, info};

use crate::config::MountSpec;

mod managed_fuse {
    //! Lifecycle management for the FUSE session. Dropping a
    //! `BackgroundSession` only performs a regular unmount; a busy mount
    //! would be left behind, so the wrapper forces a detach on drop.
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use nix::errno::Errno;

    use super::{FuserAdapter, MirrorFs, debug, error};
    use fuser::BackgroundSession;

    pub struct FuseCoreScope {
        _session: BackgroundSession,
    }

    impl FuseCoreScope {
        fn spawn(
            fs: Arc<MirrorFs>,
            mount_point: &Path,
            handle: tokio::runtime::Handle,
        ) -> Result<Self, std::io::Error> {
            let adapter = FuserAdapter::new(fs, handle);
            let mount_opts = [
                fuser::MountOption::FSName("bucket-fs".to_owned()),
                fuser::MountOption::NoDev,
                fuser::MountOption::Exec,
                fuser::MountOption::AutoUnmount,
                fuser::MountOption::DefaultPermissions,
            ];

            Ok(Self {
                _session: fuser::spawn_mount2(adapter, mount_point, &mount_opts)?,
            })
        }
    }

    pub struct ManagedFuse {
        mount_point: PathBuf,
    }

    impl ManagedFuse {
        pub fn new(mount_point: &Path) -> Self {
            Self {
                mount_point: mount_point.to_path_buf(),
            }
        }

        pub fn spawn(
            &self,
            fs: Arc<MirrorFs>,
            handle: tokio::runtime::Handle,
        ) -> Result<FuseCoreScope, std::io::Error> {
            FuseCoreScope::spawn(fs, &self.mount_point, handle)
        }
    }

    impl Drop for ManagedFuse {
        fn drop(&mut self) {
            const UMOUNT_ATTEMPT_COUNT: usize = 10;
            const UMOUNT_ATTEMPT_DELAY: Duration = Duration::from_millis(10);

            debug!(mount_point = ?self.mount_point, "Confirming unmount of the FUSE filesystem...");

            for attempt in 1..=UMOUNT_ATTEMPT_COUNT {
                let result = {
                    #[cfg(target_os = "macos")]
                    {
                        nix::mount::unmount(&self.mount_point, nix::mount::MntFlags::MNT_FORCE)
                    }

                    #[cfg(target_os = "linux")]
                    {
                        nix::mount::umount2(&self.mount_point, nix::mount::MntFlags::MNT_DETACH)
                    }
                };

                match result {
                    Ok(()) => {
                        debug!("Unmounted on attempt {attempt}");
                        break;
                    }
                    Err(Errno::EBUSY) => {
                        debug!("Mount still busy on attempt {attempt}. Retrying...");
                        std::thread::sleep(UMOUNT_ATTEMPT_DELAY);
                    }
                    Err(Errno::EINVAL | Errno::ENOENT) => {
                        debug!("Already unmounted (attempt {attempt})");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to unmount on attempt {attempt}: {e}");
                        break;
                    }
                }
            }
        }
    }
}

/// Prepares the mount point: an existing directory must be empty, a missing
/// one is created with its parents.
async fn prepare_mount_point(mount_point: &Path) -> Result<(), std::io::Error> {
    match tokio::fs::read_dir(mount_point).await {
        Ok(mut entries) => {
            if entries.next_entry().await?.is_some() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!(
                        "Mount point '{}' already exists and is not empty.",
                        mount_point.display()
                    ),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(mount_point).await?;
            info!(path = %mount_point.display(), "Created mount point directory.");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn wait_for_exit() -> Result<(), std::io::Error> {
    use tokio::signal;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut sighup = signal::unix::signal(signal::unix::SignalKind::hangup())?;
    select! {
        _ = signal::ctrl_c() => {
            debug!("Received Ctrl+C signal, shutting down...");
        },
        _ = sigterm.recv() => {
            debug!("Received termination signal, shutting down...");
        },
        _ = sighup.recv() => {
            debug!("Received hangup signal, shutting down...");
        },
    }
    Ok(())
}

pub struct MountArgs {
    pub spec: MountSpec,
    pub mount_point: PathBuf,
    pub endpoint: Option<String>,
    /// Discard the local mirror before mounting.
    pub clean: bool,
}

/// Main entry point for the daemon.
pub async fn run(args: MountArgs, handle: tokio::runtime::Handle) -> Result<(), std::io::Error> {
    let mirror_root = args.spec.mirror_root();

    if args.clean {
        match tokio::fs::remove_dir_all(&mirror_root).await {
            Ok(()) => info!(path = %mirror_root.display(), "Discarded local mirror."),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    tokio::fs::create_dir_all(&mirror_root).await?;

    prepare_mount_point(&args.mount_point).await?;

    let store = Arc::new(S3Store::from_env(&args.spec.bucket, args.endpoint.as_deref()).await);
    let ctx = RootContext::new(&mirror_root, &args.spec.bucket, &args.spec.prefix, store)?;
    let fs = Arc::new(MirrorFs::new(ctx));

    info!(
        bucket = %args.spec.bucket,
        mirror = %mirror_root.display(),
        "Mounting filesystem at {}.",
        args.mount_point.display()
    );

    let fuse = managed_fuse::ManagedFuse::new(&args.mount_point);
    {
        let _session = fuse.spawn(fs, handle.clone())?;
        info!("bucket-fs is running. Press Ctrl+C to stop.");

        wait_for_exit().await?;
    }
    Ok(())
}

pub fn spawn(args: MountArgs) -> Result<(), std::io::Error> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| panic!("Failed to create Tokio runtime: {e}"));
    runtime.block_on(run(args, runtime.handle().clone()))
}
