//! Mount an S3 bucket as a filesystem, hydrated lazily into a local mirror.
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;

mod config;
mod daemon;
mod fuse_check;
mod trc;

use crate::config::MountSpec;
use crate::trc::Trc;

#[derive(Parser)]
#[command(version, about = "A lazily hydrated filesystem for S3 buckets.")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mount a bucket and run until interrupted.
    Mount {
        /// Bucket URL, e.g. s3://my-bucket/some/prefix
        url: String,

        /// Directory to mount the bucket at.
        mount_point: PathBuf,

        /// Custom endpoint URL for S3-compatible stores (e.g. MinIO).
        #[arg(long)]
        endpoint: Option<String>,

        /// Discard the local mirror before mounting.
        #[arg(long)]
        clean: bool,
    },
}

/// Main entry point for the application.
fn main() {
    let args = Args::parse();

    Trc::default().init().unwrap_or_else(|e| {
        eprintln!(
            "Failed to initialize logging. Without logging, we can't provide any useful error \
             messages, so we have to exit: {e}"
        );
        std::process::exit(1);
    });

    match args.command {
        Command::Mount {
            url,
            mount_point,
            endpoint,
            clean,
        } => {
            if let Err(e) = fuse_check::ensure_fuse() {
                error!("{e}");
                std::process::exit(1);
            }

            let spec = MountSpec::parse(&url).unwrap_or_else(|e| {
                error!("Invalid bucket URL: {e}");
                std::process::exit(1);
            });

            if let Err(e) = daemon::spawn(daemon::MountArgs {
                spec,
                mount_point,
                endpoint,
                clean,
            }) {
                error!("Daemon failed: {e}");
                std::process::exit(1);
            }
        }
    }
}
