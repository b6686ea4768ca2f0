//! tmfuse CLI - mount a Time Machine backup store read-only.
//!
//! This binary validates the store, then serves the latest snapshot for the
//! requested host at the given mountpoint until unmounted.

mod error;

use clap::Parser;
use fuser::MountOption;
use std::path::PathBuf;
use tracing::info;

use error::CliError;
use tmfuse::fuse::TimeMachineFS;
use tmfuse::logging::init_logging;
use tmfuse::store::{BackupStore, DEFAULT_LINK_THRESHOLD};

#[derive(Parser)]
#[command(name = "tmfuse")]
#[command(version = tmfuse::VERSION)]
#[command(about = "Browse a Time Machine backup as a read-only filesystem", long_about = None)]
struct Args {
    /// Root of the mounted backup volume (contains Backups.backupdb)
    store: PathBuf,

    /// Host name whose latest snapshot should be exposed
    host: String,

    /// Directory to mount the virtual filesystem on
    mountpoint: PathBuf,

    /// Hard-link count at which a zero-length file is treated as a
    /// directory hard link (heuristic; 100 matches observed HFS+ stores)
    #[arg(long, default_value_t = DEFAULT_LINK_THRESHOLD)]
    link_threshold: u64,

    /// Invert the access() success mapping (compatibility quirk seen in
    /// some consumers of this store layout)
    #[arg(long)]
    invert_access: bool,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Enable debug logging regardless of RUST_LOG
    #[arg(long)]
    debug: bool,

    /// Directory for log files
    #[arg(long, default_value = "logs")]
    log_dir: String,
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(args) {
        err.exit();
    }
}

fn run(args: Args) -> Result<(), CliError> {
    let _guard = init_logging(&args.log_dir, "tmfuse.log", args.debug)
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;

    let store = BackupStore::open(&args.store, &args.host)
        .map_err(CliError::Store)?
        .with_link_threshold(args.link_threshold);

    info!(
        "serving snapshot {} at {}",
        store.base_dir().display(),
        args.mountpoint.display()
    );

    let fs = TimeMachineFS::new(store).with_inverted_access(args.invert_access);

    let mut options = Vec::new();
    if args.allow_other {
        options.push(MountOption::AllowOther);
    }

    fs.mount(&args.mountpoint, &options).map_err(CliError::Mount)
}
