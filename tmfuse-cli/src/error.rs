//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;
use tmfuse::store::StoreError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Backup store validation failed at startup
    Store(StoreError),
    /// FUSE mount failed or ended with an error
    Mount(std::io::Error),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        // Print additional help for specific errors
        match self {
            CliError::Store(StoreError::PrivateDirMissing { .. }) => {
                eprintln!();
                eprintln!("The given path does not look like a Time Machine volume.");
                eprintln!("Pass the root of the mounted backup disk, the directory");
                eprintln!("that contains 'Backups.backupdb'.");
            }
            CliError::Store(StoreError::UnknownHost { .. }) => {
                eprintln!();
                eprintln!("List the directories under Backups.backupdb to see which");
                eprintln!("host names this volume holds backups for.");
            }
            CliError::Mount(_) => {
                eprintln!();
                eprintln!("Common issues:");
                eprintln!("  1. FUSE not installed: sudo apt install fuse (Linux)");
                eprintln!("  2. Permissions: you may need to be in the 'fuse' group");
                eprintln!("  3. Mountpoint in use: try: fusermount -u <mountpoint>");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Store(err) => write!(f, "Cannot open backup store: {}", err),
            CliError::Mount(err) => write!(f, "Mount failed: {}", err),
        }
    }
}

impl std::error::Error for CliError {}
