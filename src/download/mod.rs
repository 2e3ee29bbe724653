//! Download manager
//!
//! This module handles retrieving approved links, including:
//! - The per-link retry state machine
//! - Safe destination filenames and collision handling
//! - Size limits, SHA-256 checksums and content verification
//! - Stale temp file cleanup and storage totals
//! - A bounded worker pool

mod disk;
mod error;
mod filename;
mod manager;
mod state;

pub use disk::{
    storage_stats, sweep_stale_parts, verify_download, ExtensionUsage, StorageStats, VerifyError,
    SIZE_TOLERANCE,
};
pub use error::DownloadError;
pub use filename::{build_filename, sanitize_filename, with_suffix, MAX_FILENAME_LEN};
pub use manager::{DownloadManager, DownloadOutcome, DownloadSettings, DownloadSummary};
pub use state::{DownloadMachine, DownloadState, RetryPolicy, Transition};
