//! On-disk checks for the download directory
//!
//! Verification of finished bodies, removal of temp files left behind by an
//! interrupted run, and per-extension storage totals for `--stats`.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// Prefix shared by every temp file the manager creates
pub(crate) const TEMP_PREFIX: &str = ".sumi-";

/// Suffix shared by every temp file the manager creates
pub(crate) const TEMP_SUFFIX: &str = ".part";

/// Allowed gap between a declared and an actual size
pub const SIZE_TOLERANCE: u64 = 1024;

/// Leading bytes every PDF starts with
const PDF_MAGIC: &[u8] = b"%PDF";

/// Why a finished file was rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("file is missing")]
    Missing,

    #[error("file is empty")]
    Empty,

    #[error("size mismatch: expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("content does not look like a .{extension} file")]
    BadSignature { extension: String },
}

/// Checks that a downloaded file exists, is non-empty, roughly matches
/// `expected_size` and carries the signature its extension implies
///
/// # Returns
///
/// * `Ok(u64)` - The file size
/// * `Err(VerifyError)` - The first check that failed
pub async fn verify_download(path: &Path, expected_size: Option<u64>) -> Result<u64, VerifyError> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());
    verify_as(path, extension.as_deref(), expected_size).await
}

/// Like [`verify_download`], judging content by `extension` rather than the
/// file's own name
pub(crate) async fn verify_as(
    path: &Path,
    extension: Option<&str>,
    expected_size: Option<u64>,
) -> Result<u64, VerifyError> {
    let actual = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return Err(VerifyError::Missing),
    };
    if actual == 0 {
        return Err(VerifyError::Empty);
    }
    if let Some(expected) = expected_size {
        if actual.abs_diff(expected) > SIZE_TOLERANCE {
            return Err(VerifyError::SizeMismatch { expected, actual });
        }
    }

    if extension == Some("pdf") {
        let mut header = [0u8; 4];
        let read = match tokio::fs::File::open(path).await {
            Ok(mut file) => file.read_exact(&mut header).await.is_ok(),
            Err(_) => false,
        };
        if !read || header != PDF_MAGIC {
            return Err(VerifyError::BadSignature {
                extension: "pdf".to_string(),
            });
        }
    }

    Ok(actual)
}

/// Builds a temp file name unique to this process
pub(crate) fn temp_file_name(nonce: u64) -> String {
    format!(
        "{}{}-{}{}",
        TEMP_PREFIX,
        std::process::id(),
        nonce,
        TEMP_SUFFIX
    )
}

/// The process ID embedded in a temp file name, if it is one of ours
fn temp_file_owner(name: &str) -> Option<u32> {
    let inner = name.strip_prefix(TEMP_PREFIX)?.strip_suffix(TEMP_SUFFIX)?;
    let (pid, nonce) = inner.split_once('-')?;
    nonce.parse::<u64>().ok()?;
    pid.parse().ok()
}

/// Deletes temp files left by other processes that are older than `max_age`
///
/// Files written by this process are never touched. A missing directory
/// counts as clean.
///
/// # Returns
///
/// The number of files removed
pub fn sweep_stale_parts(dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let me = std::process::id();
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        match temp_file_owner(&name) {
            Some(owner) if owner != me => {}
            _ => continue,
        }

        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let age = meta
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            debug!("Keeping recent temp file {}", name);
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Could not remove stale temp file {}: {}", name, e),
        }
    }

    if removed > 0 {
        info!("Removed {} stale partial downloads from {}", removed, dir.display());
    }
    Ok(removed)
}

/// Files and bytes for one extension
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtensionUsage {
    pub files: u64,
    pub bytes: u64,
}

/// What the download directory holds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub root: PathBuf,
    pub total_files: u64,
    pub total_bytes: u64,
    /// Keyed by lower-cased extension with its dot; `""` when there is none
    pub by_extension: BTreeMap<String, ExtensionUsage>,
}

/// Walks `dir` recursively and totals finished files by extension
///
/// Temp files are skipped. A missing directory yields empty totals.
pub fn storage_stats(dir: &Path) -> std::io::Result<StorageStats> {
    let mut stats = StorageStats {
        root: dir.to_path_buf(),
        ..StorageStats::default()
    };

    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        for entry in entries {
            let entry = entry?;
            let meta = entry.metadata()?;
            let path = entry.path();
            if meta.is_dir() {
                pending.push(path);
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX) {
                continue;
            }

            let extension = path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                .unwrap_or_default();
            let usage = stats.by_extension.entry(extension).or_default();
            usage.files += 1;
            usage.bytes += meta.len();
            stats.total_files += 1;
            stats.total_bytes += meta.len();
        }
    }

    Ok(stats)
}
