//! Bounded-concurrency download manager
//!
//! Links are fanned out to at most `concurrent-downloads` tokio tasks. Each
//! task drives its link through a [`DownloadMachine`], streams the body to a
//! temporary `.part` file while hashing it, then moves it into place under a
//! per-path lock so two workers never claim the same name. Bodies are
//! verified before they leave the temp file.

use crate::config::ScrapingConfig;
use crate::crawler::{Link, StopHandle};
use crate::download::disk::{self, temp_file_name, verify_as};
use crate::download::error::DownloadError;
use crate::download::filename::{build_filename, with_suffix};
use crate::download::state::{DownloadMachine, RetryPolicy, Transition};
use crate::storage::{with_store, DownloadRecord, SharedStore};
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Distinguishes concurrent temp files within this process
static TEMP_NONCE: AtomicU64 = AtomicU64::new(0);

/// Knobs for the download pool
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadSettings {
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Size limit in bytes
    pub max_file_size: u64,
    pub concurrency: usize,
}

impl DownloadSettings {
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
        }
    }
}

impl From<&ScrapingConfig> for DownloadSettings {
    fn from(config: &ScrapingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            max_file_size: config.max_file_size_bytes(),
            concurrency: config.concurrent_downloads,
        }
    }
}

/// Terminal result for one link
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub link: Link,
    pub success: bool,
    /// Final location on disk, set on success
    pub path: Option<PathBuf>,
    pub bytes: u64,
    /// SHA-256 of the body, taken from the store when a recorded file was
    /// reused without fetching
    pub checksum: Option<String>,
    pub error: Option<String>,
    pub retry_count: u32,
}

/// Outcomes of a batch, in input order
#[derive(Debug, Clone, Default)]
pub struct DownloadSummary {
    pub outcomes: Vec<DownloadOutcome>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_bytes: u64,
    /// Links never scheduled because a stop was requested
    pub skipped: usize,
}

impl DownloadSummary {
    fn from_outcomes(outcomes: Vec<DownloadOutcome>, skipped: usize) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.success).count();
        let total_bytes = outcomes
            .iter()
            .filter(|o| o.success)
            .map(|o| o.bytes)
            .sum();
        Self {
            attempted: outcomes.len(),
            failed: outcomes.len() - succeeded,
            succeeded,
            total_bytes,
            skipped,
            outcomes,
        }
    }
}

/// A body that made it to a temp file
struct Fetched {
    temp_path: PathBuf,
    bytes: u64,
    /// Content-Length as announced by the server
    declared: Option<u64>,
    checksum: String,
    content_type: Option<String>,
}

/// A file in its final location
struct Stored {
    path: PathBuf,
    bytes: u64,
    checksum: Option<String>,
    content_type: Option<String>,
}

type PathLocks = Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>;

/// Downloads approved links into a destination directory
#[derive(Clone)]
pub struct DownloadManager {
    client: Client,
    settings: DownloadSettings,
    dest_dir: PathBuf,
    store: SharedStore,
    path_locks: PathLocks,
    stop: StopHandle,
}

impl DownloadManager {
    /// Creates a manager writing into `dest_dir`
    ///
    /// # Arguments
    ///
    /// * `client` - Shared HTTP client
    /// * `settings` - Retry, size and concurrency limits
    /// * `dest_dir` - Directory receiving downloaded files
    /// * `store` - Where every outcome is recorded
    pub fn new(
        client: Client,
        settings: DownloadSettings,
        dest_dir: impl Into<PathBuf>,
        store: SharedStore,
    ) -> Self {
        Self {
            client,
            settings,
            dest_dir: dest_dir.into(),
            store,
            path_locks: Arc::new(Mutex::new(HashMap::new())),
            stop: StopHandle::new(),
        }
    }

    /// Shares a stop flag checked before each task is scheduled
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn settings(&self) -> &DownloadSettings {
        &self.settings
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// Removes temp files an interrupted run left in the destination
    /// directory
    ///
    /// # Returns
    ///
    /// The number of files removed; errors are logged and count as zero
    pub fn sweep_stale_parts(&self, max_age: Duration) -> usize {
        match disk::sweep_stale_parts(&self.dest_dir, max_age) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(
                    "Could not sweep temp files in {}: {}",
                    self.dest_dir.display(),
                    e
                );
                0
            }
        }
    }

    /// Downloads `links` for `site` on the bounded worker pool
    ///
    /// Individual failures never abort siblings. Outcomes come back in the
    /// order of `links`; links skipped after a stop request have none.
    #[instrument(skip(self, links), fields(count = links.len()))]
    pub async fn download_all(&self, site: &str, links: Vec<Link>) -> DownloadSummary {
        let total = links.len();
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut scheduled = 0;

        for (index, link) in links.into_iter().enumerate() {
            if self.stop.is_stopped() {
                info!("Stop requested, {} downloads not scheduled", total - index);
                break;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            if self.stop.is_stopped() {
                info!("Stop requested, {} downloads not scheduled", total - index);
                break;
            }

            let manager = self.clone();
            let site = site.to_string();
            tasks.spawn(async move {
                let _permit = permit;
                (index, manager.download_one(&site, link).await)
            });
            scheduled += 1;
        }

        let mut slots: Vec<Option<DownloadOutcome>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => warn!("Download task aborted: {}", e),
            }
        }

        let outcomes = slots.into_iter().flatten().collect();
        let summary = DownloadSummary::from_outcomes(outcomes, total - scheduled);
        info!(
            "Downloads for {}: {} succeeded, {} failed, {} bytes",
            site, summary.succeeded, summary.failed, summary.total_bytes
        );
        summary
    }

    /// Downloads a single link to completion or terminal failure
    ///
    /// The outcome is recorded in the store before returning.
    #[instrument(skip(self, link), fields(url = %link.url))]
    pub async fn download_one(&self, site: &str, link: Link) -> DownloadOutcome {
        let filename = build_filename(&link, site);
        let mut machine = DownloadMachine::new(self.settings.retry_policy());
        let mut stored = None;

        while let Some(attempt) = machine.begin_attempt() {
            match self.attempt(&link.url, &filename).await {
                Ok(done) => {
                    machine.succeed();
                    stored = Some(done);
                    break;
                }
                Err(e) => {
                    debug!(attempt, "Attempt failed: {}", e);
                    match machine.fail(e.to_string()) {
                        Transition::Retry {
                            next_attempt,
                            delay,
                        } => {
                            warn!(
                                "Download of {} failed ({}), retry {} in {:?}",
                                link.url, e, next_attempt, delay
                            );
                            tokio::time::sleep(delay).await;
                        }
                        Transition::Fail => break,
                    }
                }
            }
        }

        let retry_count = machine.retry_count();
        match stored {
            Some(stored) => {
                info!("Downloaded {} ({} bytes)", stored.path.display(), stored.bytes);
                self.record(site, &filename, &link, Some(&stored), None, retry_count);
                DownloadOutcome {
                    link,
                    success: true,
                    path: Some(stored.path),
                    bytes: stored.bytes,
                    checksum: stored.checksum,
                    error: None,
                    retry_count,
                }
            }
            None => {
                let error = machine
                    .last_error()
                    .unwrap_or("download did not run")
                    .to_string();
                warn!("Giving up on {}: {}", link.url, error);
                self.record(site, &filename, &link, None, Some(&error), retry_count);
                DownloadOutcome {
                    link,
                    success: false,
                    path: None,
                    bytes: 0,
                    checksum: None,
                    error: Some(error),
                    retry_count,
                }
            }
        }
    }

    /// One attempt: reuse the file already recorded for `url` or fetch,
    /// verify and finalize a new one
    ///
    /// A file that merely shares the computed name is never trusted; the
    /// fetched body goes through [`Self::finalize`], which either matches it
    /// byte for byte or picks a suffixed name.
    async fn attempt(&self, url: &str, filename: &str) -> Result<Stored, DownloadError> {
        if let Some(stored) = self.recorded_file(url).await {
            debug!("{} already recorded at {}", url, stored.path.display());
            return Ok(stored);
        }

        let fetched = self.fetch_to_temp(url).await?;

        let extension = Path::new(filename)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());
        if let Err(source) =
            verify_as(&fetched.temp_path, extension.as_deref(), fetched.declared).await
        {
            let _ = tokio::fs::remove_file(&fetched.temp_path).await;
            return Err(DownloadError::Invalid {
                url: url.to_string(),
                source,
            });
        }

        match self.finalize(&fetched.temp_path, filename, &fetched.checksum).await {
            Ok(path) => Ok(Stored {
                path,
                bytes: fetched.bytes,
                checksum: Some(fetched.checksum),
                content_type: fetched.content_type,
            }),
            Err(e) => {
                let _ = tokio::fs::remove_file(&fetched.temp_path).await;
                Err(e)
            }
        }
    }

    /// The successful download on record for `url`, if its file is still on
    /// disk
    async fn recorded_file(&self, url: &str) -> Option<Stored> {
        let record = match with_store(&self.store, |s| s.download_record(url)) {
            Ok(Some(record)) if record.success => record,
            Ok(_) => return None,
            Err(e) => {
                warn!("History lookup for {} failed: {}", url, e);
                return None;
            }
        };

        let path = PathBuf::from(record.file_path?);
        if path.parent() != Some(self.dest_dir.as_path()) {
            return None;
        }
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(Stored {
                path,
                bytes: meta.len(),
                checksum: record.checksum,
                content_type: record.content_type,
            }),
            _ => None,
        }
    }

    /// Streams `url` into a fresh temp file, enforcing the size limit
    async fn fetch_to_temp(&self, url: &str) -> Result<Fetched, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let limit = self.settings.max_file_size;
        let declared = response.content_length();
        if let Some(declared) = declared {
            if declared > limit {
                return Err(DownloadError::TooLarge {
                    size: declared,
                    limit,
                });
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        tokio::fs::create_dir_all(&self.dest_dir)
            .await
            .map_err(|e| DownloadError::io(&self.dest_dir, e))?;

        let temp_path = self
            .dest_dir
            .join(temp_file_name(TEMP_NONCE.fetch_add(1, Ordering::Relaxed)));
        let mut file = File::create(&temp_path)
            .await
            .map_err(|e| DownloadError::io(&temp_path, e))?;

        let streamed = stream_to_file(&mut file, response, url, &temp_path, limit).await;
        drop(file);

        match streamed {
            Ok((bytes, checksum)) => Ok(Fetched {
                temp_path,
                bytes,
                declared,
                checksum,
                content_type,
            }),
            Err(e) => {
                debug!("Removing partial file {}", temp_path.display());
                let _ = tokio::fs::remove_file(&temp_path).await;
                Err(e)
            }
        }
    }

    /// Moves a finished temp file to its final name
    ///
    /// An identical file already at the candidate path is reused. Different
    /// content moves on to `_1`, `_2`, ... until a free or identical name is
    /// found.
    async fn finalize(
        &self,
        temp_path: &Path,
        filename: &str,
        checksum: &str,
    ) -> Result<PathBuf, DownloadError> {
        let mut suffix = 0u32;
        loop {
            let candidate = if suffix == 0 {
                self.dest_dir.join(filename)
            } else {
                self.dest_dir.join(with_suffix(filename, suffix))
            };

            let lock = self.path_lock(&candidate);
            let _guard = lock.lock().await;

            match tokio::fs::metadata(&candidate).await {
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tokio::fs::rename(temp_path, &candidate)
                        .await
                        .map_err(|e| DownloadError::io(&candidate, e))?;
                    return Ok(candidate);
                }
                Err(e) => return Err(DownloadError::io(&candidate, e)),
                Ok(_) => {
                    if file_checksum(&candidate).await? == checksum {
                        debug!("Identical content already at {}", candidate.display());
                        let _ = tokio::fs::remove_file(temp_path).await;
                        return Ok(candidate);
                    }
                }
            }

            suffix += 1;
        }
    }

    fn path_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .path_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn record(
        &self,
        site: &str,
        filename: &str,
        link: &Link,
        stored: Option<&Stored>,
        error: Option<&str>,
        retry_count: u32,
    ) {
        let record = DownloadRecord {
            site_name: site.to_string(),
            url: link.url.clone(),
            filename: stored
                .and_then(|s| s.path.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| filename.to_string()),
            file_path: stored.map(|s| s.path.display().to_string()),
            file_size_bytes: stored.map(|s| s.bytes).unwrap_or(0),
            content_type: stored.and_then(|s| s.content_type.clone()),
            success: stored.is_some(),
            error_message: error.map(str::to_string),
            retry_count,
            checksum: stored.and_then(|s| s.checksum.clone()),
        };

        let result = with_store(&self.store, |store| {
            store.record_download(&record)?;
            if let Some(message) = error {
                store.log_error("download_error", message, Some(site), Some(&link.url))?;
            }
            Ok(())
        });
        if let Err(e) = result {
            warn!("Failed to record download of {}: {}", link.url, e);
        }
    }
}

/// Streams a response body into `file`, hashing as it goes
///
/// # Returns
///
/// Bytes written and the hex SHA-256 of the body
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    path: &Path,
    limit: u64,
) -> Result<(u64, String), DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut hasher = Sha256::new();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::network(url, e))?;
        written += chunk.len() as u64;
        if written > limit {
            return Err(DownloadError::TooLarge {
                size: written,
                limit,
            });
        }
        hasher.update(&chunk);
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
    }

    writer.flush().await.map_err(|e| DownloadError::io(path, e))?;
    Ok((written, hex::encode(hasher.finalize())))
}

/// Hex SHA-256 of a file on disk
async fn file_checksum(path: &Path) -> Result<String, DownloadError> {
    let mut file = File::open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
