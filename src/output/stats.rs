//! Cycle statistics and store statistics
//!
//! [`CycleStats`] is built in memory while a cycle runs. [`StoreStatistics`]
//! is read back from the database for `--stats`.

use crate::crawler::FetchStrategy;
use crate::download::{storage_stats, StorageStats};
use crate::filter::ReasonHistogram;
use crate::storage::{
    ErrorCount, ErrorStats, HistoryEntry, SessionRecord, SqliteStore, StorageResult,
};
use std::path::Path;
use std::time::Duration;

/// Error summaries kept per site
pub const MAX_ERROR_SUMMARIES: usize = 5;

/// Sessions shown by `--stats`
const RECENT_SESSION_LIMIT: usize = 10;

/// Download records shown by `--stats`
const RECENT_DOWNLOAD_LIMIT: usize = 10;

/// Window for the recent error breakdown
const ERROR_WINDOW_HOURS: u32 = 24;

/// Counters for one site in one cycle
#[derive(Debug, Clone, Default)]
pub struct SiteStats {
    pub site_name: String,
    pub success: bool,
    pub session_id: Option<i64>,
    /// `None` when no page was fetched
    pub strategy: Option<FetchStrategy>,
    pub pages_scraped: u32,
    pub links_found: usize,
    pub links_surviving: usize,
    pub reasons: ReasonHistogram,
    pub downloads_attempted: usize,
    pub downloads_succeeded: usize,
    pub downloads_failed: usize,
    pub bytes_downloaded: u64,
    pub duration: Duration,
    /// The first few errors, in the order they happened
    pub errors: Vec<String>,
    pub error_count: usize,
}

impl SiteStats {
    pub fn new(site_name: impl Into<String>) -> Self {
        Self {
            site_name: site_name.into(),
            success: true,
            ..Self::default()
        }
    }

    /// Notes an error, keeping only the first [`MAX_ERROR_SUMMARIES`]
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        if self.errors.len() < MAX_ERROR_SUMMARIES {
            self.errors.push(message.into());
        }
    }
}

/// Aggregate counters for a whole cycle
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    pub sites_processed: usize,
    pub sites_succeeded: usize,
    pub links_found: usize,
    pub links_surviving: usize,
    pub downloads_attempted: usize,
    pub downloads_succeeded: usize,
    pub bytes_downloaded: u64,
    pub duration: Duration,
    pub sites: Vec<SiteStats>,
}

impl CycleStats {
    /// Folds one site's counters into the totals
    pub fn absorb(&mut self, site: SiteStats) {
        self.sites_processed += 1;
        if site.success {
            self.sites_succeeded += 1;
        }
        self.links_found += site.links_found;
        self.links_surviving += site.links_surviving;
        self.downloads_attempted += site.downloads_attempted;
        self.downloads_succeeded += site.downloads_succeeded;
        self.bytes_downloaded += site.bytes_downloaded;
        self.sites.push(site);
    }

    /// Whether the cycle touched no site at all
    pub fn nothing_processed(&self) -> bool {
        self.sites_processed == 0
    }

    pub fn downloads_failed(&self) -> usize {
        self.downloads_attempted - self.downloads_succeeded
    }

    /// Download success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.downloads_attempted == 0 {
            return 0.0;
        }
        self.downloads_succeeded as f64 / self.downloads_attempted as f64 * 100.0
    }

    /// Reasons summed over all sites
    pub fn reasons(&self) -> ReasonHistogram {
        let mut total = ReasonHistogram::default();
        for site in &self.sites {
            total.merge(&site.reasons);
        }
        total
    }
}

/// Long-run totals read from the store
#[derive(Debug, Clone)]
pub struct StoreStatistics {
    pub downloads_succeeded: u64,
    pub downloads_failed: u64,
    pub total_bytes: u64,
    pub downloads_by_site: Vec<(String, u64)>,
    pub recent_sessions: Vec<SessionRecord>,
    pub recent_downloads: Vec<HistoryEntry>,
    pub errors_by_kind: Vec<ErrorCount>,
    pub recent_errors: ErrorStats,
    /// What is actually on disk under the download directory
    pub storage: StorageStats,
}

/// Loads statistics from the store and the download directory
///
/// # Arguments
///
/// * `store` - The store to query
/// * `download_dir` - Directory whose files are totalled
///
/// # Returns
///
/// * `Ok(StoreStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - A query or the directory walk failed
pub fn load_statistics(store: &SqliteStore, download_dir: &Path) -> StorageResult<StoreStatistics> {
    let (downloads_succeeded, downloads_failed) = store.download_counts()?;

    Ok(StoreStatistics {
        downloads_succeeded,
        downloads_failed,
        total_bytes: store.total_bytes()?,
        downloads_by_site: store.downloads_by_site()?,
        recent_sessions: store.recent_sessions(RECENT_SESSION_LIMIT)?,
        recent_downloads: store.download_history(None, RECENT_DOWNLOAD_LIMIT)?,
        errors_by_kind: store.error_counts_by_kind()?,
        recent_errors: store.error_stats(None, ERROR_WINDOW_HOURS)?,
        storage: storage_stats(download_dir)?,
    })
}

/// Prints store statistics to stdout
pub fn print_statistics(stats: &StoreStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Downloads:");
    println!("  Succeeded: {}", stats.downloads_succeeded);
    println!("  Failed: {}", stats.downloads_failed);
    println!("  Total size: {}", format_bytes(stats.total_bytes));
    println!();

    if !stats.downloads_by_site.is_empty() {
        println!("Downloads by Site:");
        for (site, count) in &stats.downloads_by_site {
            println!("  {}: {}", site, count);
        }
        println!();
    }

    if !stats.recent_sessions.is_empty() {
        println!("Recent Sessions:");
        for session in &stats.recent_sessions {
            println!(
                "  #{} {} [{}] started {}: {} pages, {} found, {} downloaded, {} failed",
                session.id,
                session.site_name,
                session.status.to_db_string(),
                session.started_at,
                session.pages_scraped,
                session.files_found,
                session.files_downloaded,
                session.files_failed
            );
        }
        println!();
    }

    if !stats.recent_downloads.is_empty() {
        println!("Recent Downloads:");
        for entry in &stats.recent_downloads {
            let record = &entry.record;
            let status = if record.success {
                format_bytes(record.file_size_bytes)
            } else {
                format!(
                    "failed: {}",
                    record.error_message.as_deref().unwrap_or("unknown error")
                )
            };
            println!(
                "  {} {} {} ({})",
                entry.downloaded_at, record.site_name, record.filename, status
            );
        }
        println!();
    }

    if !stats.errors_by_kind.is_empty() {
        println!("Error Summary:");
        for error in &stats.errors_by_kind {
            println!("  {}: {}", error.kind, error.count);
        }
        println!();
    }

    let recent = &stats.recent_errors;
    println!("Errors in the last {}h: {}", recent.window_hours, recent.total);
    for error in &recent.by_kind {
        println!("  {}: {}", error.kind, error.count);
    }
    for (site, count) in &recent.by_site {
        println!("  site {}: {}", site, count);
    }
    println!();

    let storage = &stats.storage;
    println!("Storage ({}):", storage.root.display());
    println!(
        "  {} files, {}",
        storage.total_files,
        format_bytes(storage.total_bytes)
    );
    for (extension, usage) in &storage.by_extension {
        let label = if extension.is_empty() {
            "(none)"
        } else {
            extension.as_str()
        };
        println!(
            "  {}: {} files, {}",
            label,
            usage.files,
            format_bytes(usage.bytes)
        );
    }
}

/// Prints a one-screen summary of a finished cycle
pub fn print_cycle_summary(stats: &CycleStats) {
    println!("=== Cycle Summary ===\n");

    if stats.nothing_processed() {
        println!("No sites were processed.");
        return;
    }

    println!(
        "Sites: {} processed, {} succeeded",
        stats.sites_processed, stats.sites_succeeded
    );
    println!(
        "Links: {} found, {} after filtering",
        stats.links_found, stats.links_surviving
    );
    println!(
        "Downloads: {}/{} succeeded ({:.1}%), {}",
        stats.downloads_succeeded,
        stats.downloads_attempted,
        stats.success_rate(),
        format_bytes(stats.bytes_downloaded)
    );
    println!("Duration: {:.1}s", stats.duration.as_secs_f64());
    println!();

    for site in &stats.sites {
        println!(
            "  {} [{}]: {} found, {} kept, {}/{} downloaded",
            site.site_name,
            if site.success { "ok" } else { "failed" },
            site.links_found,
            site.links_surviving,
            site.downloads_succeeded,
            site.downloads_attempted
        );
        for error in &site.errors {
            println!("    ! {}", error);
        }
    }
}

/// Formats a byte count with a binary unit
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
