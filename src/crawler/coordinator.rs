//! Cycle coordinator - drives every site through the pipeline
//!
//! For each enabled site the coordinator:
//! - Opens a session in the store
//! - Scrapes the site's listing pages
//! - Filters and ranks the discovered links
//! - Downloads the survivors
//! - Closes the session with its final counters
//!
//! Sites are processed one after another. A failing site is logged and
//! marked unsuccessful; it never aborts the cycle.

use crate::config::{Config, SiteConfig};
use crate::crawler::fetcher::build_http_client;
use crate::crawler::renderer::PageRenderer;
use crate::crawler::site_scraper::SiteScraper;
use crate::download::{DownloadManager, DownloadSettings};
use crate::filter::{FilterPipeline, PriorityScorer, RelevanceScorer};
use crate::output::{CycleStats, SiteStats};
use crate::storage::{with_store, SessionSummary, SharedStore};
use crate::Result;
use chrono::{Local, NaiveDate};
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

/// Temp files from other processes older than this are swept on startup
pub const STALE_PART_AGE: Duration = Duration::from_secs(60 * 60);

/// Cooperative cancellation flag
///
/// Checked between sites and before each download is scheduled. Work
/// already in flight finishes normally.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Main coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    store: SharedStore,
    client: Client,
    filter: FilterPipeline,
    downloads: DownloadManager,
    renderer: Option<Arc<dyn PageRenderer>>,
    stop: StopHandle,
    today: Option<NaiveDate>,
}

impl Coordinator {
    /// Creates a new coordinator
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `store` - Store for history, sessions and the error log
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to run cycles
    /// * `Err(HarvestError)` - The HTTP client could not be built
    pub fn new(config: Config, store: SharedStore) -> Result<Self> {
        let client = build_http_client(&config.scraping)?;
        let stop = StopHandle::new();
        let downloads = DownloadManager::new(
            client.clone(),
            DownloadSettings::from(&config.scraping),
            config.output.download_dir(),
            store.clone(),
        )
        .with_stop_handle(stop.clone());
        downloads.sweep_stale_parts(STALE_PART_AGE);

        Ok(Self {
            config: Arc::new(config),
            filter: FilterPipeline::new(store.clone()),
            store,
            client,
            downloads,
            renderer: None,
            stop,
            today: None,
        })
    }

    /// Enables relevance scoring for sites that ask for it
    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.filter = self.filter.with_scorer(Some(scorer));
        self
    }

    /// Enables rendered extraction for script-driven sites
    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Pins the reference date used for recency scoring
    pub fn with_reference_date(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A handle that stops the cycle between sites and downloads
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Runs one cycle over the enabled sites
    ///
    /// # Arguments
    ///
    /// * `only` - Restrict the cycle to these site names
    ///
    /// # Returns
    ///
    /// Aggregated statistics. Site failures are reflected in the stats, not
    /// returned as errors.
    #[instrument(skip(self, only))]
    pub async fn run_cycle(&self, only: Option<&[String]>) -> CycleStats {
        let started = Instant::now();
        let mut stats = CycleStats::default();

        let sites: Vec<&SiteConfig> = self
            .config
            .enabled_sites()
            .filter(|site| only.map_or(true, |names| names.iter().any(|n| n == &site.name)))
            .collect();

        info!("Starting cycle over {} site(s)", sites.len());

        for site in sites {
            if self.stop.is_stopped() {
                info!("Stop requested, ending cycle before {}", site.name);
                break;
            }
            let site_stats = self.process_site(site).await;
            stats.absorb(site_stats);
        }

        stats.duration = started.elapsed();
        info!(
            "Cycle complete: {} site(s), {}/{} downloads succeeded in {:.1}s",
            stats.sites_processed,
            stats.downloads_succeeded,
            stats.downloads_attempted,
            stats.duration.as_secs_f64()
        );
        stats
    }

    /// Runs one site through scrape, filter, rank and download
    #[instrument(skip(self, site), fields(site = %site.name))]
    pub async fn process_site(&self, site: &SiteConfig) -> SiteStats {
        let started = Instant::now();
        let mut stats = SiteStats::new(&site.name);

        stats.session_id = match with_store(&self.store, |s| s.start_session(&site.name)) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Could not open session for {}: {}", site.name, e);
                None
            }
        };

        let mut scraper = match SiteScraper::new(site, self.client.clone(), &self.config.scraping) {
            Ok(scraper) => scraper.with_renderer(self.renderer.clone()),
            Err(e) => {
                error!("Could not set up {}: {}", site.name, e);
                self.log_error("site_processing_error", &e.to_string(), site);
                stats.success = false;
                stats.record_error(format!("setup: {}", e));
                return self.finish_site(stats, started);
            }
        };

        let links = match scraper.scrape().await {
            Ok(outcome) => {
                stats.pages_scraped = outcome.pages_scraped;
                stats.strategy = outcome.strategy;
                outcome.links
            }
            Err(e) => {
                error!("Scraping {} failed: {}", site.name, e);
                self.log_error("scraping_error", &e.to_string(), site);
                stats.success = false;
                stats.record_error(format!("scraping: {}", e));
                Vec::new()
            }
        };
        stats.links_found = links.len();

        let filtered = self.filter.run(links, site).await;
        stats.links_surviving = filtered.survivors.len();
        stats.reasons = filtered.reasons;

        let today = self.today.unwrap_or_else(|| Local::now().date_naive());
        let ranked = PriorityScorer::for_site(site, today).prioritize(filtered.survivors);

        let summary = self.downloads.download_all(&site.name, ranked).await;
        stats.downloads_attempted = summary.attempted;
        stats.downloads_succeeded = summary.succeeded;
        stats.downloads_failed = summary.failed;
        stats.bytes_downloaded = summary.total_bytes;
        for outcome in summary.outcomes.iter().filter(|o| !o.success) {
            stats.record_error(format!(
                "{}: {}",
                outcome.link.url,
                outcome.error.as_deref().unwrap_or("unknown error")
            ));
        }

        self.finish_site(stats, started)
    }

    fn finish_site(&self, mut stats: SiteStats, started: Instant) -> SiteStats {
        stats.duration = started.elapsed();

        if let Some(session_id) = stats.session_id {
            let summary = SessionSummary {
                success: stats.success,
                pages_scraped: stats.pages_scraped,
                files_found: stats.links_found,
                files_downloaded: stats.downloads_succeeded,
                files_failed: stats.downloads_failed,
                error_message: stats.errors.first().cloned(),
            };
            if let Err(e) = with_store(&self.store, |s| s.complete_session(session_id, &summary)) {
                warn!("Could not close session {}: {}", session_id, e);
            }
        }

        info!(
            "Finished {}: {} found, {} kept, {}/{} downloaded",
            stats.site_name,
            stats.links_found,
            stats.links_surviving,
            stats.downloads_succeeded,
            stats.downloads_attempted
        );
        stats
    }

    fn log_error(&self, kind: &str, message: &str, site: &SiteConfig) {
        let result = with_store(&self.store, |s| {
            s.log_error(kind, message, Some(&site.name), Some(&site.url))
        });
        if let Err(e) = result {
            warn!("Could not log {} for {}: {}", kind, site.name, e);
        }
    }
}
