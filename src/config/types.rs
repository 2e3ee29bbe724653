use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Sumi-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scraping: ScrapingConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "site")]
    pub sites: Vec<SiteConfig>,
}

impl Config {
    /// Returns the enabled sites in configuration order
    pub fn enabled_sites(&self) -> impl Iterator<Item = &SiteConfig> {
        self.sites.iter().filter(|site| site.enabled)
    }

    /// Looks up a site by its unique name
    pub fn site(&self, name: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|site| site.name == name)
    }
}

/// Global scraping and download behavior
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapingConfig {
    /// User agent sent with every request and matched against robots.txt
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(rename = "timeout-seconds", default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Retries after the first download attempt
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between download retries (seconds)
    #[serde(rename = "retry-delay-seconds", default = "default_retry_delay")]
    pub retry_delay_seconds: f64,

    #[serde(rename = "respect-robots-txt", default = "default_true")]
    pub respect_robots_txt: bool,

    /// Largest file that will be kept on disk (megabytes)
    #[serde(rename = "max-file-size-mb", default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Width of the download worker pool
    #[serde(rename = "concurrent-downloads", default = "default_concurrent_downloads")]
    pub concurrent_downloads: usize,
}

impl ScrapingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_seconds.max(0.0))
    }

    /// Maximum file size in bytes
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            retry_delay_seconds: default_retry_delay(),
            respect_robots_txt: true,
            max_file_size_mb: default_max_file_size_mb(),
            concurrent_downloads: default_concurrent_downloads(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Root directory for downloaded files
    #[serde(rename = "download-dir")]
    pub download_dir: String,

    /// Optional path for a markdown report of each cycle
    #[serde(rename = "summary-path", default)]
    pub summary_path: Option<String>,
}

impl OutputConfig {
    pub fn download_dir(&self) -> PathBuf {
        PathBuf::from(&self.download_dir)
    }
}

/// One configured site
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site name, used as the key for sessions and rate limiting
    pub name: String,

    /// Entry page for scraping
    pub url: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Allowed file extensions, normalized to ".ext" on load
    #[serde(rename = "file-types", default = "default_file_types")]
    pub file_types: Vec<String>,

    #[serde(default)]
    pub filters: KeywordFilters,

    /// Scoring terms; falls back to `filters` when absent
    #[serde(default)]
    pub scoring: Option<KeywordFilters>,

    #[serde(default)]
    pub selectors: SelectorConfig,

    #[serde(default)]
    pub pagination: PaginationConfig,

    #[serde(rename = "rate-limit", default)]
    pub rate_limit: RateLimitConfig,

    #[serde(rename = "intelligent-filter", default)]
    pub intelligent_filter: IntelligentFilterConfig,
}

impl SiteConfig {
    /// A site with default policies, as if only `name` and `url` were
    /// configured
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            enabled: true,
            file_types: default_file_types(),
            filters: KeywordFilters::default(),
            scoring: None,
            selectors: SelectorConfig::default(),
            pagination: PaginationConfig::default(),
            rate_limit: RateLimitConfig::default(),
            intelligent_filter: IntelligentFilterConfig::default(),
        }
    }

    /// Checks a normalized file type against the allowed set
    pub fn allows_file_type(&self, file_type: &str) -> bool {
        !file_type.is_empty() && self.file_types.iter().any(|t| t == file_type)
    }

    /// Terms used by the priority scorer
    pub fn scoring_terms(&self) -> &KeywordFilters {
        self.scoring.as_ref().unwrap_or(&self.filters)
    }

    /// The first configured file type, which scores highest when ranking
    pub fn primary_file_type(&self) -> Option<&str> {
        self.file_types.first().map(String::as_str)
    }
}

/// Include/exclude keyword lists
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeywordFilters {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// CSS selectors used for extraction
#[derive(Debug, Clone, Deserialize)]
pub struct SelectorConfig {
    #[serde(rename = "link-selector", default = "default_link_selector")]
    pub link_selector: String,

    #[serde(rename = "date-selector", default)]
    pub date_selector: Option<String>,

    #[serde(rename = "size-selector", default)]
    pub size_selector: Option<String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            link_selector: default_link_selector(),
            date_selector: None,
            size_selector: None,
        }
    }
}

/// Pagination policy
#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(rename = "next-selector", default = "default_next_selector")]
    pub next_selector: String,

    /// Upper bound on pages visited, including the first
    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            next_selector: default_next_selector(),
            max_pages: default_max_pages(),
        }
    }
}

/// Per-site request throttle
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RateLimitConfig {
    #[serde(rename = "requests-per-minute", default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Minimum delay between consecutive requests (seconds)
    #[serde(rename = "delay-between-requests", default = "default_delay_between_requests")]
    pub delay_between_requests: f64,
}

impl RateLimitConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_between_requests.max(0.0))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            delay_between_requests: default_delay_between_requests(),
        }
    }
}

/// Policy for the model-assisted relevance stage
#[derive(Debug, Clone, Deserialize)]
pub struct IntelligentFilterConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(rename = "relevance-threshold", default = "default_relevance_threshold")]
    pub relevance_threshold: f64,

    /// Free-text guidance passed to the scorer
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for IntelligentFilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            relevance_threshold: default_relevance_threshold(),
            instructions: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    format!("sumi-harvest/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    5.0
}

fn default_max_file_size_mb() -> u64 {
    100
}

fn default_concurrent_downloads() -> usize {
    3
}

fn default_file_types() -> Vec<String> {
    vec![".pdf".to_string()]
}

fn default_link_selector() -> String {
    "a[href*='.pdf']".to_string()
}

fn default_next_selector() -> String {
    ".next".to_string()
}

fn default_max_pages() -> u32 {
    10
}

fn default_requests_per_minute() -> u32 {
    30
}

fn default_delay_between_requests() -> f64 {
    2.0
}

fn default_relevance_threshold() -> f64 {
    0.6
}
