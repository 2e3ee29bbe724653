use crate::config::types::{Config, OutputConfig, ScrapingConfig, SiteConfig};
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Upper bound on the download worker pool
const MAX_CONCURRENT_DOWNLOADS: usize = 32;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scraping_config(&config.scraping)?;
    validate_output_config(&config.output)?;
    validate_sites(&config.sites)?;
    Ok(())
}

/// Validates global scraping configuration
fn validate_scraping_config(config: &ScrapingConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_seconds == 0 {
        return Err(ConfigError::Validation(
            "timeout_seconds must be >= 1".to_string(),
        ));
    }

    if config.concurrent_downloads < 1 || config.concurrent_downloads > MAX_CONCURRENT_DOWNLOADS {
        return Err(ConfigError::Validation(format!(
            "concurrent_downloads must be between 1 and {}, got {}",
            MAX_CONCURRENT_DOWNLOADS, config.concurrent_downloads
        )));
    }

    if !config.retry_delay_seconds.is_finite() || config.retry_delay_seconds < 0.0 {
        return Err(ConfigError::Validation(format!(
            "retry_delay_seconds must be a non-negative number, got {}",
            config.retry_delay_seconds
        )));
    }

    if config.max_file_size_mb == 0 {
        return Err(ConfigError::Validation(
            "max_file_size_mb must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.download_dir.is_empty() {
        return Err(ConfigError::Validation(
            "download_dir cannot be empty".to_string(),
        ));
    }

    if matches!(&config.summary_path, Some(path) if path.is_empty()) {
        return Err(ConfigError::Validation(
            "summary_path cannot be empty when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates site entries and their uniqueness
fn validate_sites(sites: &[SiteConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();

    for site in sites {
        if !names.insert(site.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate site name '{}'",
                site.name
            )));
        }
        validate_site(site)?;
    }

    Ok(())
}

/// Validates a single site entry
fn validate_site(site: &SiteConfig) -> Result<(), ConfigError> {
    if site.name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "site name cannot be empty".to_string(),
        ));
    }

    let url = Url::parse(&site.url).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid URL for site '{}': {}", site.name, e))
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "Site '{}' URL must use http or https, got '{}'",
            site.name,
            url.scheme()
        )));
    }

    if site.file_types.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Site '{}' must allow at least one file type",
            site.name
        )));
    }

    if site.rate_limit.requests_per_minute < 1 {
        return Err(ConfigError::Validation(format!(
            "Site '{}': requests_per_minute must be >= 1",
            site.name
        )));
    }

    let delay = site.rate_limit.delay_between_requests;
    if !delay.is_finite() || delay < 0.0 {
        return Err(ConfigError::Validation(format!(
            "Site '{}': delay_between_requests must be a non-negative number, got {}",
            site.name, delay
        )));
    }

    if site.pagination.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "Site '{}': max_pages must be >= 1",
            site.name
        )));
    }

    let threshold = site.intelligent_filter.relevance_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ConfigError::Validation(format!(
            "Site '{}': relevance_threshold must be within [0, 1], got {}",
            site.name, threshold
        )));
    }

    validate_selector(&site.selectors.link_selector)?;
    validate_selector(&site.pagination.next_selector)?;
    if let Some(selector) = &site.selectors.date_selector {
        validate_selector(selector)?;
    }
    if let Some(selector) = &site.selectors.size_selector {
        validate_selector(selector)?;
    }

    Ok(())
}

/// Checks that a CSS selector parses
fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", selector, e)))
}
