//! HTTP fetcher implementation
//!
//! This module builds the shared HTTP client and fetches listing pages.
//! Non-success statuses are returned rather than raised so the strategy
//! selector can classify them.

use crate::config::ScrapingConfig;
use crate::{HarvestError, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// A fetched listing page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: Url,
    /// HTTP status code
    pub status: u16,
    /// Page body
    pub body: String,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The scraping configuration (user agent and timeout)
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use sumi_harvest::config::ScrapingConfig;
/// use sumi_harvest::crawler::build_http_client;
///
/// let client = build_http_client(&ScrapingConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &ScrapingConfig) -> std::result::Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.timeout())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a page body
///
/// # Returns
///
/// * `Ok(FetchedPage)` - The response, whatever its status
/// * `Err(HarvestError)` - Transport failure or unreadable body
pub async fn fetch_page(client: &Client, url: &Url) -> Result<FetchedPage> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|source| HarvestError::Http {
            url: url.to_string(),
            source,
        })?;

    let status = response.status().as_u16();
    let final_url = response.url().clone();
    let body = response.text().await.map_err(|source| HarvestError::Http {
        url: url.to_string(),
        source,
    })?;

    debug!("Fetched {} ({}, {} bytes)", final_url, status, body.len());

    Ok(FetchedPage {
        final_url,
        status,
        body,
    })
}
