//! Robots.txt handling module
//!
//! This module fetches and parses a site's robots.txt so the scraper can
//! skip disallowed entry pages and honor `Crawl-delay`.

mod parser;

pub use parser::ParsedRobots;

use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

/// Fetches robots.txt for the origin of `site_url`
///
/// A 2xx response is parsed. Any other status, a transport error or an
/// unreadable body yields rules that allow everything.
///
/// # Arguments
///
/// * `client` - The shared HTTP client
/// * `site_url` - Any URL on the site
pub async fn fetch_robots(client: &Client, site_url: &Url) -> ParsedRobots {
    let Ok(robots_url) = site_url.join("/robots.txt") else {
        return ParsedRobots::allow_all();
    };

    let response = match client.get(robots_url.clone()).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!("Could not fetch {}: {}", robots_url, e);
            return ParsedRobots::allow_all();
        }
    };

    if !response.status().is_success() {
        debug!("No robots.txt at {} ({})", robots_url, response.status());
        return ParsedRobots::allow_all();
    }

    match response.text().await {
        Ok(body) => ParsedRobots::from_content(&body),
        Err(e) => {
            warn!("Could not read {}: {}", robots_url, e);
            ParsedRobots::allow_all()
        }
    }
}
