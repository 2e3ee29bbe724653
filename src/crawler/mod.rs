//! Crawler module for link discovery and cycle coordination
//!
//! This module contains the scraping side of the pipeline, including:
//! - Static/rendered strategy selection
//! - Per-site rate limiting
//! - Link extraction and pagination
//! - Overall cycle coordination

mod coordinator;
mod extractor;
mod fetcher;
mod link;
mod rate_limiter;
mod renderer;
mod site_scraper;
mod strategy;

pub use coordinator::{Coordinator, StopHandle, STALE_PART_AGE};
pub use extractor::{extract_links, find_next_page, SiteSelectors};
pub use fetcher::{build_http_client, fetch_page, FetchedPage};
pub use link::Link;
pub use rate_limiter::{RateLimiter, WINDOW};
pub use renderer::{PageRenderer, RenderSession};
pub use site_scraper::{LinkPages, ScrapeOutcome, SiteScraper};
pub use strategy::{
    select_strategy, select_strategy_for_probe, FetchStrategy, SelectionReason, StrategyDecision,
};
