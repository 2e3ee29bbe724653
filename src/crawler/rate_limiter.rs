//! Per-site request throttling
//!
//! Each site gets a one-minute sliding window of request timestamps plus a
//! minimum gap between consecutive requests. The limiter only delays
//! callers; it never drops or reorders requests.

use crate::config::RateLimitConfig;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument};

/// Length of the sliding window
pub const WINDOW: Duration = Duration::from_secs(60);

/// Request history for one site
#[derive(Debug, Default)]
struct SiteWindow {
    recent: VecDeque<Instant>,
    last_request: Option<Instant>,
}

impl SiteWindow {
    /// Drops timestamps that have aged out of the window
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.recent.front() {
            if now.duration_since(oldest) >= WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until the window has room for another request
    fn window_wait(&self, limit: usize, now: Instant) -> Option<Duration> {
        if self.recent.len() < limit {
            return None;
        }
        let oldest = *self.recent.front()?;
        let wait = (oldest + WINDOW).saturating_duration_since(now);
        (!wait.is_zero()).then_some(wait)
    }

    /// Time until the minimum gap since the last request has passed
    fn gap_wait(&self, min_delay: Duration, now: Instant) -> Option<Duration> {
        let last = self.last_request?;
        let wait = (last + min_delay).saturating_duration_since(now);
        (!wait.is_zero()).then_some(wait)
    }

    fn record(&mut self, now: Instant) {
        self.recent.push_back(now);
        self.last_request = Some(now);
    }
}

/// Rate limiter keyed by site name
///
/// A limiter belongs to a single site scraper and is never shared between
/// concurrent site runs.
#[derive(Debug, Default)]
pub struct RateLimiter {
    sites: HashMap<String, SiteWindow>,
    /// Extra floor on the gap between requests, e.g. from robots.txt
    min_delay_floor: Duration,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the minimum gap between requests for every site
    pub fn set_min_delay_floor(&mut self, floor: Duration) {
        self.min_delay_floor = floor;
    }

    /// Waits until a request to `site` is permitted, then records it
    ///
    /// # Arguments
    ///
    /// * `site` - The site name the request belongs to
    /// * `policy` - The site's rate-limit policy
    ///
    /// # Returns
    ///
    /// The total time spent waiting
    #[instrument(skip(self, policy))]
    pub async fn acquire(&mut self, site: &str, policy: &RateLimitConfig) -> Duration {
        let limit = policy.requests_per_minute.max(1) as usize;
        let min_delay = policy.min_delay().max(self.min_delay_floor);
        let window = self.sites.entry(site.to_string()).or_default();

        let started = Instant::now();

        window.prune(started);
        if let Some(wait) = window.window_wait(limit, started) {
            debug!("Window full for {}, waiting {:?}", site, wait);
            sleep(wait).await;
            window.prune(Instant::now());
        }

        if let Some(wait) = window.gap_wait(min_delay, Instant::now()) {
            debug!("Minimum delay for {}, waiting {:?}", site, wait);
            sleep(wait).await;
        }

        let now = Instant::now();
        window.record(now);
        now.duration_since(started)
    }

    /// Number of requests to `site` inside the current window
    pub fn requests_in_window(&mut self, site: &str) -> usize {
        let now = Instant::now();
        match self.sites.get_mut(site) {
            Some(window) => {
                window.prune(now);
                window.recent.len()
            }
            None => 0,
        }
    }
}
