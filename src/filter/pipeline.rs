//! The filter pipeline

use crate::config::SiteConfig;
use crate::crawler::Link;
use crate::filter::intelligent::score_links;
use crate::filter::rules::apply_rules;
use crate::filter::{FilterOutcome, ReasonHistogram, RejectReason, RelevanceScorer};
use crate::storage::{with_store, SharedStore};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Reduces a site's discovered links to the ones worth downloading
#[derive(Clone)]
pub struct FilterPipeline {
    store: SharedStore,
    scorer: Option<Arc<dyn RelevanceScorer>>,
}

impl FilterPipeline {
    /// Creates a pipeline checking download history in `store`
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            scorer: None,
        }
    }

    /// Enables the relevance stage for sites that ask for it
    pub fn with_scorer(mut self, scorer: Option<Arc<dyn RelevanceScorer>>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn has_scorer(&self) -> bool {
        self.scorer.is_some()
    }

    /// Runs every stage over `links`
    ///
    /// Stages never reorder or add links. A scorer failure keeps the
    /// affected links rather than dropping them.
    #[instrument(skip(self, links, site), fields(site = %site.name, count = links.len()))]
    pub async fn run(&self, links: Vec<Link>, site: &SiteConfig) -> FilterOutcome {
        let mut reasons = ReasonHistogram::default();
        let mut outcome = FilterOutcome::default();
        outcome.stage_counts.input = links.len();

        let unique = dedup(links, &mut reasons);
        outcome.stage_counts.after_dedup = unique.len();

        let fresh = self.drop_downloaded(unique, site, &mut reasons);
        outcome.stage_counts.after_history = fresh.len();

        let mut survivors = apply_rules(fresh, site, &mut reasons);
        outcome.stage_counts.after_rules = survivors.len();

        if site.intelligent_filter.enabled {
            match &self.scorer {
                Some(scorer) => {
                    survivors = score_links(
                        scorer.as_ref(),
                        site,
                        survivors,
                        &mut reasons,
                        &mut outcome.scores,
                    )
                    .await;
                    outcome.stage_counts.after_relevance = Some(survivors.len());
                }
                None => debug!("Relevance filtering enabled but no scorer configured"),
            }
        }

        info!(
            "Filtering complete: {}/{} links passed",
            survivors.len(),
            outcome.stage_counts.input
        );

        outcome.survivors = survivors;
        outcome.reasons = reasons;
        outcome
    }

    fn drop_downloaded(
        &self,
        links: Vec<Link>,
        site: &SiteConfig,
        reasons: &mut ReasonHistogram,
    ) -> Vec<Link> {
        links
            .into_iter()
            .filter(|link| {
                let downloaded = with_store(&self.store, |store| {
                    store.is_already_downloaded(&link.url)
                });
                match downloaded {
                    Ok(true) => {
                        reasons.bump(RejectReason::AlreadyDownloaded);
                        false
                    }
                    Ok(false) => true,
                    Err(e) => {
                        warn!(
                            "History lookup failed for {} on {}, treating as new: {}",
                            link.url, site.name, e
                        );
                        true
                    }
                }
            })
            .collect()
    }
}

/// Drops exact URL repeats, keeping the first occurrence
fn dedup(links: Vec<Link>, reasons: &mut ReasonHistogram) -> Vec<Link> {
    let mut seen = HashSet::new();
    links
        .into_iter()
        .filter(|link| {
            if seen.insert(link.url.clone()) {
                true
            } else {
                reasons.bump(RejectReason::Duplicate);
                false
            }
        })
        .collect()
}
