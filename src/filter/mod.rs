//! Link filtering and ranking
//!
//! Discovered links pass through a fixed sequence of stages:
//! 1. Dedup on exact URL
//! 2. Download history
//! 3. Rule filter (file type, keywords, URL sanity)
//! 4. Optional relevance scoring by an injected [`RelevanceScorer`]
//!
//! Survivors are then ranked by [`PriorityScorer`]. No stage reorders or
//! adds links.

mod intelligent;
mod pipeline;
mod priority;
mod rules;

pub use intelligent::{
    build_relevance_prompt, format_documents_for_prompt, infer_site_purpose,
    parse_relevance_response, RelevanceDecision, RelevanceRequest, RelevanceScorer,
    RelevanceTrace, ScorerError, SiteIntent, BATCH_SIZE, SCORER_TIMEOUT,
};
pub use pipeline::FilterPipeline;
pub use priority::{parse_date, parse_size_mb, PriorityScorer, ScoredLink};
pub use rules::{apply_rules, check_link};

use crate::crawler::Link;
use serde::Serialize;
use std::collections::BTreeMap;

/// Why a link was dropped, or why it skipped a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum RejectReason {
    Duplicate,
    AlreadyDownloaded,
    FileType,
    Include,
    Exclude,
    UrlPattern,
    LlmRelevance,
    LlmOmitted,
    /// The scorer failed; the batch was kept unscored
    LlmProcessingError,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::AlreadyDownloaded => "already_downloaded",
            Self::FileType => "file_type_filter",
            Self::Include => "include_filter",
            Self::Exclude => "exclude_filter",
            Self::UrlPattern => "url_pattern_filter",
            Self::LlmRelevance => "llm_relevance_filter",
            Self::LlmOmitted => "llm_omitted",
            Self::LlmProcessingError => "llm_processing_error",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts per reason, in a stable order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReasonHistogram(BTreeMap<&'static str, usize>);

impl ReasonHistogram {
    pub fn add(&mut self, reason: RejectReason, n: usize) {
        if n > 0 {
            *self.0.entry(reason.as_str()).or_insert(0) += n;
        }
    }

    pub fn bump(&mut self, reason: RejectReason) {
        self.add(reason, 1);
    }

    /// Count for `reason`, zero if never seen
    pub fn count(&self, reason: RejectReason) -> usize {
        self.0.get(reason.as_str()).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    pub fn merge(&mut self, other: &ReasonHistogram) {
        for (reason, count) in &other.0 {
            *self.0.entry(*reason).or_insert(0) += *count;
        }
    }
}

/// Candidate counts after each stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub input: usize,
    pub after_dedup: usize,
    pub after_history: usize,
    pub after_rules: usize,
    /// `None` when the relevance stage did not run
    pub after_relevance: Option<usize>,
}

/// Result of running the filter pipeline over one site's links
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    /// Surviving links in discovery order
    pub survivors: Vec<Link>,
    pub reasons: ReasonHistogram,
    pub stage_counts: StageCounts,
    /// Per-link scores, filled only when the relevance stage ran
    pub scores: Vec<RelevanceTrace>,
}
