//! Model-assisted relevance stage
//!
//! The crate does not talk to any model provider itself. Callers inject a
//! [`RelevanceScorer`]; the helpers here build the prompt a provider would
//! send and parse the JSON it gets back.
//!
//! A scorer failure never loses links: the affected batch passes through
//! unscored and is counted under `llm_processing_error`.

use crate::config::SiteConfig;
use crate::crawler::Link;
use crate::filter::{ReasonHistogram, RejectReason};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Links sent to the scorer per call
pub const BATCH_SIZE: usize = 10;

/// Upper bound on a single scorer call
pub const SCORER_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors a scorer may report
#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("Scorer transport error: {0}")]
    Transport(String),

    #[error("Malformed scorer response: {0}")]
    MalformedResponse(String),

    #[error("Scorer timed out after {0:?}")]
    Timeout(Duration),
}

/// What the site is being harvested for
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteIntent {
    pub site_name: String,
    pub allowed_types: Vec<String>,
    pub include_terms: Vec<String>,
    pub exclude_terms: Vec<String>,
    pub instructions: Option<String>,
    /// Short description guessed from the site name
    pub purpose: String,
    pub threshold: f64,
}

impl SiteIntent {
    pub fn for_site(site: &SiteConfig) -> Self {
        Self {
            site_name: site.name.clone(),
            allowed_types: site.file_types.clone(),
            include_terms: site.filters.include.clone(),
            exclude_terms: site.filters.exclude.clone(),
            instructions: site.intelligent_filter.instructions.clone(),
            purpose: infer_site_purpose(&site.name),
            threshold: site.intelligent_filter.relevance_threshold,
        }
    }
}

/// One scorer call
#[derive(Debug, Clone)]
pub struct RelevanceRequest {
    pub site: String,
    pub links: Vec<Link>,
    pub intent: SiteIntent,
}

/// The scorer's verdict on one link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceDecision {
    pub url: String,
    pub relevance_score: f64,
    pub include: bool,
    #[serde(default)]
    pub reasoning: String,
}

impl RelevanceDecision {
    /// Rejects scores outside [0, 1], NaN included
    fn check_score(&self) -> Result<(), ScorerError> {
        if (0.0..=1.0).contains(&self.relevance_score) {
            Ok(())
        } else {
            Err(ScorerError::MalformedResponse(format!(
                "score {} for {} is outside [0, 1]",
                self.relevance_score, self.url
            )))
        }
    }
}

/// A scored link as reported in the filter outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevanceTrace {
    pub url: String,
    pub relevance_score: f64,
    pub include: bool,
    pub reasoning: String,
    /// Whether the link survived the threshold
    pub kept: bool,
}

/// Scores links for relevance to a site's intent
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// Scores one batch of at most [`BATCH_SIZE`] links
    ///
    /// Links missing from the returned decisions are dropped as omitted.
    async fn score_batch(
        &self,
        request: &RelevanceRequest,
    ) -> Result<Vec<RelevanceDecision>, ScorerError>;
}

/// Guesses what a site publishes from its name
///
/// # Examples
///
/// ```
/// use sumi_harvest::filter::infer_site_purpose;
///
/// assert_eq!(infer_site_purpose("Acme Financial"), "Financial reports");
/// assert_eq!(infer_site_purpose("Research Data Portal"), "Research data");
/// ```
pub fn infer_site_purpose(site_name: &str) -> String {
    const PURPOSES: &[(&[&str], &str)] = &[
        (&["financ", "investor", "earnings"], "Financial reports"),
        (&["research", "data", "statistic", "science"], "Research data"),
        (&["gov", "agency", "ministry", "public", "policy"], "Government publications"),
        (&["legal", "court", "law", "regulat"], "Legal documents"),
        (&["health", "medical", "clinical"], "Health information"),
    ];

    let name = site_name.to_lowercase();
    let words: Vec<&str> = name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    PURPOSES
        .iter()
        .find(|(keys, _)| {
            keys.iter()
                .any(|key| words.iter().any(|word| word.starts_with(key)))
        })
        .map(|(_, purpose)| purpose.to_string())
        .unwrap_or_else(|| "General documents".to_string())
}

/// Renders links as a numbered document list
pub fn format_documents_for_prompt(links: &[Link]) -> String {
    let mut out = String::new();
    for (i, link) in links.iter().enumerate() {
        let _ = writeln!(out, "Document {}:", i + 1);
        let _ = writeln!(out, "  URL: {}", link.url);
        let _ = writeln!(out, "  Title: {}", link.title);
        if !link.file_type.is_empty() {
            let _ = writeln!(out, "  Type: {}", link.file_type);
        }
        if let Some(date) = &link.date {
            let _ = writeln!(out, "  Date: {}", date);
        }
        if let Some(size) = &link.size {
            let _ = writeln!(out, "  Size: {}", size);
        }
        out.push('\n');
    }
    out
}

/// Builds the full relevance prompt for one batch
pub fn build_relevance_prompt(intent: &SiteIntent, links: &[Link]) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "You are screening documents found on the site \"{}\" ({}).",
        intent.site_name, intent.purpose
    );
    let _ = writeln!(prompt, "Wanted file types: {}", intent.allowed_types.join(", "));
    if !intent.include_terms.is_empty() {
        let _ = writeln!(prompt, "Preferred topics: {}", intent.include_terms.join(", "));
    }
    if !intent.exclude_terms.is_empty() {
        let _ = writeln!(prompt, "Unwanted topics: {}", intent.exclude_terms.join(", "));
    }
    if let Some(instructions) = &intent.instructions {
        let _ = writeln!(prompt, "Additional instructions: {}", instructions);
    }

    prompt.push('\n');
    prompt.push_str(&format_documents_for_prompt(links));

    let _ = writeln!(
        prompt,
        "For every document, return a JSON array of objects with the fields \
         \"url\", \"relevance_score\" (0.0 to 1.0), \"include\" (true/false) and \
         \"reasoning\". Documents scoring below {:.2} are dropped. Respond with \
         JSON only.",
        intent.threshold
    );
    prompt
}

/// Parses a scorer's JSON reply
///
/// Accepts a bare array or an object with a `documents` array, optionally
/// wrapped in a Markdown code fence.
///
/// # Returns
///
/// * `Ok(decisions)` - Every entry parsed and every score lies in [0, 1]
/// * `Err(ScorerError::MalformedResponse)` - Anything else
pub fn parse_relevance_response(text: &str) -> Result<Vec<RelevanceDecision>, ScorerError> {
    let body = strip_code_fence(text);
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ScorerError::MalformedResponse(e.to_string()))?;

    let entries = match value {
        serde_json::Value::Array(entries) => entries,
        serde_json::Value::Object(mut map) => match map.remove("documents") {
            Some(serde_json::Value::Array(entries)) => entries,
            _ => {
                return Err(ScorerError::MalformedResponse(
                    "expected a \"documents\" array".to_string(),
                ))
            }
        },
        _ => {
            return Err(ScorerError::MalformedResponse(
                "expected a JSON array or object".to_string(),
            ))
        }
    };

    entries
        .into_iter()
        .map(|entry| {
            let decision: RelevanceDecision = serde_json::from_value(entry)
                .map_err(|e| ScorerError::MalformedResponse(e.to_string()))?;
            decision.check_score()?;
            Ok(decision)
        })
        .collect()
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };

    let after = &trimmed[start + 3..];
    // Skip the info string ("json") on the opening fence line
    let content = match after.find('\n') {
        Some(newline) => &after[newline + 1..],
        None => after,
    };
    match content.find("```") {
        Some(end) => content[..end].trim(),
        None => content.trim(),
    }
}

/// Runs the relevance stage over `links`
///
/// Keeps a link iff the scorer includes it with a score at or above the
/// site's threshold. Order is preserved.
pub(crate) async fn score_links(
    scorer: &dyn RelevanceScorer,
    site: &SiteConfig,
    links: Vec<Link>,
    reasons: &mut ReasonHistogram,
    traces: &mut Vec<RelevanceTrace>,
) -> Vec<Link> {
    let intent = SiteIntent::for_site(site);
    let threshold = intent.threshold;
    let mut kept = Vec::with_capacity(links.len());
    let mut remaining = links.into_iter();

    loop {
        let batch: Vec<Link> = remaining.by_ref().take(BATCH_SIZE).collect();
        if batch.is_empty() {
            break;
        }

        let request = RelevanceRequest {
            site: site.name.clone(),
            links: batch,
            intent: intent.clone(),
        };
        let result = match tokio::time::timeout(SCORER_TIMEOUT, scorer.score_batch(&request)).await
        {
            Ok(result) => result,
            Err(_) => Err(ScorerError::Timeout(SCORER_TIMEOUT)),
        };
        // Scores from any scorer must lie in [0, 1]
        let result = result.and_then(|decisions| {
            decisions.iter().try_for_each(RelevanceDecision::check_score)?;
            Ok(decisions)
        });

        let decisions = match result {
            Ok(decisions) => decisions,
            Err(e) => {
                warn!(
                    "Relevance scoring failed for {} links on {}, keeping them: {}",
                    request.links.len(),
                    site.name,
                    e
                );
                reasons.add(RejectReason::LlmProcessingError, request.links.len());
                kept.extend(request.links);
                continue;
            }
        };

        let by_url: HashMap<&str, &RelevanceDecision> =
            decisions.iter().map(|d| (d.url.as_str(), d)).collect();

        for link in request.links {
            let Some(decision) = by_url.get(link.url.as_str()) else {
                debug!("Scorer omitted {}", link.url);
                reasons.bump(RejectReason::LlmOmitted);
                continue;
            };

            let keep = decision.include && decision.relevance_score >= threshold;
            traces.push(RelevanceTrace {
                url: link.url.clone(),
                relevance_score: decision.relevance_score,
                include: decision.include,
                reasoning: decision.reasoning.clone(),
                kept: keep,
            });

            if keep {
                kept.push(link);
            } else {
                reasons.bump(RejectReason::LlmRelevance);
            }
        }
    }

    kept
}
