//! Integration tests for the filter pipeline and ranking

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use sumi_harvest::config::SiteConfig;
use sumi_harvest::crawler::Link;
use sumi_harvest::filter::{
    FilterPipeline, PriorityScorer, RejectReason, RelevanceDecision, RelevanceRequest,
    RelevanceScorer, ScorerError,
};
use sumi_harvest::storage::{share, with_store, DownloadRecord, SharedStore, SqliteStore};

fn store() -> SharedStore {
    share(SqliteStore::open_in_memory().unwrap())
}

fn link(path: &str, title: &str) -> Link {
    Link::from_raw(&format!("https://example.com/{}", path), title)
}

fn with_scorer(scorer: Arc<dyn RelevanceScorer>) -> FilterPipeline {
    FilterPipeline::new(store()).with_scorer(Some(scorer))
}

fn mark_downloaded(store: &SharedStore, url: &str) {
    let record = DownloadRecord {
        site_name: "reports".to_string(),
        url: url.to_string(),
        filename: "reports_done.pdf".to_string(),
        file_path: Some("/tmp/reports_done.pdf".to_string()),
        file_size_bytes: 10,
        content_type: None,
        success: true,
        error_message: None,
        retry_count: 0,
        checksum: None,
    };
    with_store(store, |s| s.record_download(&record)).unwrap();
}

/// Always fails, as an unreachable scoring service would
struct FailingScorer;

#[async_trait]
impl RelevanceScorer for FailingScorer {
    async fn score_batch(
        &self,
        _request: &RelevanceRequest,
    ) -> Result<Vec<RelevanceDecision>, ScorerError> {
        Err(ScorerError::Transport("connection refused".to_string()))
    }
}

/// Answers from a fixed table; URLs not in the table are omitted
struct TableScorer {
    scores: HashMap<String, (f64, bool)>,
    calls: AtomicUsize,
}

impl TableScorer {
    fn new(entries: &[(&Link, f64, bool)]) -> Self {
        Self {
            scores: entries
                .iter()
                .map(|(l, score, include)| (l.url.clone(), (*score, *include)))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RelevanceScorer for TableScorer {
    async fn score_batch(
        &self,
        request: &RelevanceRequest,
    ) -> Result<Vec<RelevanceDecision>, ScorerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(request.links.len() <= 10);
        Ok(request
            .links
            .iter()
            .filter_map(|l| {
                self.scores
                    .get(&l.url)
                    .map(|(score, include)| RelevanceDecision {
                        url: l.url.clone(),
                        relevance_score: *score,
                        include: *include,
                        reasoning: String::new(),
                    })
            })
            .collect())
    }
}

#[tokio::test]
async fn test_rule_stages_report_reasons() {
    let store = store();
    mark_downloaded(&store, "https://example.com/old.pdf");

    let mut site = SiteConfig::new("reports", "https://example.com/");
    site.filters.exclude = vec!["draft".to_string()];

    let links = vec![
        link("a.pdf", "Annual report"),
        link("a.pdf", "Annual report again"),
        link("old.pdf", "Last year"),
        link("table.csv", "Table"),
        link("b.pdf", "Draft budget"),
        link("c.pdf", "Census"),
    ];

    let outcome = FilterPipeline::new(store).run(links, &site).await;

    let urls: Vec<_> = outcome.survivors.iter().map(|l| l.url.as_str()).collect();
    assert_eq!(
        urls,
        vec!["https://example.com/a.pdf", "https://example.com/c.pdf"]
    );
    assert_eq!(outcome.survivors[0].title, "Annual report");

    assert_eq!(outcome.reasons.count(RejectReason::Duplicate), 1);
    assert_eq!(outcome.reasons.count(RejectReason::AlreadyDownloaded), 1);
    assert_eq!(outcome.reasons.count(RejectReason::FileType), 1);
    assert_eq!(outcome.reasons.count(RejectReason::Exclude), 1);
    assert_eq!(outcome.reasons.total(), 4);

    let counts = outcome.stage_counts;
    assert_eq!(counts.input, 6);
    assert_eq!(counts.after_dedup, 5);
    assert_eq!(counts.after_history, 4);
    assert_eq!(counts.after_rules, 2);
    assert_eq!(counts.after_relevance, None);
}

#[tokio::test]
async fn test_include_terms_are_required() {
    let mut site = SiteConfig::new("reports", "https://example.com/");
    site.filters.include = vec!["2024".to_string()];

    let links = vec![
        link("a.pdf", "Report 2024"),
        link("b.pdf", "Report 2023"),
        link("2024/c.pdf", "Appendix"),
    ];

    let outcome = FilterPipeline::new(store()).run(links, &site).await;

    assert_eq!(outcome.survivors.len(), 2);
    assert_eq!(outcome.reasons.count(RejectReason::Include), 1);
}

#[tokio::test]
async fn test_scorer_failure_keeps_batch() {
    let mut site = SiteConfig::new("reports", "https://example.com/");
    site.intelligent_filter.enabled = true;

    let links = vec![link("a.pdf", "A"), link("b.pdf", "B"), link("c.pdf", "C")];

    let pipeline = with_scorer(Arc::new(FailingScorer));
    let outcome = pipeline.run(links, &site).await;

    assert_eq!(outcome.survivors.len(), 3);
    assert_eq!(outcome.reasons.count(RejectReason::LlmProcessingError), 3);
    assert_eq!(outcome.stage_counts.after_relevance, Some(3));
}

#[tokio::test]
async fn test_scorer_threshold_and_omissions() {
    let mut site = SiteConfig::new("reports", "https://example.com/");
    site.intelligent_filter.enabled = true;
    site.intelligent_filter.relevance_threshold = 0.6;

    let keep = link("keep.pdf", "Keep");
    let low = link("low.pdf", "Low score");
    let refused = link("refused.pdf", "Refused");
    let missing = link("missing.pdf", "Missing");

    let scorer = Arc::new(TableScorer::new(&[
        (&keep, 0.9, true),
        (&low, 0.3, true),
        (&refused, 0.95, false),
    ]));

    let pipeline = with_scorer(scorer.clone());
    let outcome = pipeline
        .run(vec![keep.clone(), low, refused, missing], &site)
        .await;

    assert_eq!(outcome.survivors, vec![keep]);
    assert_eq!(outcome.reasons.count(RejectReason::LlmRelevance), 2);
    assert_eq!(outcome.reasons.count(RejectReason::LlmOmitted), 1);
    assert_eq!(outcome.scores.len(), 3);
    assert_eq!(outcome.scores.iter().filter(|t| t.kept).count(), 1);
    assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_scoring_batches_preserve_order() {
    let mut site = SiteConfig::new("reports", "https://example.com/");
    site.intelligent_filter.enabled = true;

    let links: Vec<Link> = (0..23)
        .map(|i| link(&format!("doc{:02}.pdf", i), &format!("Document {}", i)))
        .collect();
    let entries: Vec<(&Link, f64, bool)> = links.iter().map(|l| (l, 0.8, true)).collect();
    let scorer = Arc::new(TableScorer::new(&entries));

    let pipeline = with_scorer(scorer.clone());
    let outcome = pipeline.run(links.clone(), &site).await;

    assert_eq!(outcome.survivors, links);
    assert_eq!(scorer.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_disabled_relevance_ignores_scorer() {
    let site = SiteConfig::new("reports", "https://example.com/");
    let scorer = Arc::new(TableScorer::new(&[]));

    let pipeline = with_scorer(scorer.clone());
    let outcome = pipeline.run(vec![link("a.pdf", "A")], &site).await;

    assert_eq!(outcome.survivors.len(), 1);
    assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_filtered_links_rank_by_priority() {
    let mut site = SiteConfig::new("reports", "https://example.com/");
    site.file_types = vec![".pdf".to_string(), ".xlsx".to_string()];
    site.filters.include = vec!["annual".to_string()];

    let links = vec![
        link("old.xlsx", "Annual data").with_date("2019-01-01"),
        link("new.pdf", "Annual report").with_date("2024-06-01"),
        link("mid.pdf", "Annual summary").with_date("2023-01-15"),
    ];

    let outcome = FilterPipeline::new(store()).run(links, &site).await;
    let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
    let ranked = PriorityScorer::for_site(&site, today).prioritize(outcome.survivors);

    let urls: Vec<_> = ranked.iter().map(|l| l.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://example.com/new.pdf",
            "https://example.com/mid.pdf",
            "https://example.com/old.xlsx",
        ]
    );
}

#[tokio::test]
async fn test_file_type_mix() {
    let site = SiteConfig::new("reports", "https://example.com/");
    let links = vec![
        link("one.pdf", "One"),
        link("two.csv", "Two"),
        link("three.pdf", "Three"),
    ];

    let outcome = FilterPipeline::new(store()).run(links, &site).await;

    assert_eq!(outcome.survivors.len(), 2);
    assert_eq!(outcome.reasons.count(RejectReason::FileType), 1);
}
