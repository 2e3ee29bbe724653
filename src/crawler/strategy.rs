//! Static vs. rendered fetch classification
//!
//! The selector looks at a probe response and decides whether plain markup
//! is enough to extract links or whether the page needs a rendering
//! session. It has no side effects, so it can be driven with canned markup.

use scraper::{Html, Selector};

/// More script tags than this marks a page as script-driven
pub const SCRIPT_TAG_THRESHOLD: usize = 10;

/// Main-content regions shorter than this are treated as unrendered shells
pub const MIN_MAIN_CONTENT_CHARS: usize = 100;

/// Lower-case markers of client-side frameworks
pub const FRAMEWORK_MARKERS: &[&str] = &[
    "react",
    "vue",
    "angular",
    "ember",
    "svelte",
    "__next_data__",
    "ng-version",
];

/// Selectors tried for the main content region, in order
pub const MAIN_CONTENT_SELECTORS: &[&str] = &["main", "#main", ".main", "#content", ".content"];

/// How a page should be fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchStrategy {
    /// Plain HTTP GET and markup parsing
    Static,
    /// Page needs a rendering session
    Rendered,
}

impl FetchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Rendered => "rendered",
        }
    }
}

/// Why a strategy was chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionReason {
    HttpStatus(u16),
    ScriptHeavy(usize),
    FrameworkMarker(&'static str),
    SparseMainContent(&'static str),
    ProbeFailed,
    StaticContent,
}

/// A strategy together with the heuristic that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyDecision {
    pub strategy: FetchStrategy,
    pub reason: SelectionReason,
}

impl StrategyDecision {
    fn rendered(reason: SelectionReason) -> Self {
        Self {
            strategy: FetchStrategy::Rendered,
            reason,
        }
    }
}

/// Classifies a fetched page
///
/// Heuristics are evaluated in order and the first match wins:
///
/// 1. non-2xx status
/// 2. script tag count above [`SCRIPT_TAG_THRESHOLD`]
/// 3. a framework marker anywhere in the lower-cased markup
/// 4. a main content region whose trimmed text is shorter than
///    [`MIN_MAIN_CONTENT_CHARS`]
///
/// Anything else is static.
///
/// # Example
///
/// ```
/// use sumi_harvest::crawler::{select_strategy, FetchStrategy};
///
/// let decision = select_strategy(503, "<html></html>");
/// assert_eq!(decision.strategy, FetchStrategy::Rendered);
/// ```
pub fn select_strategy(status: u16, markup: &str) -> StrategyDecision {
    if !(200..300).contains(&status) {
        return StrategyDecision::rendered(SelectionReason::HttpStatus(status));
    }

    let document = Html::parse_document(markup);

    let scripts = Selector::parse("script")
        .map(|selector| document.select(&selector).count())
        .unwrap_or(0);
    if scripts > SCRIPT_TAG_THRESHOLD {
        return StrategyDecision::rendered(SelectionReason::ScriptHeavy(scripts));
    }

    let lowered = markup.to_lowercase();
    if let Some(marker) = FRAMEWORK_MARKERS
        .iter()
        .copied()
        .find(|m| lowered.contains(*m))
    {
        return StrategyDecision::rendered(SelectionReason::FrameworkMarker(marker));
    }

    for raw in MAIN_CONTENT_SELECTORS.iter().copied() {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        if let Some(region) = document.select(&selector).next() {
            let text: String = region.text().collect();
            if text.trim().chars().count() < MIN_MAIN_CONTENT_CHARS {
                return StrategyDecision::rendered(SelectionReason::SparseMainContent(raw));
            }
        }
    }

    StrategyDecision {
        strategy: FetchStrategy::Static,
        reason: SelectionReason::StaticContent,
    }
}

/// Classifies the result of a probe fetch
///
/// `None` stands for a failed probe, which selects the rendered path.
pub fn select_strategy_for_probe(probe: Option<(u16, &str)>) -> StrategyDecision {
    match probe {
        Some((status, markup)) => select_strategy(status, markup),
        None => StrategyDecision::rendered(SelectionReason::ProbeFailed),
    }
}
