//! Priority scoring
//!
//! A link's priority is the sum of four weights: file type, recency, size
//! and keywords. Ties keep discovery order.

use crate::config::SiteConfig;
use crate::crawler::Link;
use chrono::NaiveDate;
use std::cmp::Ordering;

const TABULAR_TYPES: &[&str] = &[".csv", ".xlsx", ".xls", ".ods", ".tsv"];
const STRUCTURED_TYPES: &[&str] = &[".json", ".xml", ".yaml", ".yml"];

const INCLUDE_TERM_WEIGHT: f64 = 2.0;
const EXCLUDE_TERM_WEIGHT: f64 = -5.0;

/// A link with its computed priority
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredLink {
    pub link: Link,
    pub score: f64,
}

/// Ranks links for one site
#[derive(Debug, Clone)]
pub struct PriorityScorer {
    primary_type: Option<String>,
    include: Vec<String>,
    exclude: Vec<String>,
    today: NaiveDate,
}

impl PriorityScorer {
    /// Creates a scorer for `site`, measuring recency against `today`
    pub fn for_site(site: &SiteConfig, today: NaiveDate) -> Self {
        let terms = site.scoring_terms();
        Self {
            primary_type: site.primary_file_type().map(str::to_string),
            include: lowercase_terms(&terms.include),
            exclude: lowercase_terms(&terms.exclude),
            today,
        }
    }

    /// Computes the priority of one link
    pub fn score(&self, link: &Link) -> f64 {
        self.type_weight(&link.file_type)
            + self.recency_weight(link.date.as_deref())
            + size_weight(link.size.as_deref())
            + self.keyword_weight(link)
    }

    /// Scores and sorts links, highest first
    pub fn rank(&self, links: Vec<Link>) -> Vec<ScoredLink> {
        let mut scored: Vec<ScoredLink> = links
            .into_iter()
            .map(|link| ScoredLink {
                score: self.score(&link),
                link,
            })
            .collect();

        // sort_by is stable, so equal scores keep their input order
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored
    }

    /// Sorts links by priority, highest first
    pub fn prioritize(&self, links: Vec<Link>) -> Vec<Link> {
        self.rank(links).into_iter().map(|s| s.link).collect()
    }

    fn type_weight(&self, file_type: &str) -> f64 {
        if self.primary_type.as_deref() == Some(file_type) {
            10.0
        } else if TABULAR_TYPES.contains(&file_type) {
            8.0
        } else if STRUCTURED_TYPES.contains(&file_type) {
            6.0
        } else {
            1.0
        }
    }

    fn recency_weight(&self, date: Option<&str>) -> f64 {
        let Some(date) = date.and_then(parse_date) else {
            return 0.0;
        };

        let age_days = (self.today - date).num_days();
        if age_days < 30 {
            5.0
        } else if age_days < 90 {
            3.0
        } else if age_days < 365 {
            1.0
        } else {
            0.5
        }
    }

    fn keyword_weight(&self, link: &Link) -> f64 {
        let text = link.keyword_text();
        count_hits(&text, &self.include) as f64 * INCLUDE_TERM_WEIGHT
            + count_hits(&text, &self.exclude) as f64 * EXCLUDE_TERM_WEIGHT
    }
}

fn lowercase_terms(terms: &[String]) -> Vec<String> {
    terms
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn count_hits(text: &str, terms: &[String]) -> usize {
    terms.iter().filter(|t| text.contains(t.as_str())).count()
}

fn size_weight(size: Option<&str>) -> f64 {
    match size.and_then(parse_size_mb) {
        Some(mb) if (0.1..=50.0).contains(&mb) => 2.0,
        Some(mb) if mb <= 100.0 => 1.0,
        Some(mb) if mb <= 500.0 => 0.5,
        Some(_) => -1.0,
        None => 0.0,
    }
}

/// Finds a date in free text
///
/// Tries ISO `YYYY-MM-DD` first, then `MM/DD/YYYY`, then a bare year
/// (read as January 1st).
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use sumi_harvest::filter::parse_date;
///
/// assert_eq!(parse_date("Posted 2024-03-15"), NaiveDate::from_ymd_opt(2024, 3, 15));
/// assert_eq!(parse_date("(03/15/2024)"), NaiveDate::from_ymd_opt(2024, 3, 15));
/// assert_eq!(parse_date("FY 2023"), NaiveDate::from_ymd_opt(2023, 1, 1));
/// assert_eq!(parse_date("last week"), None);
/// ```
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let tokens: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '(' | ')' | '[' | ']'))
        .filter(|t| !t.is_empty())
        .collect();

    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Some(date) = tokens
            .iter()
            .find_map(|t| NaiveDate::parse_from_str(t, format).ok())
        {
            return Some(date);
        }
    }

    tokens
        .iter()
        .filter(|t| t.len() == 4 && t.chars().all(|c| c.is_ascii_digit()))
        .find_map(|t| t.parse::<i32>().ok())
        .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
}

/// Reads a human file size such as "2.5 MB" as megabytes
///
/// A number without a recognized unit is taken as bytes.
///
/// # Examples
///
/// ```
/// use sumi_harvest::filter::parse_size_mb;
///
/// assert_eq!(parse_size_mb("(2.5 MB)"), Some(2.5));
/// assert_eq!(parse_size_mb("512KB"), Some(0.5));
/// assert_eq!(parse_size_mb("unknown"), None);
/// ```
pub fn parse_size_mb(text: &str) -> Option<f64> {
    let lower = text.to_lowercase();
    let start = lower.find(|c: char| c.is_ascii_digit())?;
    let rest = &lower[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());

    let value: f64 = rest[..end].trim_end_matches('.').parse().ok()?;
    let unit = rest[end..].trim_start();

    let mb = if unit.starts_with("kb") || unit.starts_with("kilobyte") {
        value / 1024.0
    } else if unit.starts_with("mb") || unit.starts_with("megabyte") {
        value
    } else if unit.starts_with("gb") || unit.starts_with("gigabyte") {
        value * 1024.0
    } else {
        value / (1024.0 * 1024.0)
    };
    Some(mb)
}
