//! Rule-based link filter
//!
//! Checks run in a fixed order and the first failure decides the reason:
//! file type, include terms, exclude terms, then URL sanity.

use crate::config::SiteConfig;
use crate::crawler::Link;
use crate::filter::{ReasonHistogram, RejectReason};
use crate::url::is_valid_download_url;

/// Checks one link against the site's rules
///
/// # Returns
///
/// `None` if the link passes, otherwise the first failing rule
pub fn check_link(link: &Link, site: &SiteConfig) -> Option<RejectReason> {
    if !site.allows_file_type(&link.file_type) {
        return Some(RejectReason::FileType);
    }

    let haystack = format!(
        "{} {} {} {}",
        link.title, link.text, link.filename, link.url
    )
    .to_lowercase();

    let include = &site.filters.include;
    if !include.is_empty() && !contains_any(&haystack, include) {
        return Some(RejectReason::Include);
    }

    if contains_any(&haystack, &site.filters.exclude) {
        return Some(RejectReason::Exclude);
    }

    if !is_valid_download_url(&link.url) {
        return Some(RejectReason::UrlPattern);
    }

    None
}

/// Keeps the links that pass every rule, counting the rest
pub fn apply_rules(
    links: Vec<Link>,
    site: &SiteConfig,
    reasons: &mut ReasonHistogram,
) -> Vec<Link> {
    links
        .into_iter()
        .filter(|link| match check_link(link, site) {
            Some(reason) => {
                reasons.bump(reason);
                false
            }
            None => true,
        })
        .collect()
}

fn contains_any(haystack: &str, terms: &[String]) -> bool {
    terms
        .iter()
        .map(|term| term.trim().to_lowercase())
        .any(|term| !term.is_empty() && haystack.contains(&term))
}
