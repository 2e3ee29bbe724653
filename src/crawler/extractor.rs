//! Link extraction from page markup
//!
//! This module turns page markup into typed [`Link`] records:
//! - link elements are selected with the site's link selector
//! - hrefs are resolved against the page URL
//! - titles come from the `title` attribute or the element text
//! - date and size metadata are looked up near each link when configured
//!
//! It also locates the pagination "next" control.

use crate::config::SiteConfig;
use crate::crawler::link::Link;
use crate::url::resolve_href;
use crate::{HarvestError, Result};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// How many enclosing elements are searched for date/size metadata
const METADATA_SEARCH_DEPTH: usize = 2;

/// Compiled selectors for one site
#[derive(Debug, Clone)]
pub struct SiteSelectors {
    link: Selector,
    next: Selector,
    date: Option<Selector>,
    size: Option<Selector>,
}

impl SiteSelectors {
    /// Compiles the site's selectors once per scrape
    pub fn compile(site: &SiteConfig) -> Result<Self> {
        Ok(Self {
            link: compile_selector(&site.selectors.link_selector)?,
            next: compile_selector(&site.pagination.next_selector)?,
            date: site
                .selectors
                .date_selector
                .as_deref()
                .map(compile_selector)
                .transpose()?,
            size: site
                .selectors
                .size_selector
                .as_deref()
                .map(compile_selector)
                .transpose()?,
        })
    }
}

fn compile_selector(raw: &str) -> Result<Selector> {
    Selector::parse(raw).map_err(|e| HarvestError::Selector {
        selector: raw.to_string(),
        message: format!("{:?}", e),
    })
}

/// Extracts allowed links from a page
///
/// Elements without a resolvable href are skipped, as are links whose
/// inferred file type is not allowed by the site. Document order is kept.
///
/// # Arguments
///
/// * `markup` - The page markup
/// * `page_url` - The URL the markup was loaded from
/// * `selectors` - The site's compiled selectors
/// * `site` - The site configuration (for the allowed type set)
pub fn extract_links(
    markup: &str,
    page_url: &Url,
    selectors: &SiteSelectors,
    site: &SiteConfig,
) -> Vec<Link> {
    let document = Html::parse_document(markup);
    let mut links = Vec::new();

    for element in document.select(&selectors.link) {
        let Some(url) = element
            .value()
            .attr("href")
            .and_then(|href| resolve_href(href, page_url))
        else {
            continue;
        };

        let text = collapse_whitespace(&element.text().collect::<String>());
        let title = element
            .value()
            .attr("title")
            .map(collapse_whitespace)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| text.clone());

        let mut link = Link::new(&url, title, text);
        if !site.allows_file_type(&link.file_type) {
            continue;
        }

        if let Some(selector) = &selectors.date {
            link.date = nearby_text(element, selector);
        }
        if let Some(selector) = &selectors.size {
            link.size = nearby_text(element, selector);
        }

        links.push(link);
    }

    links
}

/// Finds the URL behind the pagination "next" control
///
/// Returns `None` when the control is absent, carries no usable href, or
/// points back at the current page.
pub fn find_next_page(markup: &str, page_url: &Url, selectors: &SiteSelectors) -> Option<Url> {
    let document = Html::parse_document(markup);
    let control = document.select(&selectors.next).next()?;

    let href = control.value().attr("href").or_else(|| {
        let anchor = Selector::parse("a[href]").ok()?;
        let nested = control
            .select(&anchor)
            .next()
            .and_then(|a| a.value().attr("href"));
        nested
    })?;

    let next = resolve_href(href, page_url)?;
    if next.scheme() != "http" && next.scheme() != "https" {
        return None;
    }
    (next != *page_url).then_some(next)
}

/// Text of the first metadata element near a link
fn nearby_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .ancestors()
        .take(METADATA_SEARCH_DEPTH)
        .filter_map(ElementRef::wrap)
        .find_map(|ancestor| ancestor.select(selector).next())
        .map(|found| collapse_whitespace(&found.text().collect::<String>()))
        .filter(|text| !text.is_empty())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
