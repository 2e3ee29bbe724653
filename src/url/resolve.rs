//! Href resolution and download URL checks

use super::BLOCKED_SCHEMES;
use url::Url;

/// Resolves an href against the page URL
///
/// Returns `None` for empty or fragment-only hrefs and for hrefs that cannot
/// be joined to the base.
///
/// # Arguments
///
/// * `href` - The raw href attribute value
/// * `base_url` - The URL of the page the href was found on
pub fn resolve_href(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    base_url.join(href).ok()
}

/// Returns the percent-decoded last path segment of a URL
///
/// Returns an empty string when the path ends in a directory.
pub fn filename_from_url(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();

    urlencoding::decode(segment)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

/// Checks that a URL is safe to download
///
/// The URL must parse, use http or https, and name a host. Its
/// percent-decoded, lower-cased form must not contain any blocked scheme.
pub fn is_valid_download_url(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return false;
    }

    let decoded = urlencoding::decode(raw)
        .map(|d| d.to_lowercase())
        .unwrap_or_else(|_| raw.to_lowercase());

    !BLOCKED_SCHEMES
        .iter()
        .any(|scheme| decoded.contains(scheme))
}
