//! Destination filename policy
//!
//! Every downloaded file lands at `<download-dir>/<site>_<name>`, where the
//! name comes from the link's URL, its title, or a hash of its URL, in that
//! order of preference.

use crate::crawler::Link;
use sha2::{Digest, Sha256};

/// Longest filename produced, in characters
pub const MAX_FILENAME_LEN: usize = 200;

/// Placeholder when sanitizing leaves nothing
const UNNAMED: &str = "unnamed_file";

/// Makes `name` safe to use as a single path component
///
/// Reserved characters become `_`, control characters are dropped and
/// leading/trailing spaces and dots are trimmed.
///
/// # Examples
///
/// ```
/// use sumi_harvest::download::sanitize_filename;
///
/// assert_eq!(sanitize_filename("a/b:c?.pdf"), "a_b_c_.pdf");
/// assert_eq!(sanitize_filename(" .. "), "unnamed_file");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect();

    let trimmed = replaced.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        UNNAMED.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Builds the destination filename for `link` downloaded from `site_name`
///
/// # Arguments
///
/// * `link` - The link being downloaded
/// * `site_name` - Name of the site, used as a prefix
///
/// # Returns
///
/// A sanitized filename of at most [`MAX_FILENAME_LEN`] characters
pub fn build_filename(link: &Link, site_name: &str) -> String {
    let base = if !link.filename.trim().is_empty() {
        link.filename.clone()
    } else if !link.title.trim().is_empty() {
        format!("{}{}", sanitize_filename(&link.title), link.file_type)
    } else {
        format!("download_{}{}", url_digest_prefix(&link.url), link.file_type)
    };

    let name = format!(
        "{}_{}",
        sanitize_filename(site_name),
        sanitize_filename(&base)
    );
    truncate_preserving_extension(&name, MAX_FILENAME_LEN)
}

/// `stem_k.ext` for collision suffix `k`
pub fn with_suffix(name: &str, k: u32) -> String {
    let (stem, ext) = split_extension(name);
    let suffixed = format!("{}_{}{}", stem, k, ext);
    truncate_preserving_extension(&suffixed, MAX_FILENAME_LEN)
}

fn url_digest_prefix(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(digest)[..8].to_string()
}

/// Splits `name` into stem and `.ext` (empty when there is none)
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx < name.len() - 1 => name.split_at(idx),
        _ => (name, ""),
    }
}

fn truncate_preserving_extension(name: &str, max_chars: usize) -> String {
    if name.chars().count() <= max_chars {
        return name.to_string();
    }

    let (stem, ext) = split_extension(name);
    let ext_chars = ext.chars().count();
    if ext_chars >= max_chars {
        return name.chars().take(max_chars).collect();
    }

    let stem: String = stem.chars().take(max_chars - ext_chars).collect();
    format!("{}{}", stem, ext)
}
