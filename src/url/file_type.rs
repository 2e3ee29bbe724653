//! File type inference

use url::Url;

/// Longest extension accepted from a query-string hint
const MAX_QUERY_EXTENSION_LEN: usize = 4;

/// Normalizes a file type to its ".ext" lower-case form
///
/// Empty input stays empty.
///
/// # Examples
///
/// ```
/// use sumi_harvest::url::normalize_file_type;
///
/// assert_eq!(normalize_file_type("PDF"), ".pdf");
/// assert_eq!(normalize_file_type(" .Csv "), ".csv");
/// assert_eq!(normalize_file_type(""), "");
/// ```
pub fn normalize_file_type(file_type: &str) -> String {
    let trimmed = file_type.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return String::new();
    }
    format!(".{}", trimmed.to_lowercase())
}

/// Infers the file type of a link from its URL
///
/// The extension of the last path segment wins. If the path carries none,
/// query values such as `?file=report.xlsx` are checked for a short
/// extension. Returns an empty string when nothing usable is found.
pub fn infer_file_type(url: &Url) -> String {
    let from_path = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(extension_of);

    if let Some(ext) = from_path {
        return normalize_file_type(&ext);
    }

    for (_, value) in url.query_pairs() {
        if let Some(ext) = extension_of(&value) {
            if ext.len() <= MAX_QUERY_EXTENSION_LEN {
                return normalize_file_type(&ext);
            }
        }
    }

    String::new()
}

/// Extension after the last dot, if it looks like one
fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_string())
}
