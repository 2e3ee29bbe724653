//! URL handling module for Sumi-Harvest
//!
//! This module provides href resolution, file-type inference, natural
//! filename extraction and download URL validity checks.

mod file_type;
mod resolve;

// Re-export main functions
pub use file_type::{infer_file_type, normalize_file_type};
pub use resolve::{filename_from_url, is_valid_download_url, resolve_href};

/// Schemes that are never fetched, even when smuggled into a URL
/// through percent-encoding
pub const BLOCKED_SCHEMES: &[&str] = &[
    "javascript:",
    "data:",
    "mailto:",
    "ftp:",
    "file:",
    "tel:",
];
