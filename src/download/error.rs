//! Errors from a single download attempt

use crate::download::disk::VerifyError;
use std::path::PathBuf;
use thiserror::Error;

/// Why one download attempt failed
///
/// Every variant is retryable; the state machine decides whether budget
/// remains.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Download of {url} failed verification: {source}")]
    Invalid {
        url: String,
        #[source]
        source: VerifyError,
    },

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    pub(crate) fn network(url: &str, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.to_string(),
            source,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
