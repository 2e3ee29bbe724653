//! Storage module for persisting harvest state
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Download history used for deduplication across cycles
//! - Per-site scrape sessions
//! - The error log

mod schema;
mod sqlite;
mod traits;

pub use sqlite::{CleanupReport, ErrorCount, ErrorStats, HistoryEntry, SessionRecord, SqliteStore};
pub use traits::{share, with_store, DownloadStore, SharedStore, StorageError, StorageResult};

use crate::HarvestError;
use std::path::Path;

/// Opens (or creates) the store at `path`
pub fn open_store(path: &Path) -> Result<SqliteStore, HarvestError> {
    SqliteStore::new(path)
}

/// The outcome of one download, as persisted
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRecord {
    pub site_name: String,
    pub url: String,
    pub filename: String,
    pub file_path: Option<String>,
    pub file_size_bytes: u64,
    pub content_type: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub checksum: Option<String>,
}

/// Final counters for a site session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub success: bool,
    pub pages_scraped: u32,
    pub files_found: usize,
    pub files_downloaded: usize,
    pub files_failed: usize,
    pub error_message: Option<String>,
}

/// Lifecycle of a scrape session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Succeeded,
    Failed,
}

impl SessionStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
