//! Storage traits and error types
//!
//! The pipeline only needs a narrow record/query interface from the store.
//! It is synchronous; async callers hold the store behind a mutex and keep
//! each call short.

use crate::storage::{DownloadRecord, SessionSummary};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Session not found: {0}")]
    SessionNotFound(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence interface consumed by the pipeline
pub trait DownloadStore {
    /// Whether `url` has a successful download on record
    fn is_already_downloaded(&self, url: &str) -> StorageResult<bool>;

    /// The stored record for `url`, successful or not
    fn download_record(&self, url: &str) -> StorageResult<Option<DownloadRecord>>;

    /// Records the outcome of a download, replacing any earlier record for
    /// the same URL
    ///
    /// # Returns
    ///
    /// The record ID
    fn record_download(&mut self, record: &DownloadRecord) -> StorageResult<i64>;

    /// Appends an entry to the error log
    fn log_error(
        &mut self,
        kind: &str,
        message: &str,
        site: Option<&str>,
        url: Option<&str>,
    ) -> StorageResult<()>;

    /// Opens a processing session for a site
    ///
    /// # Returns
    ///
    /// The session ID
    fn start_session(&mut self, site: &str) -> StorageResult<i64>;

    /// Closes a session with its final counters
    fn complete_session(&mut self, session_id: i64, summary: &SessionSummary)
        -> StorageResult<()>;
}

/// A store shared between the coordinator, filter pipeline and download
/// workers
pub type SharedStore = Arc<Mutex<dyn DownloadStore + Send>>;

/// Wraps a store for sharing
pub fn share<S: DownloadStore + Send + 'static>(store: S) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Runs `f` with the store locked
pub fn with_store<T>(
    store: &SharedStore,
    f: impl FnOnce(&mut (dyn DownloadStore + Send)) -> StorageResult<T>,
) -> StorageResult<T> {
    let mut guard = store.lock().map_err(|_| StorageError::Poisoned)?;
    f(&mut *guard)
}
