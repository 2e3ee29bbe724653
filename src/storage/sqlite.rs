//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the DownloadStore
//! trait plus the read-side queries behind `--stats`.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{DownloadStore, StorageError, StorageResult};
use crate::storage::{DownloadRecord, SessionStatus, SessionSummary};
use crate::HarvestError;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStore {
    conn: Connection,
}

/// A stored scrape session
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: i64,
    pub site_name: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: SessionStatus,
    pub pages_scraped: u32,
    pub files_found: u64,
    pub files_downloaded: u64,
    pub files_failed: u64,
    pub error_message: Option<String>,
}

/// Number of logged errors of one kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCount {
    pub kind: String,
    pub count: u64,
}

/// A download record with the time it was written
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub downloaded_at: String,
    pub record: DownloadRecord,
}

/// Errors logged within a recent window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorStats {
    pub window_hours: u32,
    pub total: u64,
    /// Most frequent first
    pub by_kind: Vec<ErrorCount>,
    /// Errors with a site, most frequent first
    pub by_site: Vec<(String, u64)>,
}

/// Rows removed by [`SqliteStore::cleanup_old_records`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub errors_removed: usize,
    pub failed_downloads_removed: usize,
}

/// Fixed-width UTC timestamps, so text order is time order
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

const RECORD_COLUMNS: &str = "site_name, url, filename, file_path, file_size_bytes, content_type,
     success, error_message, retry_count, checksum";

/// Maps the [`RECORD_COLUMNS`] starting at column `at`
fn record_from_row(row: &Row<'_>, at: usize) -> rusqlite::Result<DownloadRecord> {
    Ok(DownloadRecord {
        site_name: row.get(at)?,
        url: row.get(at + 1)?,
        filename: row.get(at + 2)?,
        file_path: row.get(at + 3)?,
        file_size_bytes: row.get::<_, i64>(at + 4)? as u64,
        content_type: row.get(at + 5)?,
        success: row.get(at + 6)?,
        error_message: row.get(at + 7)?,
        retry_count: row.get(at + 8)?,
        checksum: row.get(at + 9)?,
    })
}

impl SqliteStore {
    /// Opens or creates the database at `path`
    ///
    /// Missing parent directories are created.
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(HarvestError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(StorageError::from)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )
        .map_err(StorageError::from)?;
        initialize_schema(&conn).map_err(StorageError::from)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (tests and dry runs)
    pub fn open_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        initialize_schema(&conn).map_err(StorageError::from)?;
        Ok(Self { conn })
    }

    /// Counts successful and failed download records
    ///
    /// # Returns
    ///
    /// `(succeeded, failed)`
    pub fn download_counts(&self) -> StorageResult<(u64, u64)> {
        let (ok, failed): (i64, i64) = self.conn.query_row(
            "SELECT COALESCE(SUM(success = 1), 0), COALESCE(SUM(success = 0), 0)
             FROM download_records",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((ok as u64, failed as u64))
    }

    /// Total bytes across successful downloads
    pub fn total_bytes(&self) -> StorageResult<u64> {
        let bytes: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(file_size_bytes), 0) FROM download_records WHERE success = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(bytes as u64)
    }

    /// Successful downloads per site, most first
    pub fn downloads_by_site(&self) -> StorageResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT site_name, COUNT(*) FROM download_records WHERE success = 1
             GROUP BY site_name ORDER BY COUNT(*) DESC, site_name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The most recent sessions, newest first
    pub fn recent_sessions(&self, limit: usize) -> StorageResult<Vec<SessionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, site_name, started_at, completed_at, status, pages_scraped,
             files_found, files_downloaded, files_failed, error_message
             FROM scrape_sessions ORDER BY id DESC LIMIT ?1",
        )?;

        let sessions = stmt
            .query_map(params![limit as i64], |row| {
                Ok(SessionRecord {
                    id: row.get(0)?,
                    site_name: row.get(1)?,
                    started_at: row.get(2)?,
                    completed_at: row.get(3)?,
                    status: SessionStatus::from_db_string(&row.get::<_, String>(4)?)
                        .unwrap_or(SessionStatus::Failed),
                    pages_scraped: row.get(5)?,
                    files_found: row.get::<_, i64>(6)? as u64,
                    files_downloaded: row.get::<_, i64>(7)? as u64,
                    files_failed: row.get::<_, i64>(8)? as u64,
                    error_message: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(sessions)
    }

    /// Logged errors grouped by kind, most frequent first
    pub fn error_counts_by_kind(&self) -> StorageResult<Vec<ErrorCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT error_type, COUNT(*) FROM error_logs
             GROUP BY error_type ORDER BY COUNT(*) DESC, error_type",
        )?;
        let counts = stmt
            .query_map([], |row| {
                Ok(ErrorCount {
                    kind: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    /// Most recent download records, newest first
    ///
    /// # Arguments
    ///
    /// * `site` - Only records for this site, if given
    /// * `limit` - Maximum number of entries
    pub fn download_history(
        &self,
        site: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT downloaded_at, {} FROM download_records
             WHERE ?1 IS NULL OR site_name = ?1
             ORDER BY downloaded_at DESC, id DESC LIMIT ?2",
            RECORD_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![site, limit as i64], |row| {
                Ok(HistoryEntry {
                    downloaded_at: row.get(0)?,
                    record: record_from_row(row, 1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Summarizes errors logged in the last `hours`
    ///
    /// # Arguments
    ///
    /// * `site` - Only errors for this site, if given
    /// * `hours` - Width of the window ending now
    pub fn error_stats(&self, site: Option<&str>, hours: u32) -> StorageResult<ErrorStats> {
        let cutoff = timestamp(Utc::now() - Duration::hours(i64::from(hours)));
        let filter = "logged_at >= ?1 AND (?2 IS NULL OR site_name = ?2)";

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM error_logs WHERE {}", filter),
            params![cutoff, site],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT error_type, COUNT(*) FROM error_logs WHERE {}
             GROUP BY error_type ORDER BY COUNT(*) DESC, error_type",
            filter
        ))?;
        let by_kind = stmt
            .query_map(params![cutoff, site], |row| {
                Ok(ErrorCount {
                    kind: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT site_name, COUNT(*) FROM error_logs
             WHERE {} AND site_name IS NOT NULL
             GROUP BY site_name ORDER BY COUNT(*) DESC, site_name",
            filter
        ))?;
        let by_site = stmt
            .query_map(params![cutoff, site], |row| {
                Ok((row.get(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ErrorStats {
            window_hours: hours,
            total: total as u64,
            by_kind,
            by_site,
        })
    }

    /// Deletes error log entries and failed download records older than
    /// `days`
    ///
    /// Successful downloads are kept; they are the deduplication history.
    pub fn cleanup_old_records(&mut self, days: u32) -> StorageResult<CleanupReport> {
        let cutoff = timestamp(Utc::now() - Duration::days(i64::from(days)));
        let tx = self.conn.transaction()?;
        let errors_removed =
            tx.execute("DELETE FROM error_logs WHERE logged_at < ?1", params![cutoff])?;
        let failed_downloads_removed = tx.execute(
            "DELETE FROM download_records WHERE success = 0 AND downloaded_at < ?1",
            params![cutoff],
        )?;
        tx.commit()?;

        Ok(CleanupReport {
            errors_removed,
            failed_downloads_removed,
        })
    }
}

impl DownloadStore for SqliteStore {
    fn download_record(&self, url: &str) -> StorageResult<Option<DownloadRecord>> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM download_records WHERE url = ?1",
                    RECORD_COLUMNS
                ),
                params![url],
                |row| record_from_row(row, 0),
            )
            .optional()?;
        Ok(record)
    }

    fn is_already_downloaded(&self, url: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM download_records WHERE url = ?1 AND success = 1",
                params![url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn record_download(&mut self, record: &DownloadRecord) -> StorageResult<i64> {
        let now = timestamp(Utc::now());

        // A failure never overwrites an earlier success for the same URL
        self.conn.execute(
            "INSERT INTO download_records
             (site_name, url, filename, file_path, file_size_bytes, content_type,
              downloaded_at, success, error_message, retry_count, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(url) DO UPDATE SET
                site_name = excluded.site_name,
                filename = excluded.filename,
                file_path = excluded.file_path,
                file_size_bytes = excluded.file_size_bytes,
                content_type = excluded.content_type,
                downloaded_at = excluded.downloaded_at,
                success = excluded.success,
                error_message = excluded.error_message,
                retry_count = excluded.retry_count,
                checksum = excluded.checksum
             WHERE download_records.success = 0 OR excluded.success = 1",
            params![
                record.site_name,
                record.url,
                record.filename,
                record.file_path,
                record.file_size_bytes as i64,
                record.content_type,
                now,
                record.success,
                record.error_message,
                record.retry_count,
                record.checksum,
            ],
        )?;

        let id = self.conn.query_row(
            "SELECT id FROM download_records WHERE url = ?1",
            params![record.url],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn log_error(
        &mut self,
        kind: &str,
        message: &str,
        site: Option<&str>,
        url: Option<&str>,
    ) -> StorageResult<()> {
        let now = timestamp(Utc::now());
        self.conn.execute(
            "INSERT INTO error_logs (logged_at, site_name, error_type, error_message, url)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![now, site, kind, message, url],
        )?;
        Ok(())
    }

    fn start_session(&mut self, site: &str) -> StorageResult<i64> {
        let now = timestamp(Utc::now());
        self.conn.execute(
            "INSERT INTO scrape_sessions (site_name, started_at, status) VALUES (?1, ?2, ?3)",
            params![site, now, SessionStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn complete_session(
        &mut self,
        session_id: i64,
        summary: &SessionSummary,
    ) -> StorageResult<()> {
        let now = timestamp(Utc::now());
        let status = if summary.success {
            SessionStatus::Succeeded
        } else {
            SessionStatus::Failed
        };

        let updated = self.conn.execute(
            "UPDATE scrape_sessions SET completed_at = ?1, status = ?2, pages_scraped = ?3,
             files_found = ?4, files_downloaded = ?5, files_failed = ?6, error_message = ?7
             WHERE id = ?8",
            params![
                now,
                status.to_db_string(),
                summary.pages_scraped,
                summary.files_found as i64,
                summary.files_downloaded as i64,
                summary.files_failed as i64,
                summary.error_message,
                session_id,
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::SessionNotFound(session_id));
        }
        Ok(())
    }
}
