//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Sumi-Harvest
//! database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per URL; a later attempt replaces the earlier outcome
CREATE TABLE IF NOT EXISTS download_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_name TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,
    file_path TEXT,
    file_size_bytes INTEGER NOT NULL DEFAULT 0,
    content_type TEXT,
    downloaded_at TEXT NOT NULL,
    success INTEGER NOT NULL,
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    checksum TEXT
);

CREATE INDEX IF NOT EXISTS idx_downloads_site ON download_records(site_name);
CREATE INDEX IF NOT EXISTS idx_downloads_success ON download_records(success);

-- Per-site processing sessions
CREATE TABLE IF NOT EXISTS scrape_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_name TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL,
    pages_scraped INTEGER NOT NULL DEFAULT 0,
    files_found INTEGER NOT NULL DEFAULT 0,
    files_downloaded INTEGER NOT NULL DEFAULT 0,
    files_failed INTEGER NOT NULL DEFAULT 0,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_site ON scrape_sessions(site_name);

-- Error log
CREATE TABLE IF NOT EXISTS error_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    logged_at TEXT NOT NULL,
    site_name TEXT,
    error_type TEXT NOT NULL,
    error_message TEXT NOT NULL,
    url TEXT
);

CREATE INDEX IF NOT EXISTS idx_errors_type ON error_logs(error_type);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
