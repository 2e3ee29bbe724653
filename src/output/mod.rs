//! Output module for cycle summaries and reports
//!
//! This module handles:
//! - Aggregating per-site and per-cycle statistics
//! - Printing summaries and store statistics
//! - Writing markdown cycle reports

mod markdown;
pub mod stats;

pub use markdown::{format_cycle_report, write_cycle_report};
pub use stats::{
    format_bytes, load_statistics, print_cycle_summary, print_statistics, CycleStats, SiteStats,
    StoreStatistics,
};

use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
