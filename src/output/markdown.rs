//! Markdown cycle report
//!
//! Written after a cycle when `output.summary-path` (or `--summary`) is set.

use crate::output::stats::{format_bytes, CycleStats};
use crate::output::OutputResult;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes the report for `stats` to `output_path`
///
/// # Arguments
///
/// * `stats` - The finished cycle
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote the report
/// * `Err(OutputError)` - Failed to write the report
pub fn write_cycle_report(stats: &CycleStats, output_path: &Path) -> OutputResult<()> {
    let markdown = format_cycle_report(stats);

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a finished cycle as markdown
pub fn format_cycle_report(stats: &CycleStats) -> String {
    let mut md = String::new();

    md.push_str("# Sumi-Harvest Cycle Report\n\n");
    md.push_str(&format!(
        "Generated: {}\n\n",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    ));

    md.push_str("## Overview\n\n");
    if stats.nothing_processed() {
        md.push_str("No sites were processed in this cycle.\n");
        return md;
    }
    md.push_str(&format!(
        "- **Sites**: {} processed, {} succeeded\n",
        stats.sites_processed, stats.sites_succeeded
    ));
    md.push_str(&format!("- **Links Found**: {}\n", stats.links_found));
    md.push_str(&format!(
        "- **Links After Filtering**: {}\n",
        stats.links_surviving
    ));
    md.push_str(&format!(
        "- **Downloads**: {}/{} ({:.1}%)\n",
        stats.downloads_succeeded,
        stats.downloads_attempted,
        stats.success_rate()
    ));
    md.push_str(&format!(
        "- **Transferred**: {}\n",
        format_bytes(stats.bytes_downloaded)
    ));
    md.push_str(&format!(
        "- **Duration**: {:.1} seconds\n\n",
        stats.duration.as_secs_f64()
    ));

    md.push_str("## Sites\n\n");
    md.push_str("| Site | Status | Strategy | Pages | Found | Kept | Downloaded | Failed | Size |\n");
    md.push_str("|------|--------|----------|-------|-------|------|------------|--------|------|\n");
    for site in &stats.sites {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} | {} |\n",
            site.site_name,
            if site.success { "ok" } else { "failed" },
            site.strategy.map(|s| s.as_str()).unwrap_or("-"),
            site.pages_scraped,
            site.links_found,
            site.links_surviving,
            site.downloads_succeeded,
            site.downloads_failed,
            format_bytes(site.bytes_downloaded)
        ));
    }
    md.push('\n');

    let reasons = stats.reasons();
    if reasons.total() > 0 {
        md.push_str("## Filter Reasons\n\n");
        for (reason, count) in reasons.iter() {
            md.push_str(&format!("- `{}`: {}\n", reason, count));
        }
        md.push('\n');
    }

    let failing: Vec<_> = stats.sites.iter().filter(|s| !s.errors.is_empty()).collect();
    if !failing.is_empty() {
        md.push_str("## Errors\n\n");
        for site in failing {
            md.push_str(&format!("### {}\n\n", site.site_name));
            for error in &site.errors {
                md.push_str(&format!("- {}\n", error));
            }
            if site.error_count > site.errors.len() {
                md.push_str(&format!(
                    "- ... and {} more\n",
                    site.error_count - site.errors.len()
                ));
            }
            md.push('\n');
        }
    }

    md
}
