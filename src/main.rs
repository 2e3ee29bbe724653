//! Sumi-Harvest main entry point
//!
//! This is the command-line interface for the Sumi-Harvest document
//! harvester. One invocation runs one harvest cycle.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use sumi_harvest::config::{load_config_with_hash, Config, SiteConfig};
use sumi_harvest::crawler::Coordinator;
use sumi_harvest::output::{
    load_statistics, print_cycle_summary, print_statistics, write_cycle_report,
};
use sumi_harvest::storage::{open_store, share};
use tracing_subscriber::EnvFilter;

/// Sumi-Harvest: a polite document harvester
///
/// Sumi-Harvest scrapes the configured sites for downloadable files,
/// filters and ranks what it finds, and downloads the survivors while
/// respecting robots.txt and per-site rate limits.
#[derive(Parser, Debug)]
#[command(name = "sumi-harvest")]
#[command(version)]
#[command(about = "A polite document harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be harvested without fetching
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Only process the named site (repeatable)
    #[arg(long = "site", value_name = "NAME")]
    sites: Vec<String>,

    /// Write a markdown cycle report here (overrides output.summary-path)
    #[arg(long, value_name = "PATH")]
    summary: Option<PathBuf>,

    /// After the cycle, delete error logs and failed download records
    /// older than this many days
    #[arg(long, value_name = "DAYS", conflicts_with_all = ["dry_run", "stats"])]
    prune_days: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    for name in &cli.sites {
        if config.site(name).is_none() {
            tracing::warn!("--site {} does not match any configured site", name);
        }
    }

    if cli.dry_run {
        handle_dry_run(&config, &cli.sites);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_cycle(config, &cli.sites, cli.summary, cli.prune_days).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_harvest=info,warn"),
            1 => EnvFilter::new("sumi_harvest=debug,info"),
            2 => EnvFilter::new("sumi_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn selected<'c>(
    config: &'c Config,
    only: &'c [String],
) -> impl Iterator<Item = &'c SiteConfig> {
    config
        .enabled_sites()
        .filter(move |site| only.is_empty() || only.iter().any(|n| n == &site.name))
}

/// Handles the --dry-run mode: validates config and shows the plan
fn handle_dry_run(config: &Config, only: &[String]) {
    println!("=== Sumi-Harvest Dry Run ===\n");

    println!("Scraping:");
    println!("  User agent: {}", config.scraping.user_agent);
    println!("  Timeout: {}s", config.scraping.timeout_seconds);
    println!(
        "  Retries: {} (base delay {}s)",
        config.scraping.max_retries, config.scraping.retry_delay_seconds
    );
    println!("  Max file size: {} MB", config.scraping.max_file_size_mb);
    println!(
        "  Concurrent downloads: {}",
        config.scraping.concurrent_downloads
    );
    println!("  Respect robots.txt: {}", config.scraping.respect_robots_txt);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Downloads: {}", config.output.download_dir);
    if let Some(summary) = &config.output.summary_path {
        println!("  Summary: {}", summary);
    }

    let sites: Vec<_> = selected(config, only).collect();
    println!("\nSites ({} of {}):", sites.len(), config.sites.len());
    for site in &sites {
        println!("  - {} <{}>", site.name, site.url);
        println!("    File types: {}", site.file_types.join(", "));
        if !site.filters.include.is_empty() {
            println!("    Include: {}", site.filters.include.join(", "));
        }
        if !site.filters.exclude.is_empty() {
            println!("    Exclude: {}", site.filters.exclude.join(", "));
        }
        if site.pagination.enabled {
            println!("    Pagination: up to {} pages", site.pagination.max_pages);
        }
        println!(
            "    Rate limit: {}/min, {}s between requests",
            site.rate_limit.requests_per_minute, site.rate_limit.delay_between_requests
        );
        if site.intelligent_filter.enabled {
            println!(
                "    Relevance filter: threshold {:.2} (requires a scorer)",
                site.intelligent_filter.relevance_threshold
            );
        }
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would harvest {} site(s)", sites.len());
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let store = open_store(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&store, &config.output.download_dir())?;
    print_statistics(&stats);

    Ok(())
}

/// Runs one harvest cycle
async fn handle_cycle(
    config: Config,
    only: &[String],
    summary_override: Option<PathBuf>,
    prune_days: Option<u32>,
) -> anyhow::Result<()> {
    let summary_path =
        summary_override.or_else(|| config.output.summary_path.as_ref().map(PathBuf::from));

    let database_path = PathBuf::from(&config.output.database_path);
    let store = open_store(&database_path)?;
    let coordinator = Coordinator::new(config, share(store))?;

    let stop = coordinator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight downloads");
            stop.stop();
        }
    });

    let filter = (!only.is_empty()).then_some(only);
    let stats = coordinator.run_cycle(filter).await;

    print_cycle_summary(&stats);

    if let Some(path) = summary_path {
        write_cycle_report(&stats, &path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("\n✓ Report written to: {}", path.display());
    }

    if stats.nothing_processed() {
        tracing::warn!("No sites were processed");
    }

    if let Some(days) = prune_days {
        let mut store = open_store(&database_path)?;
        let report = store
            .cleanup_old_records(days)
            .context("Failed to prune old records")?;
        tracing::info!(
            "Pruned {} error log entries and {} failed downloads older than {} days",
            report.errors_removed,
            report.failed_downloads_removed,
            days
        );
    }

    Ok(())
}
