//! Configuration module for Sumi-Harvest
//!
//! This module handles loading, parsing, normalizing and validating TOML
//! configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Configured sites: {}", config.sites.len());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, IntelligentFilterConfig, KeywordFilters, OutputConfig, PaginationConfig,
    RateLimitConfig, ScrapingConfig, SelectorConfig, SiteConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
