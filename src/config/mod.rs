//! Configuration module for Kumo-Crawl
//!
//! This module handles loading, parsing, and validating the TOML configuration
//! shared by every stage of a crawl.
//!
//! # Example
//!
//! ```no_run
//! use kumo_crawl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("kumo.toml")).unwrap();
//! println!("Crawl restricted to host: {}", config.frontier.host);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    AnalyticsConfig, Backend, BusConfig, Config, FetcherConfig, FrontierConfig, QueueNames,
    StoreConfig,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate_shared_backends;
