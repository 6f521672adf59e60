//! Kumo-Crawl: a staged, horizontally scalable web crawler
//!
//! The crawl is split into independently running stages (frontier, fetcher,
//! parser, analyzer) that only talk to each other through a message bus and a
//! shared identifier store. The frontier is the single place where URLs are
//! admitted and bound to permanent numeric identifiers.

pub mod bus;
pub mod config;
pub mod crawler;
pub mod output;
pub mod protocol;
pub mod storage;
pub mod store;
pub mod url;

use thiserror::Error;

/// Main error type for Kumo-Crawl operations
#[derive(Debug, Error)]
pub enum KumoError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Identifier store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Message bus error: {0}")]
    Bus(#[from] bus::BusError),

    #[error("Admission error: {0}")]
    Frontier(#[from] crawler::FrontierError),

    #[error("Message decode error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid host pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Kumo-Crawl operations
pub type Result<T> = std::result::Result<T, KumoError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{AdmissionResult, Coordinator};
pub use url::{normalize_url, HostFilter};
