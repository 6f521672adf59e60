//! URL handling module for Kumo-Crawl
//!
//! This module provides candidate URL validation and the host filter that
//! keeps a crawl inside its target site.

mod filter;
mod normalize;

pub use filter::HostFilter;
pub use normalize::normalize_url;
