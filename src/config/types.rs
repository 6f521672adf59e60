use crate::protocol::{ANALYTICS_EVENTS, FETCH_JOBS, INBOUND_CANDIDATES, PARSE_JOBS};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Kumo-Crawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub frontier: FrontierConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub queues: QueueNames,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

/// Frontier coordinator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FrontierConfig {
    /// Target host pattern (e.g., "site.test" or "*.site.test")
    pub host: String,

    /// Maximum number of unacknowledged candidates held by one coordinator
    #[serde(default = "default_prefetch")]
    pub prefetch: u32,

    /// Delay between publishing a fetch job and acknowledging its candidate (milliseconds)
    #[serde(rename = "ack-delay-ms", default = "default_ack_delay_ms")]
    pub ack_delay_ms: u64,

    /// Age after which another coordinator's unfinished claim may be taken over (milliseconds)
    #[serde(rename = "claim-timeout-ms", default = "default_claim_timeout_ms")]
    pub claim_timeout_ms: u64,
}

impl FrontierConfig {
    pub fn ack_delay(&self) -> Duration {
        Duration::from_millis(self.ack_delay_ms)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_millis(self.claim_timeout_ms)
    }
}

/// Which implementation backs a shared component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// SQLite file shared between processes
    Sqlite,
    /// Process-local, only meaningful when every stage runs in one process
    Memory,
}

/// Identifier store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: Backend,

    /// Path to the SQLite database file
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Deadline for a single store call (milliseconds)
    #[serde(rename = "timeout-ms", default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

/// Message bus configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_backend")]
    pub backend: Backend,

    /// Path to the SQLite database file holding the queues
    #[serde(default = "default_db_path")]
    pub path: String,

    /// How often an idle consumer re-checks its queue (milliseconds)
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a delivered, unacknowledged message stays invisible (milliseconds)
    #[serde(rename = "lease-ms", default = "default_lease_ms")]
    pub lease_ms: u64,
}

impl BusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
            poll_interval_ms: default_poll_interval_ms(),
            lease_ms: default_lease_ms(),
        }
    }
}

/// Names of the four pipeline queues
#[derive(Debug, Clone, Deserialize)]
pub struct QueueNames {
    #[serde(rename = "inbound-candidates", default = "default_inbound")]
    pub inbound_candidates: String,

    #[serde(rename = "fetch-jobs", default = "default_fetch_jobs")]
    pub fetch_jobs: String,

    #[serde(rename = "parse-jobs", default = "default_parse_jobs")]
    pub parse_jobs: String,

    #[serde(rename = "analytics-events", default = "default_analytics_events")]
    pub analytics_events: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            inbound_candidates: default_inbound(),
            fetch_jobs: default_fetch_jobs(),
            parse_jobs: default_parse_jobs(),
            analytics_events: default_analytics_events(),
        }
    }
}

/// Fetch stage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// Directory where fetched pages are persisted, one subdirectory per id
    #[serde(rename = "pages-dir", default = "default_pages_dir")]
    pub pages_dir: String,

    /// User-Agent header sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Whole-request timeout (milliseconds)
    #[serde(rename = "timeout-ms", default = "default_fetch_timeout_ms")]
    pub timeout_ms: u64,
}

impl FetcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            pages_dir: default_pages_dir(),
            user_agent: default_user_agent(),
            timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

/// Analytics sink configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    /// Emit a statistics report every N events
    #[serde(rename = "report-every", default = "default_report_every")]
    pub report_every: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            report_every: default_report_every(),
        }
    }
}

fn default_prefetch() -> u32 {
    1
}

fn default_ack_delay_ms() -> u64 {
    5000
}

fn default_claim_timeout_ms() -> u64 {
    60_000
}

fn default_backend() -> Backend {
    Backend::Sqlite
}

fn default_db_path() -> String {
    "./kumo.db".to_string()
}

fn default_store_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_lease_ms() -> u64 {
    30_000
}

fn default_inbound() -> String {
    INBOUND_CANDIDATES.to_string()
}

fn default_fetch_jobs() -> String {
    FETCH_JOBS.to_string()
}

fn default_parse_jobs() -> String {
    PARSE_JOBS.to_string()
}

fn default_analytics_events() -> String {
    ANALYTICS_EVENTS.to_string()
}

fn default_pages_dir() -> String {
    "./websites".to_string()
}

fn default_user_agent() -> String {
    format!("kumo-crawl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_fetch_timeout_ms() -> u64 {
    30_000
}

fn default_report_every() -> u64 {
    25
}
