use crate::config::types::{
    AnalyticsConfig, Backend, BusConfig, Config, FetcherConfig, FrontierConfig, QueueNames,
    StoreConfig,
};
use crate::url::HostFilter;
use crate::ConfigError;
use std::collections::HashSet;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_frontier_config(&config.frontier)?;
    validate_store_config(&config.store)?;
    validate_bus_config(&config.bus)?;
    validate_queue_names(&config.queues)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_analytics_config(&config.analytics)?;
    validate_ack_delay_within_lease(&config.frontier, &config.bus)?;
    Ok(())
}

/// Checks that the store and bus can be shared by stages running in separate processes
///
/// Process-local backends are only usable when every stage runs inside one
/// process, so each standalone stage command calls this before starting.
pub fn validate_shared_backends(config: &Config) -> Result<(), ConfigError> {
    if config.store.backend == Backend::Memory {
        return Err(ConfigError::Validation(
            "store backend 'memory' can only be used with the 'run' command".to_string(),
        ));
    }

    if config.bus.backend == Backend::Memory {
        return Err(ConfigError::Validation(
            "bus backend 'memory' can only be used with the 'run' command".to_string(),
        ));
    }

    Ok(())
}

fn validate_frontier_config(config: &FrontierConfig) -> Result<(), ConfigError> {
    HostFilter::new(&config.host)?;

    if config.prefetch < 1 || config.prefetch > 1000 {
        return Err(ConfigError::Validation(format!(
            "prefetch must be between 1 and 1000, got {}",
            config.prefetch
        )));
    }

    if config.claim_timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "claim-timeout-ms must be >= 1ms".to_string(),
        ));
    }

    Ok(())
}

fn validate_store_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.backend == Backend::Sqlite && config.path.is_empty() {
        return Err(ConfigError::Validation(
            "store path cannot be empty".to_string(),
        ));
    }

    if config.timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "store timeout-ms must be >= 1ms".to_string(),
        ));
    }

    Ok(())
}

fn validate_bus_config(config: &BusConfig) -> Result<(), ConfigError> {
    if config.backend == Backend::Sqlite && config.path.is_empty() {
        return Err(ConfigError::Validation("bus path cannot be empty".to_string()));
    }

    if config.poll_interval_ms < 1 {
        return Err(ConfigError::Validation(
            "bus poll-interval-ms must be >= 1ms".to_string(),
        ));
    }

    if config.lease_ms < 1 {
        return Err(ConfigError::Validation(
            "bus lease-ms must be >= 1ms".to_string(),
        ));
    }

    Ok(())
}

/// A SQLite lease must outlive the ack delay, or every admitted candidate is
/// handed out again before its ack lands
fn validate_ack_delay_within_lease(
    frontier: &FrontierConfig,
    bus: &BusConfig,
) -> Result<(), ConfigError> {
    if bus.backend == Backend::Sqlite && frontier.ack_delay_ms >= bus.lease_ms {
        return Err(ConfigError::Validation(format!(
            "frontier ack-delay-ms ({}) must be smaller than bus lease-ms ({})",
            frontier.ack_delay_ms, bus.lease_ms
        )));
    }
    Ok(())
}

fn validate_queue_names(queues: &QueueNames) -> Result<(), ConfigError> {
    let names = [
        &queues.inbound_candidates,
        &queues.fetch_jobs,
        &queues.parse_jobs,
        &queues.analytics_events,
    ];

    if names.iter().any(|name| name.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "queue names cannot be empty".to_string(),
        ));
    }

    let unique: HashSet<&String> = names.iter().copied().collect();
    if unique.len() != names.len() {
        return Err(ConfigError::Validation(
            "queue names must be distinct".to_string(),
        ));
    }

    Ok(())
}

fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.pages_dir.is_empty() {
        return Err(ConfigError::Validation(
            "pages-dir cannot be empty".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "fetcher timeout-ms must be >= 1ms".to_string(),
        ));
    }

    Ok(())
}

fn validate_analytics_config(config: &AnalyticsConfig) -> Result<(), ConfigError> {
    if config.report_every < 1 {
        return Err(ConfigError::Validation(format!(
            "report-every must be >= 1, got {}",
            config.report_every
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            frontier: FrontierConfig {
                host: "site.test".to_string(),
                prefetch: 1,
                ack_delay_ms: 5000,
                claim_timeout_ms: 60_000,
            },
            store: StoreConfig::default(),
            bus: BusConfig::default(),
            queues: QueueNames::default(),
            fetcher: FetcherConfig::default(),
            analytics: AnalyticsConfig::default(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn test_invalid_host_pattern() {
        let mut config = base_config();
        config.frontier.host = "*.".to_string();
        assert!(matches!(
            validate(&config).unwrap_err(),
            ConfigError::InvalidPattern(_)
        ));
    }

    #[test]
    fn test_prefetch_bounds() {
        let mut config = base_config();
        config.frontier.prefetch = 0;
        assert!(validate(&config).is_err());

        config.frontier.prefetch = 1001;
        assert!(validate(&config).is_err());

        config.frontier.prefetch = 16;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_ack_delay_allowed() {
        let mut config = base_config();
        config.frontier.ack_delay_ms = 0;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_ack_delay_must_fit_in_lease() {
        let mut config = base_config();
        config.bus.lease_ms = 5000;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("lease-ms"));

        config.bus.lease_ms = 5001;
        assert!(validate(&config).is_ok());

        // Memory deliveries have no lease to outlive
        config.bus.backend = Backend::Memory;
        config.bus.lease_ms = 1;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_duplicate_queue_names() {
        let mut config = base_config();
        config.queues.parse_jobs = config.queues.fetch_jobs.clone();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_queue_name() {
        let mut config = base_config();
        config.queues.analytics_events = " ".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_memory_path_may_be_empty() {
        let mut config = base_config();
        config.store.backend = Backend::Memory;
        config.store.path = String::new();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_shared_backends() {
        let mut config = base_config();
        assert!(validate_shared_backends(&config).is_ok());

        config.bus.backend = Backend::Memory;
        assert!(validate_shared_backends(&config).is_err());
    }
}
