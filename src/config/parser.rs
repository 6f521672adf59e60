use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at stage start so operators can tell whether all stages of one
/// crawl were launched from the same configuration.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_full_config() {
        let config_content = r#"
[frontier]
host = "*.site.test"
prefetch = 4
ack-delay-ms = 250
claim-timeout-ms = 1000

[store]
backend = "sqlite"
path = "./crawl.db"
timeout-ms = 750

[bus]
backend = "memory"
poll-interval-ms = 50
lease-ms = 10000

[queues]
fetch-jobs = "to_crawl"

[fetcher]
pages-dir = "./pages"
user-agent = "TestBot/1.0"
timeout-ms = 2000

[analytics]
report-every = 5
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.frontier.host, "*.site.test");
        assert_eq!(config.frontier.prefetch, 4);
        assert_eq!(config.frontier.ack_delay().as_millis(), 250);
        assert_eq!(config.store.path, "./crawl.db");
        assert_eq!(config.store.timeout_ms, 750);
        assert_eq!(config.bus.backend, Backend::Memory);
        assert_eq!(config.queues.fetch_jobs, "to_crawl");
        assert_eq!(config.queues.parse_jobs, "parse-jobs");
        assert_eq!(config.fetcher.user_agent, "TestBot/1.0");
        assert_eq!(config.analytics.report_every, 5);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("[frontier]\nhost = \"site.test\"\n").unwrap();

        assert_eq!(config.frontier.prefetch, 1);
        assert_eq!(config.frontier.ack_delay_ms, 5000);
        assert_eq!(config.store.backend, Backend::Sqlite);
        assert_eq!(config.bus.backend, Backend::Sqlite);
        assert_eq!(config.queues.inbound_candidates, "inbound-candidates");
        assert_eq!(config.queues.analytics_events, "analytics-events");
        assert_eq!(config.fetcher.pages_dir, "./websites");
    }

    #[test]
    fn test_missing_frontier_section() {
        let result = parse_config("[store]\npath = \"x.db\"\n");
        assert!(matches!(result.unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn test_unknown_backend() {
        let result = parse_config("[frontier]\nhost = \"site.test\"\n[store]\nbackend = \"redis\"\n");
        assert!(matches!(result.unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result.unwrap_err(), ConfigError::Io(_)));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let file = create_temp_config("[frontier]\nhost = \"site.test\"\nprefetch = 0\n");
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        assert_ne!(
            compute_config_hash(file1.path()).unwrap(),
            compute_config_hash(file2.path()).unwrap()
        );
    }
}
