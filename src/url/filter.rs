use crate::ConfigError;
use url::Url;

/// The rule restricting a crawl to one target site
///
/// Two pattern forms are supported:
/// 1. Exact: `"site.test"` matches only the host `site.test`
/// 2. Wildcard: `"*.site.test"` matches `site.test` and any of its subdomains
///
/// Matching is done on the parsed host, so `http://site.test.evil.example/`
/// does not slip through an exact `site.test` filter. Ports are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFilter {
    pattern: String,
}

impl HostFilter {
    /// Builds a filter from a configured pattern
    ///
    /// # Examples
    ///
    /// ```
    /// use kumo_crawl::url::HostFilter;
    ///
    /// let filter = HostFilter::new("*.site.test").unwrap();
    /// assert!(filter.matches_str("http://blog.site.test/post"));
    /// assert!(!filter.matches_str("http://other.test/"));
    /// ```
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let pattern = pattern.trim().to_lowercase();
        let base = pattern.strip_prefix("*.").unwrap_or(&pattern);

        if base.is_empty() {
            return Err(ConfigError::InvalidPattern(
                "Host pattern cannot be empty".to_string(),
            ));
        }

        if !base
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
        {
            return Err(ConfigError::InvalidPattern(format!(
                "Host pattern '{}' contains invalid characters",
                pattern
            )));
        }

        if base.starts_with('.') || base.ends_with('.') || base.contains("..") {
            return Err(ConfigError::InvalidPattern(format!(
                "Host pattern '{}' has an empty label",
                pattern
            )));
        }

        Ok(Self { pattern })
    }

    /// Returns the configured pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Tests an already parsed URL against the filter
    pub fn matches(&self, url: &Url) -> bool {
        match url.host_str() {
            Some(host) => matches_host(&self.pattern, &host.to_lowercase()),
            None => false,
        }
    }

    /// Tests raw URL text; unparsable text never matches
    pub fn matches_str(&self, url: &str) -> bool {
        Url::parse(url).map(|u| self.matches(&u)).unwrap_or(false)
    }
}

fn matches_host(pattern: &str, host: &str) -> bool {
    if let Some(base) = pattern.strip_prefix("*.") {
        host == base || host.ends_with(&format!(".{}", base))
    } else {
        host == pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let filter = HostFilter::new("site.test").unwrap();
        assert!(filter.matches_str("http://site.test/"));
        assert!(filter.matches_str("https://site.test/deep/page?x=1"));
    }

    #[test]
    fn test_exact_rejects_other_hosts() {
        let filter = HostFilter::new("site.test").unwrap();
        assert!(!filter.matches_str("http://other.test/page"));
        assert!(!filter.matches_str("http://blog.site.test/"));
        assert!(!filter.matches_str("http://site.test.evil.example/"));
        assert!(!filter.matches_str("http://mysite.test/"));
    }

    #[test]
    fn test_wildcard_matches_bare_and_subdomains() {
        let filter = HostFilter::new("*.site.test").unwrap();
        assert!(filter.matches_str("http://site.test/"));
        assert!(filter.matches_str("http://blog.site.test/"));
        assert!(filter.matches_str("http://a.b.site.test/"));
        assert!(!filter.matches_str("http://notsite.test/"));
    }

    #[test]
    fn test_port_is_ignored() {
        let filter = HostFilter::new("127.0.0.1").unwrap();
        assert!(filter.matches_str("http://127.0.0.1:8080/page"));
    }

    #[test]
    fn test_case_insensitive() {
        let filter = HostFilter::new("Site.Test").unwrap();
        assert!(filter.matches_str("http://SITE.test/"));
        assert_eq!(filter.pattern(), "site.test");
    }

    #[test]
    fn test_unparsable_never_matches() {
        let filter = HostFilter::new("site.test").unwrap();
        assert!(!filter.matches_str("site.test/about"));
        assert!(!filter.matches_str(""));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(HostFilter::new("").is_err());
        assert!(HostFilter::new("*.").is_err());
        assert!(HostFilter::new("site..test").is_err());
        assert!(HostFilter::new(".site.test").is_err());
        assert!(HostFilter::new("site.test/path").is_err());
    }
}
