use crate::UrlError;
use url::Url;

/// Validates a candidate URL and brings it into the canonical form used as a
/// store key
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Accept only `http` and `https` schemes
/// 3. Require a host (the url crate lowercases it and drops default ports)
/// 4. Remove the fragment, which never reaches the server
///
/// Scheme, path, and query are otherwise kept as written. Two candidates are the
/// same URL record only if their normalized text is identical.
///
/// # Examples
///
/// ```
/// use kumo_crawl::url::normalize_url;
///
/// let url = normalize_url("http://SITE.test/about#team").unwrap();
/// assert_eq!(url.as_str(), "http://site.test/about");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(UrlError::MissingHost),
    }

    url.set_fragment(None);

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_http_scheme() {
        let result = normalize_url("http://site.test/").unwrap();
        assert_eq!(result.as_str(), "http://site.test/");
    }

    #[test]
    fn test_empty_path_becomes_root() {
        let result = normalize_url("https://site.test").unwrap();
        assert_eq!(result.as_str(), "https://site.test/");
    }

    #[test]
    fn test_lowercase_host_only() {
        let result = normalize_url("http://SITE.TEST/Page").unwrap();
        assert_eq!(result.as_str(), "http://site.test/Page");
    }

    #[test]
    fn test_remove_fragment() {
        let result = normalize_url("http://site.test/page#section").unwrap();
        assert_eq!(result.as_str(), "http://site.test/page");
    }

    #[test]
    fn test_query_is_preserved() {
        let result = normalize_url("http://site.test/search?b=2&a=1").unwrap();
        assert_eq!(result.as_str(), "http://site.test/search?b=2&a=1");
    }

    #[test]
    fn test_default_port_dropped() {
        let result = normalize_url("http://site.test:80/").unwrap();
        assert_eq!(result.as_str(), "http://site.test/");
    }

    #[test]
    fn test_surrounding_whitespace_trimmed() {
        let result = normalize_url("  http://site.test/a  ").unwrap();
        assert_eq!(result.as_str(), "http://site.test/a");
    }

    #[test]
    fn test_invalid_scheme() {
        let result = normalize_url("ftp://site.test/file");
        assert!(matches!(result.unwrap_err(), UrlError::InvalidScheme(_)));
    }

    #[test]
    fn test_mailto_rejected() {
        let result = normalize_url("mailto:someone@site.test");
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_url() {
        assert!(matches!(
            normalize_url("not a url").unwrap_err(),
            UrlError::Parse(_)
        ));
    }

    #[test]
    fn test_relative_reference_rejected() {
        assert!(normalize_url("/about").is_err());
    }
}
