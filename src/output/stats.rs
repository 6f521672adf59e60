//! Crawl statistics aggregated from analytics events
//!
//! This module keeps running totals over the `FETCH` and `DISCOVER` events
//! and derives the summary figures reported by the analytics sink.

use std::fmt::Write as _;

use crate::protocol::AnalyticsEvent;

/// Running crawl totals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStatistics {
    /// Pages fetched and persisted
    pub total_fetched: u64,

    /// URLs admitted by the frontier
    pub total_discovered: u64,

    /// Sum of persisted page sizes
    pub total_page_bytes: u64,

    /// Sum of discovered URL sizes, see [`url_size_bytes`]
    pub total_url_bytes: u64,
}

impl CrawlStatistics {
    /// Folds one event into the totals
    pub fn record(&mut self, event: &AnalyticsEvent) {
        match event {
            AnalyticsEvent::Fetch(fetch) => {
                self.total_fetched += 1;
                self.total_page_bytes += fetch.size_bytes;
            }
            AnalyticsEvent::Discover(discover) => {
                self.total_discovered += 1;
                self.total_url_bytes += url_size_bytes(&discover.url);
            }
        }
    }

    /// Number of events recorded so far
    pub fn events(&self) -> u64 {
        self.total_fetched + self.total_discovered
    }

    /// Mean size of a fetched page in KiB
    pub fn mean_page_kib(&self) -> f64 {
        mean(self.total_page_bytes as f64 / 1024.0, self.total_fetched)
    }

    /// Mean size of a discovered URL in bytes
    pub fn mean_url_bytes(&self) -> f64 {
        mean(self.total_url_bytes as f64, self.total_discovered)
    }

    /// Discovered URLs per fetched page
    pub fn mean_out_degree(&self) -> f64 {
        mean(self.total_discovered as f64, self.total_fetched)
    }
}

fn mean(total: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// In-memory size of a URL string, counted as two bytes per UTF-16 unit
pub fn url_size_bytes(url: &str) -> u64 {
    url.encode_utf16().count() as u64 * 2
}

/// Renders the statistics as a short multi-line report
pub fn format_statistics(stats: &CrawlStatistics) -> String {
    let mut report = String::new();
    let _ = writeln!(report, "=== Crawl Statistics ===");
    let _ = writeln!(report, "  Pages fetched: {}", stats.total_fetched);
    let _ = writeln!(report, "  URLs discovered: {}", stats.total_discovered);
    let _ = writeln!(report, "  Mean page size: {:.2} KiB", stats.mean_page_kib());
    let _ = writeln!(report, "  Mean URL size: {:.1} bytes", stats.mean_url_bytes());
    let _ = write!(report, "  Mean out-degree: {:.2}", stats.mean_out_degree());
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DiscoverEvent, FetchEvent};

    fn fetch(id: u32, size_bytes: u64) -> AnalyticsEvent {
        AnalyticsEvent::Fetch(FetchEvent { id, size_bytes })
    }

    fn discover(id: u32, url: &str) -> AnalyticsEvent {
        AnalyticsEvent::Discover(DiscoverEvent {
            id,
            url: url.to_string(),
        })
    }

    #[test]
    fn test_empty_statistics() {
        let stats = CrawlStatistics::default();
        assert_eq!(stats.events(), 0);
        assert_eq!(stats.mean_page_kib(), 0.0);
        assert_eq!(stats.mean_url_bytes(), 0.0);
        assert_eq!(stats.mean_out_degree(), 0.0);
    }

    #[test]
    fn test_record_events() {
        let mut stats = CrawlStatistics::default();
        for event in [
            discover(1, "http://a.test/"),
            discover(2, "http://a.test/x"),
            discover(3, "http://a.test/y"),
            discover(4, "http://a.test/z"),
            fetch(1, 1024),
            fetch(2, 3072),
        ] {
            stats.record(&event);
        }

        assert_eq!(stats.total_fetched, 2);
        assert_eq!(stats.total_discovered, 4);
        assert_eq!(stats.events(), 6);
        assert_eq!(stats.mean_page_kib(), 2.0);
        assert_eq!(stats.mean_out_degree(), 2.0);
        // (14 + 15 * 3) chars at 2 bytes each, over 4 URLs
        assert_eq!(stats.mean_url_bytes(), 29.5);
    }

    #[test]
    fn test_url_size_counts_utf16_units() {
        assert_eq!(url_size_bytes("http://a.test/"), 28);
        assert_eq!(url_size_bytes("é"), 2);
        assert_eq!(url_size_bytes("😀"), 4);
    }

    #[test]
    fn test_format_statistics() {
        let mut stats = CrawlStatistics::default();
        stats.record(&fetch(1, 2048));
        stats.record(&discover(1, "http://a.test/"));

        let report = format_statistics(&stats);
        assert!(report.contains("Pages fetched: 1"));
        assert!(report.contains("URLs discovered: 1"));
        assert!(report.contains("Mean page size: 2.00 KiB"));
        assert!(report.contains("Mean URL size: 28.0 bytes"));
        assert!(report.contains("Mean out-degree: 1.00"));
    }
}
