//! Analytics sink
//!
//! This module consumes the analytics queue and turns the event stream into
//! crawl statistics:
//! - `FETCH` events from the fetch stage (page sizes)
//! - `DISCOVER` events from the frontier (admitted URLs)
//!
//! Analytics never feeds back into the crawl, so events are consumed with
//! automatic acknowledgement.

pub mod stats;

pub use stats::{format_statistics, url_size_bytes, CrawlStatistics};

use std::sync::Arc;

use crate::bus::{ConsumeOptions, MessageBus};
use crate::config::Config;
use crate::crawler::ShutdownSignal;
use crate::protocol::AnalyticsEvent;
use crate::KumoError;

/// Consume loop aggregating analytics events
pub struct AnalyticsSink {
    bus: Arc<dyn MessageBus>,
    queue: String,
    report_every: u64,
}

impl AnalyticsSink {
    pub fn new(bus: Arc<dyn MessageBus>, queue: impl Into<String>, report_every: u64) -> Self {
        Self {
            bus,
            queue: queue.into(),
            report_every: report_every.max(1),
        }
    }

    pub fn from_config(bus: Arc<dyn MessageBus>, config: &Config) -> Self {
        Self::new(
            bus,
            config.queues.analytics_events.as_str(),
            config.analytics.report_every,
        )
    }

    /// Runs until shutdown is requested or the bus closes
    ///
    /// Logs a report every `report_every` events and once more on exit, then
    /// returns the final totals.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> Result<CrawlStatistics, KumoError> {
        let mut subscription = self
            .bus
            .subscribe(&self.queue, ConsumeOptions::auto_ack())
            .await?;

        tracing::info!("Analytics consuming '{}'", self.queue);

        let mut stats = CrawlStatistics::default();

        loop {
            let delivery = tokio::select! {
                _ = crate::crawler::shutdown_requested(&mut shutdown) => break,
                next = subscription.next() => match next? {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            match AnalyticsEvent::decode(delivery.payload()) {
                Ok(event) => {
                    tracing::debug!("Analytics event: {:?}", event);
                    stats.record(&event);
                    if stats.events() % self.report_every == 0 {
                        log_report(&stats);
                    }
                }
                Err(e) => tracing::warn!("Ignoring undecodable analytics event: {}", e),
            }
        }

        log_report(&stats);
        Ok(stats)
    }
}

fn log_report(stats: &CrawlStatistics) {
    for line in format_statistics(stats).lines() {
        tracing::info!("{}", line);
    }
}
