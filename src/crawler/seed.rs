//! Seed injection
//!
//! A crawl starts when at least one candidate reaches the frontier. Seeds go
//! through the same queue as discovered links, so they get the same
//! validation, host filtering and deduplication.

use crate::bus::MessageBus;
use crate::protocol::CandidateUrl;
use crate::KumoError;

/// Publishes seed URLs to the inbound candidate queue
///
/// Returns the number of seeds published. Blank entries are skipped.
pub async fn inject_seeds(
    bus: &dyn MessageBus,
    queue: &str,
    seeds: &[String],
) -> Result<usize, KumoError> {
    let mut published = 0;

    for seed in seeds {
        let seed = seed.trim();
        if seed.is_empty() {
            continue;
        }

        bus.publish(queue, CandidateUrl::new(seed).encode()).await?;
        tracing::info!("Seeded {}", seed);
        published += 1;
    }

    if published == 0 {
        tracing::warn!("No seeds were published to '{}'", queue);
    }

    Ok(published)
}
