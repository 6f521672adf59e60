//! Frontier coordinator - admission control for the crawl
//!
//! The coordinator is the only component that turns a candidate URL into a
//! crawlable record. For every candidate it:
//! - Validates and normalizes the URL
//! - Applies the host filter
//! - Deduplicates against the identifier store
//! - Allocates a permanent id and binds it in both directions
//! - Hands the id to the fetch stage
//!
//! Binding a new URL takes several single-key store operations. While they are
//! in flight the URL key holds a pending claim (`claim:<id>:<owner>:<millis>`)
//! instead of an id, so a second coordinator seeing the same URL backs off
//! instead of allocating a second id. A claim left behind by a crashed
//! coordinator is taken over once it is older than the claim timeout.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

use crate::bus::{BusError, ConsumeOptions, Delivery, MessageBus};
use crate::config::{Config, QueueNames};
use crate::crawler::{shutdown_requested, ShutdownSignal};
use crate::protocol::{AnalyticsEvent, CandidateUrl, DiscoverEvent, FetchJob};
use crate::storage::now_millis;
use crate::store::{ensure_sequence, id_key, IdentifierStore, StoreError, FIRST_ID, SEQUENCE_KEY};
use crate::url::{normalize_url, HostFilter};
use crate::{ConfigError, KumoError};

const CLAIM_PREFIX: &str = "claim:";

/// Errors that abort a single admission
///
/// Transient errors put the candidate back on its queue to be admitted again
/// later; see [`FrontierError::is_transient`].
#[derive(Debug, Error)]
pub enum FrontierError {
    #[error("Identifier store error: {0}")]
    Store(#[from] StoreError),

    #[error("Message bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Sequence counter '{}' has not been seeded", SEQUENCE_KEY)]
    Unseeded,

    #[error("Sequence counter value {0} is outside the id range")]
    Exhausted(i64),
}

impl FrontierError {
    /// Returns true if admitting the same candidate again may succeed
    ///
    /// A corrupted or exhausted counter fails every admission the same way,
    /// so retrying the candidate would only loop.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Bus(_) | Self::Unseeded => true,
            Self::Exhausted(_) => false,
        }
    }
}

/// Outcome of offering one candidate URL to the frontier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionResult {
    /// The URL got a new id and a fetch job was published
    Admitted { id: u32 },

    /// The URL already has an id (`None` if it was bound concurrently and is not
    /// readable yet)
    Duplicate { id: Option<u32> },

    /// The URL is outside the crawled host
    HostMismatch,

    /// The candidate is not an absolute http(s) URL
    Malformed { reason: String },

    /// Another live coordinator is binding this URL right now
    InProgress,
}

/// A pending claim on a URL key
#[derive(Debug, Clone, PartialEq, Eq)]
struct Claim {
    id: u32,
    owner: String,
    created_ms: i64,
}

impl Claim {
    fn new(id: u32, owner: &str) -> Self {
        Self {
            id,
            owner: owner.to_string(),
            created_ms: now_millis(),
        }
    }

    fn encode(&self) -> String {
        format!("{}{}:{}:{}", CLAIM_PREFIX, self.id, self.owner, self.created_ms)
    }

    fn parse(value: &str) -> Option<Self> {
        let rest = value.strip_prefix(CLAIM_PREFIX)?;
        let mut parts = rest.splitn(3, ':');
        let id = parts.next()?.parse().ok()?;
        let owner = parts.next()?.to_string();
        let created_ms = parts.next()?.parse().ok()?;
        Some(Self {
            id,
            owner,
            created_ms,
        })
    }

    fn is_older_than(&self, timeout: Duration) -> bool {
        now_millis().saturating_sub(self.created_ms) >= timeout.as_millis() as i64
    }
}

/// What a URL key currently holds
enum UrlEntry {
    Bound(u32),
    Claimed(Claim),
    Unrecognized,
}

impl UrlEntry {
    fn parse(value: &str) -> Self {
        if let Ok(id) = value.parse::<u32>() {
            return UrlEntry::Bound(id);
        }
        match Claim::parse(value) {
            Some(claim) => UrlEntry::Claimed(claim),
            None => UrlEntry::Unrecognized,
        }
    }
}

/// Marks a URL as being admitted by this process until dropped
struct InFlight<'a> {
    urls: &'a Mutex<HashSet<String>>,
    url: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.urls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.url);
    }
}

/// Admission logic shared by every frontier worker of one process
pub struct Coordinator {
    store: Arc<dyn IdentifierStore>,
    bus: Arc<dyn MessageBus>,
    filter: HostFilter,
    queues: QueueNames,
    owner: String,
    claim_timeout: Duration,
    in_flight: Mutex<HashSet<String>>,
}

impl Coordinator {
    /// Creates a coordinator with a fresh owner token
    pub fn new(
        store: Arc<dyn IdentifierStore>,
        bus: Arc<dyn MessageBus>,
        filter: HostFilter,
        queues: QueueNames,
        claim_timeout: Duration,
    ) -> Self {
        Self {
            store,
            bus,
            filter,
            queues,
            owner: uuid::Uuid::new_v4().to_string(),
            claim_timeout,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Creates a coordinator from the `[frontier]` and `[queues]` settings
    pub fn from_config(
        store: Arc<dyn IdentifierStore>,
        bus: Arc<dyn MessageBus>,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        let filter = HostFilter::new(&config.frontier.host)?;
        Ok(Self::new(
            store,
            bus,
            filter,
            config.queues.clone(),
            config.frontier.claim_timeout(),
        ))
    }

    /// Token identifying this coordinator in pending claims
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn filter(&self) -> &HostFilter {
        &self.filter
    }

    /// Offers one candidate URL to the frontier
    ///
    /// Calling this again with a URL that is already bound is a no-op that
    /// returns [`AdmissionResult::Duplicate`]. An `Err` means the store or bus
    /// failed part-way; repeating the call later completes the admission
    /// without allocating a second id.
    pub async fn admit(&self, candidate: &str) -> Result<AdmissionResult, FrontierError> {
        let url = match normalize_url(candidate) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Rejecting malformed candidate {:?}: {}", candidate, e);
                return Ok(AdmissionResult::Malformed {
                    reason: e.to_string(),
                });
            }
        };

        if !self.filter.matches(&url) {
            tracing::debug!(
                "Skipping {} (outside host filter {})",
                url,
                self.filter.pattern()
            );
            return Ok(AdmissionResult::HostMismatch);
        }

        let key = url.as_str();

        // Our own claims are only resumable once no local task is working on them
        let Some(_guard) = self.enter(key) else {
            return Ok(AdmissionResult::InProgress);
        };

        if let Some(value) = self.store.get(key).await? {
            return match UrlEntry::parse(&value) {
                UrlEntry::Bound(id) => {
                    tracing::debug!("{} already has id {}", key, id);
                    Ok(AdmissionResult::Duplicate { id: Some(id) })
                }
                UrlEntry::Claimed(claim) => self.resume(key, &value, claim).await,
                UrlEntry::Unrecognized => {
                    tracing::warn!("Leaving {} alone, it holds unrecognized value {:?}", key, value);
                    Ok(AdmissionResult::Duplicate { id: None })
                }
            };
        }

        let id = self.allocate_id().await?;
        let claim = Claim::new(id, &self.owner).encode();

        if !self.store.set_if_absent(key, &claim).await? {
            tracing::debug!("Lost the race for {}, id {} stays unused", key, id);
            let current = self.store.get(key).await?;
            let id = current.and_then(|value| match UrlEntry::parse(&value) {
                UrlEntry::Bound(id) => Some(id),
                _ => None,
            });
            return Ok(AdmissionResult::Duplicate { id });
        }

        self.bind(id, key, &claim).await?;
        tracing::info!("Admitted {} as id {}", key, id);
        Ok(AdmissionResult::Admitted { id })
    }

    fn enter(&self, url: &str) -> Option<InFlight<'_>> {
        let mut urls = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !urls.insert(url.to_string()) {
            return None;
        }
        Some(InFlight {
            urls: &self.in_flight,
            url: url.to_string(),
        })
    }

    /// Takes the next id off the sequence counter
    async fn allocate_id(&self) -> Result<u32, FrontierError> {
        let next = self.store.increment(SEQUENCE_KEY).await?;
        let id = next - 1;
        if id < i64::from(FIRST_ID) {
            return Err(FrontierError::Unseeded);
        }
        u32::try_from(id).map_err(|_| FrontierError::Exhausted(next))
    }

    /// Completes an admission whose claim is held in `claim`
    ///
    /// Every step is safe to repeat, so a resumed admission runs the same code.
    async fn bind(&self, id: u32, url: &str, claim: &str) -> Result<(), FrontierError> {
        self.store.set(&id_key(id), url).await?;

        self.bus
            .publish(&self.queues.fetch_jobs, FetchJob { id }.encode())
            .await?;

        if !self
            .store
            .compare_and_swap(url, claim, &id.to_string())
            .await?
        {
            // Our claim went stale and another coordinator is finishing the job
            tracing::warn!("Claim on {} was taken over before id {} was bound", url, id);
            return Ok(());
        }

        let event = AnalyticsEvent::Discover(DiscoverEvent {
            id,
            url: url.to_string(),
        });
        if let Err(e) = self
            .bus
            .publish(&self.queues.analytics_events, event.encode())
            .await
        {
            tracing::warn!("Failed to publish discover event for id {}: {}", id, e);
        }

        Ok(())
    }

    /// Handles a URL key that holds a pending claim
    async fn resume(
        &self,
        url: &str,
        value: &str,
        claim: Claim,
    ) -> Result<AdmissionResult, FrontierError> {
        if claim.owner == self.owner {
            tracing::info!("Resuming own admission of {} as id {}", url, claim.id);
            self.bind(claim.id, url, value).await?;
            return Ok(AdmissionResult::Admitted { id: claim.id });
        }

        if !claim.is_older_than(self.claim_timeout) {
            tracing::debug!("{} is being admitted by {}", url, claim.owner);
            return Ok(AdmissionResult::InProgress);
        }

        let taken = Claim::new(claim.id, &self.owner).encode();
        if !self.store.compare_and_swap(url, value, &taken).await? {
            return Ok(AdmissionResult::InProgress);
        }

        tracing::warn!(
            "Took over stale claim on {} (id {}) from {}",
            url,
            claim.id,
            claim.owner
        );
        self.bind(claim.id, url, &taken).await?;
        Ok(AdmissionResult::Admitted { id: claim.id })
    }
}

/// Pause between finishing an admission and acknowledging its candidate
///
/// The delivery keeps counting against the subscription's prefetch while it
/// waits, which caps how fast one coordinator drains the inbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckDelay(Duration);

impl AckDelay {
    pub fn new(delay: Duration) -> Self {
        Self(delay)
    }

    pub fn none() -> Self {
        Self(Duration::ZERO)
    }

    pub fn duration(&self) -> Duration {
        self.0
    }

    pub async fn wait(&self) {
        if !self.0.is_zero() {
            tokio::time::sleep(self.0).await;
        }
    }
}

/// Running totals of admission outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmissionCounts {
    pub admitted: u64,
    pub duplicate: u64,
    pub host_mismatch: u64,
    pub malformed: u64,
    pub in_progress: u64,
    pub failed: u64,
}

impl AdmissionCounts {
    pub fn total(&self) -> u64 {
        self.admitted
            + self.duplicate
            + self.host_mismatch
            + self.malformed
            + self.in_progress
            + self.failed
    }
}

impl fmt::Display for AdmissionCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} candidates: {} admitted, {} duplicate, {} off-host, {} malformed, {} in progress, {} failed",
            self.total(),
            self.admitted,
            self.duplicate,
            self.host_mismatch,
            self.malformed,
            self.in_progress,
            self.failed
        )
    }
}

/// Consume loop feeding the inbound candidate queue through a [`Coordinator`]
pub struct FrontierWorker {
    coordinator: Arc<Coordinator>,
    prefetch: u32,
    ack_delay: AckDelay,
}

impl FrontierWorker {
    pub fn new(coordinator: Arc<Coordinator>, prefetch: u32, ack_delay: AckDelay) -> Self {
        Self {
            coordinator,
            prefetch,
            ack_delay,
        }
    }

    /// Runs until shutdown is requested or the bus closes
    pub async fn run(self, mut shutdown: ShutdownSignal) -> Result<AdmissionCounts, KumoError> {
        let coordinator = &self.coordinator;
        ensure_sequence(coordinator.store.as_ref()).await?;

        let queue = &coordinator.queues.inbound_candidates;
        let mut subscription = coordinator
            .bus
            .subscribe(queue, ConsumeOptions::manual(self.prefetch))
            .await?;

        tracing::info!(
            "Frontier {} consuming '{}' (host {}, prefetch {}, ack delay {:?})",
            coordinator.owner,
            queue,
            coordinator.filter.pattern(),
            self.prefetch,
            self.ack_delay.duration()
        );

        let mut counts = AdmissionCounts::default();

        loop {
            let delivery = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                next = subscription.next() => match next? {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            self.process(delivery, &mut counts).await;

            if counts.total() % 100 == 0 {
                tracing::info!("Frontier progress: {}", counts);
            }
        }

        tracing::info!("Frontier stopped after {}", counts);
        Ok(counts)
    }

    async fn process(&self, delivery: Delivery, counts: &mut AdmissionCounts) {
        let candidate = match CandidateUrl::decode(delivery.payload()) {
            Ok(candidate) => candidate,
            Err(e) => {
                tracing::warn!("Dropping undecodable candidate: {}", e);
                counts.malformed += 1;
                acknowledge(delivery).await;
                return;
            }
        };

        match self.coordinator.admit(&candidate.url).await {
            Ok(AdmissionResult::Admitted { .. }) => {
                counts.admitted += 1;
                self.settle_later(delivery, false);
            }
            Ok(AdmissionResult::InProgress) => {
                counts.in_progress += 1;
                self.settle_later(delivery, true);
            }
            Ok(AdmissionResult::Duplicate { .. }) => {
                counts.duplicate += 1;
                acknowledge(delivery).await;
            }
            Ok(AdmissionResult::HostMismatch) => {
                counts.host_mismatch += 1;
                acknowledge(delivery).await;
            }
            Ok(AdmissionResult::Malformed { .. }) => {
                counts.malformed += 1;
                acknowledge(delivery).await;
            }
            Err(e) if e.is_transient() => {
                tracing::warn!("Admission of {} failed, requeueing: {}", candidate.url, e);
                counts.failed += 1;
                self.settle_later(delivery, true);
            }
            Err(e) => {
                tracing::error!("Admission of {} failed permanently, dropping: {}", candidate.url, e);
                counts.failed += 1;
                acknowledge(delivery).await;
            }
        }
    }

    /// Acks (or requeues) a delivery once the ack delay has passed
    ///
    /// Runs in its own task so the loop can keep handling other deliveries
    /// up to the prefetch limit.
    fn settle_later(&self, delivery: Delivery, requeue: bool) {
        let delay = self.ack_delay;
        tokio::spawn(async move {
            delay.wait().await;
            let result = if requeue {
                delivery.nack(true).await
            } else {
                delivery.ack().await
            };
            if let Err(e) = result {
                tracing::warn!("Failed to settle candidate: {}", e);
            }
        });
    }
}

async fn acknowledge(delivery: Delivery) {
    if let Err(e) = delivery.ack().await {
        tracing::warn!("Failed to acknowledge candidate: {}", e);
    }
}
