//! Parse stage: link extraction from persisted pages
//!
//! Links are proposed back to the frontier as raw candidates. This stage does
//! no filtering beyond discarding links that can never be crawled; host
//! filtering and deduplication belong to the frontier.

use std::sync::Arc;

use scraper::{Html, Selector};
use url::Url;

use crate::bus::{ConsumeOptions, MessageBus};
use crate::config::{Config, QueueNames};
use crate::crawler::fetcher::PageStore;
use crate::crawler::{shutdown_requested, ShutdownSignal};
use crate::protocol::{CandidateUrl, ParseJob};
use crate::store::{resolve_id, IdentifierStore};
use crate::KumoError;

/// Extracts the outbound links of an HTML page
///
/// # Link Extraction Rules
///
/// **Include:** every `<a href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` and `data:` links
/// - Fragment-only links (same-page anchors)
///
/// # Resolution
///
/// | Link form | Result |
/// |-----------|--------|
/// | `https://host/x` | passed through as written |
/// | `/x` | page origin + `/x` |
/// | `//host/x` | resolved against the page URL (inherits its scheme) |
/// | `x`, `../x`, `?q` | resolved against the page URL |
///
/// # Example
///
/// ```
/// use kumo_crawl::crawler::extract_links;
/// use url::Url;
///
/// let page = Url::parse("http://site.test/docs/intro").unwrap();
/// let html = r#"<a href="/about">About</a> <a href="next">Next</a>"#;
/// assert_eq!(
///     extract_links(html, &page),
///     vec!["http://site.test/about", "http://site.test/docs/next"]
/// );
/// ```
pub fn extract_links(html: &str, page_url: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(href) = element.value().attr("href") {
                if let Some(link) = resolve_link(href, page_url) {
                    links.push(link);
                }
            }
        }
    }

    links
}

fn resolve_link(href: &str, page_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    if href.starts_with('/') && !href.starts_with("//") {
        let origin = page_url.origin();
        if !origin.is_tuple() {
            return None;
        }
        return Some(format!("{}{}", origin.ascii_serialization(), href));
    }

    if Url::parse(href).is_ok() {
        return Some(href.to_string());
    }

    page_url.join(href).ok().map(|url| url.to_string())
}

/// Result of handling one parse job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Links were extracted and published (possibly none)
    Parsed { links: usize },

    /// No URL is bound to the job's id
    UnknownId,

    /// No persisted page exists for the id
    MissingPage,
}

/// Consumes `parse-jobs` and proposes every extracted link to the frontier
pub struct ParseStage {
    store: Arc<dyn IdentifierStore>,
    bus: Arc<dyn MessageBus>,
    pages: PageStore,
    queues: QueueNames,
}

impl ParseStage {
    pub fn new(
        store: Arc<dyn IdentifierStore>,
        bus: Arc<dyn MessageBus>,
        pages: PageStore,
        queues: QueueNames,
    ) -> Self {
        Self {
            store,
            bus,
            pages,
            queues,
        }
    }

    pub fn from_config(
        store: Arc<dyn IdentifierStore>,
        bus: Arc<dyn MessageBus>,
        config: &Config,
    ) -> Self {
        Self::new(
            store,
            bus,
            PageStore::new(&config.fetcher.pages_dir),
            config.queues.clone(),
        )
    }

    /// Parses the persisted page of one job and publishes its links
    pub async fn handle(&self, job: ParseJob) -> Result<ParseOutcome, KumoError> {
        let Some(url) = resolve_id(self.store.as_ref(), job.id).await? else {
            tracing::warn!("No URL is bound to id {}, dropping parse job", job.id);
            return Ok(ParseOutcome::UnknownId);
        };

        let Some(body) = self.pages.load(job.id).await? else {
            tracing::warn!("No stored page for id {} ({})", job.id, url);
            return Ok(ParseOutcome::MissingPage);
        };

        let page_url = Url::parse(&url)?;
        let links = extract_links(&body, &page_url);

        for link in &links {
            self.bus
                .publish(
                    &self.queues.inbound_candidates,
                    CandidateUrl::new(link.as_str()).encode(),
                )
                .await?;
        }

        tracing::debug!("Parsed {} (id {}): {} links", url, job.id, links.len());
        Ok(ParseOutcome::Parsed { links: links.len() })
    }

    /// Runs until shutdown is requested or the bus closes
    ///
    /// Returns the number of pages parsed.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> Result<u64, KumoError> {
        let mut subscription = self
            .bus
            .subscribe(&self.queues.parse_jobs, ConsumeOptions::manual(1))
            .await?;

        tracing::info!("Parse stage consuming '{}'", self.queues.parse_jobs);

        let mut parsed = 0u64;

        loop {
            let delivery = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                next = subscription.next() => match next? {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            match ParseJob::decode(delivery.payload()) {
                Ok(job) => match self.handle(job).await {
                    Ok(ParseOutcome::Parsed { .. }) => parsed += 1,
                    Ok(_) => {}
                    Err(e) => tracing::error!("Parse job {} failed: {}", job.id, e),
                },
                Err(e) => tracing::warn!("Dropping undecodable parse job: {}", e),
            }

            if let Err(e) = delivery.ack().await {
                tracing::warn!("Failed to acknowledge parse job: {}", e);
            }
        }

        tracing::info!("Parse stage stopped after {} pages", parsed);
        Ok(parsed)
    }
}
