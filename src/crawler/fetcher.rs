//! Fetch stage
//!
//! This module handles the download side of the crawl:
//! - Building the HTTP client with the configured user agent and timeout
//! - Resolving fetch jobs to URLs through the identifier store
//! - Persisting page bodies under `<pages-dir>/<id>/index.html`
//! - Handing fetched ids to the parse stage and reporting them to analytics
//!
//! A failed fetch is terminal for its id. The stage logs it and emits nothing,
//! so a dead link never produces a parse job or a `FETCH` event.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::bus::{ConsumeOptions, MessageBus};
use crate::config::{Config, FetcherConfig, QueueNames};
use crate::crawler::{shutdown_requested, ShutdownSignal};
use crate::protocol::{AnalyticsEvent, FetchEvent, FetchJob, ParseJob};
use crate::store::{ensure_sequence, resolve_id, IdentifierStore};
use crate::KumoError;

/// File name of a persisted page inside its id directory
const PAGE_FILE: &str = "index.html";

/// Builds the HTTP client used by the fetch stage
///
/// Redirects are followed with reqwest's default policy; compressed
/// responses are decoded transparently.
pub fn build_http_client(config: &FetcherConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.timeout())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Directory tree of fetched pages, one subdirectory per id
#[derive(Debug, Clone)]
pub struct PageStore {
    root: PathBuf,
}

impl PageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the page body for an id
    pub fn page_path(&self, id: u32) -> PathBuf {
        self.root.join(id.to_string()).join(PAGE_FILE)
    }

    /// Writes a page body, replacing any earlier copy, and returns its size on disk
    pub async fn save(&self, id: u32, body: &[u8]) -> io::Result<u64> {
        let path = self.page_path(id);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&path, body).await?;
        Ok(tokio::fs::metadata(&path).await?.len())
    }

    /// Reads a page body back; `None` if the id was never fetched
    pub async fn load(&self, id: u32) -> io::Result<Option<String>> {
        match tokio::fs::read(self.page_path(id)).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Result of handling one fetch job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The page was stored and handed to the parse stage
    Fetched { size_bytes: u64 },

    /// No URL is bound to the job's id
    UnknownId,

    /// The server answered with a non-success status
    HttpStatus(u16),

    /// The response is not an HTML document
    NotHtml(String),

    /// The request itself failed (DNS, connect, timeout, body read)
    Failed(String),
}

/// Consumes `fetch-jobs`, downloads pages and emits parse jobs
pub struct FetchStage {
    store: Arc<dyn IdentifierStore>,
    bus: Arc<dyn MessageBus>,
    client: Client,
    pages: PageStore,
    queues: QueueNames,
}

impl FetchStage {
    pub fn new(
        store: Arc<dyn IdentifierStore>,
        bus: Arc<dyn MessageBus>,
        client: Client,
        pages: PageStore,
        queues: QueueNames,
    ) -> Self {
        Self {
            store,
            bus,
            client,
            pages,
            queues,
        }
    }

    pub fn from_config(
        store: Arc<dyn IdentifierStore>,
        bus: Arc<dyn MessageBus>,
        config: &Config,
    ) -> Result<Self, KumoError> {
        let client = build_http_client(&config.fetcher)?;
        Ok(Self::new(
            store,
            bus,
            client,
            PageStore::new(&config.fetcher.pages_dir),
            config.queues.clone(),
        ))
    }

    /// Fetches the page behind one job
    ///
    /// HTTP-level failures are reported through [`FetchOutcome`]. An `Err` is
    /// returned only when the store, the bus or the page directory fails.
    pub async fn handle(&self, job: FetchJob) -> Result<FetchOutcome, KumoError> {
        let Some(url) = resolve_id(self.store.as_ref(), job.id).await? else {
            tracing::warn!("No URL is bound to id {}, dropping fetch job", job.id);
            return Ok(FetchOutcome::UnknownId);
        };

        tracing::debug!("Fetching {} (id {})", url, job.id);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Request for {} failed: {}", url, e);
                return Ok(FetchOutcome::Failed(e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::info!("{} answered HTTP {}", url, status.as_u16());
            return Ok(FetchOutcome::HttpStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        if let Some(content_type) = content_type {
            if !is_html(&content_type) {
                tracing::info!("Skipping {}: content type {}", url, content_type);
                return Ok(FetchOutcome::NotHtml(content_type));
            }
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Reading body of {} failed: {}", url, e);
                return Ok(FetchOutcome::Failed(e.to_string()));
            }
        };

        let size_bytes = self.pages.save(job.id, &body).await?;

        self.bus
            .publish(&self.queues.parse_jobs, ParseJob { id: job.id }.encode())
            .await?;

        let event = AnalyticsEvent::Fetch(FetchEvent {
            id: job.id,
            size_bytes,
        });
        self.bus
            .publish(&self.queues.analytics_events, event.encode())
            .await?;

        tracing::info!("Fetched {} (id {}, {} bytes)", url, job.id, size_bytes);
        Ok(FetchOutcome::Fetched { size_bytes })
    }

    /// Runs until shutdown is requested or the bus closes
    ///
    /// Returns the number of pages fetched.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> Result<u64, KumoError> {
        ensure_sequence(self.store.as_ref()).await?;

        let mut subscription = self
            .bus
            .subscribe(&self.queues.fetch_jobs, ConsumeOptions::manual(1))
            .await?;

        tracing::info!(
            "Fetch stage consuming '{}', pages stored in {}",
            self.queues.fetch_jobs,
            self.pages.root().display()
        );

        let mut fetched = 0u64;

        loop {
            let delivery = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                next = subscription.next() => match next? {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            match FetchJob::decode(delivery.payload()) {
                Ok(job) => match self.handle(job).await {
                    Ok(FetchOutcome::Fetched { .. }) => fetched += 1,
                    Ok(_) => {}
                    Err(e) => tracing::error!("Fetch job {} failed: {}", job.id, e),
                },
                Err(e) => tracing::warn!("Dropping undecodable fetch job: {}", e),
            }

            if let Err(e) = delivery.ack().await {
                tracing::warn!("Failed to acknowledge fetch job: {}", e);
            }
        }

        tracing::info!("Fetch stage stopped after {} pages", fetched);
        Ok(fetched)
    }
}

fn is_html(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    content_type.contains("text/html") || content_type.contains("application/xhtml+xml")
}
