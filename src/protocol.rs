//! Message contracts between pipeline stages
//!
//! Stages never call each other. Everything one stage needs from another
//! travels through one of four queues as one of the payloads below:
//!
//! | Queue | Producer | Consumer | Payload |
//! |-------|----------|----------|---------|
//! | `inbound-candidates` | parser, seed injector | frontier | JSON `{"url": ...}` |
//! | `fetch-jobs` | frontier | fetcher | 4-byte big-endian id |
//! | `parse-jobs` | fetcher | parser | 4-byte big-endian id |
//! | `analytics-events` | fetcher, frontier | analyzer | JSON `{"event": ..., "payload": {...}}` |

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default name of the frontier's inbound queue
pub const INBOUND_CANDIDATES: &str = "inbound-candidates";

/// Default name of the fetch stage's queue
pub const FETCH_JOBS: &str = "fetch-jobs";

/// Default name of the parse stage's queue
pub const PARSE_JOBS: &str = "parse-jobs";

/// Default name of the analytics queue
pub const ANALYTICS_EVENTS: &str = "analytics-events";

/// Errors raised while decoding a message payload
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Candidate payload is not a JSON object with a url field: {0}")]
    Candidate(#[source] serde_json::Error),

    #[error("Job payload must be exactly 4 bytes, got {0}")]
    JobLength(usize),

    #[error("Analytics payload is not a known event: {0}")]
    Event(#[source] serde_json::Error),
}

/// A URL proposed for crawling, not yet validated or deduplicated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateUrl {
    pub url: String,
}

impl CandidateUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn encode(&self) -> Bytes {
        // Serializing a struct holding one String cannot fail
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(payload).map_err(ProtocolError::Candidate)
    }
}

/// Work item for the fetch stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchJob {
    pub id: u32,
}

impl FetchJob {
    pub fn encode(&self) -> Bytes {
        encode_id(self.id)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        decode_id(payload).map(|id| Self { id })
    }
}

/// Work item for the parse stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseJob {
    pub id: u32,
}

impl ParseJob {
    pub fn encode(&self) -> Bytes {
        encode_id(self.id)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        decode_id(payload).map(|id| Self { id })
    }
}

fn encode_id(id: u32) -> Bytes {
    Bytes::copy_from_slice(&id.to_be_bytes())
}

fn decode_id(payload: &[u8]) -> Result<u32, ProtocolError> {
    let bytes: [u8; 4] = payload
        .try_into()
        .map_err(|_| ProtocolError::JobLength(payload.len()))?;
    Ok(u32::from_be_bytes(bytes))
}

/// A page was fetched and persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchEvent {
    #[serde(rename = "urlId")]
    pub id: u32,
    #[serde(rename = "size")]
    pub size_bytes: u64,
}

/// A URL was admitted to the frontier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverEvent {
    #[serde(rename = "urlId")]
    pub id: u32,
    pub url: String,
}

/// Observability events consumed by the analytics sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "UPPERCASE")]
pub enum AnalyticsEvent {
    Fetch(FetchEvent),
    Discover(DiscoverEvent),
}

impl AnalyticsEvent {
    pub fn encode(&self) -> Bytes {
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(payload).map_err(ProtocolError::Event)
    }
}
