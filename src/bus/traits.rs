//! Message bus traits, delivery handle and error types

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during bus operations
#[derive(Debug, Error)]
pub enum BusError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Bus task failed: {0}")]
    Task(String),

    #[error("Bus is closed")]
    Closed,
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// How deliveries of a subscription are acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// A message is considered handled the moment it is delivered
    Auto,
    /// The consumer must call [`Delivery::ack`]; unacknowledged messages are redelivered
    Manual,
}

/// Per-subscription consumption settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOptions {
    pub ack: AckMode,
    /// Maximum number of unacknowledged deliveries (only used in manual mode)
    pub prefetch: u32,
}

impl ConsumeOptions {
    /// Fire-and-forget consumption for idempotent or low-value messages
    pub fn auto_ack() -> Self {
        Self {
            ack: AckMode::Auto,
            prefetch: 0,
        }
    }

    /// Explicit acknowledgement with at most `prefetch` messages in flight
    pub fn manual(prefetch: u32) -> Self {
        Self {
            ack: AckMode::Manual,
            prefetch: prefetch.max(1),
        }
    }
}

/// Multi-queue, at-least-once transport between stages
///
/// Each message published to a queue is delivered to exactly one of the
/// queue's subscribers, at least once. Ordering within a queue is
/// best-effort; there is no ordering across queues.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Appends a message to a queue
    async fn publish(&self, queue: &str, payload: Bytes) -> BusResult<()>;

    /// Starts consuming a queue
    async fn subscribe(
        &self,
        queue: &str,
        options: ConsumeOptions,
    ) -> BusResult<Box<dyn Subscription>>;
}

/// A stream of deliveries from one queue
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next delivery
    ///
    /// In manual mode this also waits until fewer than `prefetch` deliveries
    /// are unacknowledged. Returns `None` once the bus has been closed.
    async fn next(&mut self) -> BusResult<Option<Delivery>>;
}

/// Backend-specific settlement of a manual delivery
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(self: Box<Self>) -> BusResult<()>;
    async fn nack(self: Box<Self>, requeue: bool) -> BusResult<()>;
}

/// One delivered message
pub struct Delivery {
    payload: Bytes,
    delivery_count: u32,
    acker: Option<Box<dyn Acknowledger>>,
}

impl Delivery {
    pub fn new(payload: Bytes, delivery_count: u32, acker: Option<Box<dyn Acknowledger>>) -> Self {
        Self {
            payload,
            delivery_count,
            acker,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// How many times this message has been handed out, this delivery included
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }

    /// Settles the message as handled; a no-op for auto-ack deliveries
    pub async fn ack(self) -> BusResult<()> {
        match self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    /// Settles the message as not handled, optionally putting it back on the queue
    pub async fn nack(self, requeue: bool) -> BusResult<()> {
        match self.acker {
            Some(acker) => acker.nack(requeue).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .field("delivery_count", &self.delivery_count)
            .field("manual", &self.acker.is_some())
            .finish()
    }
}
