//! SQLite message bus
//!
//! Queues are rows of the `messages` table in a database file shared by all
//! stage processes. Every delivery first leases its row until `now + lease`;
//! acking deletes the row, and a lease that runs out makes the row visible
//! again, which is how a crashed consumer's messages get redelivered.
//! Auto-ack deliveries delete their row only after they have been handed
//! out, so a consumer cancelled mid-claim leaves a lease behind, not a gap.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::bus::traits::{
    AckMode, Acknowledger, BusError, BusResult, ConsumeOptions, Delivery, MessageBus,
    Subscription,
};
use crate::storage::{now_millis, open_database, open_in_memory};

type SharedConnection = Arc<Mutex<Connection>>;

async fn run_blocking<T, F>(conn: &SharedConnection, f: F) -> BusResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> BusResult<T> + Send + 'static,
{
    let conn = conn.clone();
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    })
    .await
    .map_err(|e| BusError::Task(e.to_string()))?
}

/// SQLite-backed [`MessageBus`]
#[derive(Clone)]
pub struct SqliteBus {
    conn: SharedConnection,
    poll_interval: Duration,
    lease: Duration,
    closed: Arc<AtomicBool>,
}

impl SqliteBus {
    /// Opens or creates the bus in a database file
    pub fn open(path: &Path, poll_interval: Duration, lease: Duration) -> BusResult<Self> {
        let conn = open_database(path)?;
        Ok(Self::from_connection(conn, poll_interval, lease))
    }

    /// Creates a private in-memory bus (for testing)
    pub fn open_in_memory(poll_interval: Duration, lease: Duration) -> BusResult<Self> {
        let conn = open_in_memory()?;
        Ok(Self::from_connection(conn, poll_interval, lease))
    }

    fn from_connection(conn: Connection, poll_interval: Duration, lease: Duration) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            poll_interval,
            lease,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stops this handle; its subscriptions return `None` on their next poll
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Number of rows in a queue, leased ones included
    pub async fn queue_len(&self, queue: &str) -> BusResult<usize> {
        let queue = queue.to_string();
        run_blocking(&self.conn, move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE queue = ?1",
                params![queue],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }
}

#[async_trait]
impl MessageBus for SqliteBus {
    async fn publish(&self, queue: &str, payload: Bytes) -> BusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let queue = queue.to_string();
        run_blocking(&self.conn, move |conn| {
            conn.execute(
                "INSERT INTO messages (queue, payload, enqueued_at) VALUES (?1, ?2, ?3)",
                params![queue, payload.as_ref(), now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn subscribe(
        &self,
        queue: &str,
        options: ConsumeOptions,
    ) -> BusResult<Box<dyn Subscription>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let permits = match options.ack {
            AckMode::Manual => Some(Arc::new(Semaphore::new(options.prefetch as usize))),
            AckMode::Auto => None,
        };
        Ok(Box::new(SqliteSubscription {
            bus: self.clone(),
            queue: queue.to_string(),
            permits,
        }))
    }
}

/// A row taken off a queue
struct Claimed {
    id: i64,
    payload: Vec<u8>,
    delivery_count: u32,
    leased_until: i64,
}

struct SqliteSubscription {
    bus: SqliteBus,
    queue: String,
    permits: Option<Arc<Semaphore>>,
}

impl SqliteSubscription {
    /// Leases the oldest visible row of the queue, if any
    async fn claim(&self) -> BusResult<Option<Claimed>> {
        let queue = self.queue.clone();
        let lease_ms = self.bus.lease.as_millis() as i64;

        run_blocking(&self.bus.conn, move |conn| {
            let now = now_millis();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let row: Option<(i64, Vec<u8>, i64)> = tx
                .query_row(
                    "SELECT id, payload, delivery_count FROM messages
                     WHERE queue = ?1 AND (leased_until IS NULL OR leased_until <= ?2)
                     ORDER BY id LIMIT 1",
                    params![queue, now],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            let Some((id, payload, previous)) = row else {
                return Ok(None);
            };

            let leased_until = now + lease_ms;
            tx.execute(
                "UPDATE messages SET leased_until = ?2, delivery_count = delivery_count + 1
                 WHERE id = ?1",
                params![id, leased_until],
            )?;
            tx.commit()?;

            Ok(Some(Claimed {
                id,
                payload,
                delivery_count: (previous + 1) as u32,
                leased_until,
            }))
        })
        .await
    }
}

#[async_trait]
impl Subscription for SqliteSubscription {
    async fn next(&mut self) -> BusResult<Option<Delivery>> {
        let permit = match &self.permits {
            Some(permits) => Some(
                permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| BusError::Closed)?,
            ),
            None => None,
        };
        loop {
            if self.bus.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }

            if let Some(claimed) = self.claim().await? {
                let acker: Option<Box<dyn Acknowledger>> = match permit {
                    Some(permit) => Some(Box::new(SqliteAcker {
                        conn: self.bus.conn.clone(),
                        id: claimed.id,
                        leased_until: claimed.leased_until,
                        _permit: permit,
                    }) as Box<dyn Acknowledger>),
                    None => {
                        tokio::spawn(forget_delivered(
                            self.bus.conn.clone(),
                            claimed.id,
                            claimed.leased_until,
                        ));
                        None
                    }
                };
                return Ok(Some(Delivery::new(
                    Bytes::from(claimed.payload),
                    claimed.delivery_count,
                    acker,
                )));
            }

            tokio::time::sleep(self.bus.poll_interval).await;
        }
    }
}

/// Deletes a row if it is still under the given lease
async fn delete_leased(conn: &SharedConnection, id: i64, leased_until: i64) -> BusResult<()> {
    run_blocking(conn, move |conn| {
        conn.execute(
            "DELETE FROM messages WHERE id = ?1 AND leased_until = ?2",
            params![id, leased_until],
        )?;
        Ok(())
    })
    .await
}

/// Removes the row behind an auto-ack delivery
async fn forget_delivered(conn: SharedConnection, id: i64, leased_until: i64) {
    if let Err(e) = delete_leased(&conn, id, leased_until).await {
        tracing::warn!("Failed to delete delivered message {}: {}", id, e);
    }
}

/// Settles one leased row
///
/// Every statement is guarded by the lease timestamp, so a consumer whose
/// lease ran out cannot touch a row that was handed to someone else since.
struct SqliteAcker {
    conn: SharedConnection,
    id: i64,
    leased_until: i64,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Acknowledger for SqliteAcker {
    async fn ack(self: Box<Self>) -> BusResult<()> {
        delete_leased(&self.conn, self.id, self.leased_until).await
    }

    async fn nack(self: Box<Self>, requeue: bool) -> BusResult<()> {
        if !requeue {
            return delete_leased(&self.conn, self.id, self.leased_until).await;
        }
        let (id, leased_until) = (self.id, self.leased_until);
        run_blocking(&self.conn, move |conn| {
            conn.execute(
                "UPDATE messages SET leased_until = NULL WHERE id = ?1 AND leased_until = ?2",
                params![id, leased_until],
            )?;
            Ok(())
        })
        .await
    }
}
