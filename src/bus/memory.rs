//! In-process message bus
//!
//! Queues live in memory and are shared by every subscription created from the
//! same [`MemoryBus`]. Manual deliveries carry a semaphore permit, so a
//! subscription can never hold more than `prefetch` unacknowledged messages.
//! A manual delivery that is dropped without being settled goes back to the
//! front of its queue, the same way a broker requeues on channel loss.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use crate::bus::traits::{
    AckMode, Acknowledger, BusError, BusResult, ConsumeOptions, Delivery, MessageBus,
    Subscription,
};

struct Pending {
    payload: Bytes,
    delivery_count: u32,
}

#[derive(Default)]
struct QueueState {
    messages: Mutex<VecDeque<Pending>>,
    notify: Notify,
}

impl QueueState {
    fn push_back(&self, pending: Pending) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(pending);
        self.notify.notify_waiters();
    }

    fn push_front(&self, pending: Pending) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_front(pending);
        self.notify.notify_waiters();
    }

    fn pop(&self) -> Option<Pending> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[derive(Default)]
struct BusState {
    queues: Mutex<HashMap<String, Arc<QueueState>>>,
    closed: AtomicBool,
}

impl BusState {
    fn queue(&self, name: &str) -> Arc<QueueState> {
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Process-local [`MessageBus`]
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<BusState>,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stops the bus: publishing fails and idle subscriptions return `None`
    pub fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        let queues = self.state.queues.lock().unwrap_or_else(|e| e.into_inner());
        for queue in queues.values() {
            queue.notify.notify_waiters();
        }
    }

    /// Number of messages waiting in a queue (in-flight deliveries excluded)
    pub fn pending_count(&self, queue: &str) -> usize {
        self.state.queue(queue).len()
    }

    /// Removes and returns every waiting message of a queue
    pub fn drain(&self, queue: &str) -> Vec<Bytes> {
        let queue = self.state.queue(queue);
        let mut drained = Vec::new();
        while let Some(pending) = queue.pop() {
            drained.push(pending.payload);
        }
        drained
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, queue: &str, payload: Bytes) -> BusResult<()> {
        if self.state.is_closed() {
            return Err(BusError::Closed);
        }
        self.state.queue(queue).push_back(Pending {
            payload,
            delivery_count: 0,
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        options: ConsumeOptions,
    ) -> BusResult<Box<dyn Subscription>> {
        if self.state.is_closed() {
            return Err(BusError::Closed);
        }
        let permits = match options.ack {
            AckMode::Manual => Some(Arc::new(Semaphore::new(options.prefetch as usize))),
            AckMode::Auto => None,
        };
        Ok(Box::new(MemorySubscription {
            bus: self.state.clone(),
            queue: self.state.queue(queue),
            permits,
        }))
    }
}

struct MemorySubscription {
    bus: Arc<BusState>,
    queue: Arc<QueueState>,
    permits: Option<Arc<Semaphore>>,
}

impl MemorySubscription {
    /// Waits until a message can be taken from the queue, or the bus closes
    async fn take(&self) -> Option<Pending> {
        loop {
            let notified = self.queue.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(pending) = self.queue.pop() {
                return Some(pending);
            }
            if self.bus.is_closed() {
                return None;
            }

            notified.await;
        }
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
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

        let Some(mut pending) = self.take().await else {
            return Ok(None);
        };
        pending.delivery_count += 1;

        let payload = pending.payload.clone();
        let delivery_count = pending.delivery_count;

        let acker: Option<Box<dyn Acknowledger>> = permit.map(|permit| {
            Box::new(MemoryAcker {
                queue: self.queue.clone(),
                pending: Some(pending),
                _permit: permit,
            }) as Box<dyn Acknowledger>
        });

        Ok(Some(Delivery::new(payload, delivery_count, acker)))
    }
}

struct MemoryAcker {
    queue: Arc<QueueState>,
    pending: Option<Pending>,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(mut self: Box<Self>) -> BusResult<()> {
        self.pending = None;
        Ok(())
    }

    async fn nack(mut self: Box<Self>, requeue: bool) -> BusResult<()> {
        if let Some(pending) = self.pending.take() {
            if requeue {
                self.queue.push_back(pending);
            }
        }
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.queue.push_front(pending);
        }
    }
}
