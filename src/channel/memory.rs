//! In-process at-least-once channel
//!
//! Each topic keeps a ready queue and a lease table. Handing a message to a
//! subscriber moves it into the lease table until it is acknowledged; a
//! negative acknowledgement or an expired lease puts it back at the head of
//! the ready queue.

use crate::channel::{Acknowledger, Channel, ChannelError, ChannelResult, Delivery, Subscription};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Longest a subscriber sleeps before re-checking for expired leases
const MAX_IDLE_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
struct Envelope {
    id: u64,
    payload: Vec<u8>,
    deliveries: u32,
}

#[derive(Debug)]
struct Lease {
    envelope: Envelope,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct TopicState {
    ready: VecDeque<Envelope>,
    leased: HashMap<u64, Lease>,
    next_id: u64,
}

impl TopicState {
    /// Moves every lease whose deadline has passed back to the ready queue
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<u64> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(lease) = self.leased.remove(&id) {
                tracing::debug!(
                    "Lease on message {} expired after {} deliveries, redelivering",
                    id,
                    lease.envelope.deliveries
                );
                self.ready.push_front(lease.envelope);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.leased.values().map(|lease| lease.deadline).min()
    }
}

#[derive(Debug, Default)]
struct Topic {
    state: Mutex<TopicState>,
    notify: Notify,
}

impl Topic {
    fn state(&self) -> MutexGuard<'_, TopicState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
struct Inner {
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    ack_deadline: Duration,
    closed: AtomicBool,
}

impl Inner {
    fn topic(&self, name: &str) -> Arc<Topic> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(topics.entry(name.to_string()).or_default())
    }
}

/// In-memory implementation of [`Channel`]
///
/// Cloning yields another handle to the same set of topics.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    inner: Arc<Inner>,
}

impl MemoryChannel {
    /// Creates a channel whose unacknowledged deliveries are redelivered after `ack_deadline`
    pub fn new(ack_deadline: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                ack_deadline,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Closes the channel; pending `next_delivery` calls return `None`
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let topics = self
            .inner
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for topic in topics.values() {
            topic.notify.notify_waiters();
        }
    }

    /// Number of messages on `topic` that are either waiting or leased
    pub fn pending(&self, topic: &str) -> usize {
        let topic = self.inner.topic(topic);
        let state = topic.state();
        state.ready.len() + state.leased.len()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> ChannelResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }

        let handle = self.inner.topic(topic);
        {
            let mut state = handle.state();
            let id = state.next_id;
            state.next_id += 1;
            state.ready.push_back(Envelope {
                id,
                payload,
                deliveries: 0,
            });
        }
        handle.notify.notify_one();
        tracing::trace!("Published message on {}", topic);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> ChannelResult<Box<dyn Subscription>> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }

        Ok(Box::new(MemorySubscription {
            inner: Arc::clone(&self.inner),
            topic: self.inner.topic(topic),
        }))
    }
}

struct MemorySubscription {
    inner: Arc<Inner>,
    topic: Arc<Topic>,
}

impl MemorySubscription {
    /// Leases the next ready message, if any
    fn try_take(&self) -> Option<Delivery> {
        let mut state = self.topic.state();
        state.reclaim_expired(Instant::now());

        let mut envelope = state.ready.pop_front()?;
        envelope.deliveries += 1;

        let delivery = Delivery::new(
            envelope.payload.clone(),
            envelope.deliveries,
            Box::new(MemoryAcker {
                topic: Arc::clone(&self.topic),
                id: envelope.id,
                delivery: envelope.deliveries,
            }),
        );

        let more_ready = !state.ready.is_empty();
        state.leased.insert(
            envelope.id,
            Lease {
                envelope,
                deadline: Instant::now() + self.inner.ack_deadline,
            },
        );
        drop(state);

        // Hand the wakeup on so a competing subscriber picks up the rest.
        if more_ready {
            self.topic.notify.notify_one();
        }
        Some(delivery)
    }

    fn idle_wait(&self) -> Duration {
        let now = Instant::now();
        self.topic
            .state()
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
            .unwrap_or(MAX_IDLE_WAIT)
            .min(MAX_IDLE_WAIT)
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_delivery(&mut self) -> Option<Delivery> {
        loop {
            if self.inner.closed.load(Ordering::SeqCst) {
                return None;
            }

            if let Some(delivery) = self.try_take() {
                return Some(delivery);
            }

            let wait = self.idle_wait();
            tokio::select! {
                _ = self.topic.notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

struct MemoryAcker {
    topic: Arc<Topic>,
    id: u64,
    delivery: u32,
}

impl MemoryAcker {
    /// Removes the lease if it still belongs to this delivery
    fn release(&self, state: &mut TopicState) -> Option<Envelope> {
        match state.leased.get(&self.id) {
            Some(lease) if lease.envelope.deliveries == self.delivery => {
                state.leased.remove(&self.id).map(|lease| lease.envelope)
            }
            _ => None,
        }
    }
}

impl Acknowledger for MemoryAcker {
    fn ack(self: Box<Self>) {
        let mut state = self.topic.state();
        if self.release(&mut state).is_none() {
            tracing::trace!(
                "Late ack for message {} (delivery {}) ignored",
                self.id,
                self.delivery
            );
        }
    }

    fn nack(self: Box<Self>) {
        let requeued = {
            let mut state = self.topic.state();
            match self.release(&mut state) {
                Some(envelope) => {
                    state.ready.push_front(envelope);
                    true
                }
                None => false,
            }
        };
        if requeued {
            self.topic.notify.notify_one();
        }
    }
}
