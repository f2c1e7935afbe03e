//! Channel abstraction for coordinator/worker messaging
//!
//! This module models the transport as an at-least-once publish/subscribe
//! channel with named topics:
//! - a message is delivered one or more times, with no ordering guarantee
//! - a delivery must be acknowledged to stop redelivery
//! - a negative acknowledgement forces immediate redelivery
//!
//! `MemoryChannel` is the in-process implementation used by the binary and
//! the tests; other transports plug in through the `Channel` trait.

mod memory;
pub mod messages;

pub use memory::MemoryChannel;
pub use messages::{
    decode, encode, worker_task_topic, HeartbeatMessage, IndexDocument, MessageError,
    ResultMessage, ResultStatus, TaskMessage, DASHBOARD_TOPIC, HEARTBEATS_TOPIC, INDEX_TOPIC,
    RESULTS_TOPIC, TASKS_TOPIC,
};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Errors raised at the transport boundary
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel is closed")]
    Closed,

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] MessageError),
}

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Settles a single delivery with the transport
pub trait Acknowledger: Send {
    /// Removes the message from redelivery
    fn ack(self: Box<Self>);

    /// Requests immediate redelivery
    fn nack(self: Box<Self>);
}

/// One delivery of a message
///
/// Dropping a delivery without settling it leaves the message leased until the
/// transport's deadline expires, after which it is redelivered.
pub struct Delivery {
    payload: Vec<u8>,
    delivery_count: u32,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(payload: Vec<u8>, delivery_count: u32, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            payload,
            delivery_count,
            acker,
        }
    }

    /// Raw message body
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// How many times this message has been handed out, starting at 1
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    pub fn ack(self) {
        self.acker.ack();
    }

    pub fn nack(self) {
        self.acker.nack();
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("bytes", &self.payload.len())
            .field("delivery_count", &self.delivery_count)
            .finish()
    }
}

/// A consumer attached to one topic
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next delivery
    ///
    /// Returns `None` once the channel has been closed.
    async fn next_delivery(&mut self) -> Option<Delivery>;
}

/// At-least-once publish/subscribe transport
#[async_trait]
pub trait Channel: Send + Sync {
    /// Publishes a payload on a topic
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> ChannelResult<()>;

    /// Attaches a consumer to a topic
    ///
    /// Consumers on the same topic compete: each message goes to one of them.
    async fn subscribe(&self, topic: &str) -> ChannelResult<Box<dyn Subscription>>;
}

/// Serializes `message` as JSON and publishes it
pub async fn publish_json<T: Serialize + Sync>(
    channel: &dyn Channel,
    topic: &str,
    message: &T,
) -> ChannelResult<()> {
    let payload = encode(message)?;
    channel.publish(topic, payload).await
}
