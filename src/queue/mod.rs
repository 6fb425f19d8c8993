//! Message queue with peek-lock receive semantics.

pub mod memory;
pub mod service_bus;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::QueueError;

pub use memory::InMemoryQueue;
pub use service_bus::ServiceBusQueue;

/// Handle on a peek-locked item, needed to complete it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken {
    /// Id of the locked message.
    pub message_id: String,
    /// Broker-issued lock token.
    pub token: String,
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

/// A peek-locked queue item.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub body: Bytes,
    pub lock: LockToken,
    /// How many times this item has been handed out, including this one.
    pub delivery_count: u32,
}

/// A single queue, as seen by one sender and one peek-lock receiver.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Queue name.
    fn name(&self) -> &str;

    /// Publish `body` tagged with `message_id`.
    async fn publish(&self, message_id: &str, body: Bytes) -> Result<(), QueueError>;

    /// Peek-lock up to `max_count` items, waiting at most `wait` for the
    /// first one. Returns an empty batch when nothing arrived in time.
    async fn receive_batch(
        &self,
        max_count: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Complete a locked item, removing it from the queue.
    async fn complete(&self, lock: &LockToken) -> Result<(), QueueError>;
}
