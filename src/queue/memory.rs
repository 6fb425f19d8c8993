//! In-memory peek-lock queue, used by tests and local runs.
//!
//! Items stay in the queue while locked. A lock that is not completed
//! before `lock_duration` elapses is dropped and the item is handed out
//! again by a later receive.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::{LockToken, MessageQueue, ReceivedMessage};
use crate::error::QueueError;

/// Default peek-lock duration.
const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Entry {
    message_id: String,
    body: Bytes,
    delivery_count: u32,
    lock: Option<(String, Instant)>,
}

impl Entry {
    fn is_visible(&self, now: Instant) -> bool {
        match &self.lock {
            Some((_, until)) => *until <= now,
            None => true,
        }
    }
}

/// A receive call as issued by a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub max_count: usize,
    pub wait: Duration,
}

/// Peek-lock queue held in memory.
pub struct InMemoryQueue {
    name: String,
    lock_duration: Duration,
    entries: Mutex<VecDeque<Entry>>,
    receives: Mutex<Vec<ReceiveRequest>>,
    published: Mutex<Vec<String>>,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lock_duration: DEFAULT_LOCK_DURATION,
            entries: Mutex::new(VecDeque::new()),
            receives: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    pub fn with_lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = lock_duration;
        self
    }

    /// Items still in the queue, locked or not.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Ids of every published message, in publish order.
    pub async fn published_ids(&self) -> Vec<String> {
        self.published.lock().await.clone()
    }

    /// Every receive request issued so far.
    pub async fn receive_requests(&self) -> Vec<ReceiveRequest> {
        self.receives.lock().await.clone()
    }

    /// Lock up to `max_count` visible items. Returns the batch and, when it
    /// is empty, the instant the earliest held lock runs out.
    async fn take_visible(&self, max_count: usize) -> (Vec<ReceivedMessage>, Option<Instant>) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let mut batch = Vec::new();

        for entry in entries.iter_mut() {
            if batch.len() >= max_count {
                break;
            }
            if !entry.is_visible(now) {
                continue;
            }
            if entry.lock.is_some() {
                debug!(message_id = %entry.message_id, "Lock expired, redelivering");
            }
            let token = Uuid::new_v4().to_string();
            entry.lock = Some((token.clone(), now + self.lock_duration));
            entry.delivery_count += 1;
            batch.push(ReceivedMessage {
                message_id: entry.message_id.clone(),
                body: entry.body.clone(),
                lock: LockToken {
                    message_id: entry.message_id.clone(),
                    token,
                },
                delivery_count: entry.delivery_count,
            });
        }

        let next_expiry = if batch.is_empty() {
            entries
                .iter()
                .filter_map(|e| e.lock.as_ref().map(|(_, until)| *until))
                .min()
        } else {
            None
        };

        (batch, next_expiry)
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, message_id: &str, body: Bytes) -> Result<(), QueueError> {
        self.entries.lock().await.push_back(Entry {
            message_id: message_id.to_string(),
            body,
            delivery_count: 0,
            lock: None,
        });
        self.published.lock().await.push(message_id.to_string());
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive_batch(
        &self,
        max_count: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.receives.lock().await.push(ReceiveRequest { max_count, wait });

        let deadline = Instant::now() + wait;
        loop {
            // Register interest before looking so a concurrent publish is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (batch, next_expiry) = self.take_visible(max_count).await;
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let wake_at = next_expiry.map_or(deadline, |expiry| expiry.min(deadline));
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn complete(&self, lock: &LockToken) -> Result<(), QueueError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let position = entries.iter().position(|e| {
            matches!(&e.lock, Some((token, until)) if *token == lock.token && *until > now)
        });

        match position {
            Some(index) => {
                entries.remove(index);
                Ok(())
            }
            None => Err(QueueError::LockLost {
                lock_token: lock.token.clone(),
            }),
        }
    }
}
