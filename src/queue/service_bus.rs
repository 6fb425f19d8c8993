//! Azure Service Bus queue over the REST API.
//!
//! Publish is `POST {queue}/messages`, peek-lock is
//! `POST {queue}/messages/head?timeout=N` and complete is
//! `DELETE {queue}/messages/{messageId}/{lockToken}`. The REST API hands out
//! one message per call, so a batch is a run of calls bounded by the wait.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{LockToken, MessageQueue, ReceivedMessage};
use crate::azure::signing;
use crate::azure::{ServiceBusConnection, ServiceBusCredential};
use crate::error::{ConfigError, QueueError};

/// Lifetime of generated SAS tokens.
const TOKEN_TTL_SECS: i64 = 3600;

/// Server-side wait used for follow-up receives once a batch has started.
const FOLLOW_UP_WAIT_SECS: u64 = 1;

const ATOM_ENTRY: &str = "application/atom+xml;type=entry;charset=utf-8";

/// The `BrokerProperties` header of a peek-locked message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BrokerProperties {
    lock_token: String,
    message_id: String,
    #[serde(default)]
    delivery_count: Option<u32>,
}

/// One Service Bus queue.
pub struct ServiceBusQueue {
    client: reqwest::Client,
    connection: ServiceBusConnection,
    queue: String,
}

impl ServiceBusQueue {
    pub fn new(
        client: reqwest::Client,
        connection: ServiceBusConnection,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            client,
            connection,
            queue: queue.into(),
        }
    }

    /// Build from a Service Bus connection string.
    ///
    /// An `EntityPath` in the connection string must name the same queue.
    pub fn from_connection_string(
        client: reqwest::Client,
        connection_string: &str,
        queue: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let connection = ServiceBusConnection::parse(connection_string)?;
        let queue = queue.into();
        if let Some(entity) = &connection.entity_path {
            if !entity.eq_ignore_ascii_case(&queue) {
                return Err(ConfigError::InvalidValue {
                    key: "EntityPath".to_string(),
                    message: format!("connection string targets {entity}, expected {queue}"),
                });
            }
        }
        Ok(Self::new(client, connection, queue))
    }

    fn queue_url(&self) -> String {
        format!("{}/{}", self.connection.endpoint, urlencoding::encode(&self.queue))
    }

    fn authorization(&self) -> String {
        match &self.connection.credential {
            ServiceBusCredential::Sas(token) => token.clone(),
            ServiceBusCredential::SharedKey { key_name, key } => signing::servicebus_sas_token(
                &self.queue_url(),
                key_name,
                key,
                Utc::now() + chrono::Duration::seconds(TOKEN_TTL_SECS),
            ),
        }
    }

    async fn check(op: &str, response: reqwest::Response) -> Result<reqwest::Response, QueueError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(QueueError::Status {
            op: op.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    /// Peek-lock a single message, waiting up to `wait_secs` server-side.
    async fn receive_one(&self, wait_secs: u64) -> Result<Option<ReceivedMessage>, QueueError> {
        let url = format!("{}/messages/head?timeout={wait_secs}", self.queue_url());
        let response = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .timeout(Duration::from_secs(wait_secs) + Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| QueueError::RequestFailed {
                op: "receive".into(),
                reason: e.to_string(),
            })?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let response = Self::check("receive", response).await?;

        let properties = response
            .headers()
            .get("BrokerProperties")
            .ok_or_else(|| QueueError::InvalidBrokerProperties("header missing".into()))?
            .to_str()
            .map_err(|e| QueueError::InvalidBrokerProperties(e.to_string()))?;
        let properties = parse_broker_properties(properties)?;

        let body = response.bytes().await.map_err(|e| QueueError::RequestFailed {
            op: "receive".into(),
            reason: e.to_string(),
        })?;

        Ok(Some(ReceivedMessage {
            message_id: properties.message_id.clone(),
            body,
            lock: LockToken {
                message_id: properties.message_id,
                token: properties.lock_token,
            },
            delivery_count: properties.delivery_count.unwrap_or(1),
        }))
    }
}

/// Server-side timeouts are whole seconds; never round a wait down to zero.
fn whole_secs_rounded_up(wait: Duration) -> u64 {
    let secs = wait.as_millis().div_ceil(1000).max(1);
    u64::try_from(secs).unwrap_or(u64::MAX)
}

fn parse_broker_properties(raw: &str) -> Result<BrokerProperties, QueueError> {
    serde_json::from_str(raw).map_err(|e| QueueError::InvalidBrokerProperties(e.to_string()))
}

#[async_trait]
impl MessageQueue for ServiceBusQueue {
    fn name(&self) -> &str {
        &self.queue
    }

    async fn publish(&self, message_id: &str, body: Bytes) -> Result<(), QueueError> {
        let broker_properties = serde_json::json!({ "MessageId": message_id }).to_string();
        let response = self
            .client
            .post(format!("{}/messages", self.queue_url()))
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .header(reqwest::header::CONTENT_TYPE, ATOM_ENTRY)
            .header("BrokerProperties", broker_properties)
            .body(body)
            .send()
            .await
            .map_err(|e| QueueError::RequestFailed {
                op: "publish".into(),
                reason: e.to_string(),
            })?;
        Self::check("publish", response).await?;
        debug!(message_id = %message_id, queue = %self.queue, "Published to Service Bus");
        Ok(())
    }

    async fn receive_batch(
        &self,
        max_count: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let deadline = Instant::now() + wait;
        let mut batch = Vec::new();

        while batch.len() < max_count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            // The first receive always goes out, even once the deadline passed.
            if remaining.is_zero() && !batch.is_empty() {
                break;
            }
            let remaining_secs = whole_secs_rounded_up(remaining);
            let wait_secs = if batch.is_empty() {
                remaining_secs
            } else {
                remaining_secs.min(FOLLOW_UP_WAIT_SECS)
            };

            match self.receive_one(wait_secs).await? {
                Some(message) => batch.push(message),
                None => break,
            }
        }

        Ok(batch)
    }

    async fn complete(&self, lock: &LockToken) -> Result<(), QueueError> {
        let url = format!(
            "{}/messages/{}/{}",
            self.queue_url(),
            urlencoding::encode(&lock.message_id),
            urlencoding::encode(&lock.token)
        );
        let response = self
            .client
            .delete(url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(|e| QueueError::RequestFailed {
                op: "complete".into(),
                reason: e.to_string(),
            })?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                warn!(message_id = %lock.message_id, "Lock expired before completion");
                Err(QueueError::LockLost {
                    lock_token: lock.token.clone(),
                })
            }
            _ => Self::check("complete", response).await.map(|_| ()),
        }
    }
}
