//! The DPE plugin. Sender and poller behind one capability interface.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::BridgeConfig;
use crate::error::{ConfigError, Result};
use crate::host::{AsicHandler, NextMoveQueue, Reject};
use crate::model::NextMoveOutMessage;
use crate::poller::{PollReport, Poller};
use crate::queue::{MessageQueue, ServiceBusQueue};
use crate::sender::{SendOutcome, Sender};
use crate::storage::{AzureBlobStore, BlobStore};

/// What the host drives: send outbound messages, poll for inbound ones.
#[async_trait]
pub trait DpeStrategy: Send + Sync {
    async fn send(&self, message: &NextMoveOutMessage) -> Result<SendOutcome>;

    async fn poll(&self) -> Result<PollReport>;
}

/// Sender and poller sharing one blob container and one queue.
pub struct DpePlugin {
    sender: Sender,
    poller: Poller,
}

impl DpePlugin {
    /// Assemble the plugin over existing clients.
    pub fn new(
        config: &BridgeConfig,
        blob_store: Arc<dyn BlobStore>,
        queue: Arc<dyn MessageQueue>,
        asic_handler: Arc<dyn AsicHandler>,
        intake: Arc<dyn NextMoveQueue>,
    ) -> Self {
        let sender = Sender::new(Arc::clone(&blob_store), Arc::clone(&queue), asic_handler);
        let poller = Poller::new(
            blob_store,
            queue,
            intake,
            config.batch_size,
            config.receive_wait,
        );
        Self { sender, poller }
    }

    /// Validate `config` and connect to Azure Blob Storage and Service Bus.
    pub fn connect(
        config: &BridgeConfig,
        asic_handler: Arc<dyn AsicHandler>,
        intake: Arc<dyn NextMoveQueue>,
    ) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "http_timeout".to_string(),
                message: format!("cannot build HTTP client: {e}"),
            })?;

        let blob_store = AzureBlobStore::from_connection_string(
            http.clone(),
            config.blob_storage_url.expose_secret(),
            config.container_name.clone(),
        )?;
        let queue = ServiceBusQueue::from_connection_string(
            http,
            config.servicebus_url.expose_secret(),
            config.queue_name.clone(),
        )?;

        info!(
            queue = %config.queue_name,
            container = %config.container_name,
            "DPE plugin connected"
        );

        Ok(Self::new(
            config,
            Arc::new(blob_store),
            Arc::new(queue),
            asic_handler,
            intake,
        ))
    }

    /// Route packaging failures to `reject`.
    pub fn with_reject(mut self, reject: Arc<dyn Reject>) -> Self {
        self.sender = self.sender.with_reject(reject);
        self
    }
}

#[async_trait]
impl DpeStrategy for DpePlugin {
    async fn send(&self, message: &NextMoveOutMessage) -> Result<SendOutcome> {
        self.sender.send(message).await
    }

    async fn poll(&self) -> Result<PollReport> {
        self.poller.poll().await
    }
}

/// Spawn a background task that calls `poll` every `interval`.
///
/// Failed polls are logged and retried on the next tick. Returns a
/// `JoinHandle` and a shutdown flag. Set the flag to stop polling.
pub fn spawn_poll_loop(
    strategy: Arc<dyn DpeStrategy>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Poll loop started, polling every {}s", interval.as_secs_f32());

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Poll loop shutting down");
                return;
            }

            match strategy.poll().await {
                Ok(report) if report.received > 0 => info!(
                    received = report.received,
                    with_attachments = report.with_attachments,
                    status_only = report.status_only,
                    "Poll finished"
                ),
                Ok(_) => {}
                Err(e) => error!("Poll failed: {e}"),
            }
        }
    });

    (handle, shutdown_flag)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::error::Error;
    use crate::harness::{DirectoryIntake, FileAsicHandler};

    struct CountingStrategy {
        polls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl DpeStrategy for CountingStrategy {
        async fn send(&self, _message: &NextMoveOutMessage) -> Result<SendOutcome> {
            Ok(SendOutcome::Published { attachment_bytes: None })
        }

        async fn poll(&self) -> Result<PollReport> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ConfigError::MissingEnvVar("simulated".into()).into());
            }
            Ok(PollReport::default())
        }
    }

    #[tokio::test]
    async fn poll_loop_keeps_polling_after_failures_and_stops_on_flag() {
        let strategy = Arc::new(CountingStrategy {
            polls: AtomicUsize::new(0),
            fail: true,
        });
        let (handle, shutdown) = spawn_poll_loop(
            Arc::clone(&strategy) as Arc<dyn DpeStrategy>,
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(55)).await;
        shutdown.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poll loop did not stop")
            .unwrap();

        assert!(strategy.polls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn connect_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig::new(
            "",
            "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=a;SharedAccessKey=b",
        );
        let result = DpePlugin::connect(
            &config,
            Arc::new(FileAsicHandler::new(None)),
            Arc::new(DirectoryIntake::new(dir.path())),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn connect_builds_azure_clients() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig::new(
            "AccountName=acct;AccountKey=a2V5",
            "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=a;SharedAccessKey=b",
        );
        let result = DpePlugin::connect(
            &config,
            Arc::new(FileAsicHandler::new(None)),
            Arc::new(DirectoryIntake::new(dir.path())),
        );
        assert!(result.is_ok());
    }
}
