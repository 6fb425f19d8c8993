//! Inbound side. Drains one batch of queue notifications per call.
//!
//! Each item is processed in order:
//! 1. Deserialize the payload
//! 2. Stream the ASiC bundle into the host intake, or hand over a status only
//! 3. Delete the bundle once the intake has read all of it
//! 4. Complete the queue item
//!
//! Anything that fails before step 4 leaves the item locked; the queue
//! hands it out again once the lock lapses.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::attachment::spawn_download;
use crate::error::Result;
use crate::host::NextMoveQueue;
use crate::model::{NextMoveInMessage, ServiceIdentifier, asic_blob_name};
use crate::queue::{MessageQueue, ReceivedMessage};
use crate::storage::BlobStore;

/// Counts for one `poll` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    /// Items fetched from the queue.
    pub received: usize,
    /// Items delivered together with an ASiC bundle.
    pub with_attachments: usize,
    /// Items delivered as status only.
    pub status_only: usize,
}

/// Pulls inbound messages from the queue.
pub struct Poller {
    blob_store: Arc<dyn BlobStore>,
    queue: Arc<dyn MessageQueue>,
    intake: Arc<dyn NextMoveQueue>,
    batch_size: usize,
    receive_wait: Duration,
}

impl Poller {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        queue: Arc<dyn MessageQueue>,
        intake: Arc<dyn NextMoveQueue>,
        batch_size: usize,
        receive_wait: Duration,
    ) -> Self {
        Self {
            blob_store,
            queue,
            intake,
            batch_size,
            receive_wait,
        }
    }

    /// Process a single batch.
    ///
    /// Stops at the first failing item and returns its error; items
    /// completed before it stay completed.
    pub async fn poll(&self) -> Result<PollReport> {
        info!(queue = %self.queue.name(), "Polling for new messages..");

        let batch = self
            .queue
            .receive_batch(self.batch_size, self.receive_wait)
            .await
            .inspect_err(|e| error!(error = %e, "Receive failed"))?;

        let mut report = PollReport {
            received: batch.len(),
            ..PollReport::default()
        };
        if batch.is_empty() {
            debug!("No messages waiting");
            return Ok(report);
        }

        for item in &batch {
            info!(
                message_id = %item.message_id,
                delivery = item.delivery_count,
                "Processing message with messageId={}",
                item.message_id
            );

            let had_attachment = self.process(item).await.inspect_err(|e| {
                error!(
                    message_id = %item.message_id,
                    error = %e,
                    "Message processing failed; leaving it for redelivery"
                )
            })?;

            if had_attachment {
                report.with_attachments += 1;
            } else {
                report.status_only += 1;
            }
            info!(message_id = %item.message_id, "Message processing done.");
        }

        Ok(report)
    }

    /// Deliver one item to the host and complete it. Returns whether an
    /// attachment was delivered.
    async fn process(&self, item: &ReceivedMessage) -> Result<bool> {
        let msg: NextMoveInMessage = serde_json::from_slice(&item.body)?;
        let has_files = msg.has_files();

        if has_files {
            let filename = asic_blob_name(&msg.message_id);
            info!(blob = %filename, "Downloading file {} from blob storage..", filename);

            let (stream, completion) =
                spawn_download(Arc::clone(&self.blob_store), &msg.message_id, filename.clone());

            self.intake
                .enqueue_incoming_message(&msg.sbd, ServiceIdentifier::Dpe, stream)
                .await?;

            // The bundle is only removed once the intake has read all of it.
            let copied = completion.wait().await?;
            debug!(blob = %filename, bytes = copied, "Attachment drained");
            self.blob_store.delete_blob(&filename).await?;
        } else {
            self.intake
                .enqueue_incoming_status(&msg.sbd, ServiceIdentifier::Dpe)
                .await?;
        }

        self.queue.complete(&item.lock).await?;
        Ok(has_files)
    }
}
