//! Outbound side: upload the ASiC bundle, then publish the message.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tracing::{error, info};

use crate::error::{PackagingError, Result};
use crate::host::{AsicHandler, LogReject, Reject, TrackingReject};
use crate::model::{NextMoveOutMessage, asic_blob_name};
use crate::queue::MessageQueue;
use crate::storage::BlobStore;

/// What happened to a message handed to [`Sender::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message was published; `attachment_bytes` is the size of the
    /// uploaded bundle, if there was one.
    Published { attachment_bytes: Option<usize> },
    /// Packaging failed and was reported through the reject callback.
    /// Nothing was uploaded or published.
    Rejected,
}

/// Publishes outbound messages.
pub struct Sender {
    blob_store: Arc<dyn BlobStore>,
    queue: Arc<dyn MessageQueue>,
    asic_handler: Arc<dyn AsicHandler>,
    reject: Arc<dyn Reject>,
}

impl Sender {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        queue: Arc<dyn MessageQueue>,
        asic_handler: Arc<dyn AsicHandler>,
    ) -> Self {
        Self {
            blob_store,
            queue,
            asic_handler,
            reject: Arc::new(LogReject),
        }
    }

    /// Report packaging failures to `reject` instead of only logging them.
    pub fn with_reject(mut self, reject: Arc<dyn Reject>) -> Self {
        self.reject = reject;
        self
    }

    /// Send one message.
    ///
    /// When the message has files its bundle is uploaded first; the queue
    /// publish only happens once that upload succeeded.
    pub async fn send(&self, message: &NextMoveOutMessage) -> Result<SendOutcome> {
        info!(message_id = %message.message_id, "Sending message with messageId={}", message.message_id);

        let mut attachment_bytes = None;
        if message.has_files() {
            let Some(asic) = self.package(message).await else {
                return Ok(SendOutcome::Rejected);
            };

            let filename = asic_blob_name(&message.message_id);
            let url = self.blob_store.blob_url(&filename);
            info!(
                blob = %filename,
                size = asic.len(),
                "Uploading file with name={}, size={} to {}",
                filename,
                asic.len(),
                url
            );
            attachment_bytes = Some(asic.len());
            self.blob_store
                .put_blob(&filename, asic)
                .await
                .inspect_err(|e| error!(blob = %filename, error = %e, "Upload failed"))?;
            info!(blob = %filename, "Upload done..");
        }

        let payload = serde_json::to_vec(message)?;
        self.queue
            .publish(&message.message_id, Bytes::from(payload))
            .await
            .inspect_err(|e| {
                error!(message_id = %message.message_id, error = %e, "Publish failed")
            })?;
        info!(message_id = %message.message_id, "Message with id={} sent", message.message_id);

        Ok(SendOutcome::Published { attachment_bytes })
    }

    /// Build and read the encrypted bundle. `None` if packaging was rejected.
    async fn package(&self, message: &NextMoveOutMessage) -> Option<Bytes> {
        let reject = TrackingReject::new(self.reject.as_ref());
        let mut stream = self
            .asic_handler
            .create_encrypted_asic(message, &reject)
            .await;

        let mut buf = BytesMut::new();
        while !reject.fired() {
            match stream.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                Some(Err(e)) => reject.reject(PackagingError::Stream {
                    message_id: message.message_id.clone(),
                    source: e,
                }),
                None => break,
            }
        }

        if reject.fired() {
            error!(message_id = %message.message_id, "ASiC packaging rejected; message not sent");
            return None;
        }
        Some(buf.freeze())
    }
}
