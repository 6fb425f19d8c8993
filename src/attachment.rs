//! Attachment handoff from a blob download to the host's inbound pipeline.
//!
//! A background task copies the blob into a bounded channel; the host reads
//! the other end as an [`AttachmentStream`]. When the reader reaches the end
//! of the stream it signals the poller, which only then deletes the blob.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{BlobError, Error, IntakeError};
use crate::storage::BlobStore;

/// Chunks buffered between download and consumer.
pub const ATTACHMENT_CHANNEL_CAPACITY: usize = 8;

/// Readable end of an attachment download.
///
/// Yields the blob's chunks in order. Reaching the end of the stream is the
/// consumer's confirmation that the bundle has been fully read.
pub struct AttachmentStream {
    message_id: String,
    rx: mpsc::Receiver<Result<Bytes, BlobError>>,
    drained: Option<oneshot::Sender<()>>,
    failed: bool,
}

impl AttachmentStream {
    /// Id of the message this bundle belongs to.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Read the whole bundle into memory.
    pub async fn read_to_end(mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf)
    }
}

impl Stream for AttachmentStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(e))) => {
                this.failed = true;
                Poll::Ready(Some(Err(io::Error::other(e))))
            }
            Poll::Ready(None) => {
                if !this.failed {
                    if let Some(drained) = this.drained.take() {
                        let _ = drained.send(());
                    }
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for AttachmentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentStream")
            .field("message_id", &self.message_id)
            .finish_non_exhaustive()
    }
}

/// Producer side of a download, held by the poller.
pub struct DownloadCompletion {
    message_id: String,
    drained: oneshot::Receiver<()>,
    producer: JoinHandle<Result<u64, BlobError>>,
}

impl DownloadCompletion {
    /// Wait until the blob was copied completely and the consumer read it all.
    ///
    /// Returns the number of bytes handed over.
    pub async fn wait(self) -> Result<u64, Error> {
        let copied = match self.producer.await {
            Ok(result) => result?,
            Err(e) => {
                return Err(BlobError::Download {
                    name: self.message_id,
                    reason: format!("download task failed: {e}"),
                }
                .into());
            }
        };

        self.drained.await.map_err(|_| IntakeError::NotDrained {
            message_id: self.message_id.clone(),
        })?;

        Ok(copied)
    }
}

/// Start copying `blob_name` into a new [`AttachmentStream`].
pub fn spawn_download(
    store: Arc<dyn BlobStore>,
    message_id: &str,
    blob_name: String,
) -> (AttachmentStream, DownloadCompletion) {
    let (tx, rx) = mpsc::channel(ATTACHMENT_CHANNEL_CAPACITY);
    let (drained_tx, drained_rx) = oneshot::channel();

    let producer = tokio::spawn(async move { copy_blob(store, blob_name, tx).await });

    let stream = AttachmentStream {
        message_id: message_id.to_string(),
        rx,
        drained: Some(drained_tx),
        failed: false,
    };
    let completion = DownloadCompletion {
        message_id: message_id.to_string(),
        drained: drained_rx,
        producer,
    };
    (stream, completion)
}

async fn copy_blob(
    store: Arc<dyn BlobStore>,
    name: String,
    tx: mpsc::Sender<Result<Bytes, BlobError>>,
) -> Result<u64, BlobError> {
    let mut source = match store.get_blob(&name).await {
        Ok(source) => source,
        Err(e) => {
            let _ = tx
                .send(Err(BlobError::Download {
                    name: name.clone(),
                    reason: e.to_string(),
                }))
                .await;
            return Err(e);
        }
    };

    let mut copied = 0u64;
    while let Some(chunk) = source.next().await {
        match chunk {
            Ok(bytes) => {
                copied += bytes.len() as u64;
                if tx.send(Ok(bytes)).await.is_err() {
                    return Err(BlobError::Download {
                        name,
                        reason: "attachment stream dropped by consumer".into(),
                    });
                }
            }
            Err(e) => {
                let _ = tx
                    .send(Err(BlobError::Download {
                        name: name.clone(),
                        reason: e.to_string(),
                    }))
                    .await;
                return Err(e);
            }
        }
    }

    debug!(blob = %name, bytes = copied, "Blob copied to attachment stream");
    Ok(copied)
}
