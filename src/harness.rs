//! File-backed host collaborators for running the bridge on its own.
//!
//! `FileAsicHandler` serves a prebuilt bundle instead of sealing one;
//! `DirectoryIntake` writes whatever arrives into an inbox directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

use crate::attachment::AttachmentStream;
use crate::error::{IntakeError, PackagingError};
use crate::host::{AsicHandler, AsicStream, NextMoveQueue, Reject};
use crate::model::{NextMoveOutMessage, ServiceIdentifier, StandardBusinessDocument};

/// Serves a bundle read from disk.
pub struct FileAsicHandler {
    bundle: Option<PathBuf>,
}

impl FileAsicHandler {
    pub fn new(bundle: Option<PathBuf>) -> Self {
        Self { bundle }
    }
}

#[async_trait]
impl AsicHandler for FileAsicHandler {
    async fn create_encrypted_asic(
        &self,
        message: &NextMoveOutMessage,
        reject: &dyn Reject,
    ) -> AsicStream {
        let Some(path) = &self.bundle else {
            reject.reject(PackagingError::Failed {
                message_id: message.message_id.clone(),
                reason: "message has files but no bundle was given".into(),
            });
            return futures::stream::empty::<std::io::Result<Bytes>>().boxed();
        };

        match tokio::fs::read(path).await {
            Ok(data) => {
                futures::stream::once(async move { Ok::<_, std::io::Error>(Bytes::from(data)) })
                    .boxed()
            }
            Err(e) => {
                reject.reject(PackagingError::Failed {
                    message_id: message.message_id.clone(),
                    reason: format!("cannot read {}: {e}", path.display()),
                });
                futures::stream::empty::<std::io::Result<Bytes>>().boxed()
            }
        }
    }
}

/// Writes inbound messages into a directory.
///
/// A message with attachment becomes `{id}.sbd.json` plus `{id}-asic.zip`;
/// a status becomes `{instance id}.status.json`.
pub struct DirectoryIntake {
    dir: PathBuf,
}

impl DirectoryIntake {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    async fn write_json(&self, name: &str, sbd: &StandardBusinessDocument) -> Result<(), IntakeError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(sbd).map_err(|e| IntakeError::Rejected {
            message_id: name.to_string(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(self.dir.join(name), json).await?;
        Ok(())
    }
}

/// Ids come from the remote producer; only plain file stems may touch the inbox.
fn file_stem(id: &str) -> Result<&str, IntakeError> {
    let unsafe_id = id.is_empty()
        || id.starts_with('.')
        || id.contains(['/', '\\', '\0'])
        || id.contains("..");
    if unsafe_id {
        return Err(IntakeError::Rejected {
            message_id: id.to_string(),
            reason: "id is not usable as a file name".into(),
        });
    }
    Ok(id)
}

/// Instance identifier from the SBD header, if present.
fn instance_identifier(sbd: &StandardBusinessDocument) -> Option<&str> {
    sbd.pointer("/standardBusinessDocumentHeader/documentIdentification/instanceIdentifier")
        .and_then(|v| v.as_str())
}

#[async_trait]
impl NextMoveQueue for DirectoryIntake {
    async fn enqueue_incoming_message(
        &self,
        sbd: &StandardBusinessDocument,
        service: ServiceIdentifier,
        mut asic: AttachmentStream,
    ) -> Result<(), IntakeError> {
        let message_id = file_stem(asic.message_id())?.to_string();
        self.write_json(&format!("{message_id}.sbd.json"), sbd).await?;

        let path = self.dir.join(format!("{message_id}-asic.zip"));
        let mut file = tokio::fs::File::create(&path).await?;
        let mut written = 0usize;
        while let Some(chunk) = asic.next().await {
            let chunk = chunk?;
            written += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        info!(
            message_id = %message_id,
            service = %service,
            bytes = written,
            path = %path.display(),
            "Stored inbound message"
        );
        Ok(())
    }

    async fn enqueue_incoming_status(
        &self,
        sbd: &StandardBusinessDocument,
        service: ServiceIdentifier,
    ) -> Result<(), IntakeError> {
        let id = match instance_identifier(sbd) {
            Some(id) => file_stem(id)?.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        self.write_json(&format!("{id}.status.json"), sbd).await?;
        info!(id = %id, service = %service, "Stored inbound status");
        Ok(())
    }
}
