//! Blob storage for ASiC bundles. One container, keyed by blob name.

pub mod azure;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::BlobError;

pub use azure::AzureBlobStore;
pub use memory::{BlobOp, InMemoryBlobStore};

/// Chunked blob content as it arrives from the store.
pub type BlobStream = BoxStream<'static, Result<Bytes, BlobError>>;

/// A single blob container.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Container name.
    fn container(&self) -> &str;

    /// Address of a blob, for logging.
    fn blob_url(&self, name: &str) -> String;

    /// Upload `data`, replacing any existing blob with the same name.
    async fn put_blob(&self, name: &str, data: Bytes) -> Result<(), BlobError>;

    /// Open a blob for streaming download.
    async fn get_blob(&self, name: &str) -> Result<BlobStream, BlobError>;

    /// Delete a blob. Deleting a missing blob is an error.
    async fn delete_blob(&self, name: &str) -> Result<(), BlobError>;
}
