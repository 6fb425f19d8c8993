//! In-memory blob container, used by tests and local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::RwLock;
use tracing::debug;

use super::{BlobStore, BlobStream};
use crate::error::BlobError;

/// Default download chunk size.
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// An operation observed by the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobOp {
    Put { name: String, size: usize },
    Get { name: String },
    Delete { name: String },
}

/// Blob container held in a map.
pub struct InMemoryBlobStore {
    container: String,
    chunk_size: usize,
    blobs: RwLock<HashMap<String, Bytes>>,
    ops: RwLock<Vec<BlobOp>>,
}

impl InMemoryBlobStore {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            blobs: RwLock::new(HashMap::new()),
            ops: RwLock::new(Vec::new()),
        }
    }

    /// Serve downloads in chunks of `chunk_size` bytes.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Current content of a blob.
    pub async fn contents(&self, name: &str) -> Option<Bytes> {
        self.blobs.read().await.get(name).cloned()
    }

    /// Names of all stored blobs, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.blobs.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every operation performed so far, oldest first.
    pub async fn operations(&self) -> Vec<BlobOp> {
        self.ops.read().await.clone()
    }

    async fn record(&self, op: BlobOp) {
        self.ops.write().await.push(op);
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    fn container(&self) -> &str {
        &self.container
    }

    fn blob_url(&self, name: &str) -> String {
        format!("memory://{}/{}", self.container, name)
    }

    async fn put_blob(&self, name: &str, data: Bytes) -> Result<(), BlobError> {
        self.record(BlobOp::Put {
            name: name.to_string(),
            size: data.len(),
        })
        .await;
        self.blobs.write().await.insert(name.to_string(), data);
        Ok(())
    }

    async fn get_blob(&self, name: &str) -> Result<BlobStream, BlobError> {
        self.record(BlobOp::Get {
            name: name.to_string(),
        })
        .await;

        let data = self
            .blobs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| BlobError::NotFound {
                name: name.to_string(),
            })?;

        let chunk_size = self.chunk_size;
        let chunks: Vec<Result<Bytes, BlobError>> = (0..data.len())
            .step_by(chunk_size)
            .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
            .collect();
        debug!(blob = %name, chunks = chunks.len(), "Serving blob from memory");

        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn delete_blob(&self, name: &str) -> Result<(), BlobError> {
        self.record(BlobOp::Delete {
            name: name.to_string(),
        })
        .await;
        match self.blobs.write().await.remove(name) {
            Some(_) => Ok(()),
            None => Err(BlobError::NotFound {
                name: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(stream: BlobStream) -> Vec<Bytes> {
        stream.map(|chunk| chunk.unwrap()).collect().await
    }

    #[tokio::test]
    async fn put_overwrites() {
        let store = InMemoryBlobStore::new("testcontainer");
        store.put_blob("a", Bytes::from_static(b"one")).await.unwrap();
        store.put_blob("a", Bytes::from_static(b"two")).await.unwrap();

        assert_eq!(store.contents("a").await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(store.names().await, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn get_splits_into_chunks() {
        let store = InMemoryBlobStore::new("c").with_chunk_size(4);
        store.put_blob("b", Bytes::from_static(b"0123456789")).await.unwrap();

        let chunks = collect(store.get_blob("b").await.unwrap()).await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), b"0123456789");
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let store = InMemoryBlobStore::new("c");
        assert!(matches!(store.get_blob("nope").await, Err(BlobError::NotFound { .. })));
        assert!(matches!(store.delete_blob("nope").await, Err(BlobError::NotFound { .. })));
    }

    #[tokio::test]
    async fn operations_are_recorded_in_order() {
        let store = InMemoryBlobStore::new("c");
        store.put_blob("x", Bytes::from_static(b"abc")).await.unwrap();
        let _ = store.get_blob("x").await.unwrap();
        store.delete_blob("x").await.unwrap();

        assert_eq!(
            store.operations().await,
            vec![
                BlobOp::Put { name: "x".into(), size: 3 },
                BlobOp::Get { name: "x".into() },
                BlobOp::Delete { name: "x".into() },
            ]
        );
        assert!(store.contents("x").await.is_none());
    }
}
