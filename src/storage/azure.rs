//! Azure Blob Storage over the REST API.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Method, RequestBuilder, StatusCode};
use tracing::debug;

use super::{BlobStore, BlobStream};
use crate::azure::signing::{self, BlobRequest, STORAGE_API_VERSION};
use crate::azure::{StorageConnection, StorageCredential};
use crate::error::{BlobError, ConfigError};

/// A single container in an Azure storage account.
pub struct AzureBlobStore {
    client: reqwest::Client,
    connection: StorageConnection,
    container: String,
}

impl AzureBlobStore {
    pub fn new(
        client: reqwest::Client,
        connection: StorageConnection,
        container: impl Into<String>,
    ) -> Self {
        Self {
            client,
            connection,
            container: container.into(),
        }
    }

    /// Build from an Azure Storage connection string.
    pub fn from_connection_string(
        client: reqwest::Client,
        connection_string: &str,
        container: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let connection = StorageConnection::parse(connection_string)?;
        Ok(Self::new(client, connection, container))
    }

    /// Percent-encoded URL path of a blob, relative to the account endpoint.
    fn blob_path(&self, name: &str) -> String {
        format!(
            "/{}/{}",
            urlencoding::encode(&self.container),
            urlencoding::encode(name)
        )
    }

    /// Build a signed request against a blob.
    fn request(
        &self,
        method: Method,
        name: &str,
        content_length: u64,
        content_type: Option<&str>,
        extra_headers: &[(&str, &str)],
    ) -> RequestBuilder {
        let path = self.blob_path(name);
        let date = signing::http_date(chrono::Utc::now());

        let mut ms_headers: Vec<(&str, &str)> =
            vec![("x-ms-date", date.as_str()), ("x-ms-version", STORAGE_API_VERSION)];
        ms_headers.extend_from_slice(extra_headers);

        let url = match &self.connection.credential {
            StorageCredential::Sas(sas) => {
                format!("{}{}?{}", self.connection.blob_endpoint, path, sas)
            }
            StorageCredential::SharedKey { .. } => {
                format!("{}{}", self.connection.blob_endpoint, path)
            }
        };

        let mut builder = self.client.request(method.clone(), url);
        for (header, value) in &ms_headers {
            builder = builder.header(*header, *value);
        }
        if let Some(content_type) = content_type {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
        }

        if let StorageCredential::SharedKey { account_name, key } = &self.connection.credential {
            // Path-style endpoints (Azurite) carry the account in the URL path too.
            let endpoint_path = endpoint_path(&self.connection.blob_endpoint);
            let signed_path = format!("{endpoint_path}{path}");
            let authorization = signing::blob_authorization(
                account_name,
                key,
                &BlobRequest {
                    verb: method.as_str(),
                    content_length,
                    content_type,
                    ms_headers: &ms_headers,
                    path: &signed_path,
                },
            );
            builder = builder.header(reqwest::header::AUTHORIZATION, authorization);
        }

        builder
    }

    async fn send(
        &self,
        op: &str,
        name: &str,
        builder: RequestBuilder,
    ) -> Result<reqwest::Response, BlobError> {
        let response = builder.send().await.map_err(|e| BlobError::RequestFailed {
            op: op.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(BlobError::NotFound {
                name: name.to_string(),
            });
        }
        let body = response.text().await.unwrap_or_default();
        Err(BlobError::Status {
            op: op.to_string(),
            name: name.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

/// Path component of an endpoint URL, without trailing slash.
fn endpoint_path(endpoint: &str) -> &str {
    let after_scheme = endpoint.split_once("://").map_or(endpoint, |(_, rest)| rest);
    match after_scheme.find('/') {
        Some(idx) => after_scheme[idx..].trim_end_matches('/'),
        None => "",
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    fn container(&self) -> &str {
        &self.container
    }

    fn blob_url(&self, name: &str) -> String {
        format!("{}{}", self.connection.blob_endpoint, self.blob_path(name))
    }

    async fn put_blob(&self, name: &str, data: Bytes) -> Result<(), BlobError> {
        let length = data.len() as u64;
        let builder = self
            .request(
                Method::PUT,
                name,
                length,
                Some("application/octet-stream"),
                &[("x-ms-blob-type", "BlockBlob")],
            )
            .body(data);

        self.send("put", name, builder).await?;
        debug!(blob = %name, size = length, "Blob uploaded");
        Ok(())
    }

    async fn get_blob(&self, name: &str) -> Result<BlobStream, BlobError> {
        let builder = self.request(Method::GET, name, 0, None, &[]);
        let response = self.send("get", name, builder).await?;

        let blob_name = name.to_string();
        let stream = response.bytes_stream().map(move |chunk| {
            chunk.map_err(|e| BlobError::Download {
                name: blob_name.clone(),
                reason: e.to_string(),
            })
        });
        Ok(stream.boxed())
    }

    async fn delete_blob(&self, name: &str) -> Result<(), BlobError> {
        let builder = self.request(Method::DELETE, name, 0, None, &[]);
        self.send("delete", name, builder).await?;
        debug!(blob = %name, "Blob deleted");
        Ok(())
    }
}
