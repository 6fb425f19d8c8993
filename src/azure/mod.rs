//! Azure connection strings and request signing shared by the blob and
//! Service Bus transports.

pub mod signing;

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::ConfigError;

/// Well-known Azurite account used by `UseDevelopmentStorage=true`.
const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// Split `Key=Value;Key=Value` into a map with lowercased keys.
///
/// Only the first `=` separates key from value; SAS tokens and base64 keys
/// contain `=` themselves.
fn parse_pairs(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut pairs = HashMap::new();
    for segment in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (key, value) = segment.split_once('=').ok_or_else(|| {
            ConfigError::ConnectionString(format!("segment without '=': {}", redact(segment)))
        })?;
        pairs.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }
    if pairs.is_empty() {
        return Err(ConfigError::ConnectionString("empty connection string".into()));
    }
    Ok(pairs)
}

fn redact(segment: &str) -> String {
    segment.chars().take(12).collect::<String>() + "…"
}

/// Credential used against the blob service.
#[derive(Clone)]
pub enum StorageCredential {
    /// Account key, already base64-decoded.
    SharedKey { account_name: String, key: Vec<u8> },
    /// SAS query string without the leading `?`.
    Sas(String),
}

impl std::fmt::Debug for StorageCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SharedKey { account_name, .. } => f
                .debug_struct("SharedKey")
                .field("account_name", account_name)
                .finish_non_exhaustive(),
            Self::Sas(_) => f.write_str("Sas(..)"),
        }
    }
}

/// Parsed Azure Storage connection string.
#[derive(Debug, Clone)]
pub struct StorageConnection {
    /// Blob endpoint without trailing slash.
    pub blob_endpoint: String,
    pub credential: StorageCredential,
}

impl StorageConnection {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let pairs = parse_pairs(raw)?;

        if pairs
            .get("usedevelopmentstorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            return Ok(Self {
                blob_endpoint: DEV_BLOB_ENDPOINT.to_string(),
                credential: StorageCredential::SharedKey {
                    account_name: DEV_ACCOUNT_NAME.to_string(),
                    key: decode_key(DEV_ACCOUNT_KEY)?,
                },
            });
        }

        let account_name = pairs.get("accountname").cloned();

        let blob_endpoint = match (pairs.get("blobendpoint"), &account_name) {
            (Some(endpoint), _) => endpoint.trim_end_matches('/').to_string(),
            (None, Some(account)) => {
                let protocol = pairs
                    .get("defaultendpointsprotocol")
                    .map(String::as_str)
                    .unwrap_or("https");
                let suffix = pairs
                    .get("endpointsuffix")
                    .map(String::as_str)
                    .unwrap_or("core.windows.net");
                format!("{protocol}://{account}.blob.{suffix}")
            }
            (None, None) => {
                return Err(ConfigError::ConnectionString(
                    "needs AccountName or BlobEndpoint".into(),
                ));
            }
        };

        let credential = if let Some(sas) = pairs.get("sharedaccesssignature") {
            StorageCredential::Sas(sas.trim_start_matches('?').to_string())
        } else {
            let key = pairs.get("accountkey").ok_or_else(|| {
                ConfigError::ConnectionString("needs AccountKey or SharedAccessSignature".into())
            })?;
            let account_name = account_name.ok_or_else(|| {
                ConfigError::ConnectionString("AccountKey requires AccountName".into())
            })?;
            StorageCredential::SharedKey {
                account_name,
                key: decode_key(key)?,
            }
        };

        Ok(Self {
            blob_endpoint,
            credential,
        })
    }
}

fn decode_key(key: &str) -> Result<Vec<u8>, ConfigError> {
    STANDARD
        .decode(key)
        .map_err(|e| ConfigError::ConnectionString(format!("AccountKey is not base64: {e}")))
}

/// Credential used against Service Bus.
#[derive(Clone)]
pub enum ServiceBusCredential {
    SharedKey { key_name: String, key: String },
    /// A complete `SharedAccessSignature sr=…` token.
    Sas(String),
}

impl std::fmt::Debug for ServiceBusCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SharedKey { key_name, .. } => f
                .debug_struct("SharedKey")
                .field("key_name", key_name)
                .finish_non_exhaustive(),
            Self::Sas(_) => f.write_str("Sas(..)"),
        }
    }
}

/// Parsed Azure Service Bus connection string.
#[derive(Debug, Clone)]
pub struct ServiceBusConnection {
    /// `https://{namespace}.servicebus.windows.net`, no trailing slash.
    pub endpoint: String,
    pub credential: ServiceBusCredential,
    pub entity_path: Option<String>,
}

impl ServiceBusConnection {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let pairs = parse_pairs(raw)?;

        let endpoint = pairs
            .get("endpoint")
            .ok_or_else(|| ConfigError::ConnectionString("needs Endpoint".into()))?;
        let endpoint = match endpoint.split_once("://") {
            Some(("sb", host)) => format!("https://{host}"),
            Some(_) => endpoint.clone(),
            None => format!("https://{endpoint}"),
        };
        let endpoint = endpoint.trim_end_matches('/').to_string();

        let credential = if let Some(sas) = pairs.get("sharedaccesssignature") {
            ServiceBusCredential::Sas(sas.clone())
        } else {
            match (pairs.get("sharedaccesskeyname"), pairs.get("sharedaccesskey")) {
                (Some(key_name), Some(key)) => ServiceBusCredential::SharedKey {
                    key_name: key_name.clone(),
                    key: key.clone(),
                },
                _ => {
                    return Err(ConfigError::ConnectionString(
                        "needs SharedAccessKeyName and SharedAccessKey".into(),
                    ));
                }
            }
        };

        Ok(Self {
            endpoint,
            credential,
            entity_path: pairs.get("entitypath").cloned(),
        })
    }
}
