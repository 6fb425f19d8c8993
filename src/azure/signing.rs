//! Shared Key and SAS signatures.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Storage REST API version sent as `x-ms-version`.
pub const STORAGE_API_VERSION: &str = "2021-08-06";

fn hmac_base64(key: &[u8], message: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// RFC 1123 date as required by `x-ms-date`.
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Inputs to a blob Shared Key signature.
pub struct BlobRequest<'a> {
    pub verb: &'a str,
    pub content_length: u64,
    pub content_type: Option<&'a str>,
    /// All `x-ms-*` headers that will be sent.
    pub ms_headers: &'a [(&'a str, &'a str)],
    /// URL path, percent-encoded exactly as sent.
    pub path: &'a str,
}

/// Build the Shared Key string-to-sign for the blob service.
///
/// Content-Length is left empty when zero; canonicalized headers are
/// lowercased and sorted by name.
pub fn blob_string_to_sign(account_name: &str, request: &BlobRequest<'_>) -> String {
    let content_length = if request.content_length == 0 {
        String::new()
    } else {
        request.content_length.to_string()
    };

    let mut headers: Vec<(String, &str)> = request
        .ms_headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
        .collect();
    headers.sort_by(|a, b| a.0.cmp(&b.0));
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();

    format!(
        "{verb}\n\n\n{content_length}\n\n{content_type}\n\n\n\n\n\n\n{canonical_headers}/{account_name}{path}",
        verb = request.verb,
        content_type = request.content_type.unwrap_or(""),
        path = request.path,
    )
}

/// `Authorization` header value for a blob request.
pub fn blob_authorization(account_name: &str, key: &[u8], request: &BlobRequest<'_>) -> String {
    let signature = hmac_base64(key, &blob_string_to_sign(account_name, request));
    format!("SharedKey {account_name}:{signature}")
}

/// Service Bus SAS token for `resource_uri`, valid until `expiry`.
pub fn servicebus_sas_token(
    resource_uri: &str,
    key_name: &str,
    key: &str,
    expiry: DateTime<Utc>,
) -> String {
    let encoded_uri = urlencoding::encode(&resource_uri.to_ascii_lowercase()).into_owned();
    let expiry = expiry.timestamp();
    let signature = hmac_base64(key.as_bytes(), &format!("{encoded_uri}\n{expiry}"));
    format!(
        "SharedAccessSignature sr={encoded_uri}&sig={}&se={expiry}&skn={key_name}",
        urlencoding::encode(&signature)
    )
}
