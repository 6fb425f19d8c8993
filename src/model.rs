//! NextMove message types as they travel over the queue.
//!
//! The envelope (`sbd`) is owned by the host and carried as opaque JSON;
//! fields the bridge does not know about are kept in `extra` so a message
//! survives a serialize/deserialize round trip unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The host's Standard Business Document envelope.
pub type StandardBusinessDocument = serde_json::Value;

/// NextMove service identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceIdentifier {
    Dpo,
    Dpv,
    Dpe,
    Dpf,
    Dpi,
    Dpfio,
    Dph,
    Unknown,
}

impl fmt::Display for ServiceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Dpo => "DPO",
            Self::Dpv => "DPV",
            Self::Dpe => "DPE",
            Self::Dpf => "DPF",
            Self::Dpi => "DPI",
            Self::Dpfio => "DPFIO",
            Self::Dph => "DPH",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// A file attached to a business message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessMessageFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub primary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dokumentnummer: Option<i32>,
}

impl BusinessMessageFile {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            identifier: None,
            filename: filename.into(),
            mimetype: None,
            title: None,
            primary: false,
            dokumentnummer: None,
        }
    }
}

/// An outbound message handed to the bridge by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextMoveOutMessage {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_identifier: Option<ServiceIdentifier>,
    pub sbd: StandardBusinessDocument,
    #[serde(default)]
    pub files: Vec<BusinessMessageFile>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl NextMoveOutMessage {
    pub fn new(message_id: impl Into<String>, sbd: StandardBusinessDocument) -> Self {
        Self {
            message_id: message_id.into(),
            conversation_id: None,
            process_identifier: None,
            sender_identifier: None,
            receiver_identifier: None,
            service_identifier: Some(ServiceIdentifier::Dpe),
            sbd,
            files: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Attach a file.
    pub fn with_file(mut self, file: BusinessMessageFile) -> Self {
        self.files.push(file);
        self
    }

    /// Whether an ASiC bundle has to travel with this message.
    pub fn has_files(&self) -> bool {
        !self.files.is_empty()
    }
}

/// An inbound message read back from the queue.
///
/// `files` may be missing or `null` on the wire; both mean no attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextMoveInMessage {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_identifier: Option<ServiceIdentifier>,
    pub sbd: StandardBusinessDocument,
    #[serde(default)]
    pub files: Option<Vec<BusinessMessageFile>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl NextMoveInMessage {
    pub fn has_files(&self) -> bool {
        self.files.as_ref().is_some_and(|files| !files.is_empty())
    }
}

/// Blob name of the ASiC bundle belonging to a message.
pub fn asic_blob_name(message_id: &str) -> String {
    format!("{message_id}-asic.zip")
}
