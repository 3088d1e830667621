//! Shared types for the ingestion pipeline.

use serde::{Deserialize, Serialize};

/// A raw MIME payload as returned by the mailbox, plus its UID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: String,
    pub bytes: Vec<u8>,
}

/// One normalized message, the unit of the JSON hand-off document.
///
/// Older documents used `id` and `from`; both are accepted on input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    #[serde(alias = "id")]
    pub external_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(alias = "from", default)]
    pub sender: String,
    pub date: String,
    pub body: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    "text/plain".to_string()
}
