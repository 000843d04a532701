//! Wire DTOs for `POST {server}/items/sync` (spec.md §4.4.3/§6.3). These are
//! plain serde structs with no crypto awareness -- the sync manager decrypts
//! `content`/`enc_item_key` before/after crossing this boundary.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vaultkit_common::ConflictKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireItem {
    pub uuid: String,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc_item_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_params: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRequestBody {
    pub api_version: String,
    pub items: Vec<WireItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_token: Option<String>,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_integrity: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnsavedError {
    pub tag: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnsavedEntry {
    pub item: WireItem,
    pub error: UnsavedError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConflictEntry {
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    #[serde(default)]
    pub server_item: Option<WireItem>,
    #[serde(default)]
    pub unsaved_item: Option<WireItem>,
}

impl ConflictEntry {
    /// The uuid this conflict concerns, whichever side carried it.
    pub fn uuid(&self) -> Option<&str> {
        self.server_item
            .as_ref()
            .or(self.unsaved_item.as_ref())
            .map(|w| w.uuid.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SyncResponseBody {
    #[serde(default)]
    pub saved_items: Vec<WireItem>,
    #[serde(default)]
    pub retrieved_items: Vec<WireItem>,
    #[serde(default)]
    pub conflicts: Vec<ConflictEntry>,
    #[serde(default)]
    pub unsaved: Vec<UnsavedEntry>,
    #[serde(default)]
    pub sync_token: Option<String>,
    #[serde(default)]
    pub cursor_token: Option<String>,
    #[serde(default)]
    pub integrity_hash: Option<String>,
}
