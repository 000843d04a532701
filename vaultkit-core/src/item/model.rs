//! The item entity: content JSON, dirty/error flags, reference edges, and
//! content equality. See spec.md §3/§4.2.
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::keys::ItemKey;
use crate::crypto::new_uuid;
use vaultkit_common::Predicate;

/// A reference edge: `{uuid, content_type}` pointing at another item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReference {
    pub uuid: String,
    pub content_type: String,
}

/// The default ignore-set applied to `appData[AppDomain]` when comparing
/// content for equality; `client_updated_at` is always ignored per the
/// invariant in spec.md §3.
pub const DEFAULT_APP_DATA_IGNORE_KEYS: &[&str] = &["client_updated_at"];

#[derive(Debug, Clone)]
pub struct Item {
    pub uuid: String,
    pub content_type: String,
    pub content: Value,
    /// Raw wire-format content string as received from the server or disk,
    /// still encrypted. `None` for items that were constructed locally and
    /// not yet encrypted for upload.
    pub content_raw: Option<String>,
    pub enc_item_key: Option<String>,
    pub auth_hash: Option<String>,
    pub auth_params: Option<Value>,
    /// The per-item key this item was last encrypted/decrypted under. Not
    /// part of the wire payload; reused on the next dirty sync so re-encrypt
    /// doesn't need to mint a fresh key every round.
    pub item_key: Option<ItemKey>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub client_updated_at: DateTime<Utc>,

    pub deleted: bool,
    pub dirty: bool,
    pub dirty_count: u32,
    pub dirtied_date: Option<DateTime<Utc>>,

    pub error_decrypting: bool,
    pub error_decrypting_value_changed: bool,

    /// Excluded from public queries; used during local hydration batching.
    pub dummy: bool,

    pub references: Vec<ItemReference>,
    /// In-memory back-edges; never persisted. The uuid set of items that
    /// reference this one.
    pub referencing_objects: BTreeSet<String>,

    /// Not on the wire. Bumped on every mutation; used by the Model Manager
    /// to detect whether an item changed between the start and end of an
    /// observer mapping batch (the "frozen content" check in sync conflict
    /// handling).
    pub revision: u64,
}

impl Item {
    pub fn new(content_type: String) -> Self {
        let now = Utc::now();
        Self {
            uuid: new_uuid(),
            content_type,
            content: serde_json::json!({ "references": [] }),
            content_raw: None,
            enc_item_key: None,
            auth_hash: None,
            auth_params: None,
            item_key: None,
            created_at: now,
            updated_at: now,
            client_updated_at: now,
            deleted: false,
            dirty: false,
            dirty_count: 0,
            dirtied_date: None,
            error_decrypting: false,
            error_decrypting_value_changed: false,
            dummy: false,
            references: Vec::new(),
            referencing_objects: BTreeSet::new(),
            revision: 0,
        }
    }

    /// Merge a server-shaped payload. Top-level metadata is copied directly;
    /// `content` is deep-merged (arrays replaced wholesale, not merged
    /// element-wise); client-only flags are copied only when explicitly
    /// present in `json`.
    pub fn update_from_json(&mut self, json: &Value) {
        if let Some(v) = json.get("content_type").and_then(Value::as_str) {
            self.content_type = v.to_string();
        }
        if let Some(v) = json.get("created_at").and_then(Value::as_str) {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(v) {
                self.created_at = parsed.with_timezone(&Utc);
            }
        }
        if let Some(v) = json.get("updated_at").and_then(Value::as_str) {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(v) {
                self.updated_at = parsed.with_timezone(&Utc);
            }
        }
        if let Some(v) = json.get("deleted").and_then(Value::as_bool) {
            self.deleted = v;
        }
        if let Some(v) = json.get("enc_item_key").and_then(Value::as_str) {
            self.enc_item_key = Some(v.to_string());
        }
        if let Some(v) = json.get("auth_hash").and_then(Value::as_str) {
            self.auth_hash = Some(v.to_string());
        }
        if let Some(v) = json.get("auth_params") {
            self.auth_params = Some(v.clone());
        }
        if let Some(v) = json.get("content") {
            deep_merge(&mut self.content, v);
            self.references = parse_references(&self.content);
        }

        // Client-only flags: copied only when explicitly present.
        if let Some(v) = json.get("dirty").and_then(Value::as_bool) {
            self.dirty = v;
        }
        if let Some(v) = json.get("dirtyCount").and_then(Value::as_u64) {
            self.dirty_count = v as u32;
        }
        if let Some(v) = json.get("dirtiedDate").and_then(Value::as_str) {
            self.dirtied_date = DateTime::parse_from_rfc3339(v)
                .ok()
                .map(|d| d.with_timezone(&Utc));
        }
        if let Some(v) = json.get("errorDecrypting").and_then(Value::as_bool) {
            self.error_decrypting = v;
        }
        if let Some(v) = json.get("dummy").and_then(Value::as_bool) {
            self.dummy = v;
        }

        self.revision += 1;
    }

    /// Set the dirty flag, incrementing `dirty_count` (or resetting to 0
    /// when clearing), stamping `dirtied_date = now`, and optionally
    /// `client_updated_at = now`.
    pub fn set_dirty(&mut self, dirty: bool, update_client_date: bool) {
        self.dirty = dirty;
        if dirty {
            self.dirty_count += 1;
        } else {
            self.dirty_count = 0;
        }
        self.dirtied_date = Some(Utc::now());
        if dirty && update_client_date {
            self.client_updated_at = Utc::now();
        }
        self.revision += 1;
    }

    /// Add a forward reference to `target_uuid`/`target_content_type`,
    /// suppressing duplicates, and record the back-edge on `target`.
    pub fn add_item_as_relationship(&mut self, target: &mut Item) {
        let already_present = self.references.iter().any(|r| r.uuid == target.uuid);
        if !already_present {
            self.references.push(ItemReference {
                uuid: target.uuid.clone(),
                content_type: target.content_type.clone(),
            });
            sync_references_into_content(self);
        }
        target.referencing_objects.insert(self.uuid.clone());
    }

    /// Remove a forward reference to `target_uuid`, keeping the target's
    /// back-edge set consistent.
    pub fn remove_item_as_relationship(&mut self, target: &mut Item) {
        self.references.retain(|r| r.uuid != target.uuid);
        sync_references_into_content(self);
        target.referencing_objects.remove(&self.uuid);
    }

    /// Evaluate a compound predicate expression against this item's content
    /// (see spec.md §4.6). `content` is passed as the predicate root, with
    /// `uuid`/`content_type` merged in so predicates can match on identity.
    pub fn satisfies_predicate(&self, predicate: &Predicate) -> bool {
        let mut root = self.content.clone();
        if let Value::Object(ref mut map) = root {
            map.insert("uuid".to_string(), Value::String(self.uuid.clone()));
            map.insert(
                "content_type".to_string(),
                Value::String(self.content_type.clone()),
            );
        }
        predicate.evaluate(&root)
    }

    /// Compare content for equality, ignoring the given top-level keys plus
    /// the configured `appData[AppDomain]` ignore-keys (always including
    /// `client_updated_at`).
    pub fn content_equals(&self, other: &Item, ignore_keys: &[&str], app_domain: &str) -> bool {
        let a = normalized_content_for_comparison(&self.content, ignore_keys, app_domain);
        let b = normalized_content_for_comparison(&other.content, ignore_keys, app_domain);
        a == b
    }

    /// Clone the content map by value. `content` is always treated as a
    /// value type, never an aliased mutable reference.
    pub fn get_content_copy(&self) -> Value {
        self.content.clone()
    }
}

fn sync_references_into_content(item: &mut Item) {
    let refs: Vec<Value> = item
        .references
        .iter()
        .map(|r| serde_json::json!({ "uuid": r.uuid, "content_type": r.content_type }))
        .collect();
    if let Value::Object(ref mut map) = item.content {
        map.insert("references".to_string(), Value::Array(refs));
    }
}

fn parse_references(content: &Value) -> Vec<ItemReference> {
    content
        .get("references")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| {
                    let uuid = v.get("uuid")?.as_str()?.to_string();
                    let content_type = v.get("content_type")?.as_str()?.to_string();
                    Some(ItemReference { uuid, content_type })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Deep-merge `incoming` into `target`: objects merge key-by-key
/// recursively, arrays are replaced wholesale (never merged element-wise),
/// scalars overwrite.
fn deep_merge(target: &mut Value, incoming: &Value) {
    match (target, incoming) {
        (Value::Object(target_map), Value::Object(incoming_map)) => {
            for (key, incoming_val) in incoming_map {
                match target_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, incoming_val),
                    None => {
                        target_map.insert(key.clone(), incoming_val.clone());
                    }
                }
            }
        }
        (target_slot, incoming_val) => {
            *target_slot = incoming_val.clone();
        }
    }
}

fn normalized_content_for_comparison(content: &Value, ignore_keys: &[&str], app_domain: &str) -> Value {
    let mut normalized = content.clone();
    if let Value::Object(ref mut map) = normalized {
        for key in ignore_keys {
            map.remove(*key);
        }
        if let Some(Value::Object(app_data)) = map.get_mut("appData") {
            if let Some(Value::Object(domain)) = app_data.get_mut(app_domain) {
                for key in DEFAULT_APP_DATA_IGNORE_KEYS {
                    domain.remove(*key);
                }
            }
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_from_json_deep_merges_content_and_replaces_arrays() {
        let mut item = Item::new("note".to_string());
        item.content = serde_json::json!({
            "title": "old",
            "tags": ["a", "b"],
            "nested": { "x": 1, "y": 2 },
            "references": []
        });

        item.update_from_json(&serde_json::json!({
            "content": {
                "title": "new",
                "tags": ["c"],
                "nested": { "y": 3 }
            }
        }));

        assert_eq!(item.content["title"], "new");
        assert_eq!(item.content["tags"], serde_json::json!(["c"]));
        assert_eq!(item.content["nested"]["x"], 1);
        assert_eq!(item.content["nested"]["y"], 3);
    }

    #[test]
    fn update_from_json_only_copies_client_flags_when_present() {
        let mut item = Item::new("note".to_string());
        item.dirty = true;
        item.dirty_count = 5;

        item.update_from_json(&serde_json::json!({ "content_type": "note" }));

        assert!(item.dirty);
        assert_eq!(item.dirty_count, 5);
    }

    #[test]
    fn set_dirty_increments_count_and_stamps_date() {
        let mut item = Item::new("note".to_string());
        item.set_dirty(true, true);
        assert!(item.dirty);
        assert_eq!(item.dirty_count, 1);
        assert!(item.dirtied_date.is_some());

        item.set_dirty(true, false);
        assert_eq!(item.dirty_count, 2);

        item.set_dirty(false, false);
        assert!(!item.dirty);
        assert_eq!(item.dirty_count, 0);
    }

    #[test]
    fn add_relationship_is_idempotent_and_sets_back_edge() {
        let mut a = Item::new("note".to_string());
        let mut b = Item::new("tag".to_string());

        a.add_item_as_relationship(&mut b);
        a.add_item_as_relationship(&mut b);

        assert_eq!(a.references.len(), 1);
        assert!(b.referencing_objects.contains(&a.uuid));
    }

    #[test]
    fn remove_relationship_clears_both_edges() {
        let mut a = Item::new("note".to_string());
        let mut b = Item::new("tag".to_string());
        a.add_item_as_relationship(&mut b);

        a.remove_item_as_relationship(&mut b);

        assert!(a.references.is_empty());
        assert!(!b.referencing_objects.contains(&a.uuid));
    }

    #[test]
    fn content_equals_ignores_client_updated_at_in_app_domain() {
        let mut a = Item::new("note".to_string());
        a.content = serde_json::json!({
            "title": "same",
            "references": [],
            "appData": { "org.example": { "client_updated_at": "2026-01-01T00:00:00Z" } }
        });
        let mut b = Item::new("note".to_string());
        b.content = serde_json::json!({
            "title": "same",
            "references": [],
            "appData": { "org.example": { "client_updated_at": "2026-07-26T00:00:00Z" } }
        });

        assert!(a.content_equals(&b, &[], "org.example"));
    }

    #[test]
    fn content_equals_detects_real_differences() {
        let mut a = Item::new("note".to_string());
        a.content = serde_json::json!({ "title": "a", "references": [] });
        let mut b = Item::new("note".to_string());
        b.content = serde_json::json!({ "title": "b", "references": [] });

        assert!(!a.content_equals(&b, &[], "org.example"));
    }

    #[test]
    fn get_content_copy_is_independent_of_original() {
        let mut item = Item::new("note".to_string());
        item.content = serde_json::json!({ "title": "original", "references": [] });

        let mut copy = item.get_content_copy();
        copy["title"] = serde_json::json!("mutated");

        assert_eq!(item.content["title"], "original");
    }
}
