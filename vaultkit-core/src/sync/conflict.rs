//! Conflict resolution for the server-authoritative `conflicts[]` channel
//! (spec.md §4.4.6). Stylistically grounded on `bae-core::sync::conflict`'s
//! last-write-wins handler: a pure function over snapshots, no I/O, called
//! once per conflicting uuid from the sync manager's response-handling step.
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::item::Item;
use crate::model_manager::ModelManager;
use crate::sync::config::SyncConfig;

/// A snapshot of a local item's content taken *before* any mapping runs in
/// the current response-handling cycle. Conflicts must be resolved against
/// this frozen view rather than the live item, because processing conflict N
/// may mutate an item referenced by conflict N+1 (spec.md §4.4.6).
#[derive(Debug, Clone)]
pub struct FrozenItem {
    pub uuid: String,
    pub content: Value,
    pub client_updated_at: DateTime<Utc>,
    pub deleted: bool,
}

/// Capture every conflicting uuid's frozen state up front, before any of
/// them are resolved.
pub fn freeze_all(model: &ModelManager, uuids: &[String]) -> Vec<FrozenItem> {
    uuids
        .iter()
        .filter_map(|uuid| {
            model.get(uuid).map(|item| FrozenItem {
                uuid: item.uuid.clone(),
                content: item.get_content_copy(),
                client_updated_at: item.client_updated_at,
                deleted: item.deleted,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Keep what's already in the model; do not map the server's content.
    KeepLocal,
    /// Let the server's content win; the caller maps it afterward.
    KeepServer,
}

/// Resolve one `sync_conflict` entry: the client attempted to save a stale
/// version of `frozen.uuid`. `server_item` is the already-decrypted server
/// copy. Returns whether the caller should proceed to map the server content
/// over the local item.
pub fn resolve_sync_conflict(
    model: &mut ModelManager,
    frozen: &FrozenItem,
    server_item: &Item,
    config: &SyncConfig,
) -> ConflictResolution {
    if frozen.deleted || server_item.deleted {
        return ConflictResolution::KeepServer;
    }

    let frozen_matches_server =
        content_equal(model, &server_item.content_type, &frozen.content, &server_item.content, config);
    if !frozen_matches_server && !references_only_diff(&frozen.content, &server_item.content) {
        let actively_edited = Utc::now()
            .signed_duration_since(frozen.client_updated_at)
            .num_seconds()
            < config.actively_edited_window_secs as i64;

        if actively_edited {
            model.duplicate_item_as_conflict(server_item.get_content_copy(), &frozen.uuid);
            return ConflictResolution::KeepLocal;
        }
        model.duplicate_item_as_conflict(frozen.content.clone(), &frozen.uuid);
        return ConflictResolution::KeepServer;
    }

    // Frozen content matched the server (or differed only by references,
    // which alone isn't a real conflict) at capture time; check whether the
    // live item mutated during the round trip.
    let current = match model.get(&frozen.uuid) {
        Some(item) => item.get_content_copy(),
        None => return ConflictResolution::KeepServer,
    };
    if content_equal(model, &server_item.content_type, &current, &server_item.content, config) {
        return ConflictResolution::KeepServer;
    }

    if references_only_diff(&current, &server_item.content) {
        ConflictResolution::KeepLocal
    } else {
        model.duplicate_item_as_conflict(current, &frozen.uuid);
        ConflictResolution::KeepServer
    }
}

/// Compare two content payloads the way [`Item::content_equals`] does,
/// extending its default ignore-key set with whatever the item's registered
/// content-type variant adds (spec.md §3, §4.3 "class map for its
/// content_type").
fn content_equal(model: &ModelManager, content_type: &str, a: &Value, b: &Value, config: &SyncConfig) -> bool {
    let variant = model.content_type_registry().get(content_type);
    let ignore_keys: Vec<&str> = variant.appdata_ignore_keys.iter().map(String::as_str).collect();

    let mut item_a = Item::new(content_type.to_string());
    item_a.content = a.clone();
    let mut item_b = Item::new(content_type.to_string());
    item_b.content = b.clone();

    item_a.content_equals(&item_b, &ignore_keys, &config.app_domain)
}

fn references_only_diff(a: &Value, b: &Value) -> bool {
    without_references(a) == without_references(b)
}

fn without_references(v: &Value) -> Value {
    let mut stripped = v.clone();
    if let Value::Object(ref mut map) = stripped {
        map.remove("references");
    }
    stripped
}

/// Resolve a `uuid_conflict` entry: the client's chosen uuid collides with an
/// existing server item. Re-issues the local item under a fresh uuid.
pub fn resolve_uuid_conflict(model: &mut ModelManager, colliding_uuid: &str) -> Option<String> {
    model.alternate_uuid(colliding_uuid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TokioTimer;
    use std::sync::Arc;

    fn manager() -> ModelManager {
        ModelManager::new(Arc::new(TokioTimer))
    }

    fn server_item(uuid: &str, content: Value, deleted: bool) -> Item {
        let mut item = Item::new("note".to_string());
        item.uuid = uuid.to_string();
        item.content = content;
        item.deleted = deleted;
        item
    }

    #[tokio::test]
    async fn deleted_either_side_keeps_server() {
        let mut mgr = manager();
        mgr.map_response_items_to_local_models(
            vec![serde_json::json!({"uuid": "a", "content_type": "note", "content": {"references": []}})],
            crate::model_manager::MappingSource::RemoteRetrieved,
            None,
        );
        let frozen = FrozenItem {
            uuid: "a".to_string(),
            content: serde_json::json!({"references": []}),
            client_updated_at: Utc::now(),
            deleted: true,
        };
        let server = server_item("a", serde_json::json!({"references": []}), false);
        let resolution = resolve_sync_conflict(&mut mgr, &frozen, &server, &SyncConfig::default());
        assert_eq!(resolution, ConflictResolution::KeepServer);
    }

    #[tokio::test]
    async fn actively_edited_keeps_local_and_duplicates_server() {
        let mut mgr = manager();
        mgr.map_response_items_to_local_models(
            vec![serde_json::json!({"uuid": "a", "content_type": "note", "content": {"title": "mine", "references": []}})],
            crate::model_manager::MappingSource::RemoteRetrieved,
            None,
        );
        let frozen = FrozenItem {
            uuid: "a".to_string(),
            content: serde_json::json!({"title": "mine", "references": []}),
            client_updated_at: Utc::now(),
            deleted: false,
        };
        let server = server_item("a", serde_json::json!({"title": "theirs", "references": []}), false);

        let resolution = resolve_sync_conflict(&mut mgr, &frozen, &server, &SyncConfig::default());
        assert_eq!(resolution, ConflictResolution::KeepLocal);
        assert_eq!(mgr.len(), 2);
        let dup = mgr.items().find(|i| i.uuid != "a").unwrap();
        assert_eq!(dup.content["conflict_of"], "a");
        assert_eq!(dup.content["title"], "theirs");
    }

    #[tokio::test]
    async fn stale_edit_keeps_server_and_duplicates_local() {
        let mut mgr = manager();
        mgr.map_response_items_to_local_models(
            vec![serde_json::json!({"uuid": "a", "content_type": "note", "content": {"title": "mine", "references": []}})],
            crate::model_manager::MappingSource::RemoteRetrieved,
            None,
        );
        let frozen = FrozenItem {
            uuid: "a".to_string(),
            content: serde_json::json!({"title": "mine", "references": []}),
            client_updated_at: Utc::now() - chrono::Duration::seconds(60),
            deleted: false,
        };
        let server = server_item("a", serde_json::json!({"title": "theirs", "references": []}), false);

        let resolution = resolve_sync_conflict(&mut mgr, &frozen, &server, &SyncConfig::default());
        assert_eq!(resolution, ConflictResolution::KeepServer);
        let dup = mgr.items().find(|i| i.uuid != "a").unwrap();
        assert_eq!(dup.content["title"], "mine");
    }

    #[tokio::test]
    async fn reference_only_drift_keeps_local_without_duplicate() {
        let mut mgr = manager();
        mgr.map_response_items_to_local_models(
            vec![serde_json::json!({"uuid": "a", "content_type": "note", "content": {"title": "same", "references": [{"uuid": "x", "content_type": "tag"}]}})],
            crate::model_manager::MappingSource::RemoteRetrieved,
            None,
        );
        let frozen = FrozenItem {
            uuid: "a".to_string(),
            content: serde_json::json!({"title": "same", "references": [{"uuid": "x", "content_type": "tag"}]}),
            client_updated_at: Utc::now() - chrono::Duration::seconds(60),
            deleted: false,
        };
        let server = server_item("a", serde_json::json!({"title": "same", "references": []}), false);

        let resolution = resolve_sync_conflict(&mut mgr, &frozen, &server, &SyncConfig::default());
        assert_eq!(resolution, ConflictResolution::KeepLocal);
        assert_eq!(mgr.len(), 1);
    }

    fn content_with_app_domain_stamp(app_domain: &str, client_updated_at: &str) -> Value {
        let mut domain = serde_json::Map::new();
        domain.insert(
            "client_updated_at".to_string(),
            Value::String(client_updated_at.to_string()),
        );
        let mut app_data = serde_json::Map::new();
        app_data.insert(app_domain.to_string(), Value::Object(domain));

        serde_json::json!({
            "title": "same",
            "references": [],
            "appData": Value::Object(app_data)
        })
    }

    #[tokio::test]
    async fn app_domain_client_updated_at_drift_is_not_a_conflict() {
        let mut mgr = manager();
        let config = SyncConfig::default();
        let content_a = content_with_app_domain_stamp(&config.app_domain, "2026-01-01T00:00:00Z");
        mgr.map_response_items_to_local_models(
            vec![serde_json::json!({"uuid": "a", "content_type": "note", "content": content_a})],
            crate::model_manager::MappingSource::RemoteRetrieved,
            None,
        );
        let frozen = FrozenItem {
            uuid: "a".to_string(),
            content: content_with_app_domain_stamp(&config.app_domain, "2026-01-01T00:00:00Z"),
            client_updated_at: Utc::now() - chrono::Duration::seconds(60),
            deleted: false,
        };
        let server = server_item(
            "a",
            content_with_app_domain_stamp(&config.app_domain, "2026-07-26T00:00:00Z"),
            false,
        );

        let resolution = resolve_sync_conflict(&mut mgr, &frozen, &server, &config);
        assert_eq!(resolution, ConflictResolution::KeepServer);
        assert_eq!(mgr.len(), 1);
    }

    #[tokio::test]
    async fn uuid_conflict_alternates_local_uuid() {
        let mut mgr = manager();
        mgr.map_response_items_to_local_models(
            vec![serde_json::json!({"uuid": "a", "content_type": "note", "content": {"references": []}})],
            crate::model_manager::MappingSource::RemoteRetrieved,
            None,
        );
        let new_uuid = resolve_uuid_conflict(&mut mgr, "a").unwrap();
        assert_ne!(new_uuid, "a");
        assert!(mgr.get(&new_uuid).unwrap().dirty);
    }
}
