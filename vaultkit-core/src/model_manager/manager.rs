//! The in-memory item graph: collection, reference resolution (including
//! deferred "missed references"), conflict duplication, UUID alternation,
//! and observer notification (spec.md §4.3).
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::error;

use crate::crypto::new_uuid;
use crate::item::{Item, ItemReference};
use crate::model_manager::content_type::ContentTypeRegistry;
use crate::model_manager::observer::{
    ContentTypeFilter, MappingNotification, MappingSource, ObserverCallback, ObserverHandle,
    ObserverRegistry,
};
use crate::timer::{defer, Timer};

/// Broadcast payload for hosts that want a coarse-grained refresh signal
/// instead of registering a typed observer.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    ItemsMapped {
        source: MappingSource,
        uuids: Vec<String>,
    },
    UuidChanged {
        old_uuid: String,
        new_uuid: String,
    },
}

/// The result of a single `map_response_items_to_local_models` call.
#[derive(Debug, Clone, Default)]
pub struct MappingOutcome {
    pub valid_uuids: Vec<String>,
    pub deleted_uuids: Vec<String>,
    pub skipped_count: usize,
}

pub struct ModelManager {
    items_order: Vec<String>,
    items_hash: HashMap<String, Item>,
    /// `"<target_uuid>:<holder_uuid>"` entries awaiting the target's arrival.
    missed_references: BTreeMap<String, ()>,
    observers: ObserverRegistry,
    uuid_change_observers: Vec<Arc<dyn Fn(&str, &str) + Send + Sync>>,
    content_types: ContentTypeRegistry,
    acceptable_content_types: Option<HashSet<String>>,
    event_tx: broadcast::Sender<ModelEvent>,
    timer: Arc<dyn Timer>,
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("item_count", &self.items_hash.len())
            .field("missed_references", &self.missed_references.len())
            .finish_non_exhaustive()
    }
}

impl ModelManager {
    pub fn new(timer: Arc<dyn Timer>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            items_order: Vec::new(),
            items_hash: HashMap::new(),
            missed_references: BTreeMap::new(),
            observers: ObserverRegistry::default(),
            uuid_change_observers: Vec::new(),
            content_types: ContentTypeRegistry::new(),
            acceptable_content_types: None,
            event_tx,
            timer,
        }
    }

    pub fn content_type_registry(&self) -> &ContentTypeRegistry {
        &self.content_types
    }

    pub fn content_type_registry_mut(&mut self) -> &mut ContentTypeRegistry {
        &mut self.content_types
    }

    pub fn set_acceptable_content_types(&mut self, types: Option<HashSet<String>>) {
        self.acceptable_content_types = types;
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ModelEvent> {
        self.event_tx.subscribe()
    }

    pub fn register_observer(
        &mut self,
        priority: i32,
        content_types: ContentTypeFilter,
        callback: ObserverCallback,
    ) -> ObserverHandle {
        self.observers.register(priority, content_types, callback)
    }

    pub fn unregister_observer(&mut self, handle: ObserverHandle) {
        self.observers.unregister(handle);
    }

    pub fn register_uuid_change_observer(&mut self, callback: Arc<dyn Fn(&str, &str) + Send + Sync>) {
        self.uuid_change_observers.push(callback);
    }

    pub fn get(&self, uuid: &str) -> Option<&Item> {
        self.items_hash.get(uuid)
    }

    pub fn get_mut(&mut self, uuid: &str) -> Option<&mut Item> {
        self.items_hash.get_mut(uuid)
    }

    /// Items in collection order (insertion order, not sorted).
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items_order.iter().filter_map(|uuid| self.items_hash.get(uuid))
    }

    pub fn len(&self) -> usize {
        self.items_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items_hash.is_empty()
    }

    /// Insert a locally-created item into the collection (host-originated
    /// creation, not a server mapping). Does not mark it dirty; callers
    /// call `set_dirty` themselves once content is populated.
    pub fn insert_local(&mut self, item: Item) {
        if !self.items_hash.contains_key(&item.uuid) {
            self.items_order.push(item.uuid.clone());
        }
        self.items_hash.insert(item.uuid.clone(), item);
    }

    /// Remove an item from the in-memory collection only (no server
    /// round-trip; for that, mark `deleted=true` and let the sync manager
    /// pick it up as dirty).
    pub fn remove_item_locally(&mut self, uuid: &str) -> Option<Item> {
        self.items_order.retain(|u| u != uuid);
        self.items_hash.remove(uuid)
    }

    /// `getDirtyItems()`: all items with `dirty && !dummy && (!errorDecrypting || deleted)`.
    pub fn get_dirty_items(&self) -> Vec<&Item> {
        self.items()
            .filter(|i| i.dirty && !i.dummy && (!i.error_decrypting || i.deleted))
            .collect()
    }

    /// Insert already-decrypted items read from local storage (spec.md
    /// §4.4.1). A uuid already present in memory keeps its in-memory copy --
    /// a newer in-process edit always wins over stale disk state. Runs the
    /// same reference-resolution pass as server mapping.
    pub fn hydrate_local_items(&mut self, items: Vec<Item>) -> MappingOutcome {
        let mut outcome = MappingOutcome::default();
        let mut all_relevant = Vec::new();
        let mut valid = Vec::new();
        let mut touched_uuids = Vec::new();

        for item in items {
            if self.items_hash.contains_key(&item.uuid) {
                outcome.skipped_count += 1;
                continue;
            }
            let uuid = item.uuid.clone();
            self.items_order.push(uuid.clone());
            touched_uuids.push(uuid.clone());
            all_relevant.push(item.clone());
            if !item.error_decrypting {
                valid.push(item.clone());
                outcome.valid_uuids.push(uuid.clone());
            }
            self.items_hash.insert(uuid, item);
        }

        for uuid in &touched_uuids {
            self.resolve_references_for_item(uuid);
        }
        self.drain_missed_references(&touched_uuids);

        if !touched_uuids.is_empty() {
            let notification = MappingNotification {
                all_relevant_items: all_relevant,
                valid_items: valid,
                deleted_items: Vec::new(),
                source: MappingSource::LocalDatabase,
                source_key: None,
            };
            self.dispatch(notification);
            let _ = self.event_tx.send(ModelEvent::ItemsMapped {
                source: MappingSource::LocalDatabase,
                uuids: touched_uuids,
            });
        }

        outcome
    }

    /// Process a batch of incoming server-shaped JSON payloads into local
    /// items, per spec.md §4.3 "Mapping".
    pub fn map_response_items_to_local_models(
        &mut self,
        incoming: Vec<Value>,
        source: MappingSource,
        source_key: Option<String>,
    ) -> MappingOutcome {
        let mut outcome = MappingOutcome::default();
        let mut all_relevant = Vec::new();
        let mut valid = Vec::new();
        let mut deleted = Vec::new();
        let mut touched_uuids = Vec::new();

        for json in &incoming {
            let uuid = match json.get("uuid").and_then(Value::as_str) {
                Some(u) => u.to_string(),
                None => {
                    outcome.skipped_count += 1;
                    continue;
                }
            };
            let content_type = match json.get("content_type").and_then(Value::as_str) {
                Some(ct) => ct.to_string(),
                None => {
                    outcome.skipped_count += 1;
                    continue;
                }
            };
            let is_deleted = json.get("deleted").and_then(Value::as_bool).unwrap_or(false);
            let has_content = json.get("content").is_some();
            if !has_content && !is_deleted {
                outcome.skipped_count += 1;
                continue;
            }
            if let Some(acceptable) = &self.acceptable_content_types {
                if !acceptable.contains(&content_type) {
                    outcome.skipped_count += 1;
                    continue;
                }
            }

            let existing = self.items_hash.remove(&uuid);
            let mut item = match existing {
                Some(mut existing_item) => {
                    existing_item.update_from_json(json);
                    existing_item.dummy = false;
                    existing_item
                }
                None => {
                    let mut new_item = Item::new(content_type.clone());
                    new_item.uuid = uuid.clone();
                    new_item.update_from_json(json);
                    new_item
                }
            };

            if is_deleted && !item.dirty {
                touched_uuids.push(uuid.clone());
                all_relevant.push(item.clone());
                deleted.push(item.clone());
                outcome.deleted_uuids.push(uuid.clone());
                // Most content types discard content once tombstoned; a few
                // (registered with `handles_deleted_content`) keep it around
                // instead of disappearing from the collection outright.
                if self.content_types.get(&content_type).handles_deleted_content {
                    if !self.items_order.contains(&uuid) {
                        self.items_order.push(uuid.clone());
                    }
                    self.items_hash.insert(uuid, item);
                } else {
                    self.items_order.retain(|u| u != &uuid);
                }
                continue;
            }

            if is_deleted && item.dirty {
                // Offline-deleted, not yet synced: keep it around as pending-delete.
                if !self.items_order.contains(&uuid) {
                    self.items_order.push(uuid.clone());
                }
                self.items_hash.insert(uuid.clone(), item.clone());
                touched_uuids.push(uuid.clone());
                all_relevant.push(item);
                continue;
            }

            if !self.items_order.contains(&uuid) {
                self.items_order.push(uuid.clone());
            }
            touched_uuids.push(uuid.clone());
            all_relevant.push(item.clone());
            if !item.error_decrypting {
                valid.push(item.clone());
                outcome.valid_uuids.push(uuid.clone());
            }
            self.items_hash.insert(uuid, item);
        }

        // Second pass: resolve references for every item whose content was
        // present this batch, then drain any missed references whose
        // targets just arrived.
        for uuid in &touched_uuids {
            self.resolve_references_for_item(uuid);
        }
        self.drain_missed_references(&touched_uuids);

        if !touched_uuids.is_empty() {
            let notification = MappingNotification {
                all_relevant_items: all_relevant,
                valid_items: valid,
                deleted_items: deleted,
                source: source.clone(),
                source_key,
            };
            self.dispatch(notification);
            let _ = self.event_tx.send(ModelEvent::ItemsMapped {
                source,
                uuids: touched_uuids,
            });
        }

        outcome
    }

    /// Resolve forward references for `holder_uuid` against items already in
    /// the collection; targets not yet present are recorded in the missed
    /// references table.
    fn resolve_references_for_item(&mut self, holder_uuid: &str) {
        let refs: Vec<ItemReference> = match self.items_hash.get(holder_uuid) {
            Some(item) => item.references.clone(),
            None => return,
        };
        for reference in refs {
            if !self.items_hash.contains_key(&reference.uuid) {
                self.missed_references
                    .insert(format!("{}:{}", reference.uuid, holder_uuid), ());
            } else {
                self.items_hash
                    .get_mut(&reference.uuid)
                    .unwrap()
                    .referencing_objects
                    .insert(holder_uuid.to_string());
            }
        }
    }

    /// Drain missed-reference entries whose target uuid is in `arrived`,
    /// establishing the holder -> target back-edge now that the target is
    /// available. `"<target>:<holder>"` keys let us range-scan by target
    /// prefix instead of a full table walk.
    fn drain_missed_references(&mut self, arrived: &[String]) {
        for target_uuid in arrived {
            let prefix = format!("{}:", target_uuid);
            let holders: Vec<String> = self
                .missed_references
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .map(|(key, _)| key[prefix.len()..].to_string())
                .collect();

            for holder_uuid in &holders {
                self.missed_references.remove(&format!("{}{}", prefix, holder_uuid));
                if self.items_hash.contains_key(target_uuid) {
                    self.items_hash
                        .get_mut(target_uuid)
                        .unwrap()
                        .referencing_objects
                        .insert(holder_uuid.clone());
                }
            }
        }
    }

    /// `duplicateItemWithCustomContentAndAddAsConflict`: create a new item
    /// with a freshly generated UUID, copying `created_at`/`content_type`
    /// from `duplicate_of`, tagging the new content with `conflict_of`, and
    /// inheriting incoming references (marking those referrers dirty).
    pub fn duplicate_item_as_conflict(&mut self, mut content: Value, duplicate_of_uuid: &str) -> Option<String> {
        let source = match self.items_hash.get(duplicate_of_uuid) {
            Some(item) => item.clone(),
            None => {
                error!(uuid = duplicate_of_uuid, "duplicate_item_as_conflict: source item not found");
                return None;
            }
        };

        if let Value::Object(ref mut map) = content {
            map.insert("conflict_of".to_string(), Value::String(duplicate_of_uuid.to_string()));
        }

        let mut duplicate = Item::new(source.content_type.clone());
        duplicate.created_at = source.created_at;
        duplicate.content = content;
        duplicate.set_dirty(true, true);
        let new_uuid_value = duplicate.uuid.clone();

        let referrers: Vec<String> = source.referencing_objects.iter().cloned().collect();
        for referrer_uuid in &referrers {
            if let Some(referrer) = self.items_hash.get_mut(referrer_uuid) {
                let already = referrer.references.iter().any(|r| r.uuid == new_uuid_value);
                if !already {
                    referrer.references.push(ItemReference {
                        uuid: new_uuid_value.clone(),
                        content_type: duplicate.content_type.clone(),
                    });
                    referrer.set_dirty(true, true);
                }
            }
        }
        duplicate.referencing_objects = referrers.into_iter().collect();

        self.items_order.push(new_uuid_value.clone());
        self.items_hash.insert(new_uuid_value.clone(), duplicate);
        Some(new_uuid_value)
    }

    /// UUID alternation (spec.md §4.3): re-issue `old_uuid` with a fresh
    /// UUID, rewriting all reference edges and referrers, and marking the new
    /// item dirty. The old uuid is dropped from the collection outright --
    /// deleted and not dirty, so it disappears locally with no server
    /// round-trip and is no longer addressable via `get` (spec.md §8
    /// scenario 2).
    pub fn alternate_uuid(&mut self, old_uuid: &str) -> Option<String> {
        let mut item = self.items_hash.remove(old_uuid)?;
        self.items_order.retain(|u| u != old_uuid);

        let new_uuid_value = new_uuid();
        item.uuid = new_uuid_value.clone();
        item.set_dirty(true, false);

        // Rewrite referrers that pointed at the old uuid to point at the new one.
        let referrers: Vec<String> = item.referencing_objects.iter().cloned().collect();
        for referrer_uuid in &referrers {
            if let Some(referrer) = self.items_hash.get_mut(referrer_uuid) {
                for reference in referrer.references.iter_mut() {
                    if reference.uuid == old_uuid {
                        reference.uuid = new_uuid_value.clone();
                    }
                }
            }
        }

        // Rewrite the new item's forward references' back-edges from old to new.
        for reference in item.references.clone() {
            if let Some(target) = self.items_hash.get_mut(&reference.uuid) {
                target.referencing_objects.remove(old_uuid);
                target.referencing_objects.insert(new_uuid_value.clone());
            }
        }

        self.items_order.push(new_uuid_value.clone());
        self.items_hash.insert(new_uuid_value.clone(), item);

        for callback in &self.uuid_change_observers {
            callback(old_uuid, &new_uuid_value);
        }
        let _ = self.event_tx.send(ModelEvent::UuidChanged {
            old_uuid: old_uuid.to_string(),
            new_uuid: new_uuid_value.clone(),
        });

        Some(new_uuid_value)
    }

    fn dispatch(&self, notification: MappingNotification) {
        let callbacks = self.observers.matching(&notification.valid_items);
        if callbacks.is_empty() {
            return;
        }
        // One deferred task running every matching callback in the priority
        // order `matching()` returned -- racing them as separate tasks would
        // throw that ordering away (spec.md §5).
        defer(
            &self.timer,
            Box::pin(async move {
                for callback in callbacks {
                    callback(notification.clone());
                }
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TokioTimer;
    use std::sync::Mutex;

    fn manager() -> ModelManager {
        ModelManager::new(Arc::new(TokioTimer))
    }

    #[tokio::test]
    async fn mapping_skips_corrupt_entries() {
        let mut mgr = manager();
        let outcome = mgr.map_response_items_to_local_models(
            vec![serde_json::json!({"content_type": "note"})],
            MappingSource::RemoteRetrieved,
            None,
        );
        assert_eq!(outcome.skipped_count, 1);
        assert!(mgr.is_empty());
    }

    #[tokio::test]
    async fn mapping_upserts_new_item() {
        let mut mgr = manager();
        let outcome = mgr.map_response_items_to_local_models(
            vec![serde_json::json!({
                "uuid": "abc",
                "content_type": "note",
                "content": {"title": "hi", "references": []}
            })],
            MappingSource::RemoteRetrieved,
            None,
        );
        assert_eq!(outcome.valid_uuids, vec!["abc".to_string()]);
        assert_eq!(mgr.len(), 1);
        assert_eq!(mgr.get("abc").unwrap().content["title"], "hi");
    }

    #[tokio::test]
    async fn non_dirty_deletion_removes_item() {
        let mut mgr = manager();
        mgr.map_response_items_to_local_models(
            vec![serde_json::json!({"uuid": "abc", "content_type": "note", "content": {"references": []}})],
            MappingSource::RemoteRetrieved,
            None,
        );
        let outcome = mgr.map_response_items_to_local_models(
            vec![serde_json::json!({"uuid": "abc", "content_type": "note", "deleted": true})],
            MappingSource::RemoteRetrieved,
            None,
        );
        assert_eq!(outcome.deleted_uuids, vec!["abc".to_string()]);
        assert!(mgr.get("abc").is_none());
    }

    #[tokio::test]
    async fn non_dirty_deletion_keeps_content_for_registered_variant() {
        use crate::model_manager::content_type::ItemVariant;

        let mut mgr = manager();
        mgr.content_type_registry_mut().register(
            "history_marker",
            ItemVariant {
                appdata_ignore_keys: Vec::new(),
                handles_deleted_content: true,
            },
        );
        mgr.map_response_items_to_local_models(
            vec![serde_json::json!({
                "uuid": "abc",
                "content_type": "history_marker",
                "content": {"references": [], "note": "kept"}
            })],
            MappingSource::RemoteRetrieved,
            None,
        );
        let outcome = mgr.map_response_items_to_local_models(
            vec![serde_json::json!({"uuid": "abc", "content_type": "history_marker", "deleted": true})],
            MappingSource::RemoteRetrieved,
            None,
        );
        assert_eq!(outcome.deleted_uuids, vec!["abc".to_string()]);
        let item = mgr.get("abc").expect("handles_deleted_content variants stay addressable");
        assert!(item.deleted);
        assert_eq!(item.content["note"], "kept");
    }

    #[tokio::test]
    async fn dirty_deletion_is_kept_as_pending_delete() {
        let mut mgr = manager();
        mgr.map_response_items_to_local_models(
            vec![serde_json::json!({"uuid": "abc", "content_type": "note", "content": {"references": []}})],
            MappingSource::RemoteRetrieved,
            None,
        );
        mgr.get_mut("abc").unwrap().set_dirty(true, false);

        mgr.map_response_items_to_local_models(
            vec![serde_json::json!({"uuid": "abc", "content_type": "note", "deleted": true})],
            MappingSource::RemoteRetrieved,
            None,
        );

        let item = mgr.get("abc").expect("pending-delete item stays in collection");
        assert!(item.deleted);
    }

    #[tokio::test]
    async fn missed_reference_is_resolved_once_target_arrives() {
        let mut mgr = manager();
        mgr.map_response_items_to_local_models(
            vec![serde_json::json!({
                "uuid": "holder",
                "content_type": "note",
                "content": {"references": [{"uuid": "target", "content_type": "note"}]}
            })],
            MappingSource::RemoteRetrieved,
            None,
        );
        assert!(mgr.get("target").is_none());

        mgr.map_response_items_to_local_models(
            vec![serde_json::json!({
                "uuid": "target",
                "content_type": "note",
                "content": {"references": []}
            })],
            MappingSource::RemoteRetrieved,
            None,
        );

        assert!(mgr.get("target").unwrap().referencing_objects.contains("holder"));
    }

    #[tokio::test]
    async fn observer_fires_for_matching_content_type() {
        let mut mgr = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        mgr.register_observer(
            0,
            ContentTypeFilter::All,
            Arc::new(move |n: MappingNotification| {
                seen_clone.lock().unwrap().extend(n.valid_items.iter().map(|i| i.uuid.clone()));
            }),
        );

        mgr.map_response_items_to_local_models(
            vec![serde_json::json!({"uuid": "abc", "content_type": "note", "content": {"references": []}})],
            MappingSource::RemoteRetrieved,
            None,
        );

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["abc".to_string()]);
    }

    /// Dispatch defers a single task that runs every matching observer in
    /// priority order, rather than racing one task per observer -- otherwise
    /// `rt-multi-thread` gives no ordering guarantee between them.
    #[tokio::test]
    async fn observers_dispatch_in_priority_order() {
        let mut mgr = manager();
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_a = order.clone();
        mgr.register_observer(10, ContentTypeFilter::All, Arc::new(move |_n| order_a.lock().unwrap().push("second")));
        let order_b = order.clone();
        mgr.register_observer(1, ContentTypeFilter::All, Arc::new(move |_n| order_b.lock().unwrap().push("first")));

        mgr.map_response_items_to_local_models(
            vec![serde_json::json!({"uuid": "abc", "content_type": "note", "content": {"references": []}})],
            MappingSource::RemoteRetrieved,
            None,
        );

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn duplicate_as_conflict_inherits_references_and_marks_dirty() {
        let mut mgr = manager();
        mgr.map_response_items_to_local_models(
            vec![serde_json::json!({"uuid": "orig", "content_type": "note", "content": {"title": "x", "references": []}})],
            MappingSource::RemoteRetrieved,
            None,
        );
        mgr.map_response_items_to_local_models(
            vec![serde_json::json!({
                "uuid": "referrer",
                "content_type": "note",
                "content": {"references": [{"uuid": "orig", "content_type": "note"}]}
            })],
            MappingSource::RemoteRetrieved,
            None,
        );

        let dup_uuid = mgr
            .duplicate_item_as_conflict(serde_json::json!({"title": "conflicting"}), "orig")
            .unwrap();

        let dup = mgr.get(&dup_uuid).unwrap();
        assert!(dup.dirty);
        assert_eq!(dup.content["conflict_of"], "orig");

        let referrer = mgr.get("referrer").unwrap();
        assert!(referrer.dirty);
        assert!(referrer.references.iter().any(|r| r.uuid == dup_uuid));
    }

    #[tokio::test]
    async fn alternate_uuid_rewrites_edges_and_tombstones_old() {
        let mut mgr = manager();
        mgr.map_response_items_to_local_models(
            vec![serde_json::json!({"uuid": "old", "content_type": "note", "content": {"references": []}})],
            MappingSource::RemoteRetrieved,
            None,
        );
        mgr.map_response_items_to_local_models(
            vec![serde_json::json!({
                "uuid": "referrer",
                "content_type": "note",
                "content": {"references": [{"uuid": "old", "content_type": "note"}]}
            })],
            MappingSource::RemoteRetrieved,
            None,
        );

        let new_uuid_value = mgr.alternate_uuid("old").unwrap();

        assert!(mgr.get(&new_uuid_value).unwrap().dirty);
        assert!(mgr.get("old").is_none());
        let referrer = mgr.get("referrer").unwrap();
        assert!(referrer.references.iter().any(|r| r.uuid == new_uuid_value));
        assert!(!referrer.references.iter().any(|r| r.uuid == "old"));
    }

    #[test]
    fn get_dirty_items_excludes_dummy_and_errored() {
        let mut mgr = manager();
        let mut a = Item::new("note".to_string());
        a.dirty = true;
        let mut b = Item::new("note".to_string());
        b.dirty = true;
        b.dummy = true;
        let mut c = Item::new("note".to_string());
        c.dirty = true;
        c.error_decrypting = true;

        mgr.insert_local(a.clone());
        mgr.insert_local(b);
        mgr.insert_local(c);

        let dirty = mgr.get_dirty_items();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].uuid, a.uuid);
    }
}
