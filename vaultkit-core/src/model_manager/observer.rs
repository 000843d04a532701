//! Observer fan-out: priority-ordered, content-type-filtered callbacks that
//! fire on every mapping batch, plus the coarse-grained broadcast channel for
//! hosts that just want a UI refresh signal (spec.md §4.3 "Observers").
use std::collections::HashSet;
use std::sync::Arc;

use crate::item::Item;

/// Where a batch of items being mapped came from -- passed through to
/// observers unchanged, matching spec.md's opaque `(source, sourceKey)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingSource {
    /// Rehydrated from the persistent store at startup.
    LocalDatabase,
    /// Retrieved from the server during a sync download.
    RemoteRetrieved,
    /// Confirmation of items this client just uploaded.
    RemoteSaved,
    /// Produced locally, e.g. by conflict duplication or UUID alternation.
    Component,
}

/// A single mapping batch, handed to every matching observer in priority
/// order.
#[derive(Debug, Clone)]
pub struct MappingNotification {
    /// Every item touched by this batch, including deleted ones.
    pub all_relevant_items: Vec<Item>,
    /// Non-deleted, non-errored items from this batch.
    pub valid_items: Vec<Item>,
    /// Items removed (tombstoned and not dirty) by this batch.
    pub deleted_items: Vec<Item>,
    pub source: MappingSource,
    pub source_key: Option<String>,
}

/// Which content types an observer cares about.
#[derive(Debug, Clone)]
pub enum ContentTypeFilter {
    All,
    Only(HashSet<String>),
}

impl ContentTypeFilter {
    fn matches(&self, content_type: &str) -> bool {
        match self {
            ContentTypeFilter::All => true,
            ContentTypeFilter::Only(set) => set.contains(content_type),
        }
    }

    /// An observer matches a batch if any item in it satisfies the filter.
    fn matches_any(&self, items: &[Item]) -> bool {
        match self {
            ContentTypeFilter::All => true,
            ContentTypeFilter::Only(_) => items.iter().any(|i| self.matches(&i.content_type)),
        }
    }
}

pub type ObserverCallback = Arc<dyn Fn(MappingNotification) + Send + Sync>;

#[derive(Clone)]
pub(crate) struct ObserverEntry {
    pub id: u64,
    pub priority: i32,
    pub content_types: ContentTypeFilter,
    pub callback: ObserverCallback,
}

/// Opaque handle returned on registration, used to unregister later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverHandle(pub(crate) u64);

/// The priority-ordered observer list. Kept separate from `ModelManager`
/// itself so the dispatch logic (filter + sort + fan out) has a single,
/// independently testable home.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    observers: Vec<ObserverEntry>,
    next_id: u64,
}

impl ObserverRegistry {
    pub fn register(
        &mut self,
        priority: i32,
        content_types: ContentTypeFilter,
        callback: ObserverCallback,
    ) -> ObserverHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.observers.push(ObserverEntry {
            id,
            priority,
            content_types,
            callback,
        });
        self.observers.sort_by_key(|o| o.priority);
        ObserverHandle(id)
    }

    pub fn unregister(&mut self, handle: ObserverHandle) {
        self.observers.retain(|o| o.id != handle.0);
    }

    /// Fan the notification out to every observer whose filter matches,
    /// already in priority order. Dispatch itself (deferring through the
    /// timer) is the caller's responsibility.
    pub fn matching(&self, items: &[Item]) -> Vec<ObserverCallback> {
        self.observers
            .iter()
            .filter(|o| o.content_types.matches_any(items))
            .map(|o| o.callback.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Item;

    fn sample_notification(content_type: &str) -> MappingNotification {
        let item = Item::new(content_type.to_string());
        MappingNotification {
            all_relevant_items: vec![item.clone()],
            valid_items: vec![item],
            deleted_items: vec![],
            source: MappingSource::LocalDatabase,
            source_key: None,
        }
    }

    #[test]
    fn observers_fire_in_priority_order() {
        let mut registry = ObserverRegistry::default();
        let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));

        let order_a = order.clone();
        registry.register(
            10,
            ContentTypeFilter::All,
            Arc::new(move |_n| order_a.lock().unwrap().push("second")),
        );
        let order_b = order.clone();
        registry.register(
            1,
            ContentTypeFilter::All,
            Arc::new(move |_n| order_b.lock().unwrap().push("first")),
        );

        let notification = sample_notification("note");
        for cb in registry.matching(&notification.valid_items) {
            cb(notification.clone());
        }

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn content_type_filter_excludes_non_matching_observers() {
        let mut registry = ObserverRegistry::default();
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired_clone = fired.clone();

        let mut only_tags = HashSet::new();
        only_tags.insert("tag".to_string());
        registry.register(
            0,
            ContentTypeFilter::Only(only_tags),
            Arc::new(move |_n| fired_clone.store(true, std::sync::atomic::Ordering::SeqCst)),
        );

        let notification = sample_notification("note");
        let matching = registry.matching(&notification.valid_items);
        assert!(matching.is_empty());
        assert!(!fired.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn unregister_removes_observer() {
        let mut registry = ObserverRegistry::default();
        let handle = registry.register(0, ContentTypeFilter::All, Arc::new(|_n| {}));
        registry.unregister(handle);

        let notification = sample_notification("note");
        assert!(registry.matching(&notification.valid_items).is_empty());
    }
}
