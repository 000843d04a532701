//! Singleton Manager: enforcement of "at most one item per predicate"
//! invariants across concurrent creations on multiple replicas (spec.md
//! §4.5). Driven by the host calling [`SingletonManager::resolve_all`] after
//! local-data-load and after every `sync:completed`, mirroring how
//! `bae-core::library::manager::LibraryManager` re-derives aggregate state
//! from its own `sync:completed`-equivalent hooks rather than tracking it
//! incrementally.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::item::Item;
use crate::model_manager::ModelManager;
use vaultkit_common::Predicate;

/// Invoked when a registered predicate currently has zero matches (and this
/// isn't the initial load) or when its sole match failed to decrypt. The
/// host is expected to create a fresh item satisfying the predicate.
pub type CreateBlock = Arc<dyn Fn() + Send + Sync>;

/// Invoked when duplicate singletons were found and the losers were marked
/// deleted + dirty; the host schedules a sync (typically by spawning a task
/// that calls `SyncManager::sync`) rather than this module awaiting one
/// directly, so resolution never blocks on network I/O.
pub type SyncTrigger = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingletonHandle(u64);

struct Registration {
    id: u64,
    predicate: Predicate,
    create_block: CreateBlock,
    /// Set once `create_block` has fired for a zero-match resolution and not
    /// yet cleared, to stop the next sync's resolution pass from racing a
    /// second create before the first one's item has synced back.
    pending_create: AtomicBool,
    /// The uuid currently believed to satisfy this predicate uniquely.
    /// Invalidated (set to `None`) by the uuid-change observer so the next
    /// resolution re-derives it under the item's new identity.
    resolved: StdMutex<Option<String>>,
}

pub struct SingletonManager {
    model: Arc<AsyncMutex<ModelManager>>,
    trigger_sync: SyncTrigger,
    registrations: Arc<StdMutex<Vec<Arc<Registration>>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for SingletonManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingletonManager").finish_non_exhaustive()
    }
}

impl SingletonManager {
    /// Constructs the manager and installs a uuid-change observer on `model`
    /// so a singleton's cached resolution survives UUID alternation (spec.md
    /// §4.3/§4.5). Async because registering the observer needs the model
    /// lock.
    pub async fn new(model: Arc<AsyncMutex<ModelManager>>, trigger_sync: SyncTrigger) -> Self {
        let registrations: Arc<StdMutex<Vec<Arc<Registration>>>> = Arc::new(StdMutex::new(Vec::new()));
        let observed = registrations.clone();
        model.lock().await.register_uuid_change_observer(Arc::new(move |old_uuid: &str, new_uuid: &str| {
            for reg in observed.lock().unwrap().iter() {
                let mut resolved = reg.resolved.lock().unwrap();
                if resolved.as_deref() == Some(old_uuid) {
                    debug!(old_uuid, new_uuid, "singleton uuid changed, invalidating cache");
                    *resolved = None;
                }
            }
        }));

        Self {
            model,
            trigger_sync,
            registrations,
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a uniqueness predicate and the block that creates a fresh
    /// item satisfying it when none exists.
    pub fn register(&self, predicate: Predicate, create_block: CreateBlock) -> SingletonHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.registrations.lock().unwrap().push(Arc::new(Registration {
            id,
            predicate,
            create_block,
            pending_create: AtomicBool::new(false),
            resolved: StdMutex::new(None),
        }));
        SingletonHandle(id)
    }

    pub fn unregister(&self, handle: SingletonHandle) {
        self.registrations.lock().unwrap().retain(|r| r.id != handle.0);
    }

    /// The uuid currently believed to uniquely satisfy `handle`'s predicate,
    /// if a resolution pass has found exactly one live match since the last
    /// invalidation.
    pub fn resolved(&self, handle: SingletonHandle) -> Option<String> {
        self.registrations
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == handle.0)
            .and_then(|r| r.resolved.lock().unwrap().clone())
    }

    /// Re-derive every registered singleton against the current collection
    /// (spec.md §4.5). Call after local-data-load completes and after every
    /// `sync:completed`. `is_initial_load` suppresses the zero-match
    /// create-on-demand path during the very first load, matching spec.md's
    /// "0 matches, not the initial load".
    pub async fn resolve_all(&self, is_initial_load: bool) {
        let registrations: Vec<Arc<Registration>> = self.registrations.lock().unwrap().clone();
        for registration in &registrations {
            self.resolve_one(registration, is_initial_load).await;
        }
    }

    async fn resolve_one(&self, registration: &Registration, is_initial_load: bool) {
        let mut needs_sync = false;
        {
            let mut model = self.model.lock().await;
            let matches: Vec<Item> = model
                .items()
                .filter(|item| !item.dummy && item.satisfies_predicate(&registration.predicate))
                .cloned()
                .collect();

            match matches.len() {
                0 => {
                    *registration.resolved.lock().unwrap() = None;
                    if !is_initial_load && !registration.pending_create.load(Ordering::SeqCst) {
                        registration.pending_create.store(true, Ordering::SeqCst);
                        (registration.create_block)();
                    }
                }
                1 => {
                    let winner = &matches[0];
                    if winner.error_decrypting {
                        model.remove_item_locally(&winner.uuid);
                        registration.pending_create.store(true, Ordering::SeqCst);
                        *registration.resolved.lock().unwrap() = None;
                        (registration.create_block)();
                    } else {
                        registration.pending_create.store(false, Ordering::SeqCst);
                        *registration.resolved.lock().unwrap() = Some(winner.uuid.clone());
                    }
                }
                _ => {
                    let winner_uuid = pick_winner(&matches).uuid.clone();
                    for item in &matches {
                        if item.uuid != winner_uuid {
                            if let Some(loser) = model.get_mut(&item.uuid) {
                                loser.deleted = true;
                                loser.set_dirty(true, true);
                            }
                        }
                    }
                    registration.pending_create.store(false, Ordering::SeqCst);
                    *registration.resolved.lock().unwrap() = Some(winner_uuid);
                    needs_sync = true;
                }
            }
        }

        if needs_sync {
            (self.trigger_sync)();
        }
    }
}

/// Ascending `created_at`, with decryption-errored matches sunk to the end
/// regardless of their timestamp (spec.md §4.5 "sort by ascending
/// created_at, errored items sink").
fn pick_winner(matches: &[Item]) -> &Item {
    matches
        .iter()
        .min_by(|a, b| match (a.error_decrypting, b.error_decrypting) {
            (false, false) => a.created_at.cmp(&b.created_at),
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
        })
        .expect("matches is non-empty in the >=2 branch")
}
