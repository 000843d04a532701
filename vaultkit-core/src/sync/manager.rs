//! Sync Manager: local hydration, upload batching, the request/response
//! cycle, conflict resolution, integrity verification, and the offline path
//! (spec.md §4.4). Concurrency is gated by plain flags behind a
//! `std::sync::Mutex` rather than a scheduler lock, per spec.md §5 ("mutual
//! exclusion is achieved entirely through boolean flags, not locks, because
//! the runtime is single-threaded") -- `tokio::sync::Mutex` around the model
//! itself is the one exception, needed because the model is shared with the
//! host across `.await` points.
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot, Mutex as AsyncMutex};
use tracing::{debug, warn};

use crate::crypto::keys::{AccountKeys, ItemKey};
use crate::external::{HttpTransport, ItemStore, KeyValueStore, StorageError, TransportError};
use crate::item::transformer::decrypt_items_batch;
use crate::item::{encrypt_item_content, Item};
use crate::model_manager::{MappingSource, ModelManager};
use crate::sync::conflict::{self, ConflictResolution, FrozenItem};
use crate::sync::config::SyncConfig;
use crate::sync::wire::{ConflictEntry, SyncRequestBody, SyncResponseBody, WireItem};
use crate::timer::Timer;
use vaultkit_common::ConflictKind;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("sync is locked")]
    Locked,
    #[error("no account key material available (host key request handler returned nothing)")]
    MissingCredentials,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Transform(#[from] crate::item::TransformError),
    #[error("malformed server response: {0}")]
    MalformedResponse(String),
}

/// Per-operation credentials supplied by the host through a
/// `key_request_handler` callback (spec.md §5), fetched fresh every sync
/// operation so the host may rotate or unlock them transparently.
#[derive(Clone)]
pub struct SyncCredentials {
    pub server: String,
    pub account_keys: AccountKeys,
    pub auth_params: Value,
}

/// What the host's key-info query currently reports. `Offline` still
/// carries account keys -- the vault may be unlocked locally with no
/// network reachable, per spec.md §4.4.8.
#[derive(Clone)]
pub enum KeyInfo {
    Online(SyncCredentials),
    Offline { account_keys: AccountKeys },
}

impl KeyInfo {
    pub fn account_keys(&self) -> &AccountKeys {
        match self {
            KeyInfo::Online(c) => &c.account_keys,
            KeyInfo::Offline { account_keys } => account_keys,
        }
    }
}

pub type KeyRequestHandler = Arc<dyn Fn() -> Option<KeyInfo> + Send + Sync>;
pub type ContentTypeLoadPriority = Arc<dyn Fn(&str) -> i32 + Send + Sync>;
pub type IncrementalLoadCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Events emitted by the core (spec.md §6.5).
#[derive(Debug, Clone)]
pub enum SyncEvent {
    LocalDataIncrementalLoad { current: usize, total: usize },
    LocalDataLoaded,
    Completed { retrieved_uuids: Vec<String>, saved_uuids: Vec<String> },
    Error { message: String },
    TakingTooLong,
    MajorDataChange,
    SessionInvalid,
    EnterOutOfSync,
    ExitOutOfSync,
}

#[derive(Default)]
struct SyncState {
    sync_op_in_progress: bool,
    perform_sync_again_on_completion: bool,
    queued_callbacks: Vec<oneshot::Sender<Result<(), String>>>,
    sync_token: Option<String>,
    cursor_token: Option<String>,
    discordance_count: u32,
    out_of_sync: bool,
}

struct SyncRoundOutcome {
    needs_more_sync: bool,
    has_cursor: bool,
}

/// Self-cancelling watchdog (spec.md §4.4.4): polls every
/// `watchdog_poll_interval_ms`; if more than `watchdog_timeout_ms` elapses
/// from the start of the sync, emits `sync:taking-too-long` once. Aborts its
/// background task on drop, so a completed sync cancels it deterministically.
struct Watchdog {
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct SyncManager {
    config: SyncConfig,
    model: Arc<AsyncMutex<ModelManager>>,
    kv: Arc<dyn KeyValueStore>,
    items_store: Arc<dyn ItemStore>,
    transport: Arc<dyn HttpTransport>,
    timer: Arc<dyn Timer>,
    key_request_handler: KeyRequestHandler,
    content_type_load_priority: Option<ContentTypeLoadPriority>,
    event_tx: broadcast::Sender<SyncEvent>,
    load_lock: AsyncMutex<()>,
    initial_data_loaded: AtomicBool,
    locked: AtomicBool,
    state: StdMutex<SyncState>,
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager").finish_non_exhaustive()
    }
}

impl SyncManager {
    pub fn new(
        config: SyncConfig,
        model: Arc<AsyncMutex<ModelManager>>,
        kv: Arc<dyn KeyValueStore>,
        items_store: Arc<dyn ItemStore>,
        transport: Arc<dyn HttpTransport>,
        timer: Arc<dyn Timer>,
        key_request_handler: KeyRequestHandler,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            model,
            kv,
            items_store,
            transport,
            timer,
            key_request_handler,
            content_type_load_priority: None,
            event_tx,
            load_lock: AsyncMutex::new(()),
            initial_data_loaded: AtomicBool::new(false),
            locked: AtomicBool::new(false),
            state: StdMutex::new(SyncState::default()),
        }
    }

    pub fn set_content_type_load_priority(&mut self, priority: ContentTypeLoadPriority) {
        self.content_type_load_priority = Some(priority);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Manual kill-switch used during sign-out transitions (spec.md §4.4.4).
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    fn content_type_priority(&self, content_type: &str) -> i32 {
        self.content_type_load_priority
            .as_ref()
            .map(|f| f(content_type))
            .unwrap_or(0)
    }

    /// `loadLocalItems` (spec.md §4.4.1): idempotent and memoized via
    /// `load_lock` -- a second concurrent caller simply waits for the first
    /// to finish, then observes `initial_data_loaded` already set and
    /// returns immediately.
    pub async fn load_local_items(
        &self,
        batch_size: usize,
        incremental_callback: Option<IncrementalLoadCallback>,
    ) -> Result<(), SyncError> {
        let _guard = self.load_lock.lock().await;
        if self.initial_data_loaded.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut stored = self.items_store.get_all_models().await?;
        let credentials = (self.key_request_handler)().ok_or(SyncError::MissingCredentials)?;
        let account_keys = credentials.account_keys().clone();

        stored.sort_by(|a, b| {
            let pa = self.content_type_priority(&a.content_type);
            let pb = self.content_type_priority(&b.content_type);
            pa.cmp(&pb).then_with(|| b.updated_at.cmp(&a.updated_at))
        });

        {
            let model = self.model.lock().await;
            stored.retain(|disk_item| match model.get(&disk_item.uuid) {
                Some(in_memory) => match (disk_item.dirtied_date, in_memory.dirtied_date) {
                    (Some(disk_date), Some(mem_date)) => disk_date >= mem_date,
                    (None, Some(_)) => false,
                    _ => true,
                },
                None => true,
            });
        }

        let total = stored.len();
        let mut processed = 0usize;
        for chunk in stored.chunks(batch_size.max(1)) {
            let mut batch: Vec<Item> = chunk.to_vec();
            decrypt_items_batch(&mut batch, &account_keys);
            {
                let mut model = self.model.lock().await;
                model.hydrate_local_items(batch);
            }
            processed += chunk.len();
            let _ = self.event_tx.send(SyncEvent::LocalDataIncrementalLoad {
                current: processed,
                total,
            });
            if let Some(cb) = &incremental_callback {
                cb(processed, total);
            }
            tokio::task::yield_now().await;
        }

        self.initial_data_loaded.store(true, Ordering::SeqCst);
        let _ = self.event_tx.send(SyncEvent::LocalDataLoaded);
        Ok(())
    }

    /// `sync()` (spec.md §4.4.4): single-flight, queuing concurrent callers
    /// behind the in-flight operation.
    pub async fn sync(&self) -> Result<(), SyncError> {
        if self.locked.load(Ordering::SeqCst) {
            return Err(SyncError::Locked);
        }

        let should_queue = {
            let mut state = self.state.lock().unwrap();
            if state.sync_op_in_progress || !self.initial_data_loaded.load(Ordering::SeqCst) {
                state.perform_sync_again_on_completion = true;
                true
            } else {
                state.sync_op_in_progress = true;
                false
            }
        };

        if should_queue {
            self.persist_dirty_items_now().await?;
            let (tx, rx) = oneshot::channel();
            self.state.lock().unwrap().queued_callbacks.push(tx);
            return rx
                .await
                .unwrap_or(Err("sync channel closed before completion".to_string()))
                .map_err(SyncError::MalformedResponse);
        }

        let watchdog = self.start_watchdog();
        let result = self.run_sync_loop().await;
        drop(watchdog);

        let queued: Vec<_> = {
            let mut state = self.state.lock().unwrap();
            state.sync_op_in_progress = false;
            std::mem::take(&mut state.queued_callbacks)
        };
        let queued_result = result.as_ref().map(|_| ()).map_err(|e| e.to_string());
        for tx in queued {
            let _ = tx.send(queued_result.clone());
        }
        result
    }

    async fn run_sync_loop(&self) -> Result<(), SyncError> {
        loop {
            let outcome = self.sync_once().await?;
            let again = {
                let mut state = self.state.lock().unwrap();
                let again = state.perform_sync_again_on_completion
                    || outcome.needs_more_sync
                    || outcome.has_cursor;
                state.perform_sync_again_on_completion = false;
                again
            };
            if !again {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn start_watchdog(&self) -> Watchdog {
        let mut rx = self.timer.interval(Duration::from_millis(self.config.watchdog_poll_interval_ms));
        let timeout = Duration::from_millis(self.config.watchdog_timeout_ms);
        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            let start = Instant::now();
            while rx.recv().await.is_some() {
                if start.elapsed() >= timeout {
                    let _ = event_tx.send(SyncEvent::TakingTooLong);
                    break;
                }
            }
        });
        Watchdog { handle }
    }

    async fn persist_uuids(&self, uuids: &[String]) -> Result<(), SyncError> {
        if uuids.is_empty() {
            return Ok(());
        }
        let model = self.model.lock().await;
        let items: Vec<Item> = uuids.iter().filter_map(|u| model.get(u).cloned()).collect();
        drop(model);
        self.items_store.save_models(&items).await?;
        Ok(())
    }

    async fn persist_dirty_items_now(&self) -> Result<(), SyncError> {
        let model = self.model.lock().await;
        let items: Vec<Item> = model.get_dirty_items().into_iter().cloned().collect();
        drop(model);
        self.items_store.save_models(&items).await?;
        Ok(())
    }

    /// One request/response cycle (spec.md §4.4.2–§4.4.7), or the offline
    /// path (§4.4.8) when the host reports no network.
    async fn sync_once(&self) -> Result<SyncRoundOutcome, SyncError> {
        let credentials = (self.key_request_handler)().ok_or(SyncError::MissingCredentials)?;

        let creds = match credentials {
            KeyInfo::Online(c) => c,
            KeyInfo::Offline { account_keys } => {
                self.run_offline_sync(&account_keys).await?;
                return Ok(SyncRoundOutcome { needs_more_sync: false, has_cursor: false });
            }
        };

        let (sync_token, cursor_token) = {
            let state = self.state.lock().unwrap();
            (state.sync_token.clone(), state.cursor_token.clone())
        };

        let (wire_items, dirty_uuids, needs_more_sync) = {
            let mut model = self.model.lock().await;
            let mut dirty_uuids: Vec<String> = model
                .get_dirty_items()
                .into_iter()
                .map(|i| i.uuid.clone())
                .collect();
            let limit = self.config.per_sync_item_upload_limit as usize;
            let needs_more_sync = dirty_uuids.len() > limit;
            dirty_uuids.truncate(limit);

            let mut wire_items = Vec::with_capacity(dirty_uuids.len());
            for uuid in &dirty_uuids {
                if let Some(item) = model.get_mut(uuid) {
                    let item_key = item.item_key.clone().unwrap_or_else(ItemKey::generate);
                    let (content_env, enc_item_key) = encrypt_item_content(
                        &item.content,
                        &item_key,
                        &creds.account_keys,
                        &item.uuid,
                    )?;
                    item.item_key = Some(item_key);
                    item.content_raw = Some(content_env.clone());
                    item.enc_item_key = Some(enc_item_key.clone());
                    // Reset at the moment of dispatch: a mutation arriving
                    // during the request bumps this back above zero, so step
                    // 2 below can tell it apart from a clean upload.
                    item.dirty_count = 0;
                    wire_items.push(WireItem {
                        uuid: item.uuid.clone(),
                        content_type: item.content_type.clone(),
                        content: Some(content_env),
                        enc_item_key: Some(enc_item_key),
                        auth_hash: None,
                        auth_params: item.auth_params.clone(),
                        created_at: item.created_at,
                        updated_at: item.updated_at,
                        deleted: item.deleted,
                    });
                }
            }
            (wire_items, dirty_uuids, needs_more_sync)
        };

        let request = SyncRequestBody {
            api_version: self.config.api_version.clone(),
            items: wire_items,
            sync_token,
            cursor_token: cursor_token.clone(),
            limit: self.config.per_sync_item_upload_limit,
            compute_integrity: Some(cursor_token.is_none()),
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| SyncError::MalformedResponse(e.to_string()))?;
        let url = format!("{}/items/sync", creds.server);

        let response = match self.transport.post(&url, body).await {
            Ok(r) => r,
            Err(e) => {
                let _ = self.event_tx.send(SyncEvent::Error { message: e.to_string() });
                if let TransportError::NonSuccess { status: 401, .. } = &e {
                    let _ = self.event_tx.send(SyncEvent::SessionInvalid);
                }
                self.persist_uuids(&dirty_uuids).await?;
                return Err(SyncError::Transport(e));
            }
        };
        let response: SyncResponseBody = serde_json::from_value(response.body)
            .map_err(|e| SyncError::MalformedResponse(e.to_string()))?;

        // Step 1: retrieved filter.
        let saved_uuid_set: HashSet<String> =
            response.saved_items.iter().map(|w| w.uuid.clone()).collect();
        let mut retrieved: Vec<WireItem> = response
            .retrieved_items
            .into_iter()
            .filter(|w| !saved_uuid_set.contains(&w.uuid))
            .collect();
        {
            let model = self.model.lock().await;
            retrieved.retain(|w| model.get(&w.uuid).map(|i| !i.dirty).unwrap_or(true));
        }

        // Step 2: clear dirty for clean uploads.
        {
            let mut model = self.model.lock().await;
            for uuid in &dirty_uuids {
                if let Some(item) = model.get_mut(uuid) {
                    if item.dirty_count == 0 {
                        item.set_dirty(false, false);
                    }
                }
            }
        }

        // Step 3: map retrieved (decrypt, then map).
        let mut decrypted_retrieved = Vec::with_capacity(retrieved.len());
        let mut retrieved_jsons = Vec::with_capacity(retrieved.len());
        for wire in &retrieved {
            let decrypted = decrypt_wire_item(wire, &creds.account_keys);
            retrieved_jsons.push(wire_item_mapping_json(wire, &decrypted));
            decrypted_retrieved.push(decrypted);
        }
        let mapping_outcome = {
            let mut model = self.model.lock().await;
            let outcome = model.map_response_items_to_local_models(
                retrieved_jsons,
                MappingSource::RemoteRetrieved,
                None,
            );
            for decrypted in &decrypted_retrieved {
                if let Some(mapped) = model.get_mut(&decrypted.uuid) {
                    if decrypted.content_raw.is_some() {
                        mapped.content_raw = decrypted.content_raw.clone();
                    }
                    if decrypted.item_key.is_some() {
                        mapped.item_key = decrypted.item_key.clone();
                    }
                }
            }
            outcome
        };

        // Step 4: map saved, metadata only.
        {
            let mut model = self.model.lock().await;
            for wire in &response.saved_items {
                if let Some(item) = model.get_mut(&wire.uuid) {
                    item.updated_at = wire.updated_at;
                    item.created_at = wire.created_at;
                    if let Some(enc) = &wire.enc_item_key {
                        item.enc_item_key = Some(enc.clone());
                    }
                    if let Some(auth_params) = &wire.auth_params {
                        item.auth_params = Some(auth_params.clone());
                    }
                }
            }
        }

        // Step 5: conflicts.
        let conflict_uuids = self
            .apply_conflicts(&response.conflicts, &response.unsaved, &creds.account_keys)
            .await;
        let had_conflicts = !response.conflicts.is_empty() || !response.unsaved.is_empty();

        // Step 6: integrity verification.
        if cursor_token.is_none() {
            if let Some(server_hash) = &response.integrity_hash {
                self.check_integrity(server_hash).await;
            }
        }

        // Step 7: persist.
        let mut touched: Vec<String> = mapping_outcome.valid_uuids.clone();
        touched.extend(response.saved_items.iter().map(|w| w.uuid.clone()));
        touched.extend(conflict_uuids);
        touched.sort();
        touched.dedup();
        self.persist_uuids(&touched).await?;
        for uuid in &mapping_outcome.deleted_uuids {
            self.items_store.delete_model(uuid).await?;
        }

        // Step 8: advance tokens.
        {
            let mut state = self.state.lock().unwrap();
            if response.sync_token.is_some() {
                state.sync_token = response.sync_token.clone();
            }
            state.cursor_token = response.cursor_token.clone();
        }

        // Step 10: completion events.
        let saved_uuids: Vec<String> = response.saved_items.iter().map(|w| w.uuid.clone()).collect();
        let total_changed =
            mapping_outcome.valid_uuids.len() + saved_uuids.len() + mapping_outcome.deleted_uuids.len();
        let _ = self.event_tx.send(SyncEvent::Completed {
            retrieved_uuids: mapping_outcome.valid_uuids,
            saved_uuids,
        });
        if total_changed > self.config.major_data_change_threshold as usize {
            let _ = self.event_tx.send(SyncEvent::MajorDataChange);
        }

        Ok(SyncRoundOutcome {
            needs_more_sync: needs_more_sync || had_conflicts,
            has_cursor: response.cursor_token.is_some(),
        })
    }

    async fn apply_conflicts(
        &self,
        conflicts: &[ConflictEntry],
        unsaved: &[crate::sync::wire::UnsavedEntry],
        account_keys: &AccountKeys,
    ) -> Vec<String> {
        let mut result_uuids = Vec::new();
        let conflict_uuids: Vec<String> = conflicts
            .iter()
            .filter_map(|c| c.uuid().map(|s| s.to_string()))
            .collect();

        let mut model = self.model.lock().await;
        let frozen = conflict::freeze_all(&model, &conflict_uuids);
        let frozen_map: HashMap<&str, &FrozenItem> =
            frozen.iter().map(|f| (f.uuid.as_str(), f)).collect();

        for entry in conflicts {
            match entry.kind {
                ConflictKind::UuidConflict => {
                    if let Some(uuid) = entry.uuid() {
                        if let Some(new_uuid) = model.alternate_uuid(uuid) {
                            result_uuids.push(new_uuid);
                        }
                    }
                }
                ConflictKind::SyncConflict => {
                    if let Some(wire) = entry.server_item.as_ref().or(entry.unsaved_item.as_ref()) {
                        let decrypted = decrypt_wire_item(wire, account_keys);
                        if let Some(frozen_item) = frozen_map.get(wire.uuid.as_str()) {
                            let resolution = conflict::resolve_sync_conflict(
                                &mut model,
                                frozen_item,
                                &decrypted,
                                &self.config,
                            );
                            if resolution == ConflictResolution::KeepServer {
                                let json = wire_item_mapping_json(wire, &decrypted);
                                model.map_response_items_to_local_models(
                                    vec![json],
                                    MappingSource::RemoteRetrieved,
                                    None,
                                );
                            }
                        }
                        result_uuids.push(wire.uuid.clone());
                    }
                }
            }
        }

        // Legacy `unsaved[]` channel: anything already handled via
        // `conflicts[]` wins (spec.md §9).
        let already_handled: HashSet<&str> = conflicts.iter().filter_map(|c| c.uuid()).collect();
        for entry in unsaved {
            if already_handled.contains(entry.item.uuid.as_str()) {
                warn!(
                    uuid = %entry.item.uuid,
                    "uuid present in both conflicts and legacy unsaved; preferring conflicts entry"
                );
                continue;
            }
            let decrypted = decrypt_wire_item(&entry.item, account_keys);
            let frozen_item = model.get(&entry.item.uuid).map(|i| FrozenItem {
                uuid: i.uuid.clone(),
                content: i.get_content_copy(),
                client_updated_at: i.client_updated_at,
                deleted: i.deleted,
            });
            if let Some(frozen_item) = frozen_item {
                let resolution = conflict::resolve_sync_conflict(
                    &mut model,
                    &frozen_item,
                    &decrypted,
                    &self.config,
                );
                if resolution == ConflictResolution::KeepServer {
                    let json = wire_item_mapping_json(&entry.item, &decrypted);
                    model.map_response_items_to_local_models(
                        vec![json],
                        MappingSource::RemoteRetrieved,
                        None,
                    );
                }
            }
            result_uuids.push(entry.item.uuid.clone());
        }

        result_uuids
    }

    async fn check_integrity(&self, server_hash: &str) {
        let local_hash = {
            let model = self.model.lock().await;
            compute_data_integrity_hash(&model)
        };

        let transition = {
            let mut state = self.state.lock().unwrap();
            if local_hash == server_hash {
                state.discordance_count = 0;
                if state.out_of_sync {
                    state.out_of_sync = false;
                    Some(false)
                } else {
                    None
                }
            } else {
                state.discordance_count += 1;
                if state.discordance_count >= self.config.max_discordance_before_out_of_sync
                    && !state.out_of_sync
                {
                    state.out_of_sync = true;
                    Some(true)
                } else {
                    None
                }
            }
        };

        match transition {
            Some(true) => {
                let _ = self.event_tx.send(SyncEvent::EnterOutOfSync);
            }
            Some(false) => {
                let _ = self.event_tx.send(SyncEvent::ExitOutOfSync);
            }
            None => {}
        }
    }

    /// `resolveOutOfSync()` (spec.md §4.4.7): stateless full-scan download,
    /// reconciling any item whose local copy differs, then a confirming sync.
    pub async fn resolve_out_of_sync(&self) -> Result<(), SyncError> {
        let credentials = (self.key_request_handler)().ok_or(SyncError::MissingCredentials)?;
        let creds = match credentials {
            KeyInfo::Online(c) => c,
            KeyInfo::Offline { .. } => return Ok(()),
        };

        let mut cursor: Option<String> = None;
        loop {
            let request = SyncRequestBody {
                api_version: self.config.api_version.clone(),
                items: Vec::new(),
                sync_token: None,
                cursor_token: cursor.clone(),
                limit: self.config.out_of_sync_page_limit,
                compute_integrity: Some(false),
            };
            let body = serde_json::to_value(&request)
                .map_err(|e| SyncError::MalformedResponse(e.to_string()))?;
            let url = format!("{}/items/sync", creds.server);
            let response = self.transport.post(&url, body).await?;
            let response: SyncResponseBody = serde_json::from_value(response.body)
                .map_err(|e| SyncError::MalformedResponse(e.to_string()))?;

            for wire in &response.retrieved_items {
                let decrypted = decrypt_wire_item(wire, &creds.account_keys);
                let mut model = self.model.lock().await;
                let local_differs = model
                    .get(&wire.uuid)
                    .map(|local| local.content != decrypted.content)
                    .unwrap_or(false);
                if local_differs {
                    if let Some(current) = model.get(&wire.uuid).map(|i| i.get_content_copy()) {
                        model.duplicate_item_as_conflict(current, &wire.uuid);
                    }
                }
                let json = wire_item_mapping_json(wire, &decrypted);
                model.map_response_items_to_local_models(vec![json], MappingSource::RemoteRetrieved, None);
            }

            cursor = response.cursor_token.clone();
            if cursor.is_none() {
                break;
            }
        }

        self.sync().await
    }

    /// `sync()` under an offline key-info report (spec.md §4.4.8): stamp,
    /// persist, drop deletions, no network I/O.
    async fn run_offline_sync(&self, _account_keys: &AccountKeys) -> Result<(), SyncError> {
        let now = Utc::now();
        let (dirty_uuids, snapshot, to_delete) = {
            let mut model = self.model.lock().await;
            let dirty_uuids: Vec<String> =
                model.get_dirty_items().into_iter().map(|i| i.uuid.clone()).collect();
            for uuid in &dirty_uuids {
                if let Some(item) = model.get_mut(uuid) {
                    item.updated_at = now;
                    item.set_dirty(false, false);
                }
            }
            let snapshot: Vec<Item> = dirty_uuids
                .iter()
                .filter_map(|u| model.get(u).cloned())
                .collect();
            let to_delete: Vec<String> = snapshot
                .iter()
                .filter(|i| i.deleted)
                .map(|i| i.uuid.clone())
                .collect();
            (dirty_uuids, snapshot, to_delete)
        };

        self.items_store.save_models(&snapshot).await?;
        for uuid in &to_delete {
            self.items_store.delete_model(uuid).await?;
            self.model.lock().await.remove_item_locally(uuid);
        }

        let _ = self.event_tx.send(SyncEvent::Completed {
            retrieved_uuids: Vec::new(),
            saved_uuids: dirty_uuids,
        });
        Ok(())
    }

    /// Exposed for hosts that want to read/write the small key/value table
    /// (`server`, `jwt`, `migrations`, ...) through the same storage handle
    /// the sync manager uses (spec.md §6.1).
    pub fn key_value_store(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }
}

fn wire_item_to_plain_item(wire: &WireItem) -> Item {
    let mut item = Item::new(wire.content_type.clone());
    item.uuid = wire.uuid.clone();
    item.content_raw = wire.content.clone();
    item.enc_item_key = wire.enc_item_key.clone();
    item.auth_hash = wire.auth_hash.clone();
    item.auth_params = wire.auth_params.clone();
    item.created_at = wire.created_at;
    item.updated_at = wire.updated_at;
    item.deleted = wire.deleted;
    item
}

fn decrypt_wire_item(wire: &WireItem, account_keys: &AccountKeys) -> Item {
    let mut item = wire_item_to_plain_item(wire);
    if item.content_raw.is_some() {
        decrypt_items_batch(std::slice::from_mut(&mut item), account_keys);
    }
    item
}

/// Build the JSON payload `ModelManager::map_response_items_to_local_models`
/// expects: metadata fields copied directly, `content` replaced with the
/// already-decrypted plaintext value (the model manager has no crypto
/// awareness of its own).
fn wire_item_mapping_json(wire: &WireItem, decrypted: &Item) -> Value {
    let mut json = serde_json::json!({
        "uuid": wire.uuid,
        "content_type": wire.content_type,
        "deleted": wire.deleted,
        "created_at": wire.created_at.to_rfc3339(),
        "updated_at": wire.updated_at.to_rfc3339(),
        "enc_item_key": wire.enc_item_key,
        "auth_params": wire.auth_params,
    });

    if wire.deleted && wire.content.is_none() {
        return json;
    }

    if decrypted.error_decrypting {
        debug!(uuid = %wire.uuid, "retrieved item failed to decrypt");
        json["errorDecrypting"] = serde_json::json!(true);
        json["content"] = serde_json::json!({});
    } else {
        json["content"] = decrypted.content.clone();
    }
    json
}

/// `computeDataIntegrityHash` (spec.md §4.4.7): all non-dummy items sorted
/// by descending `updated_at` milliseconds, joined with `,`, SHA-256'd.
fn compute_data_integrity_hash(model: &ModelManager) -> String {
    let mut timestamps: Vec<i64> = model
        .items()
        .filter(|i| !i.dummy)
        .map(|i| i.updated_at.timestamp_millis())
        .collect();
    timestamps.sort_unstable_by(|a, b| b.cmp(a));
    let joined = timestamps
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::AccountKeys;
    use crate::test_support::{MemoryStore, MockTransport};
    use crate::timer::TokioTimer;

    fn account_keys() -> AccountKeys {
        AccountKeys::derive("correct horse battery staple", "salt", 1000)
    }

    fn make_manager(
        transport: Arc<MockTransport>,
        store: Arc<MemoryStore>,
        keys: AccountKeys,
    ) -> SyncManager {
        let model = Arc::new(AsyncMutex::new(ModelManager::new(Arc::new(TokioTimer))));
        let handler: KeyRequestHandler = Arc::new(move || {
            Some(KeyInfo::Online(SyncCredentials {
                server: "https://example.com".to_string(),
                account_keys: keys.clone(),
                auth_params: serde_json::json!({}),
            }))
        });
        SyncManager::new(
            SyncConfig::default(),
            model,
            store.clone(),
            store,
            transport,
            Arc::new(TokioTimer),
            handler,
        )
    }

    #[tokio::test]
    async fn dirty_item_uploads_and_clears_on_clean_save() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new());
        let manager = make_manager(transport.clone(), store, account_keys());

        {
            let mut model = manager.model.lock().await;
            let mut item = Item::new("note".to_string());
            item.content = serde_json::json!({"title": "hello", "references": []});
            item.set_dirty(true, true);
            model.insert_local(item);
        }
        manager.initial_data_loaded.store(true, Ordering::SeqCst);

        transport.push_response(serde_json::json!({
            "saved_items": [],
            "retrieved_items": [],
            "conflicts": [],
            "unsaved": [],
            "sync_token": "token-1",
        }));

        manager.sync().await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let sent: SyncRequestBody = serde_json::from_value(requests[0].body.clone().unwrap()).unwrap();
        assert_eq!(sent.items.len(), 1);

        let model = manager.model.lock().await;
        let uuid = sent.items[0].uuid.clone();
        assert!(!model.get(&uuid).unwrap().dirty);
    }

    #[tokio::test]
    async fn offline_sync_stamps_and_persists_without_network() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new());
        let model = Arc::new(AsyncMutex::new(ModelManager::new(Arc::new(TokioTimer))));
        let handler: KeyRequestHandler = Arc::new(|| {
            Some(KeyInfo::Offline {
                account_keys: AccountKeys::derive("pw", "salt", 1000),
            })
        });
        let manager = SyncManager::new(
            SyncConfig::default(),
            model.clone(),
            store.clone(),
            store,
            transport.clone(),
            Arc::new(TokioTimer),
            handler,
        );

        let uuid = {
            let mut guard = model.lock().await;
            let mut item = Item::new("note".to_string());
            item.set_dirty(true, true);
            let uuid = item.uuid.clone();
            guard.insert_local(item);
            uuid
        };
        manager.initial_data_loaded.store(true, Ordering::SeqCst);

        manager.sync().await.unwrap();

        assert!(transport.requests().is_empty());
        let guard = model.lock().await;
        assert!(!guard.get(&uuid).unwrap().dirty);
    }

    #[tokio::test]
    async fn concurrent_sync_queues_behind_in_flight_operation() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new());
        let manager = Arc::new(make_manager(transport.clone(), store, account_keys()));
        manager.initial_data_loaded.store(true, Ordering::SeqCst);

        transport.push_response(serde_json::json!({
            "saved_items": [], "retrieved_items": [], "conflicts": [], "unsaved": [],
            "sync_token": "t1",
        }));

        manager.state.lock().unwrap().sync_op_in_progress = true;
        let manager_clone = manager.clone();
        let queued = tokio::spawn(async move { manager_clone.sync().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        {
            let mut state = manager.state.lock().unwrap();
            assert!(state.perform_sync_again_on_completion);
            state.sync_op_in_progress = false;
            let callbacks = std::mem::take(&mut state.queued_callbacks);
            drop(state);
            for tx in callbacks {
                let _ = tx.send(Ok(()));
            }
        }

        queued.await.unwrap().unwrap();
    }
}
