//! Sync Manager: the client side of the sync protocol (spec.md §4.4) --
//! staged uploads, paged downloads, conflict handling, integrity
//! verification, out-of-sync detection and recovery.
pub mod config;
pub mod conflict;
pub mod manager;
pub mod wire;

pub use config::SyncConfig;
pub use conflict::{resolve_sync_conflict, resolve_uuid_conflict, ConflictResolution, FrozenItem};
pub use manager::{
    ContentTypeLoadPriority, IncrementalLoadCallback, KeyInfo, KeyRequestHandler, SyncCredentials,
    SyncError, SyncEvent, SyncManager,
};
pub use wire::{ConflictEntry, SyncRequestBody, SyncResponseBody, UnsavedEntry, UnsavedError, WireItem};
