//! VaultKit core: the client-side hard core of an end-to-end encrypted item
//! synchronization system (see `SPEC_FULL.md` at the workspace root).
//!
//! Dependency order, leaves first:
//! - [`crypto`] -- UUID generation, PBKDF2-SHA512, AES-256-CBC, HMAC-SHA256.
//! - [`item`] -- the item entity and its versioned encryption envelope.
//! - [`model_manager`] -- the in-memory item graph, reference resolution,
//!   conflict duplication, UUID alternation, observer fan-out.
//! - [`sync`] -- the client side of the sync protocol.
//! - [`singleton`] -- "at most one item per predicate" enforcement.
//!
//! [`external`] holds the storage/transport contracts the host implements;
//! [`timer`] is the host-timer abstraction every suspension point in the
//! above is scheduled through (spec.md §5).
pub mod crypto;
pub mod external;
pub mod item;
pub mod model_manager;
pub mod singleton;
pub mod sync;
pub mod timer;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use crypto::{AccountKeys, ItemKey};
pub use item::{DecryptedItem, Item, ItemReference, TransformError};
pub use model_manager::{ContentTypeRegistry, ItemVariant, MappingOutcome, ModelEvent, ModelManager};
pub use singleton::{CreateBlock, SingletonHandle, SingletonManager, SyncTrigger};
pub use sync::{KeyInfo, SyncConfig, SyncCredentials, SyncError, SyncEvent, SyncManager};
pub use timer::{TokioTimer, Timer};

pub use vaultkit_common::{ConflictKind, Operator, Predicate, PredicateError, SyncEventName};
