//! Shared, dependency-light types used by both `vaultkit-core` and any host
//! UI crate: the predicate expression language and the event/conflict
//! vocabulary. Nothing here touches crypto, the network, or a runtime.
pub mod events;
pub mod predicate;

pub use events::{ConflictKind, SyncEventName};
pub use predicate::{Operator, Predicate, PredicateError};
