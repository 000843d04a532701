//! The in-memory item graph, reference resolution, conflict duplication,
//! dirty tracking, and observer fan-out (spec.md §4.3).
pub mod content_type;
pub mod manager;
pub mod observer;

pub use content_type::{ContentTypeRegistry, ItemVariant};
pub use manager::{MappingOutcome, ModelEvent, ModelManager};
pub use observer::{ContentTypeFilter, MappingNotification, MappingSource, ObserverHandle};
