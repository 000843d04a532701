//! Contracts for the host-supplied collaborators the core treats as
//! external: persistent storage and HTTP transport (spec.md §6.1/§6.2).
//! Both are `async_trait` trait objects, following `bae-core`'s
//! `ReleaseStorage`/`SyncBucketClient` shape.
mod reqwest_transport;
mod traits;

pub use traits::{
    clear_all_data, HttpMethod, HttpTransport, ItemStore, KeyValueStore, StorageError,
    TransportError, TransportRequest, TransportResponse,
};

#[cfg(feature = "reqwest-transport")]
pub use reqwest_transport::ReqwestTransport;
