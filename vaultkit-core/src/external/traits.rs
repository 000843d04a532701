//! Storage and transport contracts the sync manager is built against. The
//! core owns no concrete database or HTTP client; hosts supply one
//! implementing these traits (spec.md §6.1/§6.2).
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::item::Item;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("key not found: {0}")]
    NotFound(String),
}

/// Key/value persistence for the small set of session-level keys the core
/// needs: `server`, `auth_params`, `jwt`, `mk`, `ak`, `syncToken`,
/// `cursorToken`, `migrations` (spec.md §6.1).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    async fn clear(&self) -> Result<(), StorageError>;
}

/// Persistent item table (spec.md §6.1). Items are stored in their
/// still-encrypted wire form; the core decrypts in memory after load.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn get_all_models(&self) -> Result<Vec<Item>, StorageError>;
    async fn save_models(&self, items: &[Item]) -> Result<(), StorageError>;
    async fn save_model(&self, item: &Item) -> Result<(), StorageError> {
        self.save_models(std::slice::from_ref(item)).await
    }
    async fn delete_model(&self, uuid: &str) -> Result<(), StorageError>;
    async fn clear_all_models(&self) -> Result<(), StorageError>;
}

/// Clear both the key/value store and the item table (spec.md §6.1
/// `clearAllData`), used during sign-out.
pub async fn clear_all_data(
    kv: &dyn KeyValueStore,
    items: &dyn ItemStore,
) -> Result<(), StorageError> {
    kv.clear().await?;
    items.clear_all_models().await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
}

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub query: HashMap<String, String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("non-2xx response: {status} {body}")]
    NonSuccess { status: u16, body: String },
    #[error("response body was not valid JSON: {0}")]
    InvalidJson(String),
}

/// The HTTP transport contract (spec.md §6.2). Auth header injection,
/// `api_version` query param, and success/failure routing through the host
/// timer are the transport's responsibility, not the sync manager's.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;

    async fn get(&self, url: &str, query: HashMap<String, String>) -> Result<TransportResponse, TransportError> {
        self.send(TransportRequest {
            method: HttpMethod::Get,
            url: url.to_string(),
            query,
            body: None,
        })
        .await
    }

    async fn post(&self, url: &str, body: Value) -> Result<TransportResponse, TransportError> {
        self.send(TransportRequest {
            method: HttpMethod::Post,
            url: url.to_string(),
            query: HashMap::new(),
            body: Some(body),
        })
        .await
    }

    async fn patch(&self, url: &str, body: Value) -> Result<TransportResponse, TransportError> {
        self.send(TransportRequest {
            method: HttpMethod::Patch,
            url: url.to_string(),
            query: HashMap::new(),
            body: Some(body),
        })
        .await
    }
}
