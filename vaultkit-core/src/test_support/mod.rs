//! In-memory storage and a scriptable transport, gated behind `test-utils`
//! the same way `bae-core` gates `ReleaseStorageImpl::with_cloud` -- trait
//! objects swapped for deterministic stand-ins in tests.
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::external::{
    HttpTransport, ItemStore, KeyValueStore, StorageError, TransportError, TransportRequest,
    TransportResponse,
};
use crate::item::Item;

/// In-memory `KeyValueStore` + `ItemStore`, for tests that don't want a real
/// database.
#[derive(Default)]
pub struct MemoryStore {
    kv: Mutex<HashMap<String, String>>,
    items: Mutex<HashMap<String, Item>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.kv.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.kv.lock().unwrap().get(key).cloned())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.kv.lock().unwrap().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.kv.lock().unwrap().clear();
        Ok(())
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn get_all_models(&self) -> Result<Vec<Item>, StorageError> {
        Ok(self.items.lock().unwrap().values().cloned().collect())
    }

    async fn save_models(&self, items: &[Item]) -> Result<(), StorageError> {
        let mut guard = self.items.lock().unwrap();
        for item in items {
            guard.insert(item.uuid.clone(), item.clone());
        }
        Ok(())
    }

    async fn delete_model(&self, uuid: &str) -> Result<(), StorageError> {
        self.items.lock().unwrap().remove(uuid);
        Ok(())
    }

    async fn clear_all_models(&self) -> Result<(), StorageError> {
        self.items.lock().unwrap().clear();
        Ok(())
    }
}

/// A scripted response queue for `HttpTransport`, for tests that need to
/// control exactly what the "server" returns to each request.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<TransportResponse, String>>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, body: Value) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(TransportResponse { status: 200, body }));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        self.responses.lock().unwrap().push_back(Err(message.into()));
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(TransportError::Connection(message)),
            None => Err(TransportError::Connection("MockTransport: no scripted response queued".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrips_items() {
        let store = MemoryStore::new();
        let item = Item::new("note".to_string());
        store.save_model(&item).await.unwrap();

        let loaded = store.get_all_models().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].uuid, item.uuid);

        store.delete_model(&item.uuid).await.unwrap();
        assert!(store.get_all_models().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mock_transport_returns_scripted_responses_in_order() {
        let transport = MockTransport::new();
        transport.push_response(serde_json::json!({"sync_token": "abc"}));
        transport.push_error("connection refused");

        let first = transport.get("https://example.com/items/sync", HashMap::new()).await.unwrap();
        assert_eq!(first.body["sync_token"], "abc");

        let second = transport.get("https://example.com/items/sync", HashMap::new()).await;
        assert!(second.is_err());

        assert_eq!(transport.requests().len(), 2);
    }
}
