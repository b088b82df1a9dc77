use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use super::traits::{KvStore, StoreName};

/// Process-local key-value store. Used when the durable medium is unavailable,
/// and as the write-through mirror that keeps reads answerable after failures.
#[derive(Debug, Default)]
pub struct MemoryKv {
    data: Mutex<HashMap<(StoreName, String), serde_json::Value>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get_now(&self, store: StoreName, key: &str) -> Option<serde_json::Value> {
        let data = self.data.lock().expect("memory kv mutex poisoned");
        data.get(&(store, key.to_string())).cloned()
    }

    pub(crate) fn put_now(&self, store: StoreName, key: &str, value: &serde_json::Value) {
        let mut data = self.data.lock().expect("memory kv mutex poisoned");
        data.insert((store, key.to_string()), value.clone());
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryKv {
    async fn get(
        &self,
        store: StoreName,
        key: &str,
    ) -> crate::error::Result<Option<serde_json::Value>> {
        Ok(self.get_now(store, key))
    }

    async fn put(
        &self,
        store: StoreName,
        key: &str,
        value: &serde_json::Value,
    ) -> crate::error::Result<()> {
        self.put_now(store, key, value);
        Ok(())
    }

    async fn count(&self, store: StoreName) -> crate::error::Result<u64> {
        let data = self.data.lock().expect("memory kv mutex poisoned");
        Ok(data.keys().filter(|(s, _)| *s == store).count() as u64)
    }

    fn location(&self) -> Option<&Path> {
        None
    }
}
