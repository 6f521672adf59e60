//! In-memory identifier store
//!
//! Used when every stage runs in one process, and as the test double for
//! coordinator and stage tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::store::traits::{IdentifierStore, StoreError, StoreResult};

/// Process-local [`IdentifierStore`] backed by a `HashMap`
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of keys currently stored
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[async_trait]
impl IdentifierStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.inner.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.inner.lock().await.contains_key(key))
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        let mut inner = self.inner.lock().await;
        let current = match inner.get(key) {
            Some(value) => value.parse::<i64>().map_err(|_| StoreError::NotAnInteger {
                key: key.to_string(),
                value: value.clone(),
            })?,
            None => 0,
        };
        let next = current + 1;
        inner.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.contains_key(key) {
            return Ok(false);
        }
        inner.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.get_mut(key) {
            Some(current) if current == expected => {
                *current = new.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
