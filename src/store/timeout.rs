//! Deadline enforcement for store calls
//!
//! A store that stops answering must surface as a distinguishable
//! [`StoreError::Timeout`] instead of hanging the worker that called it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::store::traits::{IdentifierStore, StoreError, StoreResult};

/// Wraps any [`IdentifierStore`] and bounds every call with a deadline
pub struct TimeoutStore {
    inner: Arc<dyn IdentifierStore>,
    timeout: Duration,
}

impl TimeoutStore {
    pub fn new(inner: Arc<dyn IdentifierStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        key: &str,
        fut: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation,
                key: key.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl IdentifierStore for TimeoutStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.bounded("get", key, self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.bounded("set", key, self.inner.set(key, value)).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.bounded("exists", key, self.inner.exists(key)).await
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        self.bounded("increment", key, self.inner.increment(key))
            .await
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool> {
        self.bounded("set_if_absent", key, self.inner.set_if_absent(key, value))
            .await
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> StoreResult<bool> {
        self.bounded(
            "compare_and_swap",
            key,
            self.inner.compare_and_swap(key, expected, new),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    /// A store whose reads never complete
    struct HangingStore;

    #[async_trait]
    impl IdentifierStore for HangingStore {
        async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
            std::future::pending().await
        }

        async fn set(&self, _key: &str, _value: &str) -> StoreResult<()> {
            Ok(())
        }

        async fn exists(&self, _key: &str) -> StoreResult<bool> {
            std::future::pending().await
        }

        async fn increment(&self, _key: &str) -> StoreResult<i64> {
            Ok(1)
        }

        async fn set_if_absent(&self, _key: &str, _value: &str) -> StoreResult<bool> {
            Ok(true)
        }

        async fn compare_and_swap(&self, _k: &str, _e: &str, _n: &str) -> StoreResult<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_hanging_call_times_out() {
        let store = TimeoutStore::new(Arc::new(HangingStore), Duration::from_millis(20));

        let err = store.exists("http://site.test/").await.unwrap_err();
        match err {
            StoreError::Timeout {
                operation, key, ..
            } => {
                assert_eq!(operation, "exists");
                assert_eq!(key, "http://site.test/");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(store.get("k").await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_fast_calls_pass_through() {
        let inner = MemoryStore::new();
        let store = TimeoutStore::new(inner.clone(), Duration::from_secs(1));

        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(store.increment("seq").await.unwrap(), 1);
        assert_eq!(inner.len().await, 2);
    }
}
