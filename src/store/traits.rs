//! Identifier store trait and error types

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during identifier store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store did not answer {operation} on '{key}' within {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        key: String,
        timeout_ms: u64,
    },

    #[error("Value of '{key}' is not an integer: '{value}'")]
    NotAnInteger { key: String, value: String },

    #[error("Store task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// Returns true if the call may succeed when retried later
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Sqlite(_) | Self::Task(_))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared key-value store holding the URL records and the sequence counter
///
/// Every operation is atomic for the single key it touches. Nothing here
/// spans keys; callers that need a multi-key protocol build it out of
/// [`set_if_absent`](IdentifierStore::set_if_absent) and
/// [`compare_and_swap`](IdentifierStore::compare_and_swap).
#[async_trait]
pub trait IdentifierStore: Send + Sync {
    /// Reads a key
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes a key unconditionally
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Checks whether a key holds any value
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Adds one to an integer key and returns the new value
    ///
    /// A missing key counts as zero.
    async fn increment(&self, key: &str) -> StoreResult<i64>;

    /// Writes a key only if it is absent
    ///
    /// Returns true if this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool>;

    /// Replaces a key's value only if it currently equals `expected`
    ///
    /// Returns true if the swap happened.
    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> StoreResult<bool>;
}
