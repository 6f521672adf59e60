//! SQLite identifier store
//!
//! Every stage process opens its own connection to the same database file;
//! SQLite's file locking makes each single-statement operation atomic across
//! processes. Calls run on the blocking pool so a slow disk never stalls the
//! async worker.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::storage::{open_database, open_in_memory};
use crate::store::traits::{IdentifierStore, StoreError, StoreResult};

/// SQLite-backed [`IdentifierStore`]
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens or creates the store in a database file
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = open_database(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates a private in-memory store (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs a closure against the connection on the blocking thread pool
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl IdentifierStore for SqliteStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let value = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            // IMMEDIATE takes the write lock up front so no other process can
            // read the same value between our read and write.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let current: Option<String> = tx
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?;

            let current = match current {
                Some(value) => value
                    .parse::<i64>()
                    .map_err(|_| StoreError::NotAnInteger {
                        key: key.clone(),
                        value,
                    })?,
                None => 0,
            };

            let next = current + 1;
            tx.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, next.to_string()],
            )?;
            tx.commit()?;

            Ok(next)
        })
        .await
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool> {
        let (key, value) = (key.to_string(), value.to_string());
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO NOTHING",
                params![key, value],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> StoreResult<bool> {
        let (key, expected, new) = (key.to_string(), expected.to_string(), new.to_string());
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE kv SET value = ?3 WHERE key = ?1 AND value = ?2",
                params![key, expected, new],
            )?;
            Ok(updated == 1)
        })
        .await
    }
}
