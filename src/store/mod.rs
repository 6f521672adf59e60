//! Identifier store: the shared source of truth for URL records
//!
//! The store is a flat key space holding three kinds of keys:
//! - URL text → decimal id of that URL
//! - decimal id → URL text
//! - [`SEQUENCE_KEY`] → the next id to hand out
//!
//! Stages never cache any of it across messages; every decision re-reads the
//! store.

mod memory;
mod sqlite;
mod timeout;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use timeout::TimeoutStore;
pub use traits::{IdentifierStore, StoreError, StoreResult};

use crate::config::{Backend, StoreConfig};
use std::path::Path;
use std::sync::Arc;

/// Reserved key of the sequence counter
pub const SEQUENCE_KEY: &str = "urlIdSeq";

/// First id ever handed out
pub const FIRST_ID: u32 = 1;

/// Opens the configured store, with every call bounded by the configured timeout
pub fn open_store(config: &StoreConfig) -> StoreResult<Arc<dyn IdentifierStore>> {
    let inner: Arc<dyn IdentifierStore> = match config.backend {
        Backend::Sqlite => Arc::new(SqliteStore::open(Path::new(&config.path))?),
        Backend::Memory => MemoryStore::new(),
    };
    Ok(Arc::new(TimeoutStore::new(inner, config.timeout())))
}

/// Seeds the sequence counter with [`FIRST_ID`] unless it already exists
///
/// Returns true if this call created the counter. Safe to call from every
/// stage at start-up.
pub async fn ensure_sequence(store: &dyn IdentifierStore) -> StoreResult<bool> {
    if store.exists(SEQUENCE_KEY).await? {
        tracing::debug!("{} already exists", SEQUENCE_KEY);
        return Ok(false);
    }

    let created = store
        .set_if_absent(SEQUENCE_KEY, &FIRST_ID.to_string())
        .await?;
    if created {
        tracing::debug!("{} did not exist, created with value = {}", SEQUENCE_KEY, FIRST_ID);
    } else {
        tracing::debug!("{} already exists", SEQUENCE_KEY);
    }
    Ok(created)
}

/// Key under which an id's URL is stored
pub fn id_key(id: u32) -> String {
    id.to_string()
}

/// Resolves an id to its URL
pub async fn resolve_id(store: &dyn IdentifierStore, id: u32) -> StoreResult<Option<String>> {
    store.get(&id_key(id)).await
}

/// Resolves a URL to its id
///
/// Returns `None` for unknown URLs and for URLs whose admission is still in
/// flight.
pub async fn resolve_url(store: &dyn IdentifierStore, url: &str) -> StoreResult<Option<u32>> {
    Ok(store
        .get(url)
        .await?
        .and_then(|value| value.parse::<u32>().ok()))
}

/// Reads the current value of the sequence counter
pub async fn current_sequence(store: &dyn IdentifierStore) -> StoreResult<Option<i64>> {
    match store.get(SEQUENCE_KEY).await? {
        Some(value) => value
            .parse::<i64>()
            .map(Some)
            .map_err(|_| StoreError::NotAnInteger {
                key: SEQUENCE_KEY.to_string(),
                value,
            }),
        None => Ok(None),
    }
}
