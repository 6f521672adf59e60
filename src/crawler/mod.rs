//! Pipeline stages of the crawl
//!
//! This module contains the workers that make up the crawl cycle:
//! - The frontier coordinator, which admits candidate URLs and binds ids
//! - The fetch stage, which downloads and persists pages
//! - The parse stage, which extracts links and proposes them as candidates
//! - The seed injector, which starts a crawl
//!
//! Every stage consumes one queue and publishes to others. None of them calls
//! another stage directly, so each can be replicated or restarted on its own.

mod coordinator;
mod fetcher;
mod parser;
mod seed;

pub use coordinator::{
    AckDelay, AdmissionCounts, AdmissionResult, Coordinator, FrontierError, FrontierWorker,
};
pub use fetcher::{build_http_client, FetchOutcome, FetchStage, PageStore};
pub use parser::{extract_links, ParseOutcome, ParseStage};
pub use seed::inject_seeds;

use tokio::sync::watch;

/// Receiving side of a stage shutdown request
pub type ShutdownSignal = watch::Receiver<bool>;

/// Creates the channel used to stop stage loops
///
/// Send `true` to ask every loop holding a receiver to finish its current
/// message and return.
pub fn shutdown_channel() -> (watch::Sender<bool>, ShutdownSignal) {
    watch::channel(false)
}

/// Resolves once shutdown has been requested or the sender is gone
pub(crate) async fn shutdown_requested(signal: &mut ShutdownSignal) {
    while !*signal.borrow() {
        if signal.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_requested_wakes_on_send() {
        let (tx, mut rx) = shutdown_channel();

        let waiter = tokio::spawn(async move {
            shutdown_requested(&mut rx).await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_shutdown() {
        let (tx, mut rx) = shutdown_channel();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), shutdown_requested(&mut rx))
            .await
            .unwrap();
    }
}
