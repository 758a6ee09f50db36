//! Keyed single-flight registry.
//!
//! The first caller for a key starts the work and stores a shared completion
//! handle; later callers for the same key await that handle instead of
//! duplicating the fetch. The entry is removed on completion, so a later
//! caller after completion starts fresh work.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

/// Deduplicates concurrent operations by key.
#[derive(Debug, Default)]
pub struct SingleFlight<T: Clone + Send + Sync + 'static> {
    inflight: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `operation` for `key`, sharing the result with every concurrent
    /// caller of the same key. If the operation fails, one of the waiting
    /// callers runs its own attempt instead of all failing together.
    pub async fn run<F, Fut, E>(&self, key: &str, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cell = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell.get_or_try_init(operation).await.cloned();

        let mut inflight = self.inflight.lock().await;
        if let Some(existing) = inflight.get(key) {
            if Arc::ptr_eq(existing, &cell) {
                inflight.remove(key);
            }
        }

        result
    }
}
