// Version-keyed store of derived operation sequences
//
// Populated on miss, never evicted within a run. Each key holds its own
// `OnceCell`, so callers that ask for a key still being derived wait for
// that derivation instead of starting another one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::debug;

use super::OperationSequence;

type Slot = Arc<OnceCell<Arc<OperationSequence>>>;

/// Injectable cipher cache shared by every download of a run
#[derive(Default)]
pub struct CipherCache {
    slots: RwLock<HashMap<String, Slot>>,
}

impl CipherCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, key: &str) -> Slot {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(key) {
                return slot.clone();
            }
        }

        let mut slots = self.slots.write().await;
        slots.entry(key.to_string()).or_default().clone()
    }

    /// Cached sequence for `key`, if already derived
    pub async fn get(&self, key: &str) -> Option<Arc<OperationSequence>> {
        let slots = self.slots.read().await;
        slots.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Pre-seed a sequence. Returns false when the key was already populated.
    pub async fn insert(&self, key: &str, sequence: OperationSequence) -> bool {
        self.slot(key).await.set(Arc::new(sequence)).is_ok()
    }

    /// Return the cached sequence or run `derive` exactly once for this key.
    ///
    /// A failed derivation leaves the key empty so a later call can retry.
    pub async fn get_or_derive<F, Fut, E>(
        &self,
        key: &str,
        derive: F,
    ) -> Result<Arc<OperationSequence>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<OperationSequence, E>>,
    {
        let slot = self.slot(key).await;
        if let Some(cached) = slot.get() {
            debug!(key, "cipher cache hit");
            return Ok(cached.clone());
        }

        slot.get_or_try_init(|| async {
            debug!(key, "cipher cache miss, deriving");
            derive().await.map(Arc::new)
        })
        .await
        .cloned()
    }

    /// Number of populated keys
    pub async fn len(&self) -> usize {
        let slots = self.slots.read().await;
        slots.values().filter(|slot| slot.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
