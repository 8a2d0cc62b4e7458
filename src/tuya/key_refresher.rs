use crate::tuya::key_store::{KeyStore, KeyStoreError};
use crate::tuya::protocol::LocalKey;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::warn;

/// Source of replacement keys once the lamp rejects the current one.
#[async_trait]
pub trait KeyRefresher: Debug + Send + Sync {
    /// Keys worth trying instead of `rejected`, most promising first.
    async fn candidates(&self, rejected: &LocalKey) -> Vec<LocalKey>;

    /// Called with the candidate the lamp accepted.
    async fn accepted(&self, key: &LocalKey) -> Result<(), KeyStoreError>;
}

/// Offers the key in the store, which the pairing tool or an operator may have replaced, then the configured key.
#[derive(Debug, Clone)]
pub struct StoredKeyRefresher {
    store: Arc<dyn KeyStore>,
    configured: LocalKey,
}

impl StoredKeyRefresher {
    pub fn new(store: Arc<dyn KeyStore>, configured: LocalKey) -> Self {
        StoredKeyRefresher { store, configured }
    }
}

#[async_trait]
impl KeyRefresher for StoredKeyRefresher {
    async fn candidates(&self, rejected: &LocalKey) -> Vec<LocalKey> {
        let stored = self.store.load().unwrap_or_else(|e| {
            warn!("⚠️ Could not read the stored key: {}", e);
            None
        });

        let mut candidates: Vec<LocalKey> = Vec::new();
        for key in stored.into_iter().chain(std::iter::once(self.configured.clone())) {
            if &key != rejected && !candidates.contains(&key) {
                candidates.push(key);
            }
        }
        candidates
    }

    async fn accepted(&self, key: &LocalKey) -> Result<(), KeyStoreError> {
        self.store.store(key)
    }
}
