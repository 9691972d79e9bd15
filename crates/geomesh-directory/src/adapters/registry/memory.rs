use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;

use crate::domain::RegistryError;
use crate::ports::{RegistryEntry, RegistryScan, RegistryStore};

/// In-process registry shared by cloning.
///
/// Every clone sees the same map, so several directories and publishers in
/// one process can talk through it.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Remove a key, returning its value.
    pub fn remove(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.write().remove(key)
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistry {
    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), RegistryError> {
        self.data.write().insert(key.to_vec(), value);
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Vec<u8>, RegistryError> {
        self.data
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(key))
    }

    async fn scan(&self, prefix: &[u8]) -> Result<RegistryScan, RegistryError> {
        let entries: Vec<Result<RegistryEntry, RegistryError>> = self
            .data
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| Ok((k.clone(), v.clone())))
            .collect();
        Ok(stream::iter(entries).boxed())
    }
}
