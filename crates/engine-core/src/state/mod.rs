use crate::error::StateStoreError;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

pub mod keys;
pub mod sled_store;

/// Durable key-value registry holding job configuration and checkpoints.
///
/// Keys are `/`-separated paths. Implementations must offer read-your-writes
/// consistency to a single caller.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StateStoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StateStoreError>;

    /// Names of the direct children of `key`, sorted.
    async fn list_children(&self, key: &str) -> Result<Vec<String>, StateStoreError>;

    /// Removes `key` and everything below it.
    async fn delete(&self, key: &str) -> Result<(), StateStoreError>;
}

pub(crate) async fn get_json<T: DeserializeOwned>(
    store: &dyn RegistryStore,
    key: &str,
) -> Result<Option<T>, StateStoreError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StateStoreError::Serialization {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

pub(crate) async fn set_json<T: Serialize + ?Sized>(
    store: &dyn RegistryStore,
    key: &str,
    value: &T,
) -> Result<(), StateStoreError> {
    let raw = serde_json::to_string(value).map_err(|source| StateStoreError::Serialization {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &raw).await
}
