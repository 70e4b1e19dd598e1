use crate::{error::StateStoreError, state::RegistryStore};
use async_trait::async_trait;
use std::{collections::BTreeSet, path::Path};

pub struct SledRegistryStore {
    db: sled::Db,
}

impl SledRegistryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, sled::Error> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Registry that lives only as long as the process, for embedded use.
    pub fn temporary() -> Result<Self, sled::Error> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    #[inline]
    fn child_prefix(key: &str) -> String {
        format!("{}/", key.trim_end_matches('/'))
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<String, StateStoreError> {
        String::from_utf8(bytes.to_vec()).map_err(|_| StateStoreError::InvalidUtf8(key.to_string()))
    }
}

#[async_trait]
impl RegistryStore for SledRegistryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StateStoreError> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(Self::decode(key, &bytes)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StateStoreError> {
        self.db.insert(key, value.as_bytes())?;
        Ok(())
    }

    async fn list_children(&self, key: &str) -> Result<Vec<String>, StateStoreError> {
        let prefix = Self::child_prefix(key);
        let mut children = BTreeSet::new();

        for item in self.db.scan_prefix(&prefix) {
            let (full_key, _) = item?;
            let full_key = Self::decode(key, &full_key)?;
            if let Some(child) = full_key[prefix.len()..].split('/').next()
                && !child.is_empty()
            {
                children.insert(child.to_string());
            }
        }

        Ok(children.into_iter().collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StateStoreError> {
        let prefix = Self::child_prefix(key);
        let mut batch = sled::Batch::default();
        batch.remove(key);
        for item in self.db.scan_prefix(&prefix) {
            let (child, _) = item?;
            batch.remove(child);
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }
}
