use crate::{
    error::StateStoreError,
    state::{RegistryStore, get_json, keys, set_json},
};
use model::check::{TableCheckRangePosition, TableCheckResult};
use std::{collections::BTreeMap, sync::Arc};

/// Persists consistency-check range positions and results so a check can resume.
#[derive(Clone)]
pub struct CheckRangeRepository {
    store: Arc<dyn RegistryStore>,
}

impl CheckRangeRepository {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        CheckRangeRepository { store }
    }

    pub async fn persist_ranges(
        &self,
        job_id: &str,
        ranges: &[TableCheckRangePosition],
    ) -> Result<(), StateStoreError> {
        set_json(self.store.as_ref(), &keys::check_ranges(job_id), ranges).await
    }

    pub async fn load_ranges(
        &self,
        job_id: &str,
    ) -> Result<Vec<TableCheckRangePosition>, StateStoreError> {
        Ok(get_json(self.store.as_ref(), &keys::check_ranges(job_id))
            .await?
            .unwrap_or_default())
    }

    pub async fn persist_result(
        &self,
        job_id: &str,
        result: &BTreeMap<String, TableCheckResult>,
    ) -> Result<(), StateStoreError> {
        set_json(self.store.as_ref(), &keys::check_result(job_id), result).await
    }

    pub async fn load_result(
        &self,
        job_id: &str,
    ) -> Result<Option<BTreeMap<String, TableCheckResult>>, StateStoreError> {
        get_json(self.store.as_ref(), &keys::check_result(job_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::sled_store::SledRegistryStore;
    use model::core::{identifiers::DataNode, value::Value};

    #[tokio::test]
    async fn keeps_checked_flags() {
        let store: Arc<dyn RegistryStore> = Arc::new(SledRegistryStore::temporary().unwrap());
        let repo = CheckRangeRepository::new(store);

        let mut first = TableCheckRangePosition::new(
            0,
            DataNode::new("ds_0", "t_order"),
            "t_order",
            Some(Value::Int(1)),
            Some(Value::Int(100)),
        );
        first.mark_checked(true);
        let second = TableCheckRangePosition::new(
            1,
            DataNode::new("ds_0", "t_order"),
            "t_order",
            Some(Value::Int(101)),
            None,
        );
        repo.persist_ranges("j1", &[first.clone(), second.clone()])
            .await
            .unwrap();

        let loaded = repo.load_ranges("j1").await.unwrap();
        assert_eq!(loaded, vec![first, second]);
        assert!(repo.load_ranges("j2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stores_results_by_table() {
        let store: Arc<dyn RegistryStore> = Arc::new(SledRegistryStore::temporary().unwrap());
        let repo = CheckRangeRepository::new(store);
        let mut result = BTreeMap::new();
        result.insert("t_order".to_string(), TableCheckResult::matched(false));

        repo.persist_result("j1", &result).await.unwrap();
        assert_eq!(repo.load_result("j1").await.unwrap(), Some(result));
    }
}
