use crate::{
    error::StateStoreError,
    state::{RegistryStore, get_json, keys, set_json},
};
use model::progress::JobItemProgress;
use std::sync::Arc;
use tracing::debug;

/// Reads and writes per-item job progress in the registry.
#[derive(Clone)]
pub struct JobItemProgressRepository {
    store: Arc<dyn RegistryStore>,
}

impl JobItemProgressRepository {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        JobItemProgressRepository { store }
    }

    pub async fn persist(
        &self,
        job_id: &str,
        sharding_item: usize,
        progress: &JobItemProgress,
    ) -> Result<(), StateStoreError> {
        let key = keys::job_item_progress(job_id, sharding_item);
        set_json(self.store.as_ref(), &key, progress).await?;
        debug!(
            job_id,
            sharding_item,
            status = %progress.status,
            finished = progress.inventory.finished_count(),
            "Persisted job item progress"
        );
        Ok(())
    }

    pub async fn load(
        &self,
        job_id: &str,
        sharding_item: usize,
    ) -> Result<Option<JobItemProgress>, StateStoreError> {
        get_json(
            self.store.as_ref(),
            &keys::job_item_progress(job_id, sharding_item),
        )
        .await
    }

    /// Progress of items `0..sharding_count`, `None` where nothing has been persisted yet.
    pub async fn load_all(
        &self,
        job_id: &str,
        sharding_count: usize,
    ) -> Result<Vec<Option<JobItemProgress>>, StateStoreError> {
        let mut result = Vec::with_capacity(sharding_count);
        for item in 0..sharding_count {
            result.push(self.load(job_id, item).await?);
        }
        Ok(result)
    }

    /// Sharding items that have persisted progress, ascending.
    pub async fn list_items(&self, job_id: &str) -> Result<Vec<usize>, StateStoreError> {
        let mut items: Vec<usize> = self
            .store
            .list_children(&keys::job_offsets(job_id))
            .await?
            .iter()
            .filter_map(|child| child.parse().ok())
            .collect();
        items.sort_unstable();
        Ok(items)
    }

    pub async fn delete_job(&self, job_id: &str) -> Result<(), StateStoreError> {
        self.store.delete(&keys::job(job_id)).await
    }
}
