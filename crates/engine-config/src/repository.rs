use crate::{error::ConfigError, job::MigrationJobConfiguration, process::PipelineProcessConfiguration};
use engine_core::state::{RegistryStore, keys};
use std::sync::Arc;
use tracing::info;

/// Registry persistence of job and process configuration.
#[derive(Clone)]
pub struct PipelineConfigRepository {
    store: Arc<dyn RegistryStore>,
}

impl PipelineConfigRepository {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self { store }
    }

    pub async fn persist_job_config(
        &self,
        config: &MigrationJobConfiguration,
    ) -> Result<(), ConfigError> {
        config.validate()?;
        let raw = serde_json::to_string(config)?;
        self.store
            .set(&keys::job_config(&config.job_id), &raw)
            .await?;
        info!(
            job_id = %config.job_id,
            sharding_count = config.sharding_count(),
            "Persisted job configuration"
        );
        Ok(())
    }

    pub async fn load_job_config(
        &self,
        job_id: &str,
    ) -> Result<Option<MigrationJobConfiguration>, ConfigError> {
        match self.store.get(&keys::job_config(job_id)).await? {
            Some(raw) => Ok(Some(MigrationJobConfiguration::from_json(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn list_job_ids(&self) -> Result<Vec<String>, ConfigError> {
        Ok(self.store.list_children(&keys::jobs()).await?)
    }

    pub async fn persist_process_config(
        &self,
        config: &PipelineProcessConfiguration,
    ) -> Result<(), ConfigError> {
        config.validate()?;
        let raw = serde_json::to_string(config)?;
        self.store.set(&keys::process_config(), &raw).await?;
        Ok(())
    }

    /// The persisted process configuration, or the defaults when none was stored.
    pub async fn load_process_config(&self) -> Result<PipelineProcessConfiguration, ConfigError> {
        match self.store.get(&keys::process_config()).await? {
            Some(raw) => PipelineProcessConfiguration::from_json(&raw),
            None => Ok(PipelineProcessConfiguration::default()),
        }
    }
}
