use crate::error::JobError;
use engine_config::job::MigrationJobConfiguration;
use engine_core::{connectors::DataSourceProvider, consistency::CheckRangeRepository};
use engine_processing::check::DataConsistencyChecker;
use model::check::TableCheckResult;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::watch;
use tracing::info;

/// Runs consistency checks of one job, one at a time, and keeps the live one reachable
/// for `stop`.
pub struct ConsistencyCheckRunner {
    current: watch::Sender<Option<Arc<DataConsistencyChecker>>>,
}

impl ConsistencyCheckRunner {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self { current }
    }

    pub async fn run(
        &self,
        job: &MigrationJobConfiguration,
        data_sources: Arc<dyn DataSourceProvider>,
        repository: CheckRangeRepository,
    ) -> Result<BTreeMap<String, TableCheckResult>, JobError> {
        let checker = Arc::new(DataConsistencyChecker::new(
            job.clone(),
            data_sources,
            repository,
        )?);
        let claimed = self.current.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(checker.clone());
            true
        });
        if !claimed {
            return Err(JobError::CheckRunning(job.job_id.clone()));
        }
        info!(job_id = %job.job_id, algorithm = checker.algorithm_type(), "Running consistency check");
        let result = checker.check().await;
        self.current.send_replace(None);

        let result = result?;
        let mismatched = result.values().filter(|r| !r.matched && !r.is_ignored()).count();
        info!(
            job_id = %job.job_id,
            tables = result.len(),
            mismatched,
            canceled = checker.is_canceling(),
            "Consistency check finished"
        );
        Ok(result)
    }

    /// Cancels the running check, if any.
    pub fn stop(&self) -> bool {
        let current = self.current.borrow().clone();
        match current {
            Some(checker) => {
                checker.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.current.borrow().is_some()
    }
}

impl Default for ConsistencyCheckRunner {
    fn default() -> Self {
        Self::new()
    }
}
