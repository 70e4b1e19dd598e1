use crate::{
    check_runner::ConsistencyCheckRunner,
    context::JobItemContext,
    detector,
    error::JobError,
    persist::PersistService,
    prepare::JobItemPreparer,
    runner::{ItemOutcome, TasksRunner},
    settings::RuntimeSettings,
};
use engine_config::{
    job::MigrationJobConfiguration, process::PipelineProcessConfiguration,
    repository::PipelineConfigRepository,
};
use engine_core::{
    connectors::DataSourceProvider, consistency::CheckRangeRepository,
    progress::JobItemProgressRepository, state::RegistryStore,
};
use futures::lock::Mutex;
use model::{
    check::TableCheckResult,
    progress::{JobItemProgress, JobStatus},
};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct RunningJob {
    contexts: Vec<Arc<JobItemContext>>,
    runners: Vec<JoinHandle<Result<ItemOutcome, JobError>>>,
    persist_cancel: CancellationToken,
    persist: JoinHandle<()>,
}

impl RunningJob {
    /// Waits for every item runner and the persist service. Returns the first failure.
    async fn join(self) -> Result<Vec<ItemOutcome>, JobError> {
        let mut outcomes = Vec::with_capacity(self.runners.len());
        let mut first_error = None;
        for runner in self.runners {
            match runner.await {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(err) => {
                    first_error.get_or_insert(JobError::TaskJoin(err));
                }
            }
        }
        self.persist_cancel.cancel();
        if let Err(err) = self.persist.await {
            warn!(error = %err, "Persist service did not shut down cleanly");
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(outcomes),
        }
    }
}

/// One migration job: all its sharding items, their runners and the consistency check.
pub struct MigrationJob {
    config: MigrationJobConfiguration,
    data_sources: Arc<dyn DataSourceProvider>,
    config_repository: PipelineConfigRepository,
    progress_repository: JobItemProgressRepository,
    check_repository: CheckRangeRepository,
    settings: RuntimeSettings,
    running: Mutex<Option<RunningJob>>,
    check: ConsistencyCheckRunner,
}

impl MigrationJob {
    fn assemble(
        config: MigrationJobConfiguration,
        store: Arc<dyn RegistryStore>,
        data_sources: Arc<dyn DataSourceProvider>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            config,
            data_sources,
            config_repository: PipelineConfigRepository::new(store.clone()),
            progress_repository: JobItemProgressRepository::new(store.clone()),
            check_repository: CheckRangeRepository::new(store),
            settings,
            running: Mutex::new(None),
            check: ConsistencyCheckRunner::new(),
        }
    }

    /// Validates and registers a new job. The process configuration is stored too
    /// when given.
    pub async fn create(
        config: MigrationJobConfiguration,
        process: Option<&PipelineProcessConfiguration>,
        store: Arc<dyn RegistryStore>,
        data_sources: Arc<dyn DataSourceProvider>,
        settings: RuntimeSettings,
    ) -> Result<Self, JobError> {
        let job = Self::assemble(config, store, data_sources, settings);
        if let Some(process) = process {
            job.config_repository.persist_process_config(process).await?;
        }
        job.config_repository.persist_job_config(&job.config).await?;
        info!(job_id = %job.config.job_id, "Created migration job");
        Ok(job)
    }

    /// Loads a job registered earlier.
    pub async fn load(
        job_id: &str,
        store: Arc<dyn RegistryStore>,
        data_sources: Arc<dyn DataSourceProvider>,
        settings: RuntimeSettings,
    ) -> Result<Self, JobError> {
        let config = PipelineConfigRepository::new(store.clone())
            .load_job_config(job_id)
            .await?
            .ok_or_else(|| JobError::JobNotFound(job_id.to_string()))?;
        Ok(Self::assemble(config, store, data_sources, settings))
    }

    pub fn job_id(&self) -> &str {
        &self.config.job_id
    }

    pub fn config(&self) -> &MigrationJobConfiguration {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Prepares every sharding item and starts its runner. Items resume from their
    /// persisted progress.
    pub async fn start(&self) -> Result<(), JobError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(JobError::AlreadyRunning(self.job_id().to_string()));
        }

        let process = self.config_repository.load_process_config().await?;
        let preparer = JobItemPreparer::new(
            self.data_sources.clone(),
            self.progress_repository.clone(),
            self.settings,
        );
        let mut contexts = Vec::with_capacity(self.config.sharding_count());
        for item in 0..self.config.sharding_count() {
            match preparer.prepare(&self.config, item, &process).await {
                Ok(context) => contexts.push(Arc::new(context)),
                Err(err) => {
                    self.persist_prepare_failure(item, &err).await;
                    return Err(err);
                }
            }
        }

        let runners = contexts
            .iter()
            .map(|ctx| {
                let runner = TasksRunner::new(ctx.clone());
                tokio::spawn(async move { runner.run().await })
            })
            .collect();
        let persist_cancel = CancellationToken::new();
        let persist = PersistService::new(contexts.clone(), self.settings.persist_interval)
            .spawn(persist_cancel.clone());

        info!(job_id = %self.job_id(), items = contexts.len(), "Started migration job");
        *running = Some(RunningJob {
            contexts,
            runners,
            persist_cancel,
            persist,
        });
        Ok(())
    }

    async fn persist_prepare_failure(&self, item: usize, err: &JobError) {
        error!(job_id = %self.job_id(), sharding_item = item, error = %err, "Failed to prepare job item");
        let data_source = self
            .config
            .line(item)
            .ok()
            .and_then(|line| line.data_source_name())
            .unwrap_or_default();
        let mut progress = match self.progress_repository.load(self.job_id(), item).await {
            Ok(Some(progress)) => progress,
            _ => JobItemProgress::new(data_source),
        };
        progress.status = JobStatus::Error(err.to_string());
        if let Err(persist_err) = self
            .progress_repository
            .persist(self.job_id(), item, &progress)
            .await
        {
            warn!(job_id = %self.job_id(), sharding_item = item, error = %persist_err, "Failed to record preparation error");
        }
    }

    /// Stops every item at its next batch boundary and persists resumable progress.
    pub async fn stop(&self) -> Result<(), JobError> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };
        for ctx in &running.contexts {
            ctx.stop();
        }
        let outcome = running.join().await;
        info!(job_id = %self.job_id(), "Stopped migration job");
        outcome.map(|_| ())
    }

    /// Waits for all item runners to end on their own, by failure or cutover from
    /// another handle.
    pub async fn join(&self) -> Result<Vec<ItemOutcome>, JobError> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(Vec::new());
        };
        running.join().await
    }

    /// Live progress of a running job, persisted progress otherwise.
    pub async fn progress(&self) -> Result<Vec<Option<JobItemProgress>>, JobError> {
        if let Some(running) = self.running.lock().await.as_ref() {
            return Ok(running
                .contexts
                .iter()
                .map(|ctx| Some(ctx.to_progress()))
                .collect());
        }
        Ok(self
            .progress_repository
            .load_all(self.job_id(), self.config.sharding_count())
            .await?)
    }

    pub async fn is_inventory_finished(&self) -> Result<bool, JobError> {
        let progress = self.progress().await?;
        Ok(detector::is_inventory_finished(
            self.config.sharding_count(),
            &progress,
        ))
    }

    pub async fn is_completed(&self) -> Result<bool, JobError> {
        let progress = self.progress().await?;
        Ok(detector::is_job_completed(
            self.config.sharding_count(),
            &progress,
        ))
    }

    /// Waits for the inventory to finish and incremental replay to reach the current
    /// end of every source change log, then stops all items as finished.
    pub async fn cutover(&self) -> Result<(), JobError> {
        let contexts = match self.running.lock().await.as_ref() {
            Some(running) => running.contexts.clone(),
            None => return Err(JobError::NotRunning(self.job_id().to_string())),
        };

        let catch_up = self.catch_up(&contexts);
        match tokio::time::timeout(self.settings.cutover_timeout, catch_up).await {
            Ok(result) => result?,
            Err(_) => return Err(JobError::Timeout("cutover".into())),
        }

        for ctx in &contexts {
            ctx.cut_over();
        }
        let Some(running) = self.running.lock().await.take() else {
            return Err(JobError::NotRunning(self.job_id().to_string()));
        };
        let outcomes = running.join().await?;
        info!(job_id = %self.job_id(), items = outcomes.len(), "Migration job cut over");
        Ok(())
    }

    async fn catch_up(&self, contexts: &[Arc<JobItemContext>]) -> Result<(), JobError> {
        let poll = self.settings.poll_interval.max(Duration::from_millis(1));
        while !contexts
            .iter()
            .all(|ctx| detector::is_all_inventory_tasks_finished(&ctx.inventory_tasks))
        {
            fail_on_error(contexts)?;
            tokio::time::sleep(poll).await;
        }

        for ctx in contexts {
            let source = self.data_sources.get(ctx.data_source_name())?;
            let target_lsn = source.current_log_position().await?;
            info!(job_id = %ctx.job_id, sharding_item = ctx.sharding_item, target_lsn, "Waiting for incremental replay");
            while ctx
                .incremental_task
                .applied_lsn()
                .is_none_or(|applied| applied < target_lsn)
            {
                fail_on_error(contexts)?;
                tokio::time::sleep(poll).await;
            }
        }
        Ok(())
    }

    /// Checks the migrated data against the sources. Only allowed once the job has
    /// been cut over; a check interrupted earlier resumes from its persisted ranges.
    pub async fn check_consistency(&self) -> Result<BTreeMap<String, TableCheckResult>, JobError> {
        if self.is_running().await || !self.is_completed().await? {
            return Err(JobError::NotCompleted(self.job_id().to_string()));
        }
        self.check
            .run(
                &self.config,
                self.data_sources.clone(),
                self.check_repository.clone(),
            )
            .await
    }

    /// Cancels a running consistency check. Returns whether one was running.
    pub fn stop_check(&self) -> bool {
        self.check.stop()
    }

    pub fn is_checking(&self) -> bool {
        self.check.is_running()
    }

    pub async fn check_result(&self) -> Result<Option<BTreeMap<String, TableCheckResult>>, JobError> {
        Ok(self.check_repository.load_result(self.job_id()).await?)
    }

    /// Stops the job and removes its configuration, progress and check state.
    pub async fn drop_job(self) -> Result<(), JobError> {
        if let Err(err) = self.stop().await {
            warn!(job_id = %self.job_id(), error = %err, "Job ended with an error before being dropped");
        }
        self.progress_repository.delete_job(self.job_id()).await?;
        info!(job_id = %self.job_id(), "Dropped migration job");
        Ok(())
    }
}

fn fail_on_error(contexts: &[Arc<JobItemContext>]) -> Result<(), JobError> {
    for ctx in contexts {
        if let JobStatus::Error(reason) = ctx.status() {
            return Err(JobError::ItemFailed {
                sharding_item: ctx.sharding_item,
                reason,
            });
        }
    }
    Ok(())
}
