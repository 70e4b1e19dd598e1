use crate::{context::JobItemContext, detector, error::JobError};
use engine_processing::task::{PipelineTask, TaskState};
use futures::future::join_all;
use model::progress::JobStatus;
use std::sync::Arc;
use tracing::{error, info, warn};

/// How a job item run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Cut over, or already finished by an earlier run.
    Finished,
    /// Stopped with resumable positions.
    Stopped,
}

/// Drives one job item through inventory and incremental replay.
pub struct TasksRunner {
    context: Arc<JobItemContext>,
}

impl TasksRunner {
    pub fn new(context: Arc<JobItemContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<JobItemContext> {
        &self.context
    }

    /// Runs the item to cutover or stop. Failures are recorded as the item's
    /// `Error` status before being returned.
    pub async fn run(&self) -> Result<ItemOutcome, JobError> {
        let ctx = &self.context;
        if ctx.status() == JobStatus::Finished {
            info!(job_id = %ctx.job_id, sharding_item = ctx.sharding_item, "Job item already finished");
            return Ok(ItemOutcome::Finished);
        }

        let result = self.run_tasks().await;
        match &result {
            Ok(ItemOutcome::Finished) => ctx.set_status(JobStatus::Finished),
            Ok(ItemOutcome::Stopped) => {}
            Err(err) => {
                error!(job_id = %ctx.job_id, sharding_item = ctx.sharding_item, error = %err, "Job item failed");
                ctx.set_status(JobStatus::Error(err.to_string()));
            }
        }
        ctx.persist().await?;
        result
    }

    async fn run_tasks(&self) -> Result<ItemOutcome, JobError> {
        let ctx = &self.context;
        ctx.set_status(JobStatus::ExecuteInventoryTask);
        ctx.persist().await?;

        self.run_inventory().await?;
        if !detector::is_all_inventory_tasks_finished(&ctx.inventory_tasks) {
            info!(job_id = %ctx.job_id, sharding_item = ctx.sharding_item, "Inventory stopped before finishing");
            return Ok(ItemOutcome::Stopped);
        }
        if ctx.is_stopping() {
            return Ok(self.stopped_outcome());
        }

        ctx.set_status(JobStatus::ExecuteIncrementalTask);
        ctx.persist().await?;
        let state = ctx.incremental_task.run().await?;
        info!(
            job_id = %ctx.job_id,
            sharding_item = ctx.sharding_item,
            state = %state,
            position = %ctx.incremental_task.position(),
            "Incremental task ended"
        );
        Ok(self.stopped_outcome())
    }

    fn stopped_outcome(&self) -> ItemOutcome {
        if self.context.is_cut_over() {
            ItemOutcome::Finished
        } else {
            ItemOutcome::Stopped
        }
    }

    /// Runs all unfinished inventory tasks concurrently. The first failure stops the
    /// remaining tasks.
    async fn run_inventory(&self) -> Result<(), JobError> {
        let ctx = &self.context;
        let handles: Vec<_> = ctx
            .inventory_tasks
            .iter()
            .filter(|task| !task.position().is_finished())
            .map(|task| {
                let task = task.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let result = task.run().await;
                    if result.is_err() {
                        ctx.stop();
                    }
                    result
                })
            })
            .collect();
        info!(
            job_id = %ctx.job_id,
            sharding_item = ctx.sharding_item,
            running = handles.len(),
            total = ctx.inventory_tasks.len(),
            "Running inventory tasks"
        );

        let mut first_error: Option<JobError> = None;
        for joined in join_all(handles).await {
            let outcome = joined.map_err(JobError::from).and_then(|r| r.map_err(JobError::from));
            match outcome {
                Ok(TaskState::Finished) => {}
                Ok(state) => warn!(job_id = %ctx.job_id, state = %state, "Inventory task did not finish"),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
