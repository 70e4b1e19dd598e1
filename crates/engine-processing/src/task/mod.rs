use crate::{
    channel::ChannelReceiver,
    dumper::Dumper,
    error::{DumperError, ImporterError, TaskError},
    importer::{ImportOutcome, Importer, ImporterListener, writer::BatchWriter},
    position::PositionTracker,
};
use async_trait::async_trait;
use engine_config::task::ImporterConfiguration;
use engine_core::{connectors::PipelineDataSource, metrics::Metrics, retry::RetryPolicy};
use model::position::IngestPosition;
use std::{fmt, sync::Arc, time::Duration};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub mod incremental;
pub mod inventory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    NotStarted,
    Running,
    Finished,
    Cancelled,
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::NotStarted => f.write_str("NOT_STARTED"),
            TaskState::Running => f.write_str("RUNNING"),
            TaskState::Finished => f.write_str("FINISHED"),
            TaskState::Cancelled => f.write_str("CANCELLED"),
            TaskState::Failed => f.write_str("FAILED"),
        }
    }
}

/// A dumper/importer pair moving data of one job item.
#[async_trait]
pub trait PipelineTask: Send + Sync {
    fn task_id(&self) -> &str;

    /// Last fully imported position.
    fn position(&self) -> IngestPosition;

    fn state(&self) -> TaskState;

    /// Runs until the data is exhausted, the task is stopped or something fails.
    async fn run(&self) -> Result<TaskState, TaskError>;

    /// Requests a cooperative stop at the next batch boundary.
    fn stop(&self);
}

/// Everything a task needs on the writing side, shared by the tasks of a job item.
#[derive(Clone)]
pub struct TaskResources {
    pub source: Arc<dyn PipelineDataSource>,
    pub target: Arc<dyn PipelineDataSource>,
    pub importer: ImporterConfiguration,
    pub channel_capacity: usize,
    pub retry_base_delay: Duration,
    pub metrics: Metrics,
    pub listener: Option<Arc<dyn ImporterListener>>,
}

impl TaskResources {
    pub fn with_listener(mut self, listener: Arc<dyn ImporterListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub(crate) fn importer(
        &self,
        task_id: &str,
        channel: ChannelReceiver,
        tracker: PositionTracker,
    ) -> Importer {
        Importer {
            task_id: task_id.to_string(),
            channel,
            writer: BatchWriter::new(
                self.target.clone(),
                self.importer.target_tables.clone(),
                self.importer.concurrency,
                RetryPolicy::from_retry_times(self.importer.retry_times, self.retry_base_delay),
                self.metrics.clone(),
            ),
            batch_size: self.importer.batch_size,
            rate_limiter: self.importer.rate_limiter.clone(),
            tracker,
            listener: self.listener.clone(),
        }
    }
}

/// Lifecycle shared by inventory and incremental tasks.
pub(crate) struct TaskControl {
    pub task_id: String,
    pub tracker: PositionTracker,
    pub cancel: CancellationToken,
    state: watch::Sender<TaskState>,
}

impl TaskControl {
    pub fn new(task_id: String, position: IngestPosition) -> Self {
        let (state, _) = watch::channel(TaskState::NotStarted);
        Self {
            task_id,
            tracker: PositionTracker::new(position),
            cancel: CancellationToken::new(),
            state,
        }
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    pub fn set_state(&self, state: TaskState) {
        self.state.send_replace(state);
    }

    /// Records the final state from the outcome of both sides. An importer failure
    /// wins over a dumper failure; the dumper only stops early when something went
    /// wrong or the task was cancelled.
    pub fn settle(
        &self,
        dumped: Result<(), DumperError>,
        imported: Result<ImportOutcome, ImporterError>,
    ) -> Result<TaskState, TaskError> {
        let result = match (dumped, imported) {
            (_, Err(err)) => Err(TaskError::Importer(err)),
            (Err(err), _) => Err(TaskError::Dumper(err)),
            (Ok(()), Ok(ImportOutcome::Finished)) => Ok(TaskState::Finished),
            (Ok(()), Ok(_)) => Ok(TaskState::Cancelled),
        };
        match &result {
            Ok(state) => {
                self.set_state(*state);
                info!(task_id = %self.task_id, state = %state, position = %self.tracker.current(), "Task stopped");
            }
            Err(err) => {
                self.set_state(TaskState::Failed);
                error!(task_id = %self.task_id, error = %err, "Task failed");
            }
        }
        result
    }
}

/// Runs both sides of a task. The importer stops the dumper when it is done, and a
/// failing dumper stops the importer.
pub(crate) async fn run_pipeline<D: Dumper>(
    dumper: &mut D,
    importer: &mut Importer,
    cancel: &CancellationToken,
) -> (Result<(), DumperError>, Result<ImportOutcome, ImporterError>) {
    let dumper_cancel = cancel.child_token();
    let importer_cancel = cancel.child_token();

    let dump = async {
        let result = dumper.run(&dumper_cancel).await;
        if result.is_err() {
            importer_cancel.cancel();
        }
        result
    };
    let import = async {
        let outcome = importer.run(&importer_cancel).await;
        dumper_cancel.cancel();
        outcome
    };
    tokio::join!(dump, import)
}
