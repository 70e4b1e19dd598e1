use engine_config::task::TaskConfiguration;
use engine_core::{error::StateStoreError, metrics::Metrics, progress::JobItemProgressRepository};
use engine_processing::{
    importer::ImporterListener,
    task::{PipelineTask, incremental::IncrementalTask, inventory::InventoryTask},
};
use model::{
    position::IngestPosition,
    progress::{IncrementalTasksProgress, InventoryTasksProgress, JobItemProgress, JobStatus},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Progress counters of one job item, fed by the importers of its tasks.
#[derive(Debug, Default)]
pub struct ItemCounters {
    processed: AtomicU64,
    latest_active_millis: AtomicI64,
    dirty: AtomicBool,
}

impl ItemCounters {
    pub fn with_processed(processed: u64) -> Self {
        Self {
            processed: AtomicU64::new(processed),
            ..Self::default()
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn latest_active_millis(&self) -> i64 {
        self.latest_active_millis.load(Ordering::Relaxed)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clears the dirty flag, returning whether it was set.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}

/// Counts imported records. Incremental batches also refresh the item's last activity.
pub struct ItemProgressListener {
    counters: Arc<ItemCounters>,
    incremental: bool,
}

impl ItemProgressListener {
    pub fn inventory(counters: Arc<ItemCounters>) -> Arc<Self> {
        Arc::new(Self {
            counters,
            incremental: false,
        })
    }

    pub fn incremental(counters: Arc<ItemCounters>) -> Arc<Self> {
        Arc::new(Self {
            counters,
            incremental: true,
        })
    }
}

impl ImporterListener for ItemProgressListener {
    fn on_batch_imported(&self, task_id: &str, records: usize, position: &IngestPosition) {
        self.counters
            .processed
            .fetch_add(records as u64, Ordering::Relaxed);
        if self.incremental {
            self.counters
                .latest_active_millis
                .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
        }
        self.counters.mark_dirty();
        debug!(task_id, records, position = %position, "Batch committed");
    }
}

/// Runtime state of one sharding item: its tasks, status and counters.
pub struct JobItemContext {
    pub job_id: String,
    pub sharding_item: usize,
    pub config: TaskConfiguration,
    pub inventory_tasks: Vec<Arc<InventoryTask>>,
    pub incremental_task: Arc<IncrementalTask>,
    pub inventory_record_count: u64,
    pub metrics: Metrics,
    pub counters: Arc<ItemCounters>,
    status: watch::Sender<JobStatus>,
    stopping: CancellationToken,
    cut_over: AtomicBool,
    repository: JobItemProgressRepository,
}

impl JobItemContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: TaskConfiguration,
        status: JobStatus,
        inventory_tasks: Vec<Arc<InventoryTask>>,
        incremental_task: Arc<IncrementalTask>,
        inventory_record_count: u64,
        metrics: Metrics,
        counters: Arc<ItemCounters>,
        repository: JobItemProgressRepository,
    ) -> Self {
        let (status, _) = watch::channel(status);
        Self {
            job_id: config.job_id.clone(),
            sharding_item: config.sharding_item,
            config,
            inventory_tasks,
            incremental_task,
            inventory_record_count,
            metrics,
            counters,
            status,
            stopping: CancellationToken::new(),
            cut_over: AtomicBool::new(false),
            repository,
        }
    }

    pub fn data_source_name(&self) -> &str {
        &self.config.dumper.data_source_name
    }

    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<JobStatus> {
        self.status.subscribe()
    }

    pub fn set_status(&self, status: JobStatus) {
        info!(
            job_id = %self.job_id,
            sharding_item = self.sharding_item,
            status = %status,
            "Job item status changed"
        );
        self.status.send_replace(status);
        self.counters.mark_dirty();
    }

    /// Stops every task of the item. Tasks not yet started will not start.
    pub fn stop(&self) {
        self.stopping.cancel();
        for task in &self.inventory_tasks {
            task.stop();
        }
        self.incremental_task.stop();
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.is_cancelled()
    }

    pub fn stopping(&self) -> &CancellationToken {
        &self.stopping
    }

    /// Stops the item for cutover. The runner then reports it as finished.
    pub fn cut_over(&self) {
        self.cut_over.store(true, Ordering::SeqCst);
        self.stop();
    }

    pub fn is_cut_over(&self) -> bool {
        self.cut_over.load(Ordering::SeqCst)
    }

    /// Snapshot of the item's progress as it would be persisted now.
    pub fn to_progress(&self) -> JobItemProgress {
        JobItemProgress {
            status: self.status(),
            data_source_name: self.data_source_name().to_string(),
            inventory: InventoryTasksProgress {
                positions: self
                    .inventory_tasks
                    .iter()
                    .map(|task| (task.task_id().to_string(), task.position()))
                    .collect(),
            },
            incremental: IncrementalTasksProgress {
                position: self.incremental_task.position(),
                latest_active_time_millis: self.counters.latest_active_millis(),
            },
            processed_record_count: self.counters.processed(),
            inventory_record_count: self.inventory_record_count,
        }
    }

    pub async fn persist(&self) -> Result<(), StateStoreError> {
        self.counters.take_dirty();
        self.repository
            .persist(&self.job_id, self.sharding_item, &self.to_progress())
            .await
    }
}
