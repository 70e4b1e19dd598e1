use crate::{
    channel::pipeline_channel,
    dumper::inventory::InventoryDumper,
    error::TaskError,
    task::{PipelineTask, TaskControl, TaskResources, TaskState, run_pipeline},
};
use async_trait::async_trait;
use engine_core::{connectors::TableMetaData, ratelimit::JobRateLimitAlgorithm};
use model::{core::identifiers::DataNode, position::IngestPosition};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::info;

/// Source side of an inventory task: one key range of one table.
#[derive(Clone)]
pub struct InventorySlice {
    pub logic_table_name: String,
    pub data_node: DataNode,
    pub meta: TableMetaData,
    pub batch_size: usize,
    pub rate_limiter: Option<Arc<dyn JobRateLimitAlgorithm>>,
}

/// Copies one slice of a table's snapshot, resuming from its last imported key.
pub struct InventoryTask {
    control: TaskControl,
    slice: InventorySlice,
    resources: TaskResources,
    /// Set once a pass over the slice has started, here or in an earlier process.
    attempted: AtomicBool,
}

impl InventoryTask {
    pub fn new(
        task_id: impl Into<String>,
        slice: InventorySlice,
        resources: TaskResources,
        position: IngestPosition,
    ) -> Self {
        Self {
            control: TaskControl::new(task_id.into(), position),
            slice,
            resources,
            attempted: AtomicBool::new(false),
        }
    }

    /// Marks the slice as already attempted by an earlier run of the job.
    pub fn resumed(self) -> Self {
        self.attempted.store(true, Ordering::SeqCst);
        self
    }

    pub fn data_node(&self) -> &DataNode {
        &self.slice.data_node
    }
}

#[async_trait]
impl PipelineTask for InventoryTask {
    fn task_id(&self) -> &str {
        &self.control.task_id
    }

    fn position(&self) -> IngestPosition {
        self.control.tracker.current()
    }

    fn state(&self) -> TaskState {
        self.control.state()
    }

    async fn run(&self) -> Result<TaskState, TaskError> {
        let position = self.control.tracker.current();
        if position.is_finished() {
            self.control.set_state(TaskState::Finished);
            return Ok(TaskState::Finished);
        }
        if self.control.cancel.is_cancelled() {
            self.control.set_state(TaskState::Cancelled);
            return Ok(TaskState::Cancelled);
        }

        self.control.set_state(TaskState::Running);
        let replace_copied = self.attempted.swap(true, Ordering::SeqCst)
            && matches!(position, IngestPosition::UnsupportedKey);
        info!(
            task_id = %self.control.task_id,
            position = %position,
            replace_copied,
            "Inventory task started"
        );

        let (tx, rx) = pipeline_channel(self.resources.channel_capacity);
        let mut dumper = InventoryDumper {
            task_id: self.control.task_id.clone(),
            source: self.resources.source.clone(),
            logic_table_name: self.slice.logic_table_name.clone(),
            data_node: self.slice.data_node.clone(),
            meta: self.slice.meta.clone(),
            position,
            batch_size: self.slice.batch_size,
            rate_limiter: self.slice.rate_limiter.clone(),
            channel: tx,
            metrics: self.resources.metrics.clone(),
            replace_copied,
        };
        let mut importer =
            self.resources
                .importer(&self.control.task_id, rx, self.control.tracker.clone());

        let (dumped, imported) = run_pipeline(&mut dumper, &mut importer, &self.control.cancel).await;
        self.control.settle(dumped, imported)
    }

    fn stop(&self) {
        self.control.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_config::task::ImporterConfiguration;
    use engine_core::{
        connectors::{ColumnMetaData, memory::MemoryDataSource},
        metrics::Metrics,
    };
    use model::{
        core::{data_type::DataType, value::Value},
        records::row::RowData,
    };
    use std::{collections::BTreeMap, time::Duration};

    fn meta() -> TableMetaData {
        TableMetaData::new(
            "t_order",
            vec![
                ColumnMetaData::key("order_id", DataType::BigInt),
                ColumnMetaData::new("status", DataType::VarChar),
            ],
        )
    }

    async fn setup(rows: i64) -> (Arc<MemoryDataSource>, Arc<MemoryDataSource>, TaskResources) {
        let source = Arc::new(MemoryDataSource::new("ds_0"));
        let target = Arc::new(MemoryDataSource::new("target"));
        source.create_table(meta()).await;
        target.create_table(meta()).await;
        for id in 1..=rows {
            source
                .insert(
                    "t_order",
                    [("order_id", Value::Int(id)), ("status", Value::from("new"))]
                        .into_iter()
                        .collect(),
                )
                .await
                .unwrap();
        }
        let resources = resources(source.clone(), target.clone());
        (source, target, resources)
    }

    fn resources(source: Arc<MemoryDataSource>, target: Arc<MemoryDataSource>) -> TaskResources {
        TaskResources {
            source,
            target,
            importer: ImporterConfiguration {
                data_source_name: "target".into(),
                target_tables: BTreeMap::new(),
                batch_size: 4,
                rate_limiter: None,
                retry_times: 0,
                concurrency: 2,
            },
            channel_capacity: 2,
            retry_base_delay: Duration::ZERO,
            metrics: Metrics::new(),
            listener: None,
        }
    }

    fn slice() -> InventorySlice {
        slice_of(meta())
    }

    fn slice_of(meta: TableMetaData) -> InventorySlice {
        InventorySlice {
            logic_table_name: meta.name.clone(),
            data_node: DataNode::new("ds_0", meta.name.clone()),
            meta,
            batch_size: 4,
            rate_limiter: None,
        }
    }

    async fn pair_with(
        meta: TableMetaData,
        rows: Vec<RowData>,
    ) -> (Arc<MemoryDataSource>, Arc<MemoryDataSource>) {
        let source = Arc::new(MemoryDataSource::new("ds_0"));
        let target = Arc::new(MemoryDataSource::new("target"));
        source.create_table(meta.clone()).await;
        target.create_table(meta.clone()).await;
        for row in rows {
            source.insert(&meta.name, row).await.unwrap();
        }
        (source, target)
    }

    /// Runs `task` and stops it once the first pages are through.
    async fn run_and_stop(task: Arc<InventoryTask>) -> IngestPosition {
        let running = {
            let task = task.clone();
            tokio::spawn(async move { task.run().await })
        };
        tokio::time::sleep(Duration::from_millis(70)).await;
        task.stop();
        assert_eq!(running.await.unwrap().unwrap(), TaskState::Cancelled);
        task.position()
    }

    #[tokio::test]
    async fn copies_the_table_and_finishes() {
        let (_source, target, resources) = setup(10).await;
        let task = InventoryTask::new("ds_0.t_order#0", slice(), resources, IngestPosition::Placeholder);

        assert_eq!(task.state(), TaskState::NotStarted);
        assert_eq!(task.run().await.unwrap(), TaskState::Finished);
        assert_eq!(task.state(), TaskState::Finished);
        assert_eq!(task.position(), IngestPosition::Finished);
        assert_eq!(target.rows("t_order").await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn finished_position_completes_immediately() {
        let (_source, target, resources) = setup(3).await;
        let task = InventoryTask::new("ds_0.t_order#0", slice(), resources, IngestPosition::Finished);

        assert_eq!(task.run().await.unwrap(), TaskState::Finished);
        assert!(target.rows("t_order").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_failure_fails_the_task() {
        let (_source, target, resources) = setup(3).await;
        target.fail_next_writes(1);
        let task = InventoryTask::new("ds_0.t_order#0", slice(), resources, IngestPosition::Placeholder);

        let err = task.run().await.unwrap_err();
        assert!(matches!(err, TaskError::Importer(_)));
        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(task.position(), IngestPosition::Placeholder);
    }

    #[tokio::test]
    async fn stopped_task_keeps_a_resumable_position() {
        let (source, target, resources) = setup(40).await;
        source.set_read_delay(Duration::from_millis(20));
        let task = Arc::new(InventoryTask::new(
            "ds_0.t_order#0",
            slice(),
            resources.clone(),
            IngestPosition::Placeholder,
        ));

        let stopped_at = run_and_stop(task).await;
        assert!(!stopped_at.is_finished());

        source.set_read_delay(Duration::ZERO);
        let resumed = InventoryTask::new("ds_0.t_order#0", slice(), resources, stopped_at);
        assert_eq!(resumed.run().await.unwrap(), TaskState::Finished);
        assert_eq!(target.rows("t_order").await.unwrap(), source.rows("t_order").await.unwrap());
    }

    #[tokio::test]
    async fn string_key_slice_resumes_from_persisted_position() {
        let meta = TableMetaData::new(
            "t_code",
            vec![
                ColumnMetaData::key("code", DataType::VarChar),
                ColumnMetaData::new("status", DataType::VarChar),
            ],
        );
        let rows = (0..40)
            .map(|n| {
                [
                    ("code", Value::from(format!("k,{n:02}"))),
                    ("status", Value::from("new")),
                ]
                .into_iter()
                .collect::<RowData>()
            })
            .collect();
        let (source, target) = pair_with(meta.clone(), rows).await;
        source.set_read_delay(Duration::from_millis(20));
        let task = Arc::new(InventoryTask::new(
            "ds_0.t_code#0",
            slice_of(meta.clone()),
            resources(source.clone(), target.clone()),
            IngestPosition::Placeholder,
        ));

        let stopped_at = run_and_stop(task).await;
        assert!(!stopped_at.is_finished());
        let persisted = serde_json::to_string(&stopped_at).unwrap();
        let reloaded: IngestPosition = serde_json::from_str(&persisted).unwrap();
        assert_eq!(reloaded, stopped_at);

        source.set_read_delay(Duration::ZERO);
        let resumed = InventoryTask::new(
            "ds_0.t_code#0",
            slice_of(meta),
            resources(source.clone(), target.clone()),
            reloaded,
        )
        .resumed();
        assert_eq!(resumed.run().await.unwrap(), TaskState::Finished);
        assert_eq!(target.rows("t_code").await.unwrap(), source.rows("t_code").await.unwrap());
    }

    fn log_table() -> TableMetaData {
        TableMetaData::new("t_log", vec![ColumnMetaData::new("message", DataType::Text)])
    }

    fn log_rows() -> Vec<RowData> {
        ["m0", "m1", "m2", "m1", "m3", "m4", "m5"]
            .into_iter()
            .map(|m| [("message", Value::from(m))].into_iter().collect::<RowData>())
            .collect()
    }

    #[tokio::test]
    async fn keyless_slice_restart_does_not_duplicate_rows() {
        let (source, target) = pair_with(log_table(), log_rows()).await;

        let first = InventoryTask::new(
            "ds_0.t_log#0",
            slice_of(log_table()),
            resources(source.clone(), target.clone()),
            IngestPosition::UnsupportedKey,
        );
        assert_eq!(first.run().await.unwrap(), TaskState::Finished);

        // The pass completed but its Finished position was never persisted.
        let restarted = InventoryTask::new(
            "ds_0.t_log#0",
            slice_of(log_table()),
            resources(source.clone(), target.clone()),
            IngestPosition::UnsupportedKey,
        )
        .resumed();
        assert_eq!(restarted.run().await.unwrap(), TaskState::Finished);
        assert_eq!(target.rows("t_log").await.unwrap(), source.rows("t_log").await.unwrap());
    }

    #[tokio::test]
    async fn keyless_slice_resumes_after_a_partial_pass() {
        let (source, target) = pair_with(log_table(), log_rows()).await;
        for row in log_rows().into_iter().take(3) {
            target.insert("t_log", row).await.unwrap();
        }

        let task = InventoryTask::new(
            "ds_0.t_log#0",
            slice_of(log_table()),
            resources(source.clone(), target.clone()),
            IngestPosition::UnsupportedKey,
        )
        .resumed();
        assert_eq!(task.run().await.unwrap(), TaskState::Finished);
        assert_eq!(target.rows("t_log").await.unwrap(), source.rows("t_log").await.unwrap());
    }

    #[tokio::test]
    async fn rerunning_a_keyless_task_replaces_its_rows() {
        let (source, target) = pair_with(log_table(), log_rows()).await;
        let task = InventoryTask::new(
            "ds_0.t_log#0",
            slice_of(log_table()),
            resources(source.clone(), target.clone()),
            IngestPosition::UnsupportedKey,
        );
        target.fail_next_writes(1);
        assert!(task.run().await.is_err());

        assert_eq!(task.run().await.unwrap(), TaskState::Finished);
        assert_eq!(target.rows("t_log").await.unwrap(), source.rows("t_log").await.unwrap());
    }
}
