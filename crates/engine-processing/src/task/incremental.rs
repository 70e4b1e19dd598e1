use crate::{
    channel::pipeline_channel,
    dumper::incremental::{FollowedTable, IncrementalDumper},
    error::TaskError,
    task::{PipelineTask, TaskControl, TaskResources, TaskState, run_pipeline},
};
use async_trait::async_trait;
use engine_core::ratelimit::JobRateLimitAlgorithm;
use model::position::IngestPosition;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::info;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Change-log side of an incremental task.
#[derive(Clone)]
pub struct ChangeLogSubscription {
    /// Followed tables keyed by actual table name.
    pub tables: HashMap<String, FollowedTable>,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub rate_limiter: Option<Arc<dyn JobRateLimitAlgorithm>>,
}

/// Replays source changes onto the target until stopped.
pub struct IncrementalTask {
    control: TaskControl,
    subscription: ChangeLogSubscription,
    resources: TaskResources,
}

impl IncrementalTask {
    pub fn new(
        task_id: impl Into<String>,
        subscription: ChangeLogSubscription,
        resources: TaskResources,
        position: IngestPosition,
    ) -> Self {
        Self {
            control: TaskControl::new(task_id.into(), position),
            subscription,
            resources,
        }
    }

    /// Change-log sequence number of the last applied change.
    pub fn applied_lsn(&self) -> Option<u64> {
        match self.control.tracker.current() {
            IngestPosition::Log(lsn) => Some(lsn),
            _ => None,
        }
    }
}

#[async_trait]
impl PipelineTask for IncrementalTask {
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
        if self.control.cancel.is_cancelled() {
            self.control.set_state(TaskState::Cancelled);
            return Ok(TaskState::Cancelled);
        }
        let position = self.control.tracker.current();
        self.control.set_state(TaskState::Running);
        info!(
            task_id = %self.control.task_id,
            position = %position,
            tables = self.subscription.tables.len(),
            "Incremental task started"
        );

        let (tx, rx) = pipeline_channel(self.resources.channel_capacity);
        let mut dumper = IncrementalDumper {
            task_id: self.control.task_id.clone(),
            source: self.resources.source.clone(),
            tables: self.subscription.tables.clone(),
            position,
            batch_size: self.subscription.batch_size,
            poll_interval: self.subscription.poll_interval,
            rate_limiter: self.subscription.rate_limiter.clone(),
            channel: tx,
            metrics: self.resources.metrics.clone(),
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
        connectors::{ColumnMetaData, PipelineDataSource, TableMetaData, memory::MemoryDataSource},
        metrics::Metrics,
    };
    use model::core::{data_type::DataType, value::Value};
    use std::collections::BTreeMap;

    fn meta() -> TableMetaData {
        TableMetaData::new(
            "t_order",
            vec![
                ColumnMetaData::key("order_id", DataType::BigInt),
                ColumnMetaData::new("status", DataType::VarChar),
            ],
        )
    }

    fn order(id: i64, status: &str) -> model::records::row::RowData {
        [("order_id", Value::Int(id)), ("status", Value::from(status))]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn replays_until_stopped() {
        let source = Arc::new(MemoryDataSource::new("ds_0"));
        let target = Arc::new(MemoryDataSource::new("target"));
        source.create_table(meta()).await;
        target.create_table(meta()).await;
        let start = source.current_log_position().await.unwrap();

        source.insert("t_order", order(1, "new")).await.unwrap();
        source.insert("t_order", order(2, "new")).await.unwrap();
        source
            .update("t_order", &[Value::Int(1)], order(1, "paid"))
            .await
            .unwrap();
        source.delete("t_order", &[Value::Int(2)]).await.unwrap();
        let end = source.current_log_position().await.unwrap();

        let mut tables = HashMap::new();
        tables.insert(
            "t_order".to_string(),
            FollowedTable {
                logic_table_name: "t_order".into(),
                meta: meta(),
            },
        );
        let task = Arc::new(IncrementalTask::new(
            "ds_0.incremental",
            ChangeLogSubscription {
                tables,
                batch_size: 10,
                poll_interval: Duration::from_millis(10),
                rate_limiter: None,
            },
            TaskResources {
                source: source.clone(),
                target: target.clone(),
                importer: ImporterConfiguration {
                    data_source_name: "target".into(),
                    target_tables: BTreeMap::new(),
                    batch_size: 10,
                    rate_limiter: None,
                    retry_times: 0,
                    concurrency: 2,
                },
                channel_capacity: 4,
                retry_base_delay: Duration::ZERO,
                metrics: Metrics::new(),
                listener: None,
            },
            IngestPosition::Log(start),
        ));

        let running = {
            let task = task.clone();
            tokio::spawn(async move { task.run().await })
        };
        let mut position = task.control.tracker.subscribe();
        tokio::time::timeout(
            Duration::from_secs(2),
            position.wait_for(|p| *p == IngestPosition::Log(end)),
        )
        .await
        .unwrap()
        .unwrap();

        task.stop();
        assert_eq!(running.await.unwrap().unwrap(), TaskState::Cancelled);
        assert_eq!(task.applied_lsn(), Some(end));
        assert_eq!(target.rows("t_order").await.unwrap(), vec![order(1, "paid")]);
    }
}
