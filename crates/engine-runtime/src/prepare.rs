use crate::{
    context::{ItemCounters, ItemProgressListener, JobItemContext},
    error::JobError,
    settings::RuntimeSettings,
};
use engine_config::{
    job::MigrationJobConfiguration, process::PipelineProcessConfiguration,
    task::TaskConfiguration,
};
use engine_core::{
    connectors::{DataSourceProvider, PipelineDataSource, QueryRange, TableMetaData},
    error::DataSourceError,
    metrics::Metrics,
    progress::JobItemProgressRepository,
};
use engine_processing::{
    dumper::incremental::FollowedTable,
    splitter::InventoryTaskSplitter,
    task::{
        TaskResources,
        incremental::{ChangeLogSubscription, IncrementalTask},
        inventory::{InventorySlice, InventoryTask},
    },
};
use model::{
    core::identifiers::DataNode,
    position::IngestPosition,
    progress::{JobItemProgress, JobStatus},
};
use std::{collections::HashMap, sync::Arc};
use tracing::info;

/// Builds the runtime context of a sharding item, from persisted progress when there
/// is some and from the source tables otherwise.
pub struct JobItemPreparer {
    data_sources: Arc<dyn DataSourceProvider>,
    repository: JobItemProgressRepository,
    settings: RuntimeSettings,
}

impl JobItemPreparer {
    pub fn new(
        data_sources: Arc<dyn DataSourceProvider>,
        repository: JobItemProgressRepository,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            data_sources,
            repository,
            settings,
        }
    }

    pub async fn prepare(
        &self,
        job: &MigrationJobConfiguration,
        sharding_item: usize,
        process: &PipelineProcessConfiguration,
    ) -> Result<JobItemContext, JobError> {
        let config = TaskConfiguration::build(job, sharding_item, process)?;
        let source = self.data_sources.get(&config.dumper.data_source_name)?;
        let target = self.data_sources.get(&config.importer.data_source_name)?;
        let persisted = self.repository.load(&job.job_id, sharding_item).await?;

        let mut metas = Vec::with_capacity(config.dumper.tables.len());
        for mapping in &config.dumper.tables {
            let meta = source.table_meta(&mapping.data_node.table_name).await?;
            let target_table = config.importer.target_table(&mapping.logic_table_name);
            check_target_table(target.as_ref(), target_table).await?;
            metas.push(meta);
        }

        // The log position is taken before any split so that replay covers every
        // change made while the snapshot is copied.
        let incremental_position = match persisted.as_ref().map(|p| &p.incremental.position) {
            Some(IngestPosition::Log(lsn)) => IngestPosition::Log(*lsn),
            _ => IngestPosition::Log(source.current_log_position().await?),
        };

        let splitter = InventoryTaskSplitter::new(config.dumper.sharding_size);
        let mut inventory = Vec::new();
        for (mapping, meta) in config.dumper.tables.iter().zip(&metas) {
            let (positions, resumed) = match persisted
                .as_ref()
                .and_then(|p| persisted_positions(p, &mapping.data_node))
            {
                Some(positions) => (positions, true),
                None => {
                    let positions = splitter
                        .split(source.as_ref(), &mapping.data_node.table_name, meta)
                        .await?;
                    (positions, false)
                }
            };
            inventory.push((mapping, meta, positions, resumed));
        }

        let inventory_record_count = match &persisted {
            Some(progress) => progress.inventory_record_count,
            None => count_rows(source.as_ref(), &metas).await?,
        };
        let counters = Arc::new(ItemCounters::with_processed(
            persisted.as_ref().map_or(0, |p| p.processed_record_count),
        ));
        let metrics = Metrics::new();
        let resources = TaskResources {
            source: source.clone(),
            target,
            importer: config.importer.clone(),
            channel_capacity: config.stream_channel_capacity,
            retry_base_delay: self.settings.retry_base_delay,
            metrics: metrics.clone(),
            listener: None,
        };

        let inventory_resources = resources
            .clone()
            .with_listener(ItemProgressListener::inventory(counters.clone()));
        let mut inventory_tasks = Vec::new();
        for (mapping, meta, positions, resumed) in inventory {
            for (split, position) in positions.into_iter().enumerate() {
                let task = InventoryTask::new(
                    mapping.data_node.inventory_task_id(split),
                    InventorySlice {
                        logic_table_name: mapping.logic_table_name.clone(),
                        data_node: mapping.data_node.clone(),
                        meta: meta.clone(),
                        batch_size: config.dumper.batch_size,
                        rate_limiter: config.dumper.rate_limiter.clone(),
                    },
                    inventory_resources.clone(),
                    position,
                );
                inventory_tasks.push(Arc::new(if resumed { task.resumed() } else { task }));
            }
        }

        let subscription = ChangeLogSubscription {
            tables: config
                .dumper
                .tables
                .iter()
                .zip(&metas)
                .map(|(mapping, meta)| {
                    (
                        mapping.data_node.table_name.clone(),
                        FollowedTable {
                            logic_table_name: mapping.logic_table_name.clone(),
                            meta: meta.clone(),
                        },
                    )
                })
                .collect::<HashMap<_, _>>(),
            batch_size: config.dumper.batch_size,
            poll_interval: self.settings.poll_interval,
            rate_limiter: config.dumper.rate_limiter.clone(),
        };
        let incremental_task = Arc::new(IncrementalTask::new(
            format!("{}.incremental", config.dumper.data_source_name),
            subscription,
            resources.with_listener(ItemProgressListener::incremental(counters.clone())),
            incremental_position.clone(),
        ));

        let status = match persisted.as_ref().map(|p| &p.status) {
            Some(JobStatus::Finished) => JobStatus::Finished,
            _ => JobStatus::Preparing,
        };
        info!(
            job_id = %job.job_id,
            sharding_item,
            source = %config.dumper.data_source_name,
            inventory_tasks = inventory_tasks.len(),
            incremental_position = %incremental_position,
            resumed = persisted.is_some(),
            "Prepared job item"
        );

        Ok(JobItemContext::new(
            config,
            status,
            inventory_tasks,
            incremental_task,
            inventory_record_count,
            metrics,
            counters,
            self.repository.clone(),
        ))
    }
}

async fn check_target_table(target: &dyn PipelineDataSource, table: &str) -> Result<(), JobError> {
    match target.table_meta(table).await {
        Ok(_) => Ok(()),
        Err(DataSourceError::TableNotFound { data_source, table }) => {
            Err(JobError::MissingTargetTable { data_source, table })
        }
        Err(err) => Err(err.into()),
    }
}

/// Persisted positions of the node's inventory tasks in split order, `None` when the
/// node has never been split.
fn persisted_positions(progress: &JobItemProgress, node: &DataNode) -> Option<Vec<IngestPosition>> {
    let positions: Vec<IngestPosition> = (0..)
        .map(|split| progress.inventory.positions.get(&node.inventory_task_id(split)))
        .take_while(Option::is_some)
        .flatten()
        .cloned()
        .collect();
    (!positions.is_empty()).then_some(positions)
}

async fn count_rows(source: &dyn PipelineDataSource, metas: &[TableMetaData]) -> Result<u64, JobError> {
    let mut total = 0;
    for meta in metas {
        total += source.count(&meta.name, &QueryRange::all()).await?;
    }
    Ok(total)
}
