use crate::{error::ConfigError, job::MigrationJobConfiguration, process::PipelineProcessConfiguration};
use engine_core::ratelimit::JobRateLimitAlgorithm;
use model::core::identifiers::DataNode;
use std::{collections::BTreeMap, fmt, sync::Arc};

/// A source table of a sharding item and the logic table it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNameMapping {
    pub logic_table_name: String,
    pub data_node: DataNode,
}

#[derive(Clone)]
pub struct DumperConfiguration {
    pub data_source_name: String,
    pub tables: Vec<TableNameMapping>,
    pub batch_size: usize,
    pub sharding_size: u64,
    pub rate_limiter: Option<Arc<dyn JobRateLimitAlgorithm>>,
}

#[derive(Clone)]
pub struct ImporterConfiguration {
    pub data_source_name: String,
    /// Logic table name to target table name.
    pub target_tables: BTreeMap<String, String>,
    pub batch_size: usize,
    pub rate_limiter: Option<Arc<dyn JobRateLimitAlgorithm>>,
    pub retry_times: usize,
    pub concurrency: usize,
}

impl ImporterConfiguration {
    pub fn target_table<'a>(&'a self, logic_table: &'a str) -> &'a str {
        self.target_tables
            .get(logic_table)
            .map(String::as_str)
            .unwrap_or(logic_table)
    }
}

/// Resolved, read-only configuration of one sharding item. Rate limiters are
/// already instantiated.
#[derive(Clone)]
pub struct TaskConfiguration {
    pub job_id: String,
    pub sharding_item: usize,
    pub dumper: DumperConfiguration,
    pub importer: ImporterConfiguration,
    pub stream_channel_capacity: usize,
}

impl TaskConfiguration {
    pub fn build(
        job: &MigrationJobConfiguration,
        sharding_item: usize,
        process: &PipelineProcessConfiguration,
    ) -> Result<Self, ConfigError> {
        let line = job.line(sharding_item)?;
        let data_source_name = line
            .data_source_name()
            .ok_or_else(|| {
                ConfigError::Invalid(format!("sharding item {sharding_item} has no data nodes"))
            })?
            .to_string();

        let tables: Vec<TableNameMapping> = line
            .nodes()
            .map(|(logic, node)| TableNameMapping {
                logic_table_name: logic.to_string(),
                data_node: node.clone(),
            })
            .collect();

        let target_tables = tables
            .iter()
            .map(|t| {
                (
                    t.logic_table_name.clone(),
                    job.target_table_name(&t.logic_table_name).to_string(),
                )
            })
            .collect();

        Ok(TaskConfiguration {
            job_id: job.job_id.clone(),
            sharding_item,
            dumper: DumperConfiguration {
                data_source_name,
                tables,
                batch_size: process.read.batch_size,
                sharding_size: process.read.sharding_size,
                rate_limiter: process.read_rate_limiter()?,
            },
            importer: ImporterConfiguration {
                data_source_name: job.target_data_source.clone(),
                target_tables,
                batch_size: process.write.batch_size,
                rate_limiter: process.write_rate_limiter()?,
                retry_times: job.retry_times,
                concurrency: job.concurrency,
            },
            stream_channel_capacity: process.stream_channel.capacity,
        })
    }
}

impl fmt::Debug for TaskConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskConfiguration")
            .field("job_id", &self.job_id)
            .field("sharding_item", &self.sharding_item)
            .field("source", &self.dumper.data_source_name)
            .field("tables", &self.dumper.tables.len())
            .field("target", &self.importer.data_source_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        algorithm::AlgorithmConfiguration,
        job::{JobDataNodeEntry, JobDataNodeLine},
    };

    #[test]
    fn resolves_item_and_limiters() {
        let lines = vec![
            JobDataNodeLine::new(vec![JobDataNodeEntry::new(
                "t_order",
                vec![DataNode::new("ds_0", "t_order_0")],
            )]),
            JobDataNodeLine::new(vec![
                JobDataNodeEntry::new("t_order", vec![DataNode::new("ds_1", "t_order_1")]),
                JobDataNodeEntry::new("t_user", vec![DataNode::new("ds_1", "t_user")]),
            ]),
        ];
        let mut job = MigrationJobConfiguration::new("target", lines);
        job.target_table_names
            .insert("t_order".into(), "t_order_all".into());
        let mut process = PipelineProcessConfiguration::default();
        process.write.rate_limiter =
            Some(AlgorithmConfiguration::new("TPS").with_prop("tps", 100));

        let task = TaskConfiguration::build(&job, 1, &process).unwrap();
        assert_eq!(task.dumper.data_source_name, "ds_1");
        assert_eq!(task.dumper.tables.len(), 2);
        assert_eq!(task.importer.target_table("t_order"), "t_order_all");
        assert_eq!(task.importer.target_table("t_user"), "t_user");
        assert!(task.dumper.rate_limiter.is_none());
        assert!(task.importer.rate_limiter.is_some());
        assert_eq!(task.importer.retry_times, 3);

        assert!(matches!(
            TaskConfiguration::build(&job, 5, &process),
            Err(ConfigError::ShardingItemOutOfRange { item: 5, count: 2 })
        ));
    }
}
