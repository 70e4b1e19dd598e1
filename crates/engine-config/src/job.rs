use crate::error::ConfigError;
use model::core::identifiers::DataNode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DATA_MATCH: &str = "DATA_MATCH";
pub const DIGEST_MATCH: &str = "DIGEST_MATCH";

/// Actual data nodes of one logic table handled by a sharding item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDataNodeEntry {
    pub logic_table_name: String,
    pub data_nodes: Vec<DataNode>,
}

impl JobDataNodeEntry {
    pub fn new(logic_table_name: impl Into<String>, data_nodes: Vec<DataNode>) -> Self {
        Self {
            logic_table_name: logic_table_name.into(),
            data_nodes,
        }
    }
}

/// Everything one sharding item migrates. All nodes live in the same source data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDataNodeLine {
    pub entries: Vec<JobDataNodeEntry>,
}

impl JobDataNodeLine {
    pub fn new(entries: Vec<JobDataNodeEntry>) -> Self {
        Self { entries }
    }

    pub fn data_source_name(&self) -> Option<&str> {
        self.entries
            .iter()
            .flat_map(|e| e.data_nodes.iter())
            .map(|node| node.data_source_name.as_str())
            .next()
    }

    /// `(logic table, actual node)` pairs in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &DataNode)> {
        self.entries.iter().flat_map(|entry| {
            entry
                .data_nodes
                .iter()
                .map(move |node| (entry.logic_table_name.as_str(), node))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencyCheckConfiguration {
    /// `DATA_MATCH` or `DIGEST_MATCH`.
    pub algorithm_type: String,
    pub break_on_mismatch: bool,
    /// Rows per check range for integer keys.
    pub range_row_count: u64,
    /// Rows fetched per side and comparison step.
    pub chunk_size: usize,
}

impl Default for ConsistencyCheckConfiguration {
    fn default() -> Self {
        Self {
            algorithm_type: DATA_MATCH.to_string(),
            break_on_mismatch: false,
            range_row_count: 100_000,
            chunk_size: 1000,
        }
    }
}

fn default_concurrency() -> usize {
    3
}

fn default_retry_times() -> usize {
    3
}

/// Static description of one migration job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationJobConfiguration {
    #[serde(default = "new_job_id")]
    pub job_id: String,
    pub target_data_source: String,
    /// Logic table name to target table name; tables absent here keep their logic name.
    #[serde(default)]
    pub target_table_names: BTreeMap<String, String>,
    /// One line per sharding item.
    pub job_sharding_data_node_lines: Vec<JobDataNodeLine>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_retry_times")]
    pub retry_times: usize,
    #[serde(default)]
    pub consistency_check: ConsistencyCheckConfiguration,
}

pub fn new_job_id() -> String {
    format!("j{}", uuid::Uuid::new_v4().simple())
}

impl MigrationJobConfiguration {
    pub fn new(target_data_source: impl Into<String>, lines: Vec<JobDataNodeLine>) -> Self {
        Self {
            job_id: new_job_id(),
            target_data_source: target_data_source.into(),
            target_table_names: BTreeMap::new(),
            job_sharding_data_node_lines: lines,
            concurrency: default_concurrency(),
            retry_times: default_retry_times(),
            consistency_check: ConsistencyCheckConfiguration::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn sharding_count(&self) -> usize {
        self.job_sharding_data_node_lines.len()
    }

    pub fn line(&self, sharding_item: usize) -> Result<&JobDataNodeLine, ConfigError> {
        self.job_sharding_data_node_lines
            .get(sharding_item)
            .ok_or(ConfigError::ShardingItemOutOfRange {
                item: sharding_item,
                count: self.sharding_count(),
            })
    }

    pub fn target_table_name<'a>(&'a self, logic_table: &'a str) -> &'a str {
        self.target_table_names
            .get(logic_table)
            .map(String::as_str)
            .unwrap_or(logic_table)
    }

    /// Logic table names across all items, deduplicated and sorted.
    pub fn logic_table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .job_sharding_data_node_lines
            .iter()
            .flat_map(|line| line.entries.iter().map(|e| e.logic_table_name.clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job_id.is_empty() {
            return Err(ConfigError::Invalid("job_id must not be empty".into()));
        }
        if self.job_sharding_data_node_lines.is_empty() {
            return Err(ConfigError::Invalid(
                "job needs at least one sharding data node line".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be positive".into()));
        }
        if self.consistency_check.chunk_size == 0 || self.consistency_check.range_row_count == 0 {
            return Err(ConfigError::Invalid(
                "consistency check sizes must be positive".into(),
            ));
        }
        for (item, line) in self.job_sharding_data_node_lines.iter().enumerate() {
            let data_source = line.data_source_name().ok_or_else(|| {
                ConfigError::Invalid(format!("sharding item {item} has no data nodes"))
            })?;
            if let Some((_, node)) = line
                .nodes()
                .find(|(_, node)| node.data_source_name != data_source)
            {
                return Err(ConfigError::Invalid(format!(
                    "sharding item {item} mixes data sources '{data_source}' and '{}'",
                    node.data_source_name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_defaults() {
        let config = MigrationJobConfiguration::from_json(
            r#"{
                "job_id": "j01",
                "target_data_source": "target",
                "target_table_names": {"t_order": "t_order_new"},
                "job_sharding_data_node_lines": [
                    {"entries": [{"logic_table_name": "t_order", "data_nodes": [
                        {"data_source_name": "ds_0", "table_name": "t_order_0"},
                        {"data_source_name": "ds_0", "table_name": "t_order_1"}
                    ]}]},
                    {"entries": [{"logic_table_name": "t_order", "data_nodes": [
                        {"data_source_name": "ds_1", "table_name": "t_order_0"}
                    ]}]}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.sharding_count(), 2);
        assert_eq!(config.retry_times, 3);
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.consistency_check.algorithm_type, DATA_MATCH);
        assert_eq!(config.target_table_name("t_order"), "t_order_new");
        assert_eq!(config.target_table_name("t_user"), "t_user");
        assert_eq!(config.line(1).unwrap().data_source_name(), Some("ds_1"));
        assert!(config.line(2).is_err());
    }

    #[test]
    fn rejects_mixed_data_sources_in_one_item() {
        let line = JobDataNodeLine::new(vec![JobDataNodeEntry::new(
            "t_order",
            vec![
                DataNode::new("ds_0", "t_order_0"),
                DataNode::new("ds_1", "t_order_1"),
            ],
        )]);
        let config = MigrationJobConfiguration::new("target", vec![line]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn generates_distinct_job_ids() {
        assert_ne!(new_job_id(), new_job_id());
    }
}
