#![allow(dead_code)]

use engine_config::job::{JobDataNodeEntry, JobDataNodeLine, MigrationJobConfiguration};
use engine_core::{
    connectors::{ColumnMetaData, DataSourceManager, TableMetaData, memory::MemoryDataSource},
    state::{RegistryStore, sled_store::SledRegistryStore},
};
use model::core::{data_type::DataType, identifiers::DataNode, value::Value};
use std::sync::Arc;
use tempfile::TempDir;

pub mod integration;
pub mod utils;

pub const TARGET: &str = "target";

/// Orders rows per source shard.
pub const ORDERS_PER_SHARD: i64 = 20;

pub fn order_table(name: &str) -> TableMetaData {
    TableMetaData::new(
        name,
        vec![
            ColumnMetaData::key("order_id", DataType::BigInt),
            ColumnMetaData::new("user_id", DataType::Int),
            ColumnMetaData::new("status", DataType::VarChar),
        ],
    )
}

pub fn user_table(name: &str) -> TableMetaData {
    TableMetaData::new(
        name,
        vec![
            ColumnMetaData::key("user_id", DataType::BigInt),
            ColumnMetaData::new("name", DataType::VarChar),
        ],
    )
}

/// Two source shards and one target, registered in a sled registry on disk.
///
/// ```text
/// ds_0: t_order_0 (even order ids), t_user
/// ds_1: t_order_1 (odd order ids)
/// target: t_order, t_user
/// ```
pub struct Cluster {
    pub ds_0: Arc<MemoryDataSource>,
    pub ds_1: Arc<MemoryDataSource>,
    pub target: Arc<MemoryDataSource>,
    pub data_sources: Arc<DataSourceManager>,
    pub store: Arc<dyn RegistryStore>,
    registry_dir: TempDir,
}

impl Cluster {
    pub async fn new() -> Self {
        let ds_0 = Arc::new(MemoryDataSource::new("ds_0"));
        let ds_1 = Arc::new(MemoryDataSource::new("ds_1"));
        let target = Arc::new(MemoryDataSource::new(TARGET));

        ds_0.create_table(order_table("t_order_0")).await;
        ds_0.create_table(user_table("t_user")).await;
        ds_1.create_table(order_table("t_order_1")).await;
        target.create_table(order_table("t_order")).await;
        target.create_table(user_table("t_user")).await;

        for n in 0..ORDERS_PER_SHARD {
            ds_0.insert("t_order_0", order(2 * n + 2, "new")).await.unwrap();
            ds_1.insert("t_order_1", order(2 * n + 1, "new")).await.unwrap();
        }
        for id in 1..=5 {
            ds_0.insert("t_user", user(id, &format!("user_{id}"))).await.unwrap();
        }

        let data_sources = Arc::new(
            DataSourceManager::new()
                .with(ds_0.clone())
                .with(ds_1.clone())
                .with(target.clone()),
        );
        let registry_dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn RegistryStore> =
            Arc::new(SledRegistryStore::open(registry_dir.path().join("registry")).unwrap());

        Self {
            ds_0,
            ds_1,
            target,
            data_sources,
            store,
            registry_dir,
        }
    }

    /// Item 0 moves `t_order_0` and `t_user` from `ds_0`, item 1 moves `t_order_1`
    /// from `ds_1`. Both order shards merge into `target.t_order`.
    pub fn job_config(&self, job_id: &str) -> MigrationJobConfiguration {
        let mut config = MigrationJobConfiguration::new(
            TARGET,
            vec![
                JobDataNodeLine::new(vec![
                    JobDataNodeEntry::new("t_order", vec![DataNode::new("ds_0", "t_order_0")]),
                    JobDataNodeEntry::new("t_user", vec![DataNode::new("ds_0", "t_user")]),
                ]),
                JobDataNodeLine::new(vec![JobDataNodeEntry::new(
                    "t_order",
                    vec![DataNode::new("ds_1", "t_order_1")],
                )]),
            ],
        );
        config.job_id = job_id.to_string();
        config.retry_times = 2;
        config.consistency_check.chunk_size = 7;
        config.consistency_check.range_row_count = 15;
        config
    }
}

pub fn order(order_id: i64, status: &str) -> model::records::row::RowData {
    [
        ("order_id", Value::Int(order_id)),
        ("user_id", Value::Int(order_id % 5 + 1)),
        ("status", Value::from(status)),
    ]
    .into_iter()
    .collect()
}

pub fn user(user_id: i64, name: &str) -> model::records::row::RowData {
    [("user_id", Value::Int(user_id)), ("name", Value::from(name))]
        .into_iter()
        .collect()
}
