#![allow(dead_code)]

use crate::Cluster;
use engine_config::{job::MigrationJobConfiguration, process::PipelineProcessConfiguration};
use engine_runtime::{MigrationJob, RuntimeSettings};
use model::{core::value::Value, records::row::RowData};
use std::{future::Future, time::Duration};

/// Timings short enough for tests to finish in milliseconds.
pub fn fast_settings() -> RuntimeSettings {
    RuntimeSettings {
        retry_base_delay: Duration::from_millis(1),
        poll_interval: Duration::from_millis(5),
        persist_interval: Duration::from_millis(20),
        cutover_timeout: Duration::from_secs(10),
    }
}

/// Small batches and splits so every table spans several batches and inventory tasks.
pub fn small_batches() -> PipelineProcessConfiguration {
    let mut process = PipelineProcessConfiguration::default();
    process.read.batch_size = 3;
    process.read.sharding_size = 8;
    process.write.batch_size = 4;
    process.stream_channel.capacity = 2;
    process
}

pub async fn create_job(
    cluster: &Cluster,
    config: MigrationJobConfiguration,
    process: &PipelineProcessConfiguration,
) -> MigrationJob {
    MigrationJob::create(
        config,
        Some(process),
        cluster.store.clone(),
        cluster.data_sources.clone(),
        fast_settings(),
    )
    .await
    .expect("create job")
}

/// Polls `condition` until it holds, panicking after `timeout`.
pub async fn wait_until<F, Fut>(what: &str, timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn sorted_by(mut rows: Vec<RowData>, key: &str) -> Vec<RowData> {
    rows.sort_by_key(|row| row.get_value(key));
    rows
}

/// Orders of both source shards, ordered by `order_id`.
pub async fn source_orders(cluster: &Cluster) -> Vec<RowData> {
    let mut rows = cluster.ds_0.rows("t_order_0").await.unwrap();
    rows.extend(cluster.ds_1.rows("t_order_1").await.unwrap());
    sorted_by(rows, "order_id")
}

pub async fn target_orders(cluster: &Cluster) -> Vec<RowData> {
    sorted_by(cluster.target.rows("t_order").await.unwrap(), "order_id")
}

/// Asserts that the target holds exactly the source rows of both tables.
pub async fn assert_target_matches_sources(cluster: &Cluster) {
    let source = source_orders(cluster).await;
    let target = target_orders(cluster).await;
    assert_eq!(
        source.len(),
        target.len(),
        "expected {} orders in target but got {}",
        source.len(),
        target.len()
    );
    assert_eq!(source, target);
    assert_eq!(
        cluster.ds_0.rows("t_user").await.unwrap(),
        cluster.target.rows("t_user").await.unwrap()
    );
}

pub async fn target_order(cluster: &Cluster, order_id: i64) -> Option<RowData> {
    cluster
        .target
        .rows("t_order")
        .await
        .unwrap()
        .into_iter()
        .find(|row| row.get_value("order_id") == Value::Int(order_id))
}
