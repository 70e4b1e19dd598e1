use crate::{
    channel::ChannelSender,
    dumper::{Dumper, columns_of},
    error::DumperError,
};
use async_trait::async_trait;
use engine_core::{
    connectors::{ChangeLogEntry, PipelineDataSource, TableMetaData},
    metrics::Metrics,
    ratelimit::{JobRateLimitAlgorithm, OperationType},
};
use model::{
    position::IngestPosition,
    records::record::{Column, DataRecord, Record, RecordType},
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Source table followed by an incremental dumper.
#[derive(Debug, Clone)]
pub struct FollowedTable {
    pub logic_table_name: String,
    pub meta: TableMetaData,
}

/// Replays the source change log from a `Log` position. Never finishes on its own.
pub struct IncrementalDumper {
    pub task_id: String,
    pub source: Arc<dyn PipelineDataSource>,
    /// Followed tables keyed by actual table name.
    pub tables: HashMap<String, FollowedTable>,
    pub position: IngestPosition,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub rate_limiter: Option<Arc<dyn JobRateLimitAlgorithm>>,
    pub channel: ChannelSender,
    pub metrics: Metrics,
}

impl IncrementalDumper {
    fn to_record(&self, entry: &ChangeLogEntry, table: &FollowedTable) -> DataRecord {
        let mut record = DataRecord::new(
            entry.record_type,
            &table.logic_table_name,
            &entry.table,
            IngestPosition::Log(entry.lsn),
        );
        record.commit_time_millis = Some(entry.commit_time_millis);

        let columns: Vec<Column> = match entry.record_type {
            RecordType::Insert => entry
                .after
                .as_ref()
                .map(|row| columns_of(&table.meta, row))
                .unwrap_or_default(),
            RecordType::Update => match (&entry.before, &entry.after) {
                (Some(before), Some(after)) => columns_of(&table.meta, after)
                    .into_iter()
                    .map(|column| {
                        let old = before.get_value(&column.name);
                        column.with_old_value(old)
                    })
                    .collect(),
                (_, Some(after)) => columns_of(&table.meta, after),
                _ => Vec::new(),
            },
            RecordType::Delete => entry
                .before
                .as_ref()
                .map(|row| columns_of(&table.meta, row))
                .unwrap_or_default(),
        };
        for column in columns {
            record.add_column(column);
        }
        record
    }

    /// Waits for `poll_interval`; returns false when cancelled meanwhile.
    async fn idle(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.poll_interval) => true,
        }
    }
}

#[async_trait]
impl Dumper for IncrementalDumper {
    async fn run(&mut self, cancel: &CancellationToken) -> Result<(), DumperError> {
        let mut lsn = match self.position {
            IngestPosition::Log(lsn) => lsn,
            ref other => {
                return Err(DumperError::UnexpectedPosition {
                    task_id: self.task_id.clone(),
                    position: other.clone(),
                });
            }
        };
        info!(task_id = %self.task_id, lsn, "Starting incremental dump");

        while !cancel.is_cancelled() {
            if let Some(limiter) = &self.rate_limiter {
                limiter.acquire(OperationType::Select, 1).await;
            }
            let entries = self
                .source
                .read_change_log(lsn, self.batch_size)
                .await
                .map_err(|e| DumperError::read(self.source.name(), e))?;

            if entries.is_empty() {
                if !self.idle(cancel).await {
                    break;
                }
                continue;
            }

            let mut records = Vec::with_capacity(entries.len());
            let mut last_data_lsn = None;
            for entry in &entries {
                lsn = entry.lsn;
                if let Some(table) = self.tables.get(&entry.table) {
                    records.push(Record::Data(self.to_record(entry, table)));
                    last_data_lsn = Some(entry.lsn);
                }
            }
            self.metrics.increment_dumped(records.len() as u64);

            // Changes to tables nobody follows still move the position.
            if last_data_lsn != Some(lsn) {
                records.push(Record::Placeholder(IngestPosition::Log(lsn)));
            }
            self.position = IngestPosition::Log(lsn);
            debug!(
                task_id = %self.task_id,
                lsn,
                records = records.len(),
                "Read change log"
            );

            if !self.channel.push(records, cancel).await? {
                break;
            }
        }

        info!(task_id = %self.task_id, lsn, "Incremental dump stopped");
        Ok(())
    }
}
