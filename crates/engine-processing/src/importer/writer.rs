use crate::{error::ImporterError, retry::classify_data_source_error};
use engine_core::{
    connectors::{PipelineDataSource, WriteOperation},
    metrics::Metrics,
    retry::{RetryError, RetryPolicy},
};
use futures::future::try_join_all;
use model::records::{
    record::{DataRecord, RecordType},
    row::RowData,
};
use std::{
    collections::{BTreeMap, hash_map::DefaultHasher},
    hash::{Hash, Hasher},
    sync::Arc,
    time::Instant,
};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteResult {
    pub records: usize,
    pub affected: u64,
}

/// Applies record batches to the target as idempotent upserts, spreading keys over
/// parallel writer slots.
pub struct BatchWriter {
    target: Arc<dyn PipelineDataSource>,
    /// Logic table name to target table name.
    target_tables: BTreeMap<String, String>,
    concurrency: usize,
    retry: RetryPolicy,
    metrics: Metrics,
}

impl BatchWriter {
    pub fn new(
        target: Arc<dyn PipelineDataSource>,
        target_tables: BTreeMap<String, String>,
        concurrency: usize,
        retry: RetryPolicy,
        metrics: Metrics,
    ) -> Self {
        Self {
            target,
            target_tables,
            concurrency: concurrency.max(1),
            retry,
            metrics,
        }
    }

    fn target_table<'a>(&'a self, logic_table: &'a str) -> &'a str {
        self.target_tables
            .get(logic_table)
            .map(String::as_str)
            .unwrap_or(logic_table)
    }

    /// Slot of a record: every change to one key lands in the same slot.
    fn slot_of(&self, record: &DataRecord) -> usize {
        let mut hasher = DefaultHasher::new();
        record.table_name.hash(&mut hasher);
        record.old_unique_key_values().hash(&mut hasher);
        (hasher.finish() % self.concurrency as u64) as usize
    }

    /// Groups the records into slots. A batch containing a key change is written by a
    /// single slot, since old and new key could otherwise race in different slots.
    fn route<'a>(&self, records: &'a [DataRecord]) -> Vec<Vec<&'a DataRecord>> {
        if self.concurrency == 1 || records.iter().any(DataRecord::unique_key_changed) {
            return vec![records.iter().collect()];
        }
        let mut slots: Vec<Vec<&DataRecord>> = vec![Vec::new(); self.concurrency];
        for record in records {
            slots[self.slot_of(record)].push(record);
        }
        slots.retain(|slot| !slot.is_empty());
        slots
    }

    pub async fn write(&self, batch_id: &str, records: &[DataRecord]) -> Result<WriteResult, ImporterError> {
        if records.is_empty() {
            return Ok(WriteResult::default());
        }
        let start = Instant::now();
        let slots = self.route(records);
        let slot_count = slots.len();

        let affected: u64 = try_join_all(slots.into_iter().map(|slot| self.write_slot(slot)))
            .await?
            .into_iter()
            .sum();

        let bytes: usize = records.iter().map(|r| r.to_row().size_bytes()).sum();
        self.metrics.increment_imported(records.len() as u64);
        self.metrics.increment_batches(1);
        self.metrics.increment_bytes(bytes as u64);

        info!(
            batch_id,
            rows = records.len(),
            slots = slot_count,
            affected,
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch written to target"
        );

        Ok(WriteResult {
            records: records.len(),
            affected,
        })
    }

    /// Writes one slot in record order, one target call per run of the same table.
    async fn write_slot(&self, slot: Vec<&DataRecord>) -> Result<u64, ImporterError> {
        let mut affected = 0;
        let mut run_table: Option<&str> = None;
        let mut ops = Vec::new();

        for record in slot {
            let table = self.target_table(&record.table_name);
            if run_table.is_some_and(|current| current != table) {
                if let Some(current) = run_table {
                    affected += self.apply(current, &ops).await?;
                }
                ops.clear();
            }
            run_table = Some(table);
            ops.extend(to_operations(record));
        }

        if let Some(table) = run_table {
            affected += self.apply(table, &ops).await?;
        }
        Ok(affected)
    }

    async fn apply(&self, table: &str, ops: &[WriteOperation]) -> Result<u64, ImporterError> {
        if ops.is_empty() {
            return Ok(0);
        }
        let target = &self.target;
        let metrics = &self.metrics;
        let mut attempt = 0u64;

        self.retry
            .run(
                || {
                    attempt += 1;
                    if attempt > 1 {
                        metrics.increment_retries(1);
                    }
                    async move { target.apply(table, ops).await }
                },
                classify_data_source_error,
            )
            .await
            .inspect(|affected| debug!(table, ops = ops.len(), affected, "Applied operations"))
            .map_err(|err| {
                metrics.increment_failures(1);
                match err {
                    RetryError::Fatal(source) => ImporterError::Write {
                        table: table.to_string(),
                        source,
                    },
                    RetryError::AttemptsExceeded { attempts, last } => {
                        ImporterError::RetriesExhausted {
                            table: table.to_string(),
                            attempts,
                            source: last,
                        }
                    }
                }
            })
    }
}

fn before_image(record: &DataRecord) -> RowData {
    record
        .columns
        .iter()
        .map(|c| {
            (
                c.name.clone(),
                c.old_value.clone().unwrap_or_else(|| c.value.clone()),
            )
        })
        .collect()
}

/// Operations that make the target reflect `record` no matter how often they run.
pub fn to_operations(record: &DataRecord) -> Vec<WriteOperation> {
    let keyed = record.has_unique_key();
    match record.record_type {
        RecordType::Insert => vec![WriteOperation::Upsert(record.to_row())],
        RecordType::Update if !keyed => vec![
            WriteOperation::DeleteRow(before_image(record)),
            WriteOperation::Upsert(record.to_row()),
        ],
        RecordType::Update if record.unique_key_changed() => vec![
            WriteOperation::Delete(record.old_unique_key_values()),
            WriteOperation::Upsert(record.to_row()),
        ],
        RecordType::Update => vec![WriteOperation::Upsert(record.to_row())],
        RecordType::Delete if keyed => {
            vec![WriteOperation::Delete(record.old_unique_key_values())]
        }
        RecordType::Delete => vec![WriteOperation::DeleteRow(record.to_row())],
    }
}
