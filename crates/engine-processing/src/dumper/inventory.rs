use crate::{
    channel::ChannelSender,
    dumper::{Dumper, columns_of},
    error::DumperError,
};
use async_trait::async_trait;
use engine_core::{
    connectors::{PipelineDataSource, QueryRange, TableMetaData},
    metrics::Metrics,
    ratelimit::{JobRateLimitAlgorithm, OperationType},
};
use futures::StreamExt;
use model::{
    core::identifiers::DataNode,
    position::{IngestPosition, KeyType, PrimaryKeyPosition},
    records::{
        record::{DataRecord, Record, RecordType},
        row::RowData,
    },
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Snapshot dumper over one key range of one source table.
pub struct InventoryDumper {
    pub task_id: String,
    pub source: Arc<dyn PipelineDataSource>,
    pub logic_table_name: String,
    pub data_node: DataNode,
    pub meta: TableMetaData,
    pub position: IngestPosition,
    pub batch_size: usize,
    pub rate_limiter: Option<Arc<dyn JobRateLimitAlgorithm>>,
    pub channel: ChannelSender,
    pub metrics: Metrics,
    /// An earlier pass over a keyless table may have copied part of it; those rows
    /// are removed from the target before the table is copied again.
    pub replace_copied: bool,
}

impl InventoryDumper {
    fn table(&self) -> &str {
        &self.data_node.table_name
    }

    fn first_key_column(&self) -> Option<&str> {
        self.meta.first_unique_key().map(|c| c.name.as_str())
    }

    async fn acquire_read_permit(&self) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire(OperationType::Select, 1).await;
        }
    }

    fn to_record(&self, row: &RowData, position: IngestPosition) -> Record {
        self.to_typed_record(RecordType::Insert, row, position)
    }

    fn to_typed_record(
        &self,
        record_type: RecordType,
        row: &RowData,
        position: IngestPosition,
    ) -> Record {
        let mut record = DataRecord::new(
            record_type,
            &self.logic_table_name,
            self.table(),
            position,
        );
        for column in columns_of(&self.meta, row) {
            record.add_column(column);
        }
        Record::Data(record)
    }

    /// Starting position for a task that was never split, derived from the key type.
    fn initial_key_position(&self) -> IngestPosition {
        match self.meta.first_unique_key() {
            Some(column) if column.data_type.is_integer() => IngestPosition::PrimaryKey(
                PrimaryKeyPosition::Integer {
                    begin: None,
                    end: None,
                },
            ),
            Some(column) if column.data_type.is_string() => IngestPosition::PrimaryKey(
                PrimaryKeyPosition::String {
                    begin: None,
                    end: None,
                },
            ),
            _ => IngestPosition::UnsupportedKey,
        }
    }

    async fn send(
        &self,
        records: Vec<Record>,
        cancel: &CancellationToken,
    ) -> Result<bool, DumperError> {
        self.channel.push(records, cancel).await
    }

    async fn finish(&self, cancel: &CancellationToken) -> Result<(), DumperError> {
        if self.send(vec![Record::Finished], cancel).await? {
            info!(task_id = %self.task_id, "Inventory dump finished");
        }
        Ok(())
    }

    /// Pages through the key range. The first query includes `begin`, later ones
    /// start strictly after the last key handed over.
    async fn dump_by_key(
        &self,
        range: PrimaryKeyPosition,
        cancel: &CancellationToken,
    ) -> Result<(), DumperError> {
        let key_column = match self.first_key_column() {
            Some(column) => column.to_string(),
            None => {
                return Err(DumperError::UnexpectedPosition {
                    task_id: self.task_id.clone(),
                    position: IngestPosition::PrimaryKey(range),
                });
            }
        };
        let end = range.end_value();
        let mut begin = range.begin_value();
        let mut first_query = true;
        let mut pages = 0usize;

        loop {
            if cancel.is_cancelled() {
                debug!(task_id = %self.task_id, pages, "Inventory dump cancelled");
                return Ok(());
            }

            let query = match (&begin, first_query) {
                (Some(last), false) => QueryRange::from_exclusive(last.clone(), end.clone()),
                _ => QueryRange::closed(begin.clone(), end.clone()),
            };

            self.acquire_read_permit().await;
            let mut rows = self
                .source
                .query_range(self.table(), &query, self.batch_size)
                .await
                .map_err(|e| DumperError::read(self.source.name(), e))?;
            if rows.is_empty() {
                break;
            }

            let page_full = rows.len() >= self.batch_size;
            if page_full {
                rows = self.complete_last_key(rows, &key_column).await?;
            }

            let mut records = Vec::with_capacity(rows.len());
            for row in &rows {
                let key = row.get_value(&key_column);
                let position = IngestPosition::PrimaryKey(range.with_begin(&key)?);
                records.push(self.to_record(row, position));
            }

            begin = rows.last().map(|row| row.get_value(&key_column));
            first_query = false;
            pages += 1;
            self.metrics.increment_dumped(records.len() as u64);
            debug!(
                task_id = %self.task_id,
                page = pages,
                rows = records.len(),
                "Dumped inventory page"
            );

            if !self.send(records, cancel).await? {
                return Ok(());
            }
            if !page_full {
                break;
            }
        }

        self.finish(cancel).await
    }

    /// A full page may cut through the rows sharing its last first-key value. Those
    /// rows are dropped so the next page starts at that value, unless the whole page
    /// shares one value, in which case every row of it is read at once.
    async fn complete_last_key(
        &self,
        mut rows: Vec<RowData>,
        key_column: &str,
    ) -> Result<Vec<RowData>, DumperError> {
        let first_key = rows.first().map(|row| row.get_value(key_column));
        let last_key = rows.last().map(|row| row.get_value(key_column));
        match (first_key, last_key) {
            (Some(first), Some(last)) if first == last => {
                self.acquire_read_permit().await;
                self.source
                    .query_point(self.table(), &last)
                    .await
                    .map_err(|e| DumperError::read(self.source.name(), e))
            }
            (_, Some(last)) if self.meta.unique_key_columns.len() > 1 => {
                rows.retain(|row| row.get_value(key_column) != last);
                Ok(rows)
            }
            _ => Ok(rows),
        }
    }

    /// Tables without a usable key are copied in one pass; an interrupted pass starts over.
    async fn dump_all(&self, cancel: &CancellationToken) -> Result<(), DumperError> {
        if self.replace_copied {
            info!(task_id = %self.task_id, "Removing rows of the interrupted keyless pass");
            if !self.stream_rows(RecordType::Delete, cancel).await? {
                return Ok(());
            }
        }
        if !self.stream_rows(RecordType::Insert, cancel).await? {
            return Ok(());
        }
        self.finish(cancel).await
    }

    /// Streams every source row as a `record_type` record. Returns `false` when the
    /// stream was cut short by cancellation.
    async fn stream_rows(
        &self,
        record_type: RecordType,
        cancel: &CancellationToken,
    ) -> Result<bool, DumperError> {
        self.acquire_read_permit().await;
        let mut stream = self
            .source
            .stream_all(self.table())
            .await
            .map_err(|e| DumperError::read(self.source.name(), e))?;
        let dumping = record_type == RecordType::Insert;

        let mut chunk = Vec::with_capacity(self.batch_size);
        while let Some(row) = stream.next().await {
            let row = row.map_err(|e| DumperError::read(self.source.name(), e))?;
            chunk.push(self.to_typed_record(record_type, &row, IngestPosition::UnsupportedKey));
            if chunk.len() >= self.batch_size {
                if cancel.is_cancelled() {
                    return Ok(false);
                }
                if dumping {
                    self.metrics.increment_dumped(chunk.len() as u64);
                }
                let full = std::mem::replace(&mut chunk, Vec::with_capacity(self.batch_size));
                if !self.send(full, cancel).await? {
                    return Ok(false);
                }
                self.acquire_read_permit().await;
            }
        }

        if !chunk.is_empty() {
            if dumping {
                self.metrics.increment_dumped(chunk.len() as u64);
            }
            if !self.send(chunk, cancel).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl Dumper for InventoryDumper {
    async fn run(&mut self, cancel: &CancellationToken) -> Result<(), DumperError> {
        if matches!(self.position, IngestPosition::Placeholder) {
            self.position = self.initial_key_position();
        }
        info!(
            task_id = %self.task_id,
            table = %self.data_node,
            position = %self.position,
            "Starting inventory dump"
        );

        match self.position.clone() {
            IngestPosition::Finished => self.finish(cancel).await,
            IngestPosition::UnsupportedKey => self.dump_all(cancel).await,
            IngestPosition::PrimaryKey(range) => self.dump_by_key(range, cancel).await,
            position => Err(DumperError::UnexpectedPosition {
                task_id: self.task_id.clone(),
                position,
            }),
        }
    }
}

/// Key type of the table's first unique key column, if it can drive a range scan.
pub fn key_type_of(meta: &TableMetaData) -> Option<KeyType> {
    let column = meta.first_unique_key()?;
    if column.data_type.is_integer() {
        Some(KeyType::Integer)
    } else if column.data_type.is_string() {
        Some(KeyType::String)
    } else {
        None
    }
}
