use crate::{
    connectors::{
        ChangeLogEntry, PipelineDataSource, QueryRange, TableMetaData, WriteOperation,
    },
    error::DataSourceError,
};
use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use model::{
    core::value::Value,
    records::{record::RecordType, row::RowData},
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};
use tokio::sync::RwLock;

struct MemoryTable {
    meta: TableMetaData,
    rows: BTreeMap<Vec<Value>, RowData>,
    next_row_id: i64,
}

impl MemoryTable {
    fn key_of(&mut self, row: &RowData) -> Vec<Value> {
        if self.meta.has_unique_key() {
            row.key_values(&self.meta.unique_key_columns)
        } else {
            self.next_row_id += 1;
            vec![Value::Int(self.next_row_id)]
        }
    }

    fn first_key(key: &[Value]) -> &Value {
        key.first().unwrap_or(&Value::Null)
    }
}

#[derive(Default)]
struct State {
    tables: HashMap<String, MemoryTable>,
    log: Vec<ChangeLogEntry>,
}

impl State {
    fn table(&self, source: &str, table: &str) -> Result<&MemoryTable, DataSourceError> {
        self.tables
            .get(table)
            .ok_or_else(|| DataSourceError::TableNotFound {
                data_source: source.to_string(),
                table: table.to_string(),
            })
    }

    fn table_mut(
        &mut self,
        source: &str,
        table: &str,
    ) -> Result<&mut MemoryTable, DataSourceError> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| DataSourceError::TableNotFound {
                data_source: source.to_string(),
                table: table.to_string(),
            })
    }

    fn append_log(
        &mut self,
        table: &str,
        record_type: RecordType,
        before: Option<RowData>,
        after: Option<RowData>,
    ) {
        let lsn = self.log.last().map(|e| e.lsn).unwrap_or(0) + 1;
        self.log.push(ChangeLogEntry {
            lsn,
            table: table.to_string(),
            record_type,
            before,
            after,
            commit_time_millis: chrono::Utc::now().timestamp_millis(),
        });
    }
}

/// Data source kept entirely in memory, with a change log and fault injection.
///
/// Every committed mutation, including writes arriving through [`PipelineDataSource::apply`],
/// is appended to the change log with a sequence number starting at 1.
pub struct MemoryDataSource {
    name: String,
    state: RwLock<State>,
    failing_writes: AtomicUsize,
    failing_reads: AtomicUsize,
    read_delay_ms: AtomicU64,
}

impl MemoryDataSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(State::default()),
            failing_writes: AtomicUsize::new(0),
            failing_reads: AtomicUsize::new(0),
            read_delay_ms: AtomicU64::new(0),
        }
    }

    pub async fn create_table(&self, meta: TableMetaData) {
        let mut state = self.state.write().await;
        state.tables.insert(
            meta.name.clone(),
            MemoryTable {
                meta,
                rows: BTreeMap::new(),
                next_row_id: 0,
            },
        );
    }

    pub async fn insert(&self, table: &str, row: RowData) -> Result<(), DataSourceError> {
        let mut state = self.state.write().await;
        let target = state.table_mut(&self.name, table)?;
        let key = target.key_of(&row);
        target.rows.insert(key, row.clone());
        state.append_log(table, RecordType::Insert, None, Some(row));
        Ok(())
    }

    /// Replaces the row stored under `key`; the new image may carry a different key.
    pub async fn update(
        &self,
        table: &str,
        key: &[Value],
        row: RowData,
    ) -> Result<(), DataSourceError> {
        let mut state = self.state.write().await;
        let target = state.table_mut(&self.name, table)?;
        let before = target.rows.remove(key).ok_or_else(|| {
            DataSourceError::InvalidData(format!("no row with key {key:?} in '{table}'"))
        })?;
        let new_key = if target.meta.has_unique_key() {
            row.key_values(&target.meta.unique_key_columns)
        } else {
            key.to_vec()
        };
        target.rows.insert(new_key, row.clone());
        state.append_log(table, RecordType::Update, Some(before), Some(row));
        Ok(())
    }

    pub async fn delete(&self, table: &str, key: &[Value]) -> Result<(), DataSourceError> {
        let mut state = self.state.write().await;
        let target = state.table_mut(&self.name, table)?;
        if let Some(before) = target.rows.remove(key) {
            state.append_log(table, RecordType::Delete, Some(before), None);
        }
        Ok(())
    }

    /// Rows of the table ordered by key.
    pub async fn rows(&self, table: &str) -> Result<Vec<RowData>, DataSourceError> {
        let state = self.state.read().await;
        Ok(state.table(&self.name, table)?.rows.values().cloned().collect())
    }

    /// The next `count` writes fail with a transient I/O error.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// The next `count` reads fail with a transient I/O error.
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Sleeps this long before every read.
    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn take_fault(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn before_read(&self, operation: &str) -> Result<(), DataSourceError> {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if Self::take_fault(&self.failing_reads) {
            return Err(DataSourceError::io(
                &self.name,
                format!("injected read failure during {operation}"),
            ));
        }
        Ok(())
    }

    fn keyed<'a>(&self, table: &'a MemoryTable, operation: &str) -> Result<&'a MemoryTable, DataSourceError> {
        if table.meta.has_unique_key() {
            Ok(table)
        } else {
            Err(DataSourceError::Unsupported {
                data_source: self.name.clone(),
                operation: format!("{operation} on table '{}' without unique key", table.meta.name),
            })
        }
    }
}

#[async_trait]
impl PipelineDataSource for MemoryDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn table_meta(&self, table: &str) -> Result<TableMetaData, DataSourceError> {
        let state = self.state.read().await;
        Ok(state.table(&self.name, table)?.meta.clone())
    }

    async fn query_range(
        &self,
        table: &str,
        range: &QueryRange,
        limit: usize,
    ) -> Result<Vec<RowData>, DataSourceError> {
        self.before_read("range query").await?;
        let state = self.state.read().await;
        let source = self.keyed(state.table(&self.name, table)?, "range query")?;
        Ok(source
            .rows
            .iter()
            .filter(|(key, _)| range.contains(MemoryTable::first_key(key)))
            .take(limit)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn query_point(
        &self,
        table: &str,
        value: &Value,
    ) -> Result<Vec<RowData>, DataSourceError> {
        self.before_read("point query").await?;
        let state = self.state.read().await;
        let source = self.keyed(state.table(&self.name, table)?, "point query")?;
        Ok(source
            .rows
            .iter()
            .filter(|(key, _)| MemoryTable::first_key(key) == value)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn stream_all(
        &self,
        table: &str,
    ) -> Result<BoxStream<'static, Result<RowData, DataSourceError>>, DataSourceError> {
        self.before_read("full scan").await?;
        let state = self.state.read().await;
        let rows: Vec<RowData> = state.table(&self.name, table)?.rows.values().cloned().collect();
        Ok(futures::stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    async fn count(&self, table: &str, range: &QueryRange) -> Result<u64, DataSourceError> {
        self.before_read("count").await?;
        let state = self.state.read().await;
        let source = state.table(&self.name, table)?;
        if range.lower.is_none() && range.upper.is_none() {
            return Ok(source.rows.len() as u64);
        }
        let source = self.keyed(source, "range count")?;
        Ok(source
            .rows
            .keys()
            .filter(|key| range.contains(MemoryTable::first_key(key)))
            .count() as u64)
    }

    async fn key_bounds(&self, table: &str) -> Result<Option<(Value, Value)>, DataSourceError> {
        self.before_read("key bounds").await?;
        let state = self.state.read().await;
        let source = self.keyed(state.table(&self.name, table)?, "key bounds")?;
        let bounds = source
            .rows
            .first_key_value()
            .zip(source.rows.last_key_value())
            .map(|((min, _), (max, _))| {
                (
                    MemoryTable::first_key(min).clone(),
                    MemoryTable::first_key(max).clone(),
                )
            });
        Ok(bounds)
    }

    async fn apply(&self, table: &str, ops: &[WriteOperation]) -> Result<u64, DataSourceError> {
        if Self::take_fault(&self.failing_writes) {
            return Err(DataSourceError::io(&self.name, "injected write failure"));
        }

        let mut state = self.state.write().await;
        let mut changes = Vec::with_capacity(ops.len());
        let target = state.table_mut(&self.name, table)?;

        for op in ops {
            match op {
                WriteOperation::Upsert(row) => {
                    let key = target.key_of(row);
                    let before = target.rows.insert(key, row.clone());
                    let record_type = if before.is_some() {
                        RecordType::Update
                    } else {
                        RecordType::Insert
                    };
                    changes.push((record_type, before, Some(row.clone())));
                }
                WriteOperation::Delete(key) => {
                    if let Some(before) = target.rows.remove(key) {
                        changes.push((RecordType::Delete, Some(before), None));
                    }
                }
                WriteOperation::DeleteRow(row) => {
                    let found = target
                        .rows
                        .iter()
                        .find(|(_, stored)| *stored == row)
                        .map(|(key, _)| key.clone());
                    if let Some(key) = found
                        && let Some(before) = target.rows.remove(&key)
                    {
                        changes.push((RecordType::Delete, Some(before), None));
                    }
                }
            }
        }

        let affected = changes.len() as u64;
        for (record_type, before, after) in changes {
            state.append_log(table, record_type, before, after);
        }
        Ok(affected)
    }

    async fn current_log_position(&self) -> Result<u64, DataSourceError> {
        let state = self.state.read().await;
        Ok(state.log.last().map(|e| e.lsn).unwrap_or(0))
    }

    async fn read_change_log(
        &self,
        after: u64,
        limit: usize,
    ) -> Result<Vec<ChangeLogEntry>, DataSourceError> {
        self.before_read("change log read").await?;
        let state = self.state.read().await;
        let start = state.log.partition_point(|e| e.lsn <= after);
        Ok(state.log[start..].iter().take(limit).cloned().collect())
    }
}
