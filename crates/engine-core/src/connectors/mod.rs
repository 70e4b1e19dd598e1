use crate::error::DataSourceError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use model::{
    core::{data_type::DataType, value::Value},
    records::{record::RecordType, row::RowData},
};
use std::{collections::HashMap, sync::Arc};

pub mod memory;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetaData {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub unique_key: bool,
}

impl ColumnMetaData {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            unique_key: false,
        }
    }

    pub fn key(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: false,
            unique_key: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetaData {
    pub name: String,
    pub columns: Vec<ColumnMetaData>,
    /// Columns of the primary key or first usable unique index, in index order.
    pub unique_key_columns: Vec<String>,
}

impl TableMetaData {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnMetaData>) -> Self {
        let unique_key_columns = columns
            .iter()
            .filter(|c| c.unique_key)
            .map(|c| c.name.clone())
            .collect();
        Self {
            name: name.into(),
            columns,
            unique_key_columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMetaData> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn first_unique_key(&self) -> Option<&ColumnMetaData> {
        self.unique_key_columns
            .first()
            .and_then(|name| self.column(name))
    }

    pub fn has_unique_key(&self) -> bool {
        !self.unique_key_columns.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Interval over the first unique key column. The upper bound is inclusive,
/// an absent bound is open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryRange {
    pub lower: Option<Value>,
    pub lower_inclusive: bool,
    pub upper: Option<Value>,
}

impl QueryRange {
    pub fn all() -> Self {
        Self {
            lower: None,
            lower_inclusive: true,
            upper: None,
        }
    }

    pub fn closed(lower: Option<Value>, upper: Option<Value>) -> Self {
        Self {
            lower,
            lower_inclusive: true,
            upper,
        }
    }

    pub fn from_exclusive(lower: Value, upper: Option<Value>) -> Self {
        Self {
            lower: Some(lower),
            lower_inclusive: false,
            upper,
        }
    }

    pub fn contains(&self, key: &Value) -> bool {
        let above = match &self.lower {
            None => true,
            Some(lower) if self.lower_inclusive => key >= lower,
            Some(lower) => key > lower,
        };
        let below = self.upper.as_ref().is_none_or(|upper| key <= upper);
        above && below
    }
}

/// A single write applied to a target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOperation {
    /// Insert or overwrite the row with the same unique key.
    Upsert(RowData),
    /// Remove the row with the given unique key values, if present.
    Delete(Vec<Value>),
    /// Remove one row equal to the given image, for tables without a key.
    DeleteRow(RowData),
}

/// One committed change read from a data source's change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogEntry {
    pub lsn: u64,
    pub table: String,
    pub record_type: RecordType,
    pub before: Option<RowData>,
    pub after: Option<RowData>,
    pub commit_time_millis: i64,
}

/// Access to one named physical data source.
#[async_trait]
pub trait PipelineDataSource: Send + Sync {
    fn name(&self) -> &str;

    async fn table_meta(&self, table: &str) -> Result<TableMetaData, DataSourceError>;

    /// Rows whose first unique key lies in `range`, ordered by the full unique key.
    async fn query_range(
        &self,
        table: &str,
        range: &QueryRange,
        limit: usize,
    ) -> Result<Vec<RowData>, DataSourceError>;

    /// All rows whose first unique key equals `value`.
    async fn query_point(&self, table: &str, value: &Value)
    -> Result<Vec<RowData>, DataSourceError>;

    /// Every row of the table in storage order.
    async fn stream_all(
        &self,
        table: &str,
    ) -> Result<BoxStream<'static, Result<RowData, DataSourceError>>, DataSourceError>;

    async fn count(&self, table: &str, range: &QueryRange) -> Result<u64, DataSourceError>;

    /// Smallest and largest first unique key value, `None` for an empty table.
    async fn key_bounds(&self, table: &str) -> Result<Option<(Value, Value)>, DataSourceError>;

    /// Applies all operations atomically.
    async fn apply(&self, table: &str, ops: &[WriteOperation]) -> Result<u64, DataSourceError>;

    /// Sequence number of the newest committed change.
    async fn current_log_position(&self) -> Result<u64, DataSourceError> {
        Err(DataSourceError::Unsupported {
            data_source: self.name().to_string(),
            operation: "change log".into(),
        })
    }

    /// Up to `limit` changes committed after `after`, oldest first.
    async fn read_change_log(
        &self,
        after: u64,
        limit: usize,
    ) -> Result<Vec<ChangeLogEntry>, DataSourceError> {
        let _ = (after, limit);
        Err(DataSourceError::Unsupported {
            data_source: self.name().to_string(),
            operation: "change log".into(),
        })
    }
}

/// Resolves named data sources.
pub trait DataSourceProvider: Send + Sync {
    fn get(&self, name: &str) -> Result<Arc<dyn PipelineDataSource>, DataSourceError>;
}

#[derive(Default, Clone)]
pub struct DataSourceManager {
    sources: HashMap<String, Arc<dyn PipelineDataSource>>,
}

impl DataSourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: Arc<dyn PipelineDataSource>) {
        self.sources.insert(source.name().to_string(), source);
    }

    pub fn with(mut self, source: Arc<dyn PipelineDataSource>) -> Self {
        self.register(source);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }
}

impl DataSourceProvider for DataSourceManager {
    fn get(&self, name: &str) -> Result<Arc<dyn PipelineDataSource>, DataSourceError> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| DataSourceError::DataSourceNotFound(name.to_string()))
    }
}
