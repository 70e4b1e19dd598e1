use crate::{core::value::Value, position::IngestPosition, records::row::RowData};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::Insert => f.write_str("INSERT"),
            RecordType::Update => f.write_str("UPDATE"),
            RecordType::Delete => f.write_str("DELETE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Value before an update or delete, when the change stream carries it.
    pub old_value: Option<Value>,
    pub value: Value,
    pub updated: bool,
    pub unique_key: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, value: Value, unique_key: bool) -> Self {
        Self {
            name: name.into(),
            old_value: None,
            value,
            updated: true,
            unique_key,
        }
    }

    pub fn with_old_value(mut self, old_value: Value) -> Self {
        self.updated = old_value != self.value;
        self.old_value = Some(old_value);
        self
    }
}

/// A single row change travelling from a dumper to an importer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRecord {
    pub record_type: RecordType,
    /// Logic table the row belongs to.
    pub table_name: String,
    pub actual_table_name: String,
    pub position: IngestPosition,
    pub columns: Vec<Column>,
    pub commit_time_millis: Option<i64>,
}

impl DataRecord {
    pub fn new(
        record_type: RecordType,
        table_name: impl Into<String>,
        actual_table_name: impl Into<String>,
        position: IngestPosition,
    ) -> Self {
        Self {
            record_type,
            table_name: table_name.into(),
            actual_table_name: actual_table_name.into(),
            position,
            columns: Vec::new(),
            commit_time_millis: None,
        }
    }

    pub fn add_column(&mut self, column: Column) {
        self.columns.push(column);
    }

    pub fn unique_key_values(&self) -> Vec<Value> {
        self.columns
            .iter()
            .filter(|c| c.unique_key)
            .map(|c| c.value.clone())
            .collect()
    }

    /// Key identifying the row before this change was applied.
    pub fn old_unique_key_values(&self) -> Vec<Value> {
        self.columns
            .iter()
            .filter(|c| c.unique_key)
            .map(|c| c.old_value.clone().unwrap_or_else(|| c.value.clone()))
            .collect()
    }

    pub fn has_unique_key(&self) -> bool {
        self.columns.iter().any(|c| c.unique_key)
    }

    pub fn unique_key_changed(&self) -> bool {
        self.record_type == RecordType::Update
            && self.unique_key_values() != self.old_unique_key_values()
    }

    /// Row image after the change.
    pub fn to_row(&self) -> RowData {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.value.clone()))
            .collect()
    }
}

/// Element of the dumper → importer stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Data(DataRecord),
    /// Carries a position forward without any row, e.g. an idle change stream.
    Placeholder(IngestPosition),
    /// End of a bounded stream.
    Finished,
}

impl Record {
    pub fn position(&self) -> IngestPosition {
        match self {
            Record::Data(record) => record.position.clone(),
            Record::Placeholder(position) => position.clone(),
            Record::Finished => IngestPosition::Finished,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Record::Finished)
    }
}
