use crate::error::CheckError;
use async_trait::async_trait;
use engine_config::job::{DATA_MATCH, DIGEST_MATCH};
use engine_core::connectors::{PipelineDataSource, QueryRange};
use model::{check::TableCheckResult, records::row::RowData};
use std::{fmt, sync::Arc};

pub mod consistency;
pub mod data_match;
pub mod digest;
pub mod table;

pub use consistency::DataConsistencyChecker;
pub use data_match::DataMatchAlgorithm;
pub use digest::DigestMatchAlgorithm;

/// A physical table taking part in a check.
#[derive(Clone)]
pub struct CheckedTable {
    pub data_source: Arc<dyn PipelineDataSource>,
    pub table: String,
}

impl CheckedTable {
    pub fn new(data_source: Arc<dyn PipelineDataSource>, table: impl Into<String>) -> Self {
        Self {
            data_source,
            table: table.into(),
        }
    }
}

impl fmt::Debug for CheckedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.data_source.name(), self.table)
    }
}

/// Input of one range check. All source tables together are compared against the
/// single target table the job merged them into.
#[derive(Debug, Clone)]
pub struct TableInventoryCheckParameter {
    pub logic_table_name: String,
    pub sources: Vec<CheckedTable>,
    pub target: CheckedTable,
    /// Unique key columns in index order, empty when the table has none.
    pub unique_keys: Vec<String>,
    pub range: QueryRange,
    pub chunk_size: usize,
}

/// Compares one key range of a table between source and target.
#[async_trait]
pub trait TableInventoryChecker: Send + Sync {
    async fn check(&self) -> Result<TableCheckResult, CheckError>;

    /// Stops a running `check` within one chunk. Safe to call from any task.
    fn cancel(&self);

    fn is_canceling(&self) -> bool;
}

/// How two chunks of rows, ordered by the same key, are compared.
pub trait ChunkComparison: Send + Sync {
    fn chunks_match(&self, source: &[RowData], target: &[RowData]) -> bool;
}

pub trait TableDataConsistencyCheckAlgorithm: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn build_checker(&self, param: TableInventoryCheckParameter) -> Arc<dyn TableInventoryChecker>;
}

pub fn build_check_algorithm(
    type_name: &str,
) -> Result<Arc<dyn TableDataConsistencyCheckAlgorithm>, CheckError> {
    match type_name.to_ascii_uppercase().as_str() {
        DATA_MATCH => Ok(Arc::new(DataMatchAlgorithm)),
        DIGEST_MATCH => Ok(Arc::new(DigestMatchAlgorithm)),
        _ => Err(CheckError::UnknownAlgorithm(type_name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_algorithms_by_type() {
        assert_eq!(build_check_algorithm("data_match").unwrap().type_name(), DATA_MATCH);
        assert_eq!(build_check_algorithm(DIGEST_MATCH).unwrap().type_name(), DIGEST_MATCH);
        assert!(matches!(
            build_check_algorithm("CRC32_MATCH"),
            Err(CheckError::UnknownAlgorithm(_))
        ));
    }
}
