use crate::dumper::inventory::key_type_of;
use engine_core::{
    connectors::{PipelineDataSource, QueryRange, TableMetaData},
    error::DataSourceError,
};
use model::{
    core::value::Value,
    position::{IngestPosition, KeyType, PrimaryKeyPosition},
};
use tracing::debug;

/// Splits source tables into the starting positions of their inventory tasks.
#[derive(Debug, Clone, Copy)]
pub struct InventoryTaskSplitter {
    pub sharding_size: u64,
}

impl InventoryTaskSplitter {
    pub fn new(sharding_size: u64) -> Self {
        Self {
            sharding_size: sharding_size.max(1),
        }
    }

    /// One position per inventory task of `table`.
    ///
    /// Integer keys are cut into contiguous ranges of roughly `sharding_size` rows.
    /// The first range is open below and the last open above, so rows written outside
    /// the current key bounds are still covered.
    pub async fn split(
        &self,
        source: &dyn PipelineDataSource,
        table: &str,
        meta: &TableMetaData,
    ) -> Result<Vec<IngestPosition>, DataSourceError> {
        let positions = match key_type_of(meta) {
            None => vec![IngestPosition::UnsupportedKey],
            Some(KeyType::String) => vec![IngestPosition::PrimaryKey(PrimaryKeyPosition::String {
                begin: None,
                end: None,
            })],
            Some(KeyType::Integer) => self.split_integer(source, table).await?,
        };
        debug!(table, tasks = positions.len(), "Split inventory");
        Ok(positions)
    }

    async fn split_integer(
        &self,
        source: &dyn PipelineDataSource,
        table: &str,
    ) -> Result<Vec<IngestPosition>, DataSourceError> {
        let whole = vec![integer_range(None, None)];
        let count = source.count(table, &QueryRange::all()).await?;
        if count <= self.sharding_size {
            return Ok(whole);
        }
        let Some((Value::Int(min), Value::Int(max))) = source.key_bounds(table).await? else {
            return Ok(whole);
        };

        Ok(split_integer_keys(min, max, count, self.sharding_size)
            .into_iter()
            .map(|(begin, end)| integer_range(begin, end))
            .collect())
    }
}

/// Contiguous key ranges over `[min, max]` holding roughly `rows_per_range` rows each,
/// assuming keys are spread evenly. The first range is open below, the last open above.
pub(crate) fn split_integer_keys(
    min: i64,
    max: i64,
    count: u64,
    rows_per_range: u64,
) -> Vec<(Option<i64>, Option<i64>)> {
    let rows_per_range = rows_per_range.max(1);
    if count <= rows_per_range || min >= max {
        return vec![(None, None)];
    }
    let shards = count.div_ceil(rows_per_range) as i128;
    let span = max as i128 - min as i128 + 1;
    let step = ((span + shards - 1) / shards).max(1);

    let mut ranges = Vec::with_capacity(shards as usize);
    let mut begin = min as i128;
    while begin <= max as i128 {
        let next = begin + step;
        let lower = (begin != min as i128).then_some(begin as i64);
        let upper = (next <= max as i128).then_some((next - 1) as i64);
        ranges.push((lower, upper));
        begin = next;
    }
    ranges
}

fn integer_range(begin: Option<i64>, end: Option<i64>) -> IngestPosition {
    IngestPosition::PrimaryKey(PrimaryKeyPosition::Integer { begin, end })
}
