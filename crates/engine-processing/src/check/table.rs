use crate::{
    check::{ChunkComparison, CheckedTable, TableInventoryCheckParameter, TableInventoryChecker},
    error::CheckError,
};
use async_trait::async_trait;
use engine_core::{connectors::QueryRange, error::DataSourceError};
use futures::future::try_join_all;
use model::{
    check::{IgnoredType, TableCheckResult},
    core::value::Value,
    records::row::RowData,
};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Walks a key range chunk by chunk and hands each pair of chunks to a comparison.
///
/// Every chunk is bounded by a key taken from the sources, then read in full from all
/// sources and the target, so rows sharing a key prefix are never split between chunks.
pub struct RangeInventoryChecker<C> {
    param: TableInventoryCheckParameter,
    comparison: C,
    cancel: CancellationToken,
}

impl<C: ChunkComparison> RangeInventoryChecker<C> {
    pub fn new(param: TableInventoryCheckParameter, comparison: C) -> Self {
        Self {
            param,
            comparison,
            cancel: CancellationToken::new(),
        }
    }

    fn first_key(&self) -> &str {
        self.param
            .unique_keys
            .first()
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Awaits a query unless the check is cancelled first.
    async fn guarded<T>(
        &self,
        query: impl Future<Output = Result<T, DataSourceError>>,
    ) -> Result<T, CheckError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CheckError::Cancelled),
            result = query => result.map_err(CheckError::from),
        }
    }

    async fn count(&self, table: &CheckedTable, range: &QueryRange) -> Result<u64, CheckError> {
        self.guarded(table.data_source.count(&table.table, range)).await
    }

    async fn read(
        &self,
        table: &CheckedTable,
        range: &QueryRange,
        limit: usize,
    ) -> Result<Vec<RowData>, CheckError> {
        self.guarded(table.data_source.query_range(&table.table, range, limit))
            .await
    }

    /// Rows of all sources in `range`, merged into one key order.
    async fn read_sources(&self, range: &QueryRange, limit: usize) -> Result<Vec<RowData>, CheckError> {
        let chunks = try_join_all(
            self.param
                .sources
                .iter()
                .map(|source| self.read(source, range, limit)),
        )
        .await?;
        let mut rows: Vec<RowData> = chunks.into_iter().flatten().collect();
        rows.sort_by_cached_key(|row| row.key_values(&self.param.unique_keys));
        Ok(rows)
    }

    /// Row counts of both sides. A mismatch settles the range without reading rows.
    async fn counts_match(&self) -> Result<bool, CheckError> {
        let range = &self.param.range;
        let mut source_count = 0;
        for source in &self.param.sources {
            source_count += self.count(source, range).await?;
        }
        let target_count = self.count(&self.param.target, range).await?;
        if source_count != target_count {
            info!(
                table = %self.param.logic_table_name,
                source_count,
                target_count,
                "Row counts differ"
            );
        }
        Ok(source_count == target_count)
    }

    async fn compare_chunks(&self) -> Result<bool, CheckError> {
        let chunk_size = self.param.chunk_size.max(1);
        let end = self.param.range.upper.clone();
        let mut current = self.param.range.clone();
        let mut chunks = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                return Err(CheckError::Cancelled);
            }

            let probe = self.read_sources(&current, chunk_size).await?;
            let chunk_end: Option<Value> = if probe.len() >= chunk_size {
                probe
                    .get(chunk_size - 1)
                    .map(|row| row.get_value(self.first_key()))
            } else {
                end.clone()
            };
            let exhausted = probe.len() < chunk_size;

            let chunk = QueryRange {
                upper: chunk_end.clone(),
                ..current.clone()
            };
            let source_rows = if exhausted {
                probe
            } else {
                self.read_sources(&chunk, usize::MAX).await?
            };
            let mut target_rows = self.read(&self.param.target, &chunk, usize::MAX).await?;
            target_rows.sort_by_cached_key(|row| row.key_values(&self.param.unique_keys));

            chunks += 1;
            if !self.comparison.chunks_match(&source_rows, &target_rows) {
                info!(
                    table = %self.param.logic_table_name,
                    chunk = chunks,
                    source_rows = source_rows.len(),
                    target_rows = target_rows.len(),
                    "Chunk mismatch"
                );
                return Ok(false);
            }
            debug!(table = %self.param.logic_table_name, chunk = chunks, rows = source_rows.len(), "Chunk matched");

            match chunk_end {
                Some(last) if !exhausted => current = QueryRange::from_exclusive(last, end.clone()),
                _ => return Ok(true),
            }
        }
    }
}

#[async_trait]
impl<C: ChunkComparison> TableInventoryChecker for RangeInventoryChecker<C> {
    async fn check(&self) -> Result<TableCheckResult, CheckError> {
        if self.param.unique_keys.is_empty() {
            info!(table = %self.param.logic_table_name, "Table has no unique key, check skipped");
            return Ok(TableCheckResult::ignored(IgnoredType::NoUniqueKey));
        }
        if !self.counts_match().await? {
            return Ok(TableCheckResult::matched(false));
        }
        let matched = self.compare_chunks().await?;
        Ok(TableCheckResult::matched(matched))
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn is_canceling(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::data_match::RowByRow;
    use engine_core::connectors::{
        ColumnMetaData, PipelineDataSource, TableMetaData, WriteOperation, memory::MemoryDataSource,
    };
    use model::core::data_type::DataType;
    use std::sync::Arc;

    fn item(order_id: i64, item_id: i64) -> RowData {
        [
            ("order_id", Value::Int(order_id)),
            ("item_id", Value::Int(item_id)),
            ("qty", Value::Int(1)),
        ]
        .into_iter()
        .collect()
    }

    async fn items_table(name: &str, rows: &[(i64, i64)]) -> Arc<MemoryDataSource> {
        let ds = Arc::new(MemoryDataSource::new(name));
        ds.create_table(TableMetaData::new(
            "t_order_item",
            vec![
                ColumnMetaData::key("order_id", DataType::BigInt),
                ColumnMetaData::key("item_id", DataType::BigInt),
                ColumnMetaData::new("qty", DataType::Int),
            ],
        ))
        .await;
        for (order_id, item_id) in rows {
            ds.insert("t_order_item", item(*order_id, *item_id)).await.unwrap();
        }
        ds
    }

    fn parameter(source: Arc<MemoryDataSource>, target: Arc<MemoryDataSource>) -> TableInventoryCheckParameter {
        TableInventoryCheckParameter {
            logic_table_name: "t_order_item".into(),
            sources: vec![CheckedTable::new(source, "t_order_item")],
            target: CheckedTable::new(target, "t_order_item"),
            unique_keys: vec!["order_id".into(), "item_id".into()],
            range: QueryRange::all(),
            chunk_size: 2,
        }
    }

    #[tokio::test]
    async fn chunks_never_split_a_key_prefix() {
        let rows = [(1, 1), (1, 2), (1, 3), (2, 1), (3, 1), (3, 2)];
        let source = items_table("ds_0", &rows).await;
        let target = items_table("target", &rows).await;

        let checker = RangeInventoryChecker::new(parameter(source, target.clone()), RowByRow);
        assert_eq!(checker.check().await.unwrap(), TableCheckResult::matched(true));

        target
            .apply(
                "t_order_item",
                &[WriteOperation::Upsert(
                    [
                        ("order_id", Value::Int(1)),
                        ("item_id", Value::Int(3)),
                        ("qty", Value::Int(9)),
                    ]
                    .into_iter()
                    .collect(),
                )],
            )
            .await
            .unwrap();
        assert_eq!(checker.check().await.unwrap(), TableCheckResult::matched(false));
    }

    #[tokio::test]
    async fn cancelled_checker_stops() {
        let source = items_table("ds_0", &[(1, 1), (2, 1)]).await;
        let target = items_table("target", &[(1, 1), (2, 1)]).await;
        source.set_read_delay(std::time::Duration::from_secs(5));

        let checker = Arc::new(RangeInventoryChecker::new(parameter(source, target), RowByRow));
        let running = {
            let checker = checker.clone();
            tokio::spawn(async move { checker.check().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        checker.cancel();

        let outcome = tokio::time::timeout(std::time::Duration::from_millis(500), running)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, Err(CheckError::Cancelled)));
        assert!(checker.is_canceling());
    }
}
