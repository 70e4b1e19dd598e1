use crate::check::{
    ChunkComparison, TableDataConsistencyCheckAlgorithm, TableInventoryCheckParameter,
    TableInventoryChecker, table::RangeInventoryChecker,
};
use engine_config::job::DATA_MATCH;
use model::records::row::RowData;
use std::sync::Arc;

/// Row-by-row comparison. Every source column must be present in the target row
/// with a matching value; numbers compare by magnitude.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataMatchAlgorithm;

impl TableDataConsistencyCheckAlgorithm for DataMatchAlgorithm {
    fn type_name(&self) -> &'static str {
        DATA_MATCH
    }

    fn build_checker(&self, param: TableInventoryCheckParameter) -> Arc<dyn TableInventoryChecker> {
        Arc::new(RangeInventoryChecker::new(param, RowByRow))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RowByRow;

fn rows_match(source: &RowData, target: &RowData) -> bool {
    source
        .field_values
        .iter()
        .all(|field| target.get(&field.name).is_some_and(|v| field.value.matches(v)))
}

impl ChunkComparison for RowByRow {
    fn chunks_match(&self, source: &[RowData], target: &[RowData]) -> bool {
        source.len() == target.len()
            && source
                .iter()
                .zip(target)
                .all(|(source, target)| rows_match(source, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::core::value::Value;

    fn row(id: i64, amount: Value) -> RowData {
        [("id", Value::Int(id)), ("amount", amount)].into_iter().collect()
    }

    #[test]
    fn numbers_match_across_types() {
        let source = vec![row(1, Value::Int(10)), row(2, Value::Float(2.5))];
        let target = vec![row(1, Value::Float(10.0)), row(2, Value::Float(2.5))];
        assert!(RowByRow.chunks_match(&source, &target));
    }

    #[test]
    fn detects_changed_and_missing_rows() {
        let source = vec![row(1, Value::Int(10)), row(2, Value::Int(20))];
        assert!(!RowByRow.chunks_match(&source, &[row(1, Value::Int(10)), row(2, Value::Int(21))]));
        assert!(!RowByRow.chunks_match(&source, &[row(1, Value::Int(10))]));

        let narrow: RowData = [("id", Value::Int(1))].into_iter().collect();
        assert!(!RowByRow.chunks_match(&source[..1], &[narrow]));
    }
}
