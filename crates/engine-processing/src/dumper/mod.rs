use crate::error::DumperError;
use async_trait::async_trait;
use engine_core::connectors::TableMetaData;
use model::records::{record::Column, row::RowData};
use tokio_util::sync::CancellationToken;

pub mod incremental;
pub mod inventory;

/// Produces records from one source partition into a pipeline channel.
#[async_trait]
pub trait Dumper: Send {
    /// Runs until the source is exhausted, `cancel` fires or an error occurs.
    async fn run(&mut self, cancel: &CancellationToken) -> Result<(), DumperError>;
}

fn is_unique_key(meta: &TableMetaData, column: &str) -> bool {
    meta.unique_key_columns
        .iter()
        .any(|key| key.eq_ignore_ascii_case(column))
}

/// Columns of `row`, flagged against the table's unique key.
pub(crate) fn columns_of(meta: &TableMetaData, row: &RowData) -> Vec<Column> {
    row.field_values
        .iter()
        .map(|field| {
            Column::new(
                field.name.clone(),
                field.value.clone(),
                is_unique_key(meta, &field.name),
            )
        })
        .collect()
}
