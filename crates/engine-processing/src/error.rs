use engine_core::error::{DataSourceError, StateStoreError};
use model::position::{IngestPosition, PositionError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DumperError {
    #[error("Failed to read from source '{data_source}': {source}")]
    Read {
        data_source: String,
        #[source]
        source: DataSourceError,
    },

    #[error("Invalid position: {0}")]
    Position(#[from] PositionError),

    #[error("Task '{task_id}' cannot dump from position {position}")]
    UnexpectedPosition {
        task_id: String,
        position: IngestPosition,
    },

    #[error("The importer side of the channel was closed unexpectedly.")]
    ChannelClosed,
}

impl DumperError {
    pub fn read(data_source: &str, source: DataSourceError) -> Self {
        DumperError::Read {
            data_source: data_source.to_string(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ImporterError {
    #[error("Failed to write batch to table '{table}' after {attempts} attempts: {source}")]
    RetriesExhausted {
        table: String,
        attempts: usize,
        #[source]
        source: DataSourceError,
    },

    #[error("Failed to write batch to table '{table}': {source}")]
    Write {
        table: String,
        #[source]
        source: DataSourceError,
    },

    #[error("Writer slot panicked: {0}")]
    Slot(String),
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Dumper failed: {0}")]
    Dumper(#[from] DumperError),

    #[error("Importer failed: {0}")]
    Importer(#[from] ImporterError),
}

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Data source error during consistency check: {0}")]
    DataSource(#[from] DataSourceError),

    #[error("Registry error during consistency check: {0}")]
    State(#[from] StateStoreError),

    #[error("Unknown consistency check algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("Consistency check was cancelled")]
    Cancelled,
}
