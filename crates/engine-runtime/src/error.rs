use engine_config::error::ConfigError;
use engine_core::error::{DataSourceError, StateStoreError};
use engine_processing::error::{CheckError, TaskError};
use thiserror::Error;

/// Top-level errors of a migration job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    State(#[from] StateStoreError),

    #[error("Data source error: {0}")]
    DataSource(#[from] DataSourceError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Consistency check error: {0}")]
    Check(#[from] CheckError),

    /// Usually a panicked task.
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Target table '{table}' does not exist in data source '{data_source}'")]
    MissingTargetTable { data_source: String, table: String },

    #[error("Job '{0}' is not running")]
    NotRunning(String),

    #[error("Job '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Job item {sharding_item} failed: {reason}")]
    ItemFailed { sharding_item: usize, reason: String },

    #[error("A consistency check of job '{0}' is already running")]
    CheckRunning(String),

    #[error("Job '{0}' has not been cut over")]
    NotCompleted(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),
}
