use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Failed to (de)serialize value under '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Value under '{0}' is not valid UTF-8")]
    InvalidUtf8(String),
}

#[derive(Error, Debug)]
pub enum DataSourceError {
    #[error("I/O error on data source '{data_source}': {message}")]
    Io {
        data_source: String,
        message: String,
    },

    #[error("Operation timed out on data source '{0}'")]
    Timeout(String),

    #[error("Data source '{0}' is not registered")]
    DataSourceNotFound(String),

    #[error("Table '{table}' not found in data source '{data_source}'")]
    TableNotFound { data_source: String, table: String },

    #[error("Unsupported operation on data source '{data_source}': {operation}")]
    Unsupported {
        data_source: String,
        operation: String,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl DataSourceError {
    pub fn io(data_source: impl Into<String>, message: impl Into<String>) -> Self {
        DataSourceError::Io {
            data_source: data_source.into(),
            message: message.into(),
        }
    }

    /// Connection drops and timeouts may succeed on a later attempt; everything else
    /// describes the data or the setup and will fail the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(self, DataSourceError::Io { .. } | DataSourceError::Timeout(_))
    }
}
