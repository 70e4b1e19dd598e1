use engine_core::{error::DataSourceError, retry::RetryDisposition};

pub fn classify_data_source_error(err: &DataSourceError) -> RetryDisposition {
    match err {
        DataSourceError::Io { .. } | DataSourceError::Timeout(_) => RetryDisposition::Retry,
        DataSourceError::DataSourceNotFound(_) => RetryDisposition::Stop,
        DataSourceError::TableNotFound { .. } => RetryDisposition::Stop,
        DataSourceError::Unsupported { .. } => RetryDisposition::Stop,
        DataSourceError::InvalidData(_) => RetryDisposition::Stop,
    }
}
