use engine_core::error::StateStoreError;
use thiserror::Error;

/// Errors raised while loading, validating or resolving pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Registry error: {0}")]
    Registry(#[from] StateStoreError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown {kind} algorithm type '{type_name}'")]
    UnknownAlgorithm { kind: &'static str, type_name: String },

    #[error("Algorithm '{type_name}' requires property '{property}'")]
    MissingProperty { type_name: String, property: String },

    #[error("Sharding item {item} out of range, job has {count} items")]
    ShardingItemOutOfRange { item: usize, count: usize },
}
