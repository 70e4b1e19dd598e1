use crate::{
    algorithm::{AlgorithmConfiguration, build_rate_limiter},
    error::ConfigError,
};
use engine_core::ratelimit::JobRateLimitAlgorithm;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_SHARDING_SIZE: u64 = 10_000_000;
pub const DEFAULT_STREAM_CHANNEL_CAPACITY: usize = 2000;

/// Tuning shared by all jobs of the process.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineProcessConfiguration {
    pub read: PipelineReadConfiguration,
    pub write: PipelineWriteConfiguration,
    pub stream_channel: StreamChannelConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineReadConfiguration {
    pub batch_size: usize,
    /// Rows per inventory task before a table is split.
    pub sharding_size: u64,
    pub rate_limiter: Option<AlgorithmConfiguration>,
}

impl Default for PipelineReadConfiguration {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            sharding_size: DEFAULT_SHARDING_SIZE,
            rate_limiter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineWriteConfiguration {
    pub batch_size: usize,
    pub rate_limiter: Option<AlgorithmConfiguration>,
}

impl Default for PipelineWriteConfiguration {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            rate_limiter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamChannelConfiguration {
    /// Maximum number of batches buffered between a dumper and its importer.
    pub capacity: usize,
}

impl Default for StreamChannelConfiguration {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_STREAM_CHANNEL_CAPACITY,
        }
    }
}

impl PipelineProcessConfiguration {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read.batch_size == 0 || self.write.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be positive".into()));
        }
        if self.read.sharding_size == 0 {
            return Err(ConfigError::Invalid("sharding_size must be positive".into()));
        }
        if self.stream_channel.capacity == 0 {
            return Err(ConfigError::Invalid(
                "stream_channel.capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn read_rate_limiter(&self) -> Result<Option<Arc<dyn JobRateLimitAlgorithm>>, ConfigError> {
        self.read.rate_limiter.as_ref().map(build_rate_limiter).transpose()
    }

    pub fn write_rate_limiter(
        &self,
    ) -> Result<Option<Arc<dyn JobRateLimitAlgorithm>>, ConfigError> {
        self.write.rate_limiter.as_ref().map(build_rate_limiter).transpose()
    }
}
