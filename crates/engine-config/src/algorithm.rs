use crate::error::ConfigError;
use engine_core::ratelimit::{JobRateLimitAlgorithm, QpsRateLimitAlgorithm, TpsRateLimitAlgorithm};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

/// Named algorithm plus free-form properties, as it appears in JSON configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfiguration {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub props: BTreeMap<String, serde_json::Value>,
}

impl AlgorithmConfiguration {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            props: BTreeMap::new(),
        }
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    /// Integer property, accepting both JSON numbers and numeric strings.
    pub fn u64_prop(&self, key: &str) -> Option<u64> {
        match self.props.get(key)? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn require_u64(&self, key: &str) -> Result<u64, ConfigError> {
        self.u64_prop(key).ok_or_else(|| ConfigError::MissingProperty {
            type_name: self.type_name.clone(),
            property: key.to_string(),
        })
    }
}

/// Instantiates the rate limiter an algorithm configuration names.
pub fn build_rate_limiter(
    config: &AlgorithmConfiguration,
) -> Result<Arc<dyn JobRateLimitAlgorithm>, ConfigError> {
    match config.type_name.to_ascii_uppercase().as_str() {
        QpsRateLimitAlgorithm::TYPE => Ok(Arc::new(QpsRateLimitAlgorithm::new(
            config.require_u64("qps")?,
        ))),
        TpsRateLimitAlgorithm::TYPE => Ok(Arc::new(TpsRateLimitAlgorithm::new(
            config.require_u64("tps")?,
        ))),
        _ => Err(ConfigError::UnknownAlgorithm {
            kind: "rate limit",
            type_name: config.type_name.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_limiters_from_props() {
        let qps = AlgorithmConfiguration::new("qps").with_prop("qps", "50");
        assert_eq!(build_rate_limiter(&qps).unwrap().type_name(), "QPS");

        let tps = AlgorithmConfiguration::new("TPS").with_prop("tps", 2000);
        assert_eq!(build_rate_limiter(&tps).unwrap().type_name(), "TPS");
    }

    #[test]
    fn rejects_unknown_or_incomplete() {
        assert!(matches!(
            build_rate_limiter(&AlgorithmConfiguration::new("LEAKY")),
            Err(ConfigError::UnknownAlgorithm { .. })
        ));
        assert!(matches!(
            build_rate_limiter(&AlgorithmConfiguration::new("TPS")),
            Err(ConfigError::MissingProperty { .. })
        ));
    }
}
