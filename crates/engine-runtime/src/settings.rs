use std::time::Duration;

/// Process-local timing knobs of the job runtime. Not persisted with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// First backoff delay of importer retries, doubled per attempt.
    pub retry_base_delay: Duration,
    /// Change-log poll interval of incremental tasks when the log is drained.
    pub poll_interval: Duration,
    /// How often dirty job item progress is written to the registry.
    pub persist_interval: Duration,
    /// Upper bound for a cutover to catch up with the source change log.
    pub cutover_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            retry_base_delay: Duration::from_millis(200),
            poll_interval: engine_processing::task::incremental::DEFAULT_POLL_INTERVAL,
            persist_interval: Duration::from_secs(1),
            cutover_timeout: Duration::from_secs(60),
        }
    }
}
