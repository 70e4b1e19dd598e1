use async_trait::async_trait;
use std::{fmt, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Select,
    Insert,
    Update,
    Delete,
}

impl OperationType {
    pub fn is_write(&self) -> bool {
        !matches!(self, OperationType::Select)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Select => f.write_str("SELECT"),
            OperationType::Insert => f.write_str("INSERT"),
            OperationType::Update => f.write_str("UPDATE"),
            OperationType::Delete => f.write_str("DELETE"),
        }
    }
}

/// Throttles the reads or writes of one job.
#[async_trait]
pub trait JobRateLimitAlgorithm: Send + Sync {
    fn type_name(&self) -> &'static str;

    /// Waits until `permits` units of `op` may proceed. Operations the algorithm
    /// does not govern return immediately.
    async fn acquire(&self, op: OperationType, permits: u64);
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket that lets a caller overdraw and makes it wait off the debt.
/// Burst capacity equals one second worth of tokens.
pub struct TokenBucket {
    rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(per_second: u64) -> Self {
        let rate = per_second.max(1) as f64;
        Self {
            rate,
            state: Mutex::new(BucketState {
                tokens: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub async fn acquire(&self, permits: u64) {
        let wait = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let elapsed = now.duration_since(state.last_refill).as_secs_f64();
            state.tokens = (state.tokens + elapsed * self.rate).min(self.rate);
            state.last_refill = now;
            state.tokens -= permits as f64;
            if state.tokens < 0.0 {
                Duration::from_secs_f64(-state.tokens / self.rate)
            } else {
                Duration::ZERO
            }
        };

        if !wait.is_zero() {
            trace!(permits, wait_ms = wait.as_millis() as u64, "Rate limited");
            tokio::time::sleep(wait).await;
        }
    }
}

/// Limits queries per second; applies to `Select` only.
pub struct QpsRateLimitAlgorithm {
    bucket: TokenBucket,
}

impl QpsRateLimitAlgorithm {
    pub const TYPE: &'static str = "QPS";

    pub fn new(qps: u64) -> Self {
        Self {
            bucket: TokenBucket::new(qps),
        }
    }
}

#[async_trait]
impl JobRateLimitAlgorithm for QpsRateLimitAlgorithm {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    async fn acquire(&self, op: OperationType, _permits: u64) {
        if op == OperationType::Select {
            self.bucket.acquire(1).await;
        }
    }
}

/// Limits written records per second; applies to inserts, updates and deletes.
pub struct TpsRateLimitAlgorithm {
    bucket: TokenBucket,
}

impl TpsRateLimitAlgorithm {
    pub const TYPE: &'static str = "TPS";

    pub fn new(tps: u64) -> Self {
        Self {
            bucket: TokenBucket::new(tps),
        }
    }
}

#[async_trait]
impl JobRateLimitAlgorithm for TpsRateLimitAlgorithm {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    async fn acquire(&self, op: OperationType, permits: u64) {
        if op.is_write() {
            self.bucket.acquire(permits.max(1)).await;
        }
    }
}
