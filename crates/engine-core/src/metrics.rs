use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    records_dumped: AtomicU64,
    records_imported: AtomicU64,
    batches_imported: AtomicU64,
    bytes_imported: AtomicU64,
    failure_count: AtomicU64,
    retry_count: AtomicU64,
}

/// Counters shared by the tasks of one job item.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub records_dumped: u64,
    pub records_imported: u64,
    pub batches_imported: u64,
    pub bytes_imported: u64,
    pub failure_count: u64,
    pub retry_count: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn increment_dumped(&self, count: u64) {
        self.inner.records_dumped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_imported(&self, count: u64) {
        self.inner
            .records_imported
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_batches(&self, count: u64) {
        self.inner
            .batches_imported
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_bytes(&self, count: u64) {
        self.inner.bytes_imported.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_failures(&self, count: u64) {
        self.inner.failure_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_retries(&self, count: u64) {
        self.inner.retry_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_dumped: self.inner.records_dumped.load(Ordering::Relaxed),
            records_imported: self.inner.records_imported.load(Ordering::Relaxed),
            batches_imported: self.inner.batches_imported.load(Ordering::Relaxed),
            bytes_imported: self.inner.bytes_imported.load(Ordering::Relaxed),
            failure_count: self.inner.failure_count.load(Ordering::Relaxed),
            retry_count: self.inner.retry_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
