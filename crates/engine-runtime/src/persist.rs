use crate::context::JobItemContext;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Periodically writes the progress of items whose importers committed since the
/// last write. State transitions persist on their own.
pub struct PersistService {
    contexts: Vec<Arc<JobItemContext>>,
    interval: Duration,
}

impl PersistService {
    pub fn new(contexts: Vec<Arc<JobItemContext>>, interval: Duration) -> Self {
        Self { contexts, interval }
    }

    /// Runs until `cancel` fires, then flushes once more.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.flush().await,
                }
            }
            self.flush().await;
        })
    }

    async fn flush(&self) {
        for ctx in &self.contexts {
            if !ctx.counters.take_dirty() {
                continue;
            }
            match ctx.persist().await {
                Ok(()) => debug!(job_id = %ctx.job_id, sharding_item = ctx.sharding_item, "Flushed progress"),
                Err(err) => {
                    ctx.counters.mark_dirty();
                    warn!(
                        job_id = %ctx.job_id,
                        sharding_item = ctx.sharding_item,
                        error = %err,
                        "Failed to persist job item progress"
                    );
                }
            }
        }
    }
}
