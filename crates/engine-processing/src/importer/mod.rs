use crate::{
    channel::ChannelReceiver, error::ImporterError, importer::writer::BatchWriter,
    position::PositionTracker,
};
use engine_core::ratelimit::{JobRateLimitAlgorithm, OperationType};
use model::{
    position::IngestPosition,
    records::record::{DataRecord, Record, RecordType},
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub mod writer;

const FETCH_TIMEOUT: Duration = Duration::from_millis(200);

/// Observer of committed batches.
pub trait ImporterListener: Send + Sync {
    fn on_batch_imported(&self, task_id: &str, records: usize, position: &IngestPosition);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The dumper's end-of-stream marker was written.
    Finished,
    Cancelled,
    /// The dumper went away without finishing.
    Stopped,
}

/// Drains a pipeline channel into the target, advancing the task position after
/// every written batch.
pub struct Importer {
    pub task_id: String,
    pub channel: ChannelReceiver,
    pub writer: BatchWriter,
    pub batch_size: usize,
    pub rate_limiter: Option<Arc<dyn JobRateLimitAlgorithm>>,
    pub tracker: PositionTracker,
    pub listener: Option<Arc<dyn ImporterListener>>,
}

fn operation_of(record: &DataRecord) -> OperationType {
    match record.record_type {
        RecordType::Insert => OperationType::Insert,
        RecordType::Update => OperationType::Update,
        RecordType::Delete => OperationType::Delete,
    }
}

impl Importer {
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<ImportOutcome, ImporterError> {
        info!(task_id = %self.task_id, "Importer started");
        let mut batches = 0u64;

        loop {
            if cancel.is_cancelled() {
                info!(task_id = %self.task_id, batches, "Importer cancelled");
                return Ok(ImportOutcome::Cancelled);
            }

            let Some(records) = self.channel.fetch(self.batch_size, FETCH_TIMEOUT).await else {
                info!(task_id = %self.task_id, batches, "Channel closed, importer stopping");
                return Ok(ImportOutcome::Stopped);
            };
            if records.is_empty() {
                continue;
            }

            let finished = records.iter().any(Record::is_finished);
            let position = if finished {
                IngestPosition::Finished
            } else {
                records
                    .last()
                    .map(Record::position)
                    .unwrap_or_else(|| self.tracker.current())
            };

            let data: Vec<DataRecord> = records
                .into_iter()
                .filter_map(|record| match record {
                    Record::Data(data) => Some(data),
                    _ => None,
                })
                .collect();

            if let Some(first) = data.first() {
                if let Some(limiter) = &self.rate_limiter {
                    limiter.acquire(operation_of(first), data.len() as u64).await;
                }
                batches += 1;
                let batch_id = format!("{}:{}", self.task_id, batches);
                self.writer.write(&batch_id, &data).await?;
            }

            self.tracker.advance(position.clone());
            if let Some(listener) = &self.listener {
                listener.on_batch_imported(&self.task_id, data.len(), &position);
            }
            debug!(task_id = %self.task_id, records = data.len(), position = %position, "Batch committed");

            if finished {
                info!(task_id = %self.task_id, batches, "Importer finished");
                return Ok(ImportOutcome::Finished);
            }
        }
    }
}
