use crate::position::IngestPosition;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Preparing,
    Running,
    ExecuteInventoryTask,
    ExecuteIncrementalTask,
    Finished,
    Error(String),
}

impl JobStatus {
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            JobStatus::Running | JobStatus::ExecuteInventoryTask | JobStatus::ExecuteIncrementalTask
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self, JobStatus::Error(_))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Preparing => f.write_str("PREPARING"),
            JobStatus::Running => f.write_str("RUNNING"),
            JobStatus::ExecuteInventoryTask => f.write_str("EXECUTE_INVENTORY_TASK"),
            JobStatus::ExecuteIncrementalTask => f.write_str("EXECUTE_INCREMENTAL_TASK"),
            JobStatus::Finished => f.write_str("FINISHED"),
            JobStatus::Error(reason) => write!(f, "ERROR: {reason}"),
        }
    }
}

/// Inventory positions keyed by inventory task id (`<data source>.<table>#<split>`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InventoryTasksProgress {
    pub positions: BTreeMap<String, IngestPosition>,
}

impl InventoryTasksProgress {
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn all_finished(&self) -> bool {
        self.positions.values().all(IngestPosition::is_finished)
    }

    pub fn finished_count(&self) -> usize {
        self.positions.values().filter(|p| p.is_finished()).count()
    }

    /// Share of finished inventory tasks, 0 to 100.
    pub fn finished_percentage(&self) -> u8 {
        if self.positions.is_empty() {
            return 0;
        }
        ((self.finished_count() * 100) / self.positions.len()) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IncrementalTasksProgress {
    pub position: IngestPosition,
    /// Wall-clock time the last batch of changes was applied. Refreshed once per batch, so
    /// it is as fine-grained as the importer's write batches.
    pub latest_active_time_millis: i64,
}

/// Persisted, crash-recoverable progress of one shard item of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobItemProgress {
    pub status: JobStatus,
    pub data_source_name: String,
    pub inventory: InventoryTasksProgress,
    pub incremental: IncrementalTasksProgress,
    pub processed_record_count: u64,
    pub inventory_record_count: u64,
}

impl JobItemProgress {
    pub fn new(data_source_name: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Preparing,
            data_source_name: data_source_name.into(),
            inventory: InventoryTasksProgress::default(),
            incremental: IncrementalTasksProgress::default(),
            processed_record_count: 0,
            inventory_record_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_finished_share() {
        let mut progress = JobItemProgress::new("ds_0");
        progress
            .inventory
            .positions
            .insert("ds_0.t_order#0".into(), IngestPosition::Finished);
        progress
            .inventory
            .positions
            .insert("ds_0.t_order#1".into(), IngestPosition::Placeholder);
        assert_eq!(progress.inventory.finished_percentage(), 50);
        assert!(!progress.inventory.all_finished());
    }

    #[test]
    fn persists_as_json() {
        let mut progress = JobItemProgress::new("ds_0");
        progress.status = JobStatus::Error("boom".into());
        progress.incremental.position = IngestPosition::Log(12);
        let json = serde_json::to_string(&progress).unwrap();
        let back: JobItemProgress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, progress);
    }
}
