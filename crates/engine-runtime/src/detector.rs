//! Completion queries over tasks and persisted progress.
//!
//! Missing or incomplete data always answers "not finished", so a job never cuts over
//! on progress it has not seen.

use engine_processing::task::PipelineTask;
use model::progress::{JobItemProgress, JobStatus};
use std::sync::Arc;

/// True when every task sits at `Finished`. Vacuously true for no tasks.
pub fn is_all_inventory_tasks_finished<T: PipelineTask + ?Sized>(tasks: &[Arc<T>]) -> bool {
    tasks.iter().all(|task| task.position().is_finished())
}

/// True only when exactly `expected` items reported progress and every inventory
/// position of every item is `Finished`. An item with no inventory positions counts
/// as unfinished.
pub fn is_inventory_finished(expected: usize, progresses: &[Option<JobItemProgress>]) -> bool {
    let Some(present) = all_present(expected, progresses) else {
        return false;
    };
    present
        .iter()
        .all(|progress| !progress.inventory.is_empty() && progress.inventory.all_finished())
}

/// Like [`is_inventory_finished`], additionally requiring every item to be `Finished`.
pub fn is_job_completed(expected: usize, progresses: &[Option<JobItemProgress>]) -> bool {
    is_inventory_finished(expected, progresses)
        && progresses
            .iter()
            .flatten()
            .all(|progress| progress.status == JobStatus::Finished)
}

fn all_present(expected: usize, progresses: &[Option<JobItemProgress>]) -> Option<Vec<&JobItemProgress>> {
    let present: Vec<&JobItemProgress> = progresses.iter().flatten().collect();
    if expected == 0 || present.len() != progresses.len() || present.len() != expected {
        return None;
    }
    Some(present)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use engine_processing::{error::TaskError, task::TaskState};
    use model::{
        position::{IngestPosition, PrimaryKeyPosition},
        progress::JobItemProgress,
    };

    struct FixedTask(IngestPosition);

    #[async_trait]
    impl PipelineTask for FixedTask {
        fn task_id(&self) -> &str {
            "fixed"
        }

        fn position(&self) -> IngestPosition {
            self.0.clone()
        }

        fn state(&self) -> TaskState {
            TaskState::NotStarted
        }

        async fn run(&self) -> Result<TaskState, TaskError> {
            Ok(TaskState::Finished)
        }

        fn stop(&self) {}
    }

    fn tasks(positions: Vec<IngestPosition>) -> Vec<Arc<FixedTask>> {
        positions.into_iter().map(|p| Arc::new(FixedTask(p))).collect()
    }

    fn item(table: &str, position: IngestPosition) -> Option<JobItemProgress> {
        let mut progress = JobItemProgress::new("ds_0");
        progress
            .inventory
            .positions
            .insert(format!("ds_0.{table}#0"), position);
        Some(progress)
    }

    fn finished_items(table: &str, count: usize) -> Vec<Option<JobItemProgress>> {
        (0..count).map(|_| item(table, IngestPosition::Finished)).collect()
    }

    #[test]
    fn no_tasks_means_finished() {
        assert!(is_all_inventory_tasks_finished::<FixedTask>(&[]));
    }

    #[test]
    fn every_task_must_be_finished() {
        assert!(is_all_inventory_tasks_finished(&tasks(vec![
            IngestPosition::Finished,
            IngestPosition::Finished,
        ])));
        assert!(!is_all_inventory_tasks_finished(&tasks(vec![
            IngestPosition::Finished,
            IngestPosition::Placeholder,
        ])));
        let in_flight = IngestPosition::PrimaryKey(PrimaryKeyPosition::Integer {
            begin: Some(10),
            end: Some(100),
        });
        assert!(!is_all_inventory_tasks_finished(&tasks(vec![in_flight])));
    }

    #[test]
    fn item_count_must_match_exactly() {
        let table_a = finished_items("t_a", 4);
        let table_b = finished_items("t_b", 3);
        assert!(is_inventory_finished(4, &table_a));
        assert!(!is_inventory_finished(4, &table_b));
        assert!(!is_inventory_finished(3, &table_a));
    }

    #[test]
    fn missing_or_empty_progress_is_unfinished() {
        let mut items = finished_items("t_order", 2);
        items.push(None);
        assert!(!is_inventory_finished(3, &items));

        let mut empty = finished_items("t_order", 1);
        empty.push(Some(JobItemProgress::new("ds_1")));
        assert!(!is_inventory_finished(2, &empty));

        let mut partial = finished_items("t_order", 1);
        partial.push(item("t_order", IngestPosition::Placeholder));
        assert!(!is_inventory_finished(2, &partial));

        assert!(!is_inventory_finished(0, &[]));
    }

    #[test]
    fn completion_needs_finished_status() {
        let mut items = finished_items("t_order", 2);
        assert!(!is_job_completed(2, &items));
        for progress in items.iter_mut().flatten() {
            progress.status = JobStatus::Finished;
        }
        assert!(is_job_completed(2, &items));
        items.pop();
        assert!(!is_job_completed(2, &items));
    }
}
