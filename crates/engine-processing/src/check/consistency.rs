use crate::{
    check::{
        CheckedTable, TableDataConsistencyCheckAlgorithm, TableInventoryCheckParameter,
        TableInventoryChecker, build_check_algorithm,
    },
    dumper::inventory::key_type_of,
    error::CheckError,
    splitter::split_integer_keys,
};
use engine_config::job::MigrationJobConfiguration;
use engine_core::{
    connectors::{DataSourceProvider, QueryRange, TableMetaData},
    consistency::CheckRangeRepository,
};
use model::{
    check::{IgnoredType, TableCheckRangePosition, TableCheckResult},
    core::{identifiers::DataNode, value::Value},
    position::KeyType,
};
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::watch;
use tracing::{info, warn};

/// Everything needed to check one logic table.
struct TablePlan {
    logic_table_name: String,
    nodes: Vec<DataNode>,
    sources: Vec<CheckedTable>,
    target: CheckedTable,
    meta: TableMetaData,
}

impl TablePlan {
    fn parameter(&self, range: &TableCheckRangePosition, chunk_size: usize) -> TableInventoryCheckParameter {
        TableInventoryCheckParameter {
            logic_table_name: self.logic_table_name.clone(),
            sources: self.sources.clone(),
            target: self.target.clone(),
            unique_keys: self.meta.unique_key_columns.clone(),
            range: QueryRange::closed(range.lower_position.clone(), range.upper_position.clone()),
            chunk_size,
        }
    }

    /// Result of a range checked by an earlier run.
    fn previous_result(&self, range: &TableCheckRangePosition) -> TableCheckResult {
        if self.meta.has_unique_key() {
            TableCheckResult::matched(range.matched.unwrap_or(false))
        } else {
            TableCheckResult::ignored(IgnoredType::NoUniqueKey)
        }
    }
}

/// Checks every migrated table of a job, range by range, resuming from the ranges
/// persisted by an earlier run.
pub struct DataConsistencyChecker {
    job: MigrationJobConfiguration,
    data_sources: Arc<dyn DataSourceProvider>,
    repository: CheckRangeRepository,
    algorithm: Arc<dyn TableDataConsistencyCheckAlgorithm>,
    current: watch::Sender<Option<Arc<dyn TableInventoryChecker>>>,
    canceling: AtomicBool,
}

impl DataConsistencyChecker {
    pub fn new(
        job: MigrationJobConfiguration,
        data_sources: Arc<dyn DataSourceProvider>,
        repository: CheckRangeRepository,
    ) -> Result<Self, CheckError> {
        let algorithm = build_check_algorithm(&job.consistency_check.algorithm_type)?;
        Ok(Self::with_algorithm(job, data_sources, repository, algorithm))
    }

    pub fn with_algorithm(
        job: MigrationJobConfiguration,
        data_sources: Arc<dyn DataSourceProvider>,
        repository: CheckRangeRepository,
        algorithm: Arc<dyn TableDataConsistencyCheckAlgorithm>,
    ) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            job,
            data_sources,
            repository,
            algorithm,
            current,
            canceling: AtomicBool::new(false),
        }
    }

    pub fn algorithm_type(&self) -> &'static str {
        self.algorithm.type_name()
    }

    /// Stops the check. The checker currently running is cancelled right away.
    pub fn cancel(&self) {
        self.canceling.store(true, Ordering::SeqCst);
        let current = self.current.borrow().clone();
        if let Some(checker) = current {
            checker.cancel();
        }
    }

    pub fn is_canceling(&self) -> bool {
        self.canceling.load(Ordering::SeqCst)
    }

    async fn plan_tables(&self) -> Result<Vec<TablePlan>, CheckError> {
        let target_source = self.data_sources.get(&self.job.target_data_source)?;
        let mut plans = Vec::new();

        for logic_table_name in self.job.logic_table_names() {
            let mut nodes: Vec<DataNode> = Vec::new();
            for line in &self.job.job_sharding_data_node_lines {
                for (logic, node) in line.nodes() {
                    if logic == logic_table_name && !nodes.contains(node) {
                        nodes.push(node.clone());
                    }
                }
            }

            let mut sources = Vec::with_capacity(nodes.len());
            for node in &nodes {
                let source = self.data_sources.get(&node.data_source_name)?;
                sources.push(CheckedTable::new(source, node.table_name.clone()));
            }
            let Some(first) = sources.first() else {
                continue;
            };
            let meta = first.data_source.table_meta(&first.table).await?;
            let target = CheckedTable::new(
                target_source.clone(),
                self.job.target_table_name(&logic_table_name),
            );

            plans.push(TablePlan {
                logic_table_name,
                nodes,
                sources,
                target,
                meta,
            });
        }
        Ok(plans)
    }

    /// Check ranges of one table. Integer keys are split by `range_row_count` over the
    /// key bounds of all source nodes; every other table is checked as one range.
    async fn split(&self, plan: &TablePlan) -> Result<Vec<TableCheckRangePosition>, CheckError> {
        let mut bounds: Vec<(Option<i64>, Option<i64>)> = vec![(None, None)];

        if key_type_of(&plan.meta) == Some(KeyType::Integer) {
            let mut count = 0;
            let mut min_max: Option<(i64, i64)> = None;
            for source in &plan.sources {
                count += source.data_source.count(&source.table, &QueryRange::all()).await?;
                if let Some((Value::Int(lo), Value::Int(hi))) =
                    source.data_source.key_bounds(&source.table).await?
                {
                    min_max = Some(match min_max {
                        Some((min, max)) => (min.min(lo), max.max(hi)),
                        None => (lo, hi),
                    });
                }
            }
            if let Some((min, max)) = min_max {
                bounds = split_integer_keys(
                    min,
                    max,
                    count,
                    self.job.consistency_check.range_row_count,
                );
            }
        }

        let Some(first_node) = plan.nodes.first() else {
            return Ok(Vec::new());
        };
        Ok(bounds
            .into_iter()
            .enumerate()
            .map(|(item, (lower, upper))| {
                TableCheckRangePosition::new(
                    item,
                    first_node.clone(),
                    plan.logic_table_name.clone(),
                    lower.map(Value::Int),
                    upper.map(Value::Int),
                )
            })
            .collect())
    }

    /// Checks all unchecked ranges in order and returns the result per logic table.
    /// Stops early when cancelled, or at the first mismatch with `break_on_mismatch`.
    pub async fn check(&self) -> Result<BTreeMap<String, TableCheckResult>, CheckError> {
        let job_id = self.job.job_id.as_str();
        let settings = &self.job.consistency_check;
        let plans = self.plan_tables().await?;

        let mut ranges = self.repository.load_ranges(job_id).await?;
        if ranges.is_empty() {
            for plan in &plans {
                ranges.extend(self.split(plan).await?);
            }
            self.repository.persist_ranges(job_id, &ranges).await?;
            info!(job_id, ranges = ranges.len(), "Split consistency check ranges");
        }

        info!(job_id, algorithm = self.algorithm.type_name(), "Consistency check started");
        let mut results: BTreeMap<String, TableCheckResult> = BTreeMap::new();

        for index in 0..ranges.len() {
            if self.is_canceling() {
                break;
            }
            let Some(plan) = plans
                .iter()
                .find(|plan| plan.logic_table_name == ranges[index].logic_table_name)
            else {
                warn!(job_id, table = %ranges[index].logic_table_name, "Check range of unknown table skipped");
                continue;
            };
            let table = plan.logic_table_name.clone();

            if ranges[index].checked {
                merge(&mut results, table, plan.previous_result(&ranges[index]));
                continue;
            }

            let checker = self
                .algorithm
                .build_checker(plan.parameter(&ranges[index], settings.chunk_size));
            self.current.send_replace(Some(checker.clone()));
            if self.is_canceling() {
                checker.cancel();
            }
            let outcome = checker.check().await;
            self.current.send_replace(None);

            let result = match outcome {
                Ok(result) => result,
                Err(CheckError::Cancelled) => {
                    info!(job_id, table = %table, "Consistency check cancelled");
                    break;
                }
                Err(err) => return Err(err),
            };

            ranges[index].mark_checked(result.matched);
            self.repository.persist_ranges(job_id, &ranges).await?;
            info!(
                job_id,
                table = %table,
                range = ranges[index].splitting_item,
                matched = result.matched,
                ignored = result.is_ignored(),
                "Range checked"
            );

            let mismatch = !result.matched && !result.is_ignored();
            merge(&mut results, table.clone(), result);
            if mismatch && settings.break_on_mismatch {
                warn!(job_id, table = %table, "Mismatch found, stopping consistency check");
                self.cancel();
                break;
            }
        }

        self.repository.persist_result(job_id, &results).await?;
        Ok(results)
    }
}

fn merge(results: &mut BTreeMap<String, TableCheckResult>, table: String, result: TableCheckResult) {
    results
        .entry(table)
        .and_modify(|total| total.merge(&result))
        .or_insert(result);
}
