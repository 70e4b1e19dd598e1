#[cfg(test)]
mod tests {
    use crate::{
        Cluster, order,
        utils::{
            assert_target_matches_sources, create_job, fast_settings, small_batches,
            target_order, wait_until,
        },
    };
    use engine_config::job::DIGEST_MATCH;
    use engine_runtime::{JobError, MigrationJob};
    use model::{
        check::{IgnoredType, TableCheckResult},
        core::value::Value,
        progress::JobStatus,
    };
    use std::{sync::Arc, time::Duration};
    use tracing_test::traced_test;

    const WAIT: Duration = Duration::from_secs(10);

    async fn wait_for_inventory(job: &MigrationJob) {
        wait_until("inventory", WAIT, move || async move {
            job.is_inventory_finished().await.unwrap()
        })
        .await;
    }

    // Scenario: two source shards merged into one target table, plus an unsharded table.
    // Expected Outcome:
    // - After cutover every row is in the target and the job is completed.
    // - The consistency check matches both tables and its result is persisted.
    #[traced_test]
    #[tokio::test]
    async fn tc01() {
        let cluster = Cluster::new().await;
        let job = create_job(&cluster, cluster.job_config("j_tc01"), &small_batches()).await;

        job.start().await.unwrap();
        job.cutover().await.unwrap();

        assert_target_matches_sources(&cluster).await;
        assert!(job.is_completed().await.unwrap());
        let progress = job.progress().await.unwrap();
        assert_eq!(progress.len(), 2);
        for item in progress.iter().flatten() {
            assert_eq!(item.status, JobStatus::Finished);
            assert!(item.inventory.all_finished());
        }
        assert_eq!(progress[1].as_ref().unwrap().inventory_record_count, 20);

        let result = job.check_consistency().await.unwrap();
        assert_eq!(result.len(), 2);
        assert!(result.values().all(|r| r.matched));
        assert_eq!(job.check_result().await.unwrap(), Some(result));
    }

    // Scenario: the same job with the digest algorithm; one target row is changed after cutover.
    // Expected Outcome: t_order mismatches, t_user still matches.
    #[traced_test]
    #[tokio::test]
    async fn tc02() {
        let cluster = Cluster::new().await;
        let mut config = cluster.job_config("j_tc02");
        config.consistency_check.algorithm_type = DIGEST_MATCH.to_string();
        let job = create_job(&cluster, config, &small_batches()).await;

        job.start().await.unwrap();
        job.cutover().await.unwrap();
        cluster
            .target
            .update("t_order", &[Value::Int(17)], order(17, "lost"))
            .await
            .unwrap();

        let result = job.check_consistency().await.unwrap();
        assert_eq!(result.get("t_order"), Some(&TableCheckResult::matched(false)));
        assert_eq!(result.get("t_user"), Some(&TableCheckResult::matched(true)));
    }

    // Scenario: the job is stopped during inventory and started again from a fresh handle.
    // Expected Outcome:
    // - The stopped job persisted resumable progress, not an error.
    // - The resumed run ends with the same target state as an uninterrupted one.
    #[traced_test]
    #[tokio::test]
    async fn tc03() {
        let cluster = Cluster::new().await;
        cluster.ds_0.set_read_delay(Duration::from_millis(15));
        cluster.ds_1.set_read_delay(Duration::from_millis(15));
        let job = create_job(&cluster, cluster.job_config("j_tc03"), &small_batches()).await;

        job.start().await.unwrap();
        let running = &job;
        wait_until("first batch", WAIT, move || async move {
            running
                .progress()
                .await
                .unwrap()
                .iter()
                .flatten()
                .any(|p| p.processed_record_count > 0)
        })
        .await;
        job.stop().await.unwrap();
        assert!(!job.is_running().await);

        let persisted = job.progress().await.unwrap();
        for item in persisted.iter().flatten() {
            assert!(!item.status.is_error());
            assert!(!item.inventory.is_empty());
        }

        cluster.ds_0.set_read_delay(Duration::ZERO);
        cluster.ds_1.set_read_delay(Duration::ZERO);
        let resumed = MigrationJob::load(
            "j_tc03",
            cluster.store.clone(),
            cluster.data_sources.clone(),
            fast_settings(),
        )
        .await
        .unwrap();
        resumed.start().await.unwrap();
        resumed.cutover().await.unwrap();

        assert_target_matches_sources(&cluster).await;
        assert!(resumed.is_completed().await.unwrap());
    }

    // Scenario: inserts, updates and deletes hit both shards after the inventory finished.
    // Expected Outcome: incremental replay carries every change to the target before cutover.
    #[traced_test]
    #[tokio::test]
    async fn tc04() {
        let cluster = Cluster::new().await;
        let job = create_job(&cluster, cluster.job_config("j_tc04"), &small_batches()).await;
        job.start().await.unwrap();
        wait_for_inventory(&job).await;

        cluster.ds_0.insert("t_order_0", order(100, "new")).await.unwrap();
        cluster.ds_1.insert("t_order_1", order(101, "new")).await.unwrap();
        cluster
            .ds_0
            .update("t_order_0", &[Value::Int(2)], order(2, "paid"))
            .await
            .unwrap();
        cluster.ds_1.delete("t_order_1", &[Value::Int(3)]).await.unwrap();
        cluster
            .ds_0
            .update("t_user", &[Value::Int(1)], crate::user(1, "renamed"))
            .await
            .unwrap();

        job.cutover().await.unwrap();

        assert_target_matches_sources(&cluster).await;
        assert_eq!(target_order(&cluster, 2).await, Some(order(2, "paid")));
        assert_eq!(target_order(&cluster, 3).await, None);
        assert_eq!(target_order(&cluster, 101).await, Some(order(101, "new")));
        let progress = job.progress().await.unwrap();
        assert!(
            progress
                .iter()
                .flatten()
                .all(|p| p.incremental.latest_active_time_millis > 0)
        );
    }

    // Scenario: every target write fails with a transient error.
    // Expected Outcome: retries run out, the items end in `Error` and the failure surfaces.
    #[traced_test]
    #[tokio::test]
    async fn tc05() {
        let cluster = Cluster::new().await;
        let job = create_job(&cluster, cluster.job_config("j_tc05"), &small_batches()).await;
        cluster.target.fail_next_writes(usize::MAX);

        job.start().await.unwrap();
        let err = job.join().await.unwrap_err();
        assert!(matches!(err, JobError::Task(_)), "unexpected error: {err}");

        let progress = job.progress().await.unwrap();
        assert!(progress.iter().flatten().all(|p| p.status.is_error()));
        assert!(!job.is_inventory_finished().await.unwrap());
        assert!(logs_contain("Job item failed"));
    }

    // Scenario: the first two target writes fail, the job allows two retries.
    // Expected Outcome: the writes are retried and the migration completes.
    #[traced_test]
    #[tokio::test]
    async fn tc06() {
        let cluster = Cluster::new().await;
        let job = create_job(&cluster, cluster.job_config("j_tc06"), &small_batches()).await;
        cluster.target.fail_next_writes(2);

        job.start().await.unwrap();
        job.cutover().await.unwrap();

        assert_target_matches_sources(&cluster).await;
        assert!(job.is_completed().await.unwrap());
    }

    // Scenario: a second job copies the same sources into the already migrated target.
    // Expected Outcome: replaying every batch leaves the target unchanged.
    #[traced_test]
    #[tokio::test]
    async fn tc07() {
        let cluster = Cluster::new().await;
        let first = create_job(&cluster, cluster.job_config("j_tc07_a"), &small_batches()).await;
        first.start().await.unwrap();
        first.cutover().await.unwrap();
        let after_first = cluster.target.rows("t_order").await.unwrap();

        let second = create_job(&cluster, cluster.job_config("j_tc07_b"), &small_batches()).await;
        second.start().await.unwrap();
        second.cutover().await.unwrap();

        assert_eq!(cluster.target.rows("t_order").await.unwrap(), after_first);
        assert_target_matches_sources(&cluster).await;
    }

    // Test Settings: break_on_mismatch = true.
    // Scenario: t_order (checked first) differs in the target, t_user does not.
    // Expected Outcome: the result holds exactly one entry and t_user is never checked.
    #[traced_test]
    #[tokio::test]
    async fn tc08() {
        let cluster = Cluster::new().await;
        let mut config = cluster.job_config("j_tc08");
        config.consistency_check.break_on_mismatch = true;
        let job = create_job(&cluster, config, &small_batches()).await;

        job.start().await.unwrap();
        job.cutover().await.unwrap();
        cluster.target.delete("t_order", &[Value::Int(4)]).await.unwrap();

        let result = job.check_consistency().await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.get("t_order"), Some(&TableCheckResult::matched(false)));
        assert!(!result.contains_key("t_user"));
        assert!(logs_contain("Mismatch found, stopping consistency check"));
    }

    // Scenario: a slow consistency check is stopped from another task.
    // Expected Outcome: the check returns promptly with partial results.
    #[traced_test]
    #[tokio::test]
    async fn tc09() {
        let cluster = Cluster::new().await;
        let job = Arc::new(
            create_job(&cluster, cluster.job_config("j_tc09"), &small_batches()).await,
        );
        job.start().await.unwrap();
        job.cutover().await.unwrap();
        cluster.target.set_read_delay(Duration::from_secs(2));

        let checking = {
            let job = job.clone();
            tokio::spawn(async move { job.check_consistency().await })
        };
        let running = &job;
        wait_until("check start", WAIT, move || async move { running.is_checking() }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(job.stop_check());

        let result = tokio::time::timeout(Duration::from_secs(1), checking)
            .await
            .expect("check did not stop")
            .unwrap()
            .unwrap();
        assert!(result.len() < 2);
        assert!(!job.is_checking());
    }

    // Scenario: the consistency check is requested while the job is still running.
    // Expected Outcome: the check is refused until the job has been cut over.
    #[traced_test]
    #[tokio::test]
    async fn tc10() {
        let cluster = Cluster::new().await;
        let job = create_job(&cluster, cluster.job_config("j_tc10"), &small_batches()).await;
        job.start().await.unwrap();

        assert!(matches!(
            job.check_consistency().await,
            Err(JobError::NotCompleted(_))
        ));
        assert!(matches!(job.start().await, Err(JobError::AlreadyRunning(_))));
        job.stop().await.unwrap();
    }

    // Scenario: a logic table maps to a target table that does not exist.
    // Expected Outcome: start fails fast and item 0 records the error.
    #[traced_test]
    #[tokio::test]
    async fn tc11() {
        let cluster = Cluster::new().await;
        let mut config = cluster.job_config("j_tc11");
        config
            .target_table_names
            .insert("t_user".into(), "t_customer".into());
        let job = create_job(&cluster, config, &small_batches()).await;

        let err = job.start().await.unwrap_err();
        assert!(matches!(err, JobError::MissingTargetTable { ref table, .. } if table == "t_customer"));
        assert!(!job.is_running().await);
        let progress = job.progress().await.unwrap();
        assert!(progress[0].as_ref().is_some_and(|p| p.status.is_error()));
    }

    // Scenario: a finished job is dropped.
    // Expected Outcome: its configuration and progress are gone from the registry.
    #[traced_test]
    #[tokio::test]
    async fn tc12() {
        let cluster = Cluster::new().await;
        let job = create_job(&cluster, cluster.job_config("j_tc12"), &small_batches()).await;
        job.start().await.unwrap();
        job.cutover().await.unwrap();
        job.drop_job().await.unwrap();

        let loaded = MigrationJob::load(
            "j_tc12",
            cluster.store.clone(),
            cluster.data_sources.clone(),
            fast_settings(),
        )
        .await;
        assert!(matches!(loaded, Err(JobError::JobNotFound(_))));
    }

    // Scenario: a table without any unique key is migrated and checked.
    // Expected Outcome: rows are copied, the check reports the table as ignored.
    #[traced_test]
    #[tokio::test]
    async fn tc13() {
        use engine_config::job::{JobDataNodeEntry, JobDataNodeLine, MigrationJobConfiguration};
        use engine_core::connectors::{ColumnMetaData, TableMetaData};
        use model::core::{data_type::DataType, identifiers::DataNode};

        let cluster = Cluster::new().await;
        let log = TableMetaData::new(
            "t_log",
            vec![
                ColumnMetaData::new("message", DataType::VarChar),
                ColumnMetaData::new("level", DataType::Int),
            ],
        );
        cluster.ds_1.create_table(log.clone()).await;
        cluster.target.create_table(log).await;
        for n in 0..5 {
            cluster
                .ds_1
                .insert(
                    "t_log",
                    [
                        ("message", Value::from(format!("line {n}").as_str())),
                        ("level", Value::Int(n)),
                    ]
                    .into_iter()
                    .collect(),
                )
                .await
                .unwrap();
        }
        let mut config = MigrationJobConfiguration::new(
            crate::TARGET,
            vec![JobDataNodeLine::new(vec![JobDataNodeEntry::new(
                "t_log",
                vec![DataNode::new("ds_1", "t_log")],
            )])],
        );
        config.job_id = "j_tc13".into();
        let job = create_job(&cluster, config, &small_batches()).await;

        job.start().await.unwrap();
        job.cutover().await.unwrap();

        assert_eq!(cluster.target.rows("t_log").await.unwrap().len(), 5);
        let result = job.check_consistency().await.unwrap();
        assert_eq!(
            result.get("t_log"),
            Some(&TableCheckResult::ignored(IgnoredType::NoUniqueKey))
        );
    }

    // Scenario: a second consistency check is requested while one is running.
    // Expected Outcome: the second is refused and stop_check still reaches the first.
    #[traced_test]
    #[tokio::test]
    async fn tc14() {
        let cluster = Cluster::new().await;
        let job = Arc::new(
            create_job(&cluster, cluster.job_config("j_tc14"), &small_batches()).await,
        );
        job.start().await.unwrap();
        job.cutover().await.unwrap();
        cluster.target.set_read_delay(Duration::from_secs(2));

        let checking = {
            let job = job.clone();
            tokio::spawn(async move { job.check_consistency().await })
        };
        let running = &job;
        wait_until("check start", WAIT, move || async move { running.is_checking() }).await;

        assert!(matches!(
            job.check_consistency().await,
            Err(JobError::CheckRunning(_))
        ));
        assert!(job.is_checking());
        assert!(job.stop_check());

        let result = tokio::time::timeout(Duration::from_secs(1), checking)
            .await
            .expect("check did not stop")
            .unwrap();
        assert!(result.is_ok());
        assert!(!job.is_checking());
    }

    // Scenario: a job copying a keyless table with duplicate rows is stopped and resumed.
    // Expected Outcome: the resumed pass replaces the partial copy, so the target holds
    // exactly the source rows, duplicates included.
    #[traced_test]
    #[tokio::test]
    async fn tc15() {
        use engine_config::job::{JobDataNodeEntry, JobDataNodeLine, MigrationJobConfiguration};
        use engine_core::connectors::{ColumnMetaData, TableMetaData};
        use model::core::{data_type::DataType, identifiers::DataNode};

        let cluster = Cluster::new().await;
        let log = TableMetaData::new("t_log", vec![ColumnMetaData::new("message", DataType::VarChar)]);
        cluster.ds_1.create_table(log.clone()).await;
        cluster.target.create_table(log).await;
        for n in [0, 1, 2, 3, 3, 4, 5, 6, 7, 7, 8, 9] {
            cluster
                .ds_1
                .insert(
                    "t_log",
                    [("message", Value::from(format!("line {n}")))].into_iter().collect(),
                )
                .await
                .unwrap();
        }
        let mut config = MigrationJobConfiguration::new(
            crate::TARGET,
            vec![JobDataNodeLine::new(vec![JobDataNodeEntry::new(
                "t_log",
                vec![DataNode::new("ds_1", "t_log")],
            )])],
        );
        config.job_id = "j_tc15".into();
        let job = create_job(&cluster, config, &small_batches()).await;

        job.start().await.unwrap();
        let running = &job;
        wait_until("first batch", WAIT, move || async move {
            running
                .progress()
                .await
                .unwrap()
                .iter()
                .flatten()
                .any(|p| p.processed_record_count > 0)
        })
        .await;
        job.stop().await.unwrap();

        let resumed = MigrationJob::load(
            "j_tc15",
            cluster.store.clone(),
            cluster.data_sources.clone(),
            fast_settings(),
        )
        .await
        .unwrap();
        resumed.start().await.unwrap();
        resumed.cutover().await.unwrap();

        assert_eq!(
            cluster.target.rows("t_log").await.unwrap(),
            cluster.ds_1.rows("t_log").await.unwrap()
        );
    }
}
