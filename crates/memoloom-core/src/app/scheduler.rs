//! Scheduler - 実行すべきジョブを選び、並べ、ワーカーに配る
//!
//! # 1 ジョブの流れ（各ワーカー内）
//! 1. try_claim（取れなければ skip。force_run なら取れなくても続行）
//! 2. dry_run なら記録だけして終了
//! 3. Executor を呼ぶ
//! 4. `set(fingerprint, output, require_absent = false)`
//!
//! # 失敗ポリシー
//! - 既定: 保存済み出力があれば skip
//! - rerun_failing: primary field が null の出力は「無い」とみなす（lock は有効）
//! - force_run（全体 or ジョブ単位）: 出力チェックも lock チェックも無視して上書き

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;

use super::lock::LockCoordinator;
use super::status::{JobOutcome, JobReport, RunReport};
use super::worker_pool::{JobHandler, WorkerPool};
use crate::domain::{ClaimantId, JobDescriptor, JobParams, JobRecord, JobType, StoredOutput, jobs_key};
use crate::error::{ConfigError, MemoError};
use crate::ports::{Executor, ExecutorError, MemoStore, StoreError};

/// Which of the persisted jobs a run targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSelector {
    Type(JobType),
    /// Sorting jobs for one algorithm.
    SortingAlgorithm(String),
}

impl JobSelector {
    pub fn matches(&self, job: &JobDescriptor) -> bool {
        match self {
            JobSelector::Type(job_type) => job.job_type() == *job_type,
            JobSelector::SortingAlgorithm(algorithm) => {
                matches!(job.params(), JobParams::Sorting(p) if &p.algorithm == algorithm)
            }
        }
    }
}

impl FromStr for JobSelector {
    type Err = ConfigError;

    /// `<job-type>` or `sorting:<algorithm>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None => Ok(JobSelector::Type(s.parse()?)),
            Some(("sorting", algorithm)) if !algorithm.is_empty() => {
                Ok(JobSelector::SortingAlgorithm(algorithm.to_string()))
            }
            Some(_) => Err(ConfigError::InvalidSelector(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobOrder {
    Deterministic,
    #[default]
    Shuffled,
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub workflow_name: String,
    pub num_parallel: usize,
    pub order: JobOrder,
    pub dry_run: bool,
    pub force_run: bool,
    pub rerun_failing: bool,
}

impl SchedulerOptions {
    pub fn new(workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            num_parallel: 1,
            order: JobOrder::default(),
            dry_run: false,
            force_run: false,
            rerun_failing: false,
        }
    }
}

pub struct Scheduler {
    store: Arc<dyn MemoStore>,
    executor: Arc<dyn Executor>,
    locks: Arc<LockCoordinator>,
    options: SchedulerOptions,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn MemoStore>,
        executor: Arc<dyn Executor>,
        claimant: ClaimantId,
        options: SchedulerOptions,
    ) -> Self {
        let locks = Arc::new(LockCoordinator::new(Arc::clone(&store), claimant));
        Self {
            store,
            executor,
            locks,
            options,
        }
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Persisted job list of this workflow, narrowed to `selector`.
    pub async fn load_jobs(&self, selector: &JobSelector) -> Result<Vec<JobDescriptor>, MemoError> {
        let name = &self.options.workflow_name;
        let value = self
            .store
            .get(&jobs_key(name))
            .await?
            .ok_or_else(|| ConfigError::JobListMissing(name.clone()))?;
        let records: Vec<JobRecord> =
            serde_json::from_value(value).map_err(|source| ConfigError::MalformedJobList {
                workflow: name.clone(),
                source,
            })?;

        let mut jobs = Vec::new();
        for record in records {
            let job = JobDescriptor::from_record(record)?;
            if selector.matches(&job) {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Jobs that need execution under the failure policy.
    ///
    /// Jobs sharing a fingerprint collapse to the first occurrence.
    pub async fn filter_runnable(&self, jobs: Vec<JobDescriptor>) -> Result<Vec<JobDescriptor>, StoreError> {
        let mut seen = HashSet::new();
        let mut runnable = Vec::new();
        for job in jobs {
            let keep = self.options.force_run
                || job.force_run()
                || match self.store.get_output(job.fingerprint()).await? {
                    None => true,
                    Some(output) => self.options.rerun_failing && output.is_failed(job.job_type()),
                };
            if !keep {
                tracing::debug!(job = %job.label(), "stored output present, skipping");
            } else if !seen.insert(job.fingerprint().clone()) {
                tracing::debug!(job = %job.label(), fingerprint = %job.fingerprint(), "duplicate fingerprint, skipping");
            } else {
                runnable.push(job);
            }
        }
        Ok(runnable)
    }

    pub fn order(&self, jobs: &mut [JobDescriptor]) {
        if self.options.order == JobOrder::Shuffled {
            jobs.shuffle(&mut rand::thread_rng());
        }
    }

    /// Order and dispatch `jobs` across the worker pool.
    pub async fn run(&self, mut jobs: Vec<JobDescriptor>) -> Result<RunReport, MemoError> {
        self.order(&mut jobs);
        let pool = WorkerPool::new(self.options.num_parallel);
        tracing::info!(
            workflow = %self.options.workflow_name,
            jobs = jobs.len(),
            workers = pool.num_workers(),
            dry_run = self.options.dry_run,
            "running jobs"
        );
        for job in &jobs {
            tracing::debug!(job = %job.label(), fingerprint = %job.fingerprint(), "selected");
        }

        let selected = jobs.len();
        let runner = Arc::new(JobRunner {
            store: Arc::clone(&self.store),
            executor: Arc::clone(&self.executor),
            locks: Arc::clone(&self.locks),
            workflow: self.options.workflow_name.clone(),
            dry_run: self.options.dry_run,
            force_run: self.options.force_run,
        });
        let reports = pool.run(jobs, runner).await?;

        let report = RunReport {
            workflow: self.options.workflow_name.clone(),
            selected,
            jobs: reports,
        };
        let counts = report.counts();
        tracing::info!(
            selected = counts.selected,
            claimed = counts.claimed,
            skipped = counts.skipped_locked,
            succeeded = counts.succeeded,
            failed = counts.failed,
            "run finished"
        );
        Ok(report)
    }

    /// Load, filter and run the jobs matching `selector`.
    pub async fn run_selected(&self, selector: &JobSelector) -> Result<RunReport, MemoError> {
        let jobs = self.load_jobs(selector).await?;
        let runnable = self.filter_runnable(jobs).await?;
        self.run(runnable).await
    }

    /// Clear the claims of every job matching `selector`.
    pub async fn reset_locks(&self, selector: &JobSelector) -> Result<usize, MemoError> {
        let jobs = self.load_jobs(selector).await?;
        Ok(self.locks.reset_all(&self.options.workflow_name, &jobs).await?)
    }
}

struct JobRunner {
    store: Arc<dyn MemoStore>,
    executor: Arc<dyn Executor>,
    locks: Arc<LockCoordinator>,
    workflow: String,
    dry_run: bool,
    force_run: bool,
}

#[async_trait]
impl JobHandler for JobRunner {
    async fn handle(&self, worker_id: usize, job: JobDescriptor) -> Result<JobReport, StoreError> {
        let forced = self.force_run || job.force_run();
        let claimed = self.locks.try_claim(&self.workflow, &job).await?;
        if !claimed {
            let holder = self.locks.holder(&self.workflow, &job).await?.map(|r| r.claimant);
            if !forced {
                return Ok(JobReport::new(&job, worker_id, JobOutcome::SkippedLocked).with_holder(holder));
            }
            tracing::debug!(
                job = %job.label(),
                holder = ?holder,
                "claim held elsewhere, forced run continues"
            );
        }

        if self.dry_run {
            tracing::info!(worker_id, job = %job.label(), "dry run, executor not invoked");
            return Ok(JobReport::new(&job, worker_id, JobOutcome::DryRun).with_claimed(claimed));
        }

        tracing::info!(worker_id, job = %job.label(), "running");
        let output = match self.executor.execute(&job).await {
            Ok(output) => output,
            Err(ExecutorError::Store(err)) => return Err(err),
            Err(err) => {
                tracing::warn!(job = %job.label(), error = %err, "executor failed");
                StoredOutput::failure(job.job_type(), err.to_string())
            }
        };

        let failed = output.is_failed(job.job_type());
        let retcode = output.retcode();
        if failed {
            tracing::warn!(job = %job.label(), ?retcode, "job failed");
        } else {
            tracing::info!(job = %job.label(), "job succeeded");
        }
        self.store
            .set(&job.fingerprint().store_key(), output.into_value(), false)
            .await?;

        let outcome = if failed {
            JobOutcome::Failed
        } else {
            JobOutcome::Succeeded
        };
        Ok(JobReport::new(&job, worker_id, outcome)
            .with_retcode(retcode)
            .with_claimed(claimed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ResultCollector;
    use crate::app::graph_builder::WorkflowGraphBuilder;
    use crate::app::graph_builder::tests::{pipeline, store_with_catalog};
    use crate::domain::{PrepareRecordingNwbParams, SortingParams};
    use crate::impls::InMemoryStore;
    use bytes::Bytes;
    use rstest::rstest;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Executor that records calls and succeeds unless the label is listed as failing.
    #[derive(Default)]
    struct FakeExecutor {
        store: Option<Arc<InMemoryStore>>,
        calls: StdMutex<HashMap<String, usize>>,
        failing: Vec<String>,
        broken: Vec<String>,
        delay: Option<Duration>,
    }

    impl FakeExecutor {
        fn calls(&self, label: &str) -> usize {
            self.calls.lock().unwrap().get(label).copied().unwrap_or(0)
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn execute(&self, job: &JobDescriptor) -> Result<StoredOutput, ExecutorError> {
            *self
                .calls
                .lock()
                .unwrap()
                .entry(job.label().to_string())
                .or_default() += 1;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.broken.iter().any(|l| l == job.label()) {
                return Err(ExecutorError::MissingInput("sha1://gone".to_string()));
            }
            let field = job.job_type().primary_output_field();
            if self.failing.iter().any(|l| l == job.label()) {
                return Ok(StoredOutput::new()
                    .with_field("retcode", 1)
                    .with_field(field, serde_json::Value::Null));
            }
            let uri = match &self.store {
                Some(store) => {
                    store
                        .store_artifact(Bytes::from(job.label().to_string()))
                        .await?
                }
                None => format!("sha256://{}", job.fingerprint()),
            };
            Ok(StoredOutput::new()
                .with_field("retcode", 0)
                .with_field(field, uri))
        }
    }

    fn sorting_job(label: &str, algorithm: &str) -> JobDescriptor {
        JobDescriptor::new(
            label,
            JobParams::Sorting(SortingParams {
                algorithm: algorithm.to_string(),
                recording_nwb_uri: format!("sha256://nwb-{label}"),
                sorting_params: json!({}),
            }),
            false,
        )
    }

    fn sorting_jobs(n: usize) -> Vec<JobDescriptor> {
        (0..n).map(|i| sorting_job(&format!("ms4 s/rec{i}"), "mountainsort4")).collect()
    }

    async fn publish_jobs(store: &InMemoryStore, workflow: &str, jobs: &[JobDescriptor]) {
        let records: Vec<_> = jobs.iter().map(JobDescriptor::as_record).collect();
        store
            .set(&jobs_key(workflow), serde_json::to_value(records).unwrap(), false)
            .await
            .unwrap();
    }

    fn scheduler(
        store: Arc<InMemoryStore>,
        executor: Arc<FakeExecutor>,
        options: SchedulerOptions,
    ) -> Scheduler {
        Scheduler::new(store, executor, ClaimantId::generate(), options)
    }

    fn deterministic(workflow: &str) -> SchedulerOptions {
        SchedulerOptions {
            order: JobOrder::Deterministic,
            ..SchedulerOptions::new(workflow)
        }
    }

    #[rstest]
    #[case("sorting", JobSelector::Type(JobType::Sorting))]
    #[case("compare-with-truth", JobSelector::Type(JobType::CompareWithTruth))]
    #[case("sorting:kilosort2_5", JobSelector::SortingAlgorithm("kilosort2_5".to_string()))]
    fn parses_selectors(#[case] raw: &str, #[case] expected: JobSelector) {
        assert_eq!(raw.parse::<JobSelector>().unwrap(), expected);
    }

    #[rstest]
    #[case("sortng")]
    #[case("sorting:")]
    #[case("metrics:foo")]
    fn rejects_bad_selectors(#[case] raw: &str) {
        assert!(raw.parse::<JobSelector>().is_err());
    }

    #[test]
    fn algorithm_selector_only_matches_sorting_jobs() {
        let selector = JobSelector::SortingAlgorithm("mountainsort4".to_string());
        assert!(selector.matches(&sorting_job("a", "mountainsort4")));
        assert!(!selector.matches(&sorting_job("b", "tridesclous")));
        let nwb = JobDescriptor::new(
            "c",
            JobParams::PrepareRecordingNwb(PrepareRecordingNwbParams {
                recording_uri: "mountainsort4".to_string(),
            }),
            false,
        );
        assert!(!selector.matches(&nwb));
    }

    #[tokio::test]
    async fn missing_job_list_is_a_config_error() {
        let store = Arc::new(InMemoryStore::new());
        let sched = scheduler(store, Arc::new(FakeExecutor::default()), deterministic("nope"));
        let err = sched
            .load_jobs(&JobSelector::Type(JobType::Sorting))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoError::Config(ConfigError::JobListMissing(_))));
    }

    #[tokio::test]
    async fn unknown_job_type_in_list_is_a_config_error() {
        let store = Arc::new(InMemoryStore::new());
        store
            .set(
                &jobs_key("wf"),
                json!([{"type": "spike-magic", "label": "x", "params": {}, "force_run": false}]),
                false,
            )
            .await
            .unwrap();
        let sched = scheduler(store, Arc::new(FakeExecutor::default()), deterministic("wf"));
        let err = sched
            .load_jobs(&JobSelector::Type(JobType::Sorting))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoError::Config(ConfigError::UnknownJobType(_))));
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let store = Arc::new(InMemoryStore::new());
        let jobs = sorting_jobs(3);
        publish_jobs(&store, "wf", &jobs).await;
        let executor = Arc::new(FakeExecutor::default());
        let selector = JobSelector::SortingAlgorithm("mountainsort4".to_string());

        let sched = scheduler(store.clone(), executor.clone(), deterministic("wf"));
        let report = sched.run_selected(&selector).await.unwrap();
        assert_eq!(report.counts().succeeded, 3);

        // A different process: fresh claimant, nothing left to do.
        let sched = scheduler(store.clone(), executor.clone(), deterministic("wf"));
        let report = sched.run_selected(&selector).await.unwrap();
        assert_eq!(report.selected, 0);
        assert_eq!(executor.total_calls(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_schedulers_execute_each_job_at_most_once() {
        let store = Arc::new(InMemoryStore::new());
        let jobs = sorting_jobs(12);
        publish_jobs(&store, "wf", &jobs).await;
        let executor = Arc::new(FakeExecutor {
            delay: Some(Duration::from_millis(5)),
            ..Default::default()
        });
        let selector = JobSelector::Type(JobType::Sorting);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let sched = scheduler(
                store.clone(),
                executor.clone(),
                SchedulerOptions {
                    num_parallel: 3,
                    ..SchedulerOptions::new("wf")
                },
            );
            let selector = selector.clone();
            handles.push(tokio::spawn(async move {
                sched.run_selected(&selector).await.unwrap()
            }));
        }
        let mut executed = 0;
        for handle in handles {
            let counts = handle.await.unwrap().counts();
            executed += counts.succeeded;
        }

        assert_eq!(executed, 12);
        for job in &jobs {
            assert_eq!(executor.calls(job.label()), 1, "{}", job.label());
        }
    }

    #[tokio::test]
    async fn claimed_job_is_skipped_without_error() {
        let store = Arc::new(InMemoryStore::new());
        let jobs = sorting_jobs(2);
        let other = LockCoordinator::new(store.clone(), ClaimantId::generate());
        assert!(other.try_claim("wf", &jobs[0]).await.unwrap());

        let executor = Arc::new(FakeExecutor::default());
        let sched = scheduler(store.clone(), executor.clone(), deterministic("wf"));
        let report = sched.run(jobs.clone()).await.unwrap();

        assert_eq!(report.outcome_of(jobs[0].label()), Some(JobOutcome::SkippedLocked));
        let skipped = report.jobs.iter().find(|j| j.label == jobs[0].label()).unwrap();
        assert_eq!(skipped.held_by, Some(other.claimant()));
        assert_eq!(report.counts().claimed, 1);
        assert_eq!(report.outcome_of(jobs[1].label()), Some(JobOutcome::Succeeded));
        assert_eq!(executor.calls(jobs[0].label()), 0);
        assert!(store.get_output(jobs[0].fingerprint()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn force_run_overrides_cache_and_locks() {
        let store = Arc::new(InMemoryStore::new());
        let jobs = sorting_jobs(2);
        publish_jobs(&store, "wf", &jobs).await;
        let executor = Arc::new(FakeExecutor::default());
        let selector = JobSelector::Type(JobType::Sorting);

        scheduler(store.clone(), executor.clone(), deterministic("wf"))
            .run_selected(&selector)
            .await
            .unwrap();

        let forced = SchedulerOptions {
            force_run: true,
            ..deterministic("wf")
        };
        let report = scheduler(store.clone(), executor.clone(), forced)
            .run_selected(&selector)
            .await
            .unwrap();
        let counts = report.counts();
        assert_eq!(counts.succeeded, 2);
        assert_eq!(counts.claimed, 0);
        assert_eq!(counts.forced_unclaimed, 2);
        for job in &jobs {
            assert_eq!(executor.calls(job.label()), 2);
        }
    }

    #[tokio::test]
    async fn per_job_force_run_is_selected_even_when_done() {
        let store = Arc::new(InMemoryStore::new());
        let done = sorting_job("done", "mountainsort4");
        let forced = JobDescriptor::new("forced", done.params().clone(), true);
        store
            .set(&done.fingerprint().store_key(), json!({"sorting_npz_uri": "sha256://x"}), false)
            .await
            .unwrap();

        let sched = scheduler(store, Arc::new(FakeExecutor::default()), deterministic("wf"));
        let runnable = sched.filter_runnable(vec![done, forced]).await.unwrap();
        assert_eq!(runnable.len(), 1);
        assert_eq!(runnable[0].label(), "forced");
    }

    #[tokio::test]
    async fn shared_fingerprint_executes_once() {
        let store = Arc::new(InMemoryStore::new());
        let first = sorting_job("ms4 s/rec1", "mountainsort4");
        let alias = JobDescriptor::new("ms4-alias s/rec1", first.params().clone(), false);
        assert_eq!(first.fingerprint(), alias.fingerprint());

        let executor = Arc::new(FakeExecutor::default());
        let sched = scheduler(store.clone(), executor.clone(), deterministic("wf"));
        let runnable = sched
            .filter_runnable(vec![first.clone(), alias.clone()])
            .await
            .unwrap();
        assert_eq!(runnable.len(), 1);
        assert_eq!(runnable[0].label(), "ms4 s/rec1");

        let report = sched.run(runnable).await.unwrap();
        assert_eq!(report.counts().succeeded, 1);
        assert_eq!(executor.total_calls(), 1);

        // The alias resolves to the same stored output.
        assert!(sched.filter_runnable(vec![alias]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn forced_selection_still_collapses_shared_fingerprints() {
        let store = Arc::new(InMemoryStore::new());
        let first = sorting_job("ms4 s/rec1", "mountainsort4");
        let alias = JobDescriptor::new("ms4-alias s/rec1", first.params().clone(), false);
        let forced = SchedulerOptions {
            force_run: true,
            ..deterministic("wf")
        };
        let sched = scheduler(store, Arc::new(FakeExecutor::default()), forced);
        let runnable = sched.filter_runnable(vec![first, alias]).await.unwrap();
        assert_eq!(runnable.len(), 1);
    }

    #[rstest]
    #[case::default_policy(false, vec!["missing"])]
    #[case::rerun_failing(true, vec!["failed", "missing"])]
    #[tokio::test]
    async fn selection_policy(#[case] rerun_failing: bool, #[case] expected: Vec<&str>) {
        let store = Arc::new(InMemoryStore::new());
        let ok = sorting_job("ok", "a");
        let failed = sorting_job("failed", "b");
        let missing = sorting_job("missing", "c");
        store
            .set(&ok.fingerprint().store_key(), json!({"retcode": 0, "sorting_npz_uri": "sha256://ok"}), false)
            .await
            .unwrap();
        store
            .set(&failed.fingerprint().store_key(), json!({"retcode": 1, "sorting_npz_uri": null}), false)
            .await
            .unwrap();

        let options = SchedulerOptions {
            rerun_failing,
            ..deterministic("wf")
        };
        let sched = scheduler(store, Arc::new(FakeExecutor::default()), options);
        let runnable = sched.filter_runnable(vec![ok, failed, missing]).await.unwrap();
        let labels: Vec<_> = runnable.iter().map(|j| j.label()).collect();
        assert_eq!(labels, expected);
    }

    #[tokio::test]
    async fn rerun_failing_still_respects_locks() {
        let store = Arc::new(InMemoryStore::new());
        let jobs = sorting_jobs(1);
        publish_jobs(&store, "wf", &jobs).await;
        let executor = Arc::new(FakeExecutor {
            failing: vec![jobs[0].label().to_string()],
            ..Default::default()
        });
        let options = SchedulerOptions {
            rerun_failing: true,
            ..deterministic("wf")
        };
        let selector = JobSelector::Type(JobType::Sorting);

        let first = scheduler(store.clone(), executor.clone(), options.clone())
            .run_selected(&selector)
            .await
            .unwrap();
        assert_eq!(first.counts().failed, 1);
        assert_eq!(first.jobs[0].retcode, Some(1));

        // Selected again, but the lock from the first run is still held.
        let second = scheduler(store.clone(), executor.clone(), options)
            .run_selected(&selector)
            .await
            .unwrap();
        assert_eq!(second.selected, 1);
        assert_eq!(second.counts().skipped_locked, 1);
        assert_eq!(executor.calls(jobs[0].label()), 1);
    }

    #[tokio::test]
    async fn reset_locks_clears_claims_not_outputs() {
        let store = Arc::new(InMemoryStore::new());
        let jobs = sorting_jobs(3);
        publish_jobs(&store, "wf", &jobs).await;
        let executor = Arc::new(FakeExecutor {
            failing: vec![jobs[1].label().to_string()],
            ..Default::default()
        });
        let selector = JobSelector::Type(JobType::Sorting);
        let sched = scheduler(store.clone(), executor.clone(), deterministic("wf"));
        sched.run_selected(&selector).await.unwrap();

        assert_eq!(sched.reset_locks(&selector).await.unwrap(), 3);
        assert_eq!(sched.reset_locks(&selector).await.unwrap(), 0);
        for job in &jobs {
            assert!(store.get_output(job.fingerprint()).await.unwrap().is_some());
        }

        // After the reset only the failed job is re-run.
        let options = SchedulerOptions {
            rerun_failing: true,
            ..deterministic("wf")
        };
        let report = scheduler(store.clone(), executor.clone(), options)
            .run_selected(&selector)
            .await
            .unwrap();
        assert_eq!(report.selected, 1);
        assert_eq!(executor.calls(jobs[1].label()), 2);
        assert_eq!(executor.calls(jobs[0].label()), 1);
    }

    #[tokio::test]
    async fn dry_run_claims_but_writes_no_output() {
        let store = Arc::new(InMemoryStore::new());
        let jobs = sorting_jobs(2);
        let executor = Arc::new(FakeExecutor::default());
        let options = SchedulerOptions {
            dry_run: true,
            ..deterministic("wf")
        };
        let report = scheduler(store.clone(), executor.clone(), options)
            .run(jobs.clone())
            .await
            .unwrap();

        assert_eq!(report.counts().dry_run, 2);
        assert_eq!(executor.total_calls(), 0);
        let locks = LockCoordinator::new(store.clone(), ClaimantId::generate());
        for job in &jobs {
            assert!(store.get_output(job.fingerprint()).await.unwrap().is_none());
            assert!(locks.holder("wf", job).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn executor_error_is_stored_as_failure() {
        let store = Arc::new(InMemoryStore::new());
        let jobs = sorting_jobs(2);
        let executor = Arc::new(FakeExecutor {
            broken: vec![jobs[0].label().to_string()],
            ..Default::default()
        });
        let report = scheduler(store.clone(), executor, deterministic("wf"))
            .run(jobs.clone())
            .await
            .unwrap();

        assert_eq!(report.outcome_of(jobs[0].label()), Some(JobOutcome::Failed));
        assert_eq!(report.outcome_of(jobs[1].label()), Some(JobOutcome::Succeeded));
        let stored = store.get_output(jobs[0].fingerprint()).await.unwrap().unwrap();
        assert!(stored.is_failed(JobType::Sorting));
        assert!(stored.uri("error").unwrap().contains("sha1://gone"));
    }

    #[tokio::test]
    async fn shuffled_order_keeps_every_job() {
        let store = Arc::new(InMemoryStore::new());
        let sched = scheduler(store, Arc::new(FakeExecutor::default()), SchedulerOptions::new("wf"));
        let mut jobs = sorting_jobs(20);
        let before: Vec<_> = jobs.iter().map(|j| j.label().to_string()).collect();
        sched.order(&mut jobs);
        let mut after: Vec<_> = jobs.iter().map(|j| j.label().to_string()).collect();
        after.sort();
        let mut expected = before.clone();
        expected.sort();
        assert_eq!(after, expected);
    }

    /// Build → run each stage → rebuild, until the whole graph has resolved.
    #[tokio::test]
    async fn pipeline_converges_to_published_results() {
        let store = store_with_catalog().await;
        let executor = Arc::new(FakeExecutor {
            store: Some(store.clone()),
            ..Default::default()
        });
        let config = pipeline();
        let builder = WorkflowGraphBuilder::new(store.clone());
        let collector = ResultCollector::new(store.clone());

        let mut workflow = builder.build_from_config(&config).await.unwrap();
        for _ in 0..4 {
            collector.publish(&workflow).await.unwrap();
            for job_type in JobType::ALL {
                scheduler(store.clone(), executor.clone(), SchedulerOptions::new(&config.name))
                    .run_selected(&JobSelector::Type(job_type))
                    .await
                    .unwrap();
            }
            workflow = builder.build_from_config(&config).await.unwrap();
        }
        collector.publish(&workflow).await.unwrap();

        assert_eq!(workflow.jobs().len(), 9);
        let results = collector.load_results(&config.name).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.sorting_figurl.is_some()));
        assert_eq!(executor.total_calls(), 9);
    }
}
