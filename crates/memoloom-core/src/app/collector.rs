//! ResultCollector - ジョブ一覧と完了チェーンの公開
//!
//! build のたびにジョブ一覧（`workflow-jobs/<name>`）と結果一覧
//! （`workflow-results/<name>`）を上書きで書き込む。
//! 各ワーカープロセスはこのジョブ一覧を読んで自分の仕事を探す。

use std::sync::Arc;

use super::status::{JobState, JobStatus};
use crate::domain::{JobRecord, Workflow, WorkflowResult, jobs_key, results_key};
use crate::error::MemoError;
use crate::ports::{MemoStore, StoreError};

pub struct ResultCollector {
    store: Arc<dyn MemoStore>,
}

impl ResultCollector {
    pub fn new(store: Arc<dyn MemoStore>) -> Self {
        Self { store }
    }

    /// Persist the job list and the results of `workflow`.
    pub async fn publish(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let records: Vec<JobRecord> = workflow.jobs().iter().map(|j| j.as_record()).collect();
        self.store
            .set(&jobs_key(workflow.name()), serde_json::to_value(records)?, false)
            .await?;
        self.store
            .set(
                &results_key(workflow.name()),
                serde_json::to_value(workflow.results())?,
                false,
            )
            .await?;
        tracing::info!(
            workflow = workflow.name(),
            jobs = workflow.jobs().len(),
            results = workflow.results().len(),
            "published"
        );
        Ok(())
    }

    /// Published results of `workflow_name`; empty if nothing was published.
    pub async fn load_results(&self, workflow_name: &str) -> Result<Vec<WorkflowResult>, MemoError> {
        match self.store.get(&results_key(workflow_name)).await? {
            Some(value) => Ok(serde_json::from_value(value).map_err(StoreError::from)?),
            None => Ok(Vec::new()),
        }
    }

    /// Stored state of every job in `workflow`, in discovery order.
    pub async fn job_statuses(&self, workflow: &Workflow) -> Result<Vec<JobStatus>, StoreError> {
        let mut statuses = Vec::with_capacity(workflow.jobs().len());
        for job in workflow.jobs() {
            let state = match self.store.get_output(job.fingerprint()).await? {
                None => JobState::Missing,
                Some(output) if output.is_failed(job.job_type()) => JobState::Failed,
                Some(_) => JobState::Done,
            };
            statuses.push(JobStatus {
                label: job.label().to_string(),
                job_type: job.job_type(),
                state,
            });
        }
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobDescriptor, JobParams, JobType, PrepareRecordingNwbParams, StoredOutput};
    use crate::impls::InMemoryStore;
    use serde_json::json;

    fn nwb_job(uri: &str) -> JobDescriptor {
        JobDescriptor::new(
            format!("Prepare recording nwb: {uri}"),
            JobParams::PrepareRecordingNwb(PrepareRecordingNwbParams {
                recording_uri: uri.to_string(),
            }),
            false,
        )
    }

    #[tokio::test]
    async fn publish_writes_job_records_and_results() {
        let store = Arc::new(InMemoryStore::new());
        let collector = ResultCollector::new(store.clone());
        let mut workflow = Workflow::new("wf");
        workflow.add_job(nwb_job("a"));
        workflow.add_job(nwb_job("b"));
        collector.publish(&workflow).await.unwrap();

        let jobs = store.get("workflow-jobs/wf").await.unwrap().unwrap();
        assert_eq!(jobs.as_array().unwrap().len(), 2);
        assert_eq!(jobs[0]["type"], "prepare-recording-nwb");
        assert_eq!(jobs[0]["params"], json!({"recording_uri": "a"}));
        assert_eq!(store.get("workflow-results/wf").await.unwrap(), Some(json!([])));
        assert!(collector.load_results("wf").await.unwrap().is_empty());
        assert!(collector.load_results("unpublished").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn job_statuses_distinguish_missing_done_failed() {
        let store = Arc::new(InMemoryStore::new());
        let collector = ResultCollector::new(store.clone());
        let mut workflow = Workflow::new("wf");
        for uri in ["a", "b", "c"] {
            workflow.add_job(nwb_job(uri));
        }
        let jobs = workflow.jobs().to_vec();
        store
            .set(&jobs[0].fingerprint().store_key(), json!({"recording_nwb_uri": "sha256://a"}), false)
            .await
            .unwrap();
        let failure = StoredOutput::failure(JobType::PrepareRecordingNwb, "boom");
        store
            .set(&jobs[1].fingerprint().store_key(), failure.into_value(), false)
            .await
            .unwrap();

        let states: Vec<_> = collector
            .job_statuses(&workflow)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.state)
            .collect();
        assert_eq!(states, [JobState::Done, JobState::Failed, JobState::Missing]);
    }
}
