//! Status - 実行結果とジョブ状態のレポート
//!
//! verbose 出力（claim / skip / 実行数）と build のジョブ一覧で使う。

use serde::{Deserialize, Serialize};

use crate::domain::{ClaimantId, Fingerprint, JobDescriptor, JobType};

/// What happened to one job during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// Executed and the primary output field is set.
    Succeeded,
    /// Executed but the primary output field is null.
    Failed,
    /// Another claimant holds the lock.
    SkippedLocked,
    /// Claimed, executor not invoked.
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub label: String,
    pub job_type: JobType,
    pub fingerprint: Fingerprint,
    pub worker_id: usize,
    pub outcome: JobOutcome,
    pub retcode: Option<i64>,
    /// This process won the lock. False for skips and for forced runs that lost it.
    pub claimed: bool,
    /// Lock holder seen when the job was skipped.
    pub held_by: Option<ClaimantId>,
}

impl JobReport {
    pub fn new(job: &JobDescriptor, worker_id: usize, outcome: JobOutcome) -> Self {
        Self {
            label: job.label().to_string(),
            job_type: job.job_type(),
            fingerprint: job.fingerprint().clone(),
            worker_id,
            outcome,
            retcode: None,
            claimed: outcome != JobOutcome::SkippedLocked,
            held_by: None,
        }
    }

    pub fn with_retcode(mut self, retcode: Option<i64>) -> Self {
        self.retcode = retcode;
        self
    }

    pub fn with_claimed(mut self, claimed: bool) -> Self {
        self.claimed = claimed;
        self
    }

    pub fn with_holder(mut self, holder: Option<ClaimantId>) -> Self {
        self.held_by = holder;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub selected: usize,
    pub claimed: usize,
    /// Forced runs that executed without holding the lock.
    pub forced_unclaimed: usize,
    pub skipped_locked: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub dry_run: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub workflow: String,
    pub selected: usize,
    pub jobs: Vec<JobReport>,
}

impl RunReport {
    pub fn counts(&self) -> RunCounts {
        let mut counts = RunCounts {
            selected: self.selected,
            ..Default::default()
        };
        for job in &self.jobs {
            match job.outcome {
                JobOutcome::Succeeded => counts.succeeded += 1,
                JobOutcome::Failed => counts.failed += 1,
                JobOutcome::SkippedLocked => counts.skipped_locked += 1,
                JobOutcome::DryRun => counts.dry_run += 1,
            }
            if job.claimed {
                counts.claimed += 1;
            } else if job.outcome != JobOutcome::SkippedLocked {
                counts.forced_unclaimed += 1;
            }
        }
        counts
    }

    pub fn outcome_of(&self, label: &str) -> Option<JobOutcome> {
        self.jobs.iter().find(|j| j.label == label).map(|j| j.outcome)
    }
}

/// Stored state of a job, as shown in the job listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Missing,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub label: String,
    pub job_type: JobType,
    pub state: JobState,
}
