//! Workflow: the jobs discovered by one graph-expansion pass, and the
//! results of the chains that fully resolved.

use serde::{Deserialize, Serialize};

use super::catalog::Recording;
use super::job::JobDescriptor;
use crate::config::SorterConfig;

/// Outcome of resolving one chain link against the store.
///
/// Absence is the common case (work not done yet), so it is a value rather
/// than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    Resolved(T),
    Unresolved,
}

impl<T> Resolution<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }

    pub fn resolved(self) -> Option<T> {
        match self {
            Resolution::Resolved(v) => Some(v),
            Resolution::Unresolved => None,
        }
    }
}

impl<T> From<Option<T>> for Resolution<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Resolution::Resolved(v),
            None => Resolution::Unresolved,
        }
    }
}

/// One fully resolved recording × sorter chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub recording: Recording,
    pub sorter: SorterConfig,
    pub recording_nwb_uri: String,
    pub sorting_true_npz_uri: String,
    pub sorting_true_metrics_uri: Option<String>,
    pub sorting_npz_uri: String,
    pub sorting_console_lines_uri: Option<String>,
    pub comparison_with_truth_uri: String,
    pub sorting_figurl: Option<String>,
}

/// Jobs in discovery order plus completed results.
///
/// Owned by a single expansion pass; other processes rebuild their own copy
/// from the persisted job list.
#[derive(Debug, Clone)]
pub struct Workflow {
    name: String,
    jobs: Vec<JobDescriptor>,
    results: Vec<WorkflowResult>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_job(&mut self, job: JobDescriptor) {
        self.jobs.push(job);
    }

    pub fn add_result(&mut self, result: WorkflowResult) {
        self.results.push(result);
    }

    pub fn jobs(&self) -> &[JobDescriptor] {
        &self.jobs
    }

    pub fn results(&self) -> &[WorkflowResult] {
        &self.results
    }
}

/// Store key of the persisted job list for `workflow_name`.
pub fn jobs_key(workflow_name: &str) -> String {
    format!("workflow-jobs/{workflow_name}")
}

/// Store key of the published results for `workflow_name`.
pub fn results_key(workflow_name: &str) -> String {
    format!("workflow-results/{workflow_name}")
}
