//! Domain model (jobs, fingerprints, outputs, claims, workflows).

pub mod catalog;
pub mod claim;
pub mod fingerprint;
pub mod job;
pub mod output;
pub mod workflow;

pub use catalog::{Recording, StudySetCatalog};
pub use claim::{ClaimRecord, ClaimantId};
pub use fingerprint::Fingerprint;
pub use job::{
    CompareWithTruthParams, JobDescriptor, JobParams, JobRecord, JobType,
    PrepareRecordingNwbParams, PrepareSortingTrueNpzParams, SortingFigurlParams,
    SortingMetricsParams, SortingParams,
};
pub use output::StoredOutput;
pub use workflow::{Resolution, Workflow, WorkflowResult, jobs_key, results_key};
