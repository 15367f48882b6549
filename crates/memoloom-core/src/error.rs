use thiserror::Error;

use crate::domain::JobType;
use crate::ports::StoreError;

/// Configuration errors: fatal, raised before any scheduling happens.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("both docker and singularity were requested, but no more than one can be used")]
    ConflictingContainerization,

    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    #[error("malformed params for job type={job_type}: {source}")]
    MalformedParams {
        job_type: JobType,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid job selector '{0}' (expected <job-type> or sorting:<algorithm>)")]
    InvalidSelector(String),

    #[error("sorter not found in config: {0}")]
    SorterNotFound(String),

    #[error("duplicate sorter found in config: {0}")]
    DuplicateSorter(String),

    #[error("unable to find recording: {study_set} {study} {recording}")]
    RecordingNotFound {
        study_set: String,
        study: String,
        recording: String,
    },

    #[error("unable to load study sets catalog: {0}")]
    CatalogUnavailable(String),

    #[error("malformed study sets catalog: {0}")]
    MalformedCatalog(#[source] serde_json::Error),

    #[error("no job list published for workflow '{0}' (run `build` first)")]
    JobListMissing(String),

    #[error("malformed job list for workflow '{workflow}': {source}")]
    MalformedJobList {
        workflow: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Engine-level error.
///
/// Lock contention and executor failures are *not* represented here: the
/// former is an expected outcome, the latter is recorded as data.
#[derive(Debug, Error)]
pub enum MemoError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("worker-{worker_id} panicked or was aborted: {message}")]
    WorkerJoin { worker_id: usize, message: String },
}
