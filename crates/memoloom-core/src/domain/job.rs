//! Job descriptors: the immutable unit of work.
//!
//! Design:
//! - `JobType` is a closed set; each variant owns a typed params record.
//! - Identity is the fingerprint of `(type, params)`. `label` is display only
//!   and `force_run` is a scheduling hint; neither participates in identity.
//! - `JobRecord` is the persisted, loosely typed shape. Converting a record
//!   back into a descriptor is where malformed params are rejected.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::fingerprint::Fingerprint;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    PrepareRecordingNwb,
    PrepareSortingTrueNpz,
    SortingMetrics,
    Sorting,
    CompareWithTruth,
    SortingFigurl,
}

impl JobType {
    pub const ALL: [JobType; 6] = [
        JobType::PrepareRecordingNwb,
        JobType::PrepareSortingTrueNpz,
        JobType::SortingMetrics,
        JobType::Sorting,
        JobType::CompareWithTruth,
        JobType::SortingFigurl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::PrepareRecordingNwb => "prepare-recording-nwb",
            JobType::PrepareSortingTrueNpz => "prepare-sorting-true-npz",
            JobType::SortingMetrics => "sorting-metrics",
            JobType::Sorting => "sorting",
            JobType::CompareWithTruth => "compare-with-truth",
            JobType::SortingFigurl => "sorting-figurl",
        }
    }

    /// Output field whose `null` marks a failed run.
    pub fn primary_output_field(self) -> &'static str {
        match self {
            JobType::PrepareRecordingNwb => "recording_nwb_uri",
            JobType::PrepareSortingTrueNpz => "sorting_true_npz_uri",
            JobType::SortingMetrics => "sorting_metrics_uri",
            JobType::Sorting => "sorting_npz_uri",
            JobType::CompareWithTruth => "comparison_uri",
            JobType::SortingFigurl => "sorting_figurl",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownJobType(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrepareRecordingNwbParams {
    pub recording_uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrepareSortingTrueNpzParams {
    pub sorting_true_uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortingMetricsParams {
    pub recording_nwb_uri: String,
    pub sorting_npz_uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortingParams {
    pub algorithm: String,
    pub recording_nwb_uri: String,
    /// Sorter-specific knobs, passed through untouched.
    pub sorting_params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompareWithTruthParams {
    pub sorting_npz_uri: String,
    pub sorting_true_npz_uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortingFigurlParams {
    pub label: String,
    pub recording_nwb_uri: String,
    pub sorting_npz_uri: String,
    pub sorting_console_lines_uri: Option<String>,
}

/// Typed params, one variant per job type.
#[derive(Debug, Clone, PartialEq)]
pub enum JobParams {
    PrepareRecordingNwb(PrepareRecordingNwbParams),
    PrepareSortingTrueNpz(PrepareSortingTrueNpzParams),
    SortingMetrics(SortingMetricsParams),
    Sorting(SortingParams),
    CompareWithTruth(CompareWithTruthParams),
    SortingFigurl(SortingFigurlParams),
}

impl JobParams {
    pub fn job_type(&self) -> JobType {
        match self {
            JobParams::PrepareRecordingNwb(_) => JobType::PrepareRecordingNwb,
            JobParams::PrepareSortingTrueNpz(_) => JobType::PrepareSortingTrueNpz,
            JobParams::SortingMetrics(_) => JobType::SortingMetrics,
            JobParams::Sorting(_) => JobType::Sorting,
            JobParams::CompareWithTruth(_) => JobType::CompareWithTruth,
            JobParams::SortingFigurl(_) => JobType::SortingFigurl,
        }
    }

    /// The params as a JSON object (the persisted / hashed form).
    pub fn to_value(&self) -> Value {
        match self {
            JobParams::PrepareRecordingNwb(p) => json!({ "recording_uri": p.recording_uri }),
            JobParams::PrepareSortingTrueNpz(p) => {
                json!({ "sorting_true_uri": p.sorting_true_uri })
            }
            JobParams::SortingMetrics(p) => json!({
                "recording_nwb_uri": p.recording_nwb_uri,
                "sorting_npz_uri": p.sorting_npz_uri,
            }),
            JobParams::Sorting(p) => json!({
                "algorithm": p.algorithm,
                "recording_nwb_uri": p.recording_nwb_uri,
                "sorting_params": p.sorting_params,
            }),
            JobParams::CompareWithTruth(p) => json!({
                "sorting_npz_uri": p.sorting_npz_uri,
                "sorting_true_npz_uri": p.sorting_true_npz_uri,
            }),
            JobParams::SortingFigurl(p) => json!({
                "label": p.label,
                "recording_nwb_uri": p.recording_nwb_uri,
                "sorting_npz_uri": p.sorting_npz_uri,
                "sorting_console_lines_uri": p.sorting_console_lines_uri,
            }),
        }
    }

    /// Decode params for `job_type`; anything that does not fit is a config error.
    pub fn from_value(job_type: JobType, value: Value) -> Result<Self, ConfigError> {
        fn decode<T: DeserializeOwned>(job_type: JobType, value: Value) -> Result<T, ConfigError> {
            serde_json::from_value(value)
                .map_err(|source| ConfigError::MalformedParams { job_type, source })
        }

        Ok(match job_type {
            JobType::PrepareRecordingNwb => JobParams::PrepareRecordingNwb(decode(job_type, value)?),
            JobType::PrepareSortingTrueNpz => {
                JobParams::PrepareSortingTrueNpz(decode(job_type, value)?)
            }
            JobType::SortingMetrics => JobParams::SortingMetrics(decode(job_type, value)?),
            JobType::Sorting => JobParams::Sorting(decode(job_type, value)?),
            JobType::CompareWithTruth => JobParams::CompareWithTruth(decode(job_type, value)?),
            JobType::SortingFigurl => JobParams::SortingFigurl(decode(job_type, value)?),
        })
    }
}

/// Persisted shape of a job: `{type, label, params, force_run}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(rename = "type")]
    pub job_type: String,
    pub label: String,
    pub params: Value,
    #[serde(default)]
    pub force_run: bool,
}

/// Immutable unit of work.
///
/// Equality and hashing go through the fingerprint, so two descriptors that
/// differ only in label or `force_run` compare equal.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    label: String,
    params: JobParams,
    force_run: bool,
    fingerprint: Fingerprint,
}

impl JobDescriptor {
    pub fn new(label: impl Into<String>, params: JobParams, force_run: bool) -> Self {
        let fingerprint = Fingerprint::compute(params.job_type().as_str(), &params.to_value());
        Self {
            label: label.into(),
            params,
            force_run,
            fingerprint,
        }
    }

    pub fn job_type(&self) -> JobType {
        self.params.job_type()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn params(&self) -> &JobParams {
        &self.params
    }

    pub fn force_run(&self) -> bool {
        self.force_run
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn as_record(&self) -> JobRecord {
        JobRecord {
            job_type: self.job_type().as_str().to_string(),
            label: self.label.clone(),
            params: self.params.to_value(),
            force_run: self.force_run,
        }
    }

    pub fn from_record(record: JobRecord) -> Result<Self, ConfigError> {
        let job_type: JobType = record.job_type.parse()?;
        let params = JobParams::from_value(job_type, record.params)?;
        Ok(Self::new(record.label, params, record.force_run))
    }
}

impl PartialEq for JobDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for JobDescriptor {}

impl Hash for JobDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorting_record(sorting_params: Value) -> JobRecord {
        JobRecord {
            job_type: "sorting".to_string(),
            label: "ms4 study/rec1".to_string(),
            params: json!({
                "algorithm": "mountainsort4",
                "recording_nwb_uri": "sha256://aa",
                "sorting_params": sorting_params,
            }),
            force_run: false,
        }
    }

    #[test]
    fn fingerprint_ignores_param_key_order() {
        let a = JobDescriptor::from_record(sorting_record(json!({"a": 1, "b": 2}))).unwrap();
        let b = JobDescriptor::from_record(sorting_record(json!({"b": 2, "a": 1}))).unwrap();
        let c = JobDescriptor::from_record(sorting_record(json!({"a": 2, "b": 2}))).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn label_and_force_run_are_not_identity() {
        let params = JobParams::PrepareRecordingNwb(PrepareRecordingNwbParams {
            recording_uri: "sha256://rec".to_string(),
        });
        let a = JobDescriptor::new("first label", params.clone(), false);
        let b = JobDescriptor::new("renamed", params, true);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a, b);
    }

    #[test]
    fn record_roundtrip_keeps_identity() {
        let job = JobDescriptor::from_record(sorting_record(json!({"detect_sign": -1}))).unwrap();
        let record = job.as_record();
        assert_eq!(record.job_type, "sorting");

        let s = serde_json::to_string(&record).unwrap();
        let back: JobRecord = serde_json::from_str(&s).unwrap();
        let job2 = JobDescriptor::from_record(back).unwrap();
        assert_eq!(job2.label(), job.label());
        assert_eq!(job2.fingerprint(), job.fingerprint());
        assert!(!job2.force_run());
    }

    #[test]
    fn force_run_defaults_to_false_in_records() {
        let record: JobRecord = serde_json::from_value(json!({
            "type": "prepare-sorting-true-npz",
            "label": "x",
            "params": {"sorting_true_uri": "sha256://t"}
        }))
        .unwrap();
        assert!(!record.force_run);
    }

    #[test]
    fn unknown_job_type_is_config_error() {
        let mut record = sorting_record(json!({}));
        record.job_type = "spike-magic".to_string();
        let err = JobDescriptor::from_record(record).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownJobType(t) if t == "spike-magic"));
    }

    #[test]
    fn malformed_params_are_config_error() {
        let record = JobRecord {
            job_type: "compare-with-truth".to_string(),
            label: "x".to_string(),
            params: json!({"sorting_npz_uri": "sha256://a"}),
            force_run: false,
        };
        let err = JobDescriptor::from_record(record).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MalformedParams { job_type: JobType::CompareWithTruth, .. }
        ));
    }

    #[test]
    fn job_type_names_roundtrip_through_from_str() {
        for t in JobType::ALL {
            assert_eq!(t.as_str().parse::<JobType>().unwrap(), t);
            // serde names agree with as_str
            assert_eq!(serde_json::to_value(t).unwrap(), json!(t.as_str()));
        }
    }

    #[test]
    fn figurl_without_console_hashes_null_field() {
        let params = JobParams::SortingFigurl(SortingFigurlParams {
            label: "ms4 s/r".to_string(),
            recording_nwb_uri: "sha256://n".to_string(),
            sorting_npz_uri: "sha256://s".to_string(),
            sorting_console_lines_uri: None,
        });
        assert_eq!(params.to_value()["sorting_console_lines_uri"], Value::Null);
        let back = JobParams::from_value(JobType::SortingFigurl, params.to_value()).unwrap();
        assert_eq!(back, params);
    }
}
