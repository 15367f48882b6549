//! Stored outputs: what an executor produced, memoized under a fingerprint.
//!
//! The engine treats the content as opaque except for two things:
//! - the job type's primary field (`null` or missing means the run failed);
//! - string fields that downstream stages consume as artifact URIs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::job::JobType;

/// Opaque mapping persisted under `fingerprint(job)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoredOutput(Map<String, Value>);

impl StoredOutput {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Failure record for a job whose executor could not run at all.
    pub fn failure(job_type: JobType, reason: impl Into<String>) -> Self {
        Self::new()
            .with_field(job_type.primary_output_field(), Value::Null)
            .with_field("error", Value::String(reason.into()))
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// A string field, treating `null` the same as missing.
    pub fn uri(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    /// Exit status reported by the executor, if any.
    pub fn retcode(&self) -> Option<i64> {
        self.0.get("retcode").and_then(Value::as_i64)
    }

    /// True when the job type's primary result is absent.
    pub fn is_failed(&self, job_type: JobType) -> bool {
        self.get(job_type.primary_output_field())
            .is_none_or(Value::is_null)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Interpret a stored value. Non-object values are kept under `value`
    /// so that foreign writers never make a key unreadable.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            other => Self::new().with_field("value", other),
        }
    }
}
