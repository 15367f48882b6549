//! Fingerprints: stable, content-derived job identity.
//!
//! A fingerprint is the SHA-256 of the canonical JSON form of
//! `{"type": ..., "params": ...}`. Object keys are sorted recursively before
//! hashing, so the insertion order of a params map never changes the result,
//! whatever `serde_json` map implementation the build ends up with.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 over a job's type and canonicalized params.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash `{"type": job_type, "params": params}` in canonical form.
    pub fn compute(job_type: &str, params: &Value) -> Self {
        let mut key = Map::new();
        key.insert("params".to_string(), canonicalize(params));
        key.insert("type".to_string(), Value::String(job_type.to_string()));

        let mut hasher = Sha256::new();
        hasher.update(canonical_bytes(&Value::Object(key)));
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Store key under which the job's output is memoized.
    pub fn store_key(&self) -> String {
        format!("job/{}", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Rebuild `value` with every object's keys in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for k in keys {
                sorted.insert(k.clone(), canonicalize(&map[k]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compact JSON text of `value`, no whitespace.
fn canonical_bytes(value: &Value) -> Vec<u8> {
    value.to_string().into_bytes()
}
