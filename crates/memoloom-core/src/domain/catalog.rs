//! Study-set catalog: where the pipeline's leaf items (recordings) come from.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudySetCatalog {
    #[serde(rename = "StudySets")]
    pub study_sets: Vec<StudySet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudySet {
    pub name: String,
    #[serde(default)]
    pub studies: Vec<Study>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    pub name: String,
    #[serde(default)]
    pub recordings: Vec<Recording>,
}

/// One recording. Unknown catalog fields are kept so results can echo them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub name: String,
    pub study_name: String,
    pub recording_uri: String,
    pub sorting_true_uri: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Recording {
    /// `"<study>/<recording>"`, used in job labels.
    pub fn label(&self) -> String {
        format!("{}/{}", self.study_name, self.name)
    }
}

impl StudySetCatalog {
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        serde_json::from_slice(bytes).map_err(ConfigError::MalformedCatalog)
    }

    pub fn find_recording(
        &self,
        study_set: &str,
        study: &str,
        recording: &str,
    ) -> Result<&Recording, ConfigError> {
        self.study_sets
            .iter()
            .find(|s| s.name == study_set)
            .and_then(|s| s.studies.iter().find(|st| st.name == study))
            .and_then(|st| st.recordings.iter().find(|r| r.name == recording))
            .ok_or_else(|| ConfigError::RecordingNotFound {
                study_set: study_set.to_string(),
                study: study.to_string(),
                recording: recording.to_string(),
            })
    }
}
