//! Configuration: the pipeline description and processing settings.
//!
//! Both are YAML documents deserialized with serde. Validation that can fail
//! the run is a `ConfigError`; validation that only downgrades a setting
//! (the processing settings file) logs a warning and carries on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Static pipeline description: studies × recordings × sorters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Workflow name. Namespaces the job list, results and lock keys.
    pub name: String,

    /// Where the study-set catalog lives (artifact URI or path).
    pub study_sets_uri: String,

    #[serde(default)]
    pub sorters: Vec<SorterConfig>,

    #[serde(default)]
    pub studies: Vec<StudyConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SorterConfig {
    pub name: String,
    pub algorithm: String,
    #[serde(default = "empty_object")]
    pub sorting_params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyConfig {
    pub study_set_name: String,
    pub study_name: String,
    #[serde(default)]
    pub recording_names: Vec<String>,
    #[serde(default)]
    pub sorter_names: Vec<String>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl PipelineConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Sorters requested by `study`, each name matching exactly one entry.
    pub fn sorters_for(&self, study: &StudyConfig) -> Result<Vec<&SorterConfig>, ConfigError> {
        study
            .sorter_names
            .iter()
            .map(|name| {
                let mut matches = self.sorters.iter().filter(|s| &s.name == name);
                let first = matches
                    .next()
                    .ok_or_else(|| ConfigError::SorterNotFound(name.clone()))?;
                if matches.next().is_some() {
                    return Err(ConfigError::DuplicateSorter(name.clone()));
                }
                Ok(first)
            })
            .collect()
    }
}

/// How executors are containerized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerRuntime {
    #[default]
    Native,
    Docker,
    Singularity,
}

impl ContainerRuntime {
    /// Resolve the `--docker` / `--singularity` pair. Both is an error.
    pub fn from_flags(docker: bool, singularity: bool) -> Result<Self, ConfigError> {
        match (docker, singularity) {
            (true, true) => Err(ConfigError::ConflictingContainerization),
            (true, false) => Ok(ContainerRuntime::Docker),
            (false, true) => Ok(ContainerRuntime::Singularity),
            (false, false) => Ok(ContainerRuntime::Native),
        }
    }
}

/// Raw processing settings for `run-all`, as written by the operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub force_run: bool,
    pub docker: bool,
    pub singularity: bool,
    /// YAML file mapping algorithm name -> container image.
    pub images: Option<PathBuf>,
    pub max_simultaneous_sorts: Option<i64>,
}

/// Processing settings after defaulting and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub force_run: bool,
    pub runtime: ContainerRuntime,
    pub images: BTreeMap<String, String>,
    pub num_parallel: usize,
}

impl ResolvedSettings {
    /// Runtime and image for one algorithm. Containerization only applies
    /// when an image is mapped for it.
    pub fn container_for(&self, algorithm: &str) -> (ContainerRuntime, Option<String>) {
        match self.images.get(algorithm) {
            Some(image) if self.runtime != ContainerRuntime::Native => {
                (self.runtime, Some(image.clone()))
            }
            _ => (ContainerRuntime::Native, None),
        }
    }
}

impl ProcessingSettings {
    /// Load settings; a missing or unreadable file means all defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(text) => Ok(serde_yaml::from_str(&text)?),
            Err(e) => {
                tracing::warn!(path = %path.as_ref().display(), error = %e, "processing settings unreadable, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn resolve(self) -> ResolvedSettings {
        let mut runtime = match ContainerRuntime::from_flags(self.docker, self.singularity) {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!("settings requested both docker and singularity; disabling containerization");
                ContainerRuntime::Native
            }
        };

        let mut images = BTreeMap::new();
        if runtime != ContainerRuntime::Native {
            match self.images.as_deref().map(load_images) {
                Some(Ok(map)) => images = map,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "unable to load image dictionary; disabling containerization");
                    runtime = ContainerRuntime::Native;
                }
                None => {}
            }
        }

        let num_parallel = match self.max_simultaneous_sorts {
            None => 1,
            Some(n) if n >= 1 => n as usize,
            Some(n) => {
                tracing::warn!(value = n, "max_simultaneous_sorts is not a positive integer; using 1");
                1
            }
        };

        ResolvedSettings {
            force_run: self.force_run,
            runtime,
            images,
            num_parallel,
        }
    }
}

fn load_images(path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_yaml::from_str(&text)?)
}
