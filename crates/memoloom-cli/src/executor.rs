//! ContainerExecutor - 実行リポジトリのスクリプトをネイティブ / docker / singularity で動かす
//!
//! 1 ジョブ = `<repo>/<subpath>/run` の 1 回の実行。
//! - 入力 artifact は一時ディレクトリに書き出し、`INPUT_*` 環境変数でパスを渡す
//! - 出力は `OUTPUT_DIR` に書かれたファイルを artifact としてストアに保存
//! - stdout / stderr の行はまとめて JSON 配列として保存（console_lines_uri）
//! - 非ゼロ終了はエラーではなく retcode として返す

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use memoloom_core::config::ContainerRuntime;
use memoloom_core::domain::{JobDescriptor, JobParams, StoredOutput};
use memoloom_core::ports::{Executor, ExecutorError, MemoStore};
use serde_json::Value;
use tokio::process::Command;

/// Sorting algorithms with a runner in the executor repository.
pub const SORTING_ALGORITHMS: [&str; 6] = [
    "mountainsort4",
    "spykingcircus",
    "tridesclous",
    "kilosort3",
    "kilosort2_5",
    "kilosort2",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum InputSource {
    /// Fetched from the store and written to a file.
    Artifact(String),
    /// Written to a file as-is.
    Inline(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Input {
    env: &'static str,
    file_name: &'static str,
    source: InputSource,
}

impl Input {
    fn artifact(env: &'static str, file_name: &'static str, uri: &str) -> Self {
        Self {
            env,
            file_name,
            source: InputSource::Artifact(uri.to_string()),
        }
    }

    fn inline(env: &'static str, file_name: &'static str, data: Vec<u8>) -> Self {
        Self {
            env,
            file_name,
            source: InputSource::Inline(data),
        }
    }
}

/// How the output file becomes the primary output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputKind {
    /// Stored as an artifact; the field holds its URI.
    Artifact,
    /// The file holds a URL; the field holds its trimmed text.
    Url,
}

/// What to run for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Recipe {
    subpath: String,
    inputs: Vec<Input>,
    output_file: &'static str,
    output_kind: OutputKind,
}

impl Recipe {
    fn artifact(subpath: &str, inputs: Vec<Input>, output_file: &'static str) -> Self {
        Self {
            subpath: subpath.to_string(),
            inputs,
            output_file,
            output_kind: OutputKind::Artifact,
        }
    }

    fn for_job(job: &JobDescriptor) -> Result<Self, ExecutorError> {
        Ok(match job.params() {
            JobParams::PrepareRecordingNwb(p) => Self::artifact(
                "prepare-recording-nwb",
                vec![Input::artifact("INPUT_RECORDING", "recording.json", &p.recording_uri)],
                "recording.nwb",
            ),
            JobParams::PrepareSortingTrueNpz(p) => Self::artifact(
                "prepare-sorting-true-npz",
                vec![Input::artifact("INPUT_SORTING_TRUE", "sorting_true.json", &p.sorting_true_uri)],
                "sorting_true.npz",
            ),
            JobParams::SortingMetrics(p) => Self::artifact(
                "sorting-metrics",
                vec![
                    Input::artifact("INPUT_RECORDING_NWB", "recording.nwb", &p.recording_nwb_uri),
                    Input::artifact("INPUT_SORTING_NPZ", "sorting.npz", &p.sorting_npz_uri),
                ],
                "sorting_metrics.json",
            ),
            JobParams::Sorting(p) => {
                if !SORTING_ALGORITHMS.contains(&p.algorithm.as_str()) {
                    return Err(ExecutorError::Unsupported(format!(
                        "sorting algorithm {}",
                        p.algorithm
                    )));
                }
                Self::artifact(
                    &p.algorithm,
                    vec![
                        Input::artifact("INPUT_RECORDING_NWB", "recording.nwb", &p.recording_nwb_uri),
                        Input::inline(
                            "INPUT_SORTING_PARAMS",
                            "sorting_params.json",
                            serde_json::to_vec(&p.sorting_params)?,
                        ),
                    ],
                    "sorting.npz",
                )
            }
            JobParams::CompareWithTruth(p) => Self::artifact(
                "compare-with-truth",
                vec![
                    Input::artifact("INPUT_SORTING_NPZ", "sorting.npz", &p.sorting_npz_uri),
                    Input::artifact("INPUT_SORTING_TRUE_NPZ", "sorting_true.npz", &p.sorting_true_npz_uri),
                ],
                "comparison.json",
            ),
            JobParams::SortingFigurl(p) => {
                let mut inputs = vec![
                    Input::artifact("INPUT_RECORDING_NWB", "recording.nwb", &p.recording_nwb_uri),
                    Input::artifact("INPUT_SORTING_NPZ", "sorting.npz", &p.sorting_npz_uri),
                    Input::inline("INPUT_LABEL", "label.txt", p.label.clone().into_bytes()),
                ];
                if let Some(uri) = &p.sorting_console_lines_uri {
                    inputs.push(Input::artifact("INPUT_SORTING_CONSOLE_LINES", "console_lines.json", uri));
                }
                Recipe {
                    subpath: "sorting-figurl".to_string(),
                    inputs,
                    output_file: "figurl.txt",
                    output_kind: OutputKind::Url,
                }
            }
        })
    }
}

/// Program and arguments, resolved before anything is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    program: String,
    args: Vec<String>,
    /// Only set for native runs; containers receive env through args.
    env: Vec<(String, String)>,
}

impl Invocation {
    fn new(
        runtime: ContainerRuntime,
        image: Option<&str>,
        script: &Path,
        mounts: &[&Path],
        env: Vec<(String, String)>,
    ) -> Self {
        let script = script.display().to_string();
        match (runtime, image) {
            (ContainerRuntime::Docker, Some(image)) => {
                let mut args = vec!["run".to_string(), "--rm".to_string()];
                for dir in mounts {
                    args.push("-v".to_string());
                    args.push(format!("{0}:{0}", dir.display()));
                }
                for (key, value) in &env {
                    args.push("-e".to_string());
                    args.push(format!("{key}={value}"));
                }
                args.push(image.to_string());
                args.push(script);
                Self {
                    program: "docker".to_string(),
                    args,
                    env: Vec::new(),
                }
            }
            (ContainerRuntime::Singularity, Some(image)) => {
                let mut args = vec!["exec".to_string(), "--cleanenv".to_string()];
                for dir in mounts {
                    args.push("--bind".to_string());
                    args.push(dir.display().to_string());
                }
                for (key, value) in &env {
                    args.push("--env".to_string());
                    args.push(format!("{key}={value}"));
                }
                args.push(image.to_string());
                args.push(script);
                Self {
                    program: "singularity".to_string(),
                    args,
                    env: Vec::new(),
                }
            }
            _ => Self {
                program: script,
                args: Vec::new(),
                env,
            },
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }
}

pub struct ContainerExecutor {
    store: Arc<dyn MemoStore>,
    repo: PathBuf,
    runtime: ContainerRuntime,
    image: Option<String>,
}

impl ContainerExecutor {
    pub fn new(
        store: Arc<dyn MemoStore>,
        repo: impl Into<PathBuf>,
        runtime: ContainerRuntime,
        image: Option<String>,
    ) -> Self {
        if runtime != ContainerRuntime::Native && image.is_none() {
            tracing::warn!(?runtime, "no image given, running natively");
        }
        Self {
            store,
            repo: repo.into(),
            runtime,
            image,
        }
    }

    async fn materialize(&self, inputs: &[Input], dir: &Path) -> Result<Vec<(String, String)>, ExecutorError> {
        let mut env = Vec::with_capacity(inputs.len());
        for input in inputs {
            let data = match &input.source {
                InputSource::Artifact(uri) => self
                    .store
                    .load_artifact(uri)
                    .await?
                    .ok_or_else(|| ExecutorError::MissingInput(uri.clone()))?
                    .to_vec(),
                InputSource::Inline(data) => data.clone(),
            };
            let path = dir.join(input.file_name);
            tokio::fs::write(&path, data).await?;
            env.push((input.env.to_string(), path.display().to_string()));
        }
        Ok(env)
    }
}

fn console_lines(stdout: &[u8], stderr: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .chain(String::from_utf8_lossy(stderr).lines())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Executor for ContainerExecutor {
    async fn execute(&self, job: &JobDescriptor) -> Result<StoredOutput, ExecutorError> {
        let recipe = Recipe::for_job(job)?;
        let workdir = tempfile::tempdir()?;
        let input_dir = workdir.path().join("inputs");
        let output_dir = workdir.path().join("output");
        tokio::fs::create_dir_all(&input_dir).await?;
        tokio::fs::create_dir_all(&output_dir).await?;

        let mut env = self.materialize(&recipe.inputs, &input_dir).await?;
        env.push(("OUTPUT_DIR".to_string(), output_dir.display().to_string()));

        let script_dir = self.repo.join(&recipe.subpath);
        let script = script_dir.join("run");
        let invocation = Invocation::new(
            self.runtime,
            self.image.as_deref(),
            &script,
            &[workdir.path(), script_dir.as_path()],
            env,
        );
        tracing::info!(job = %job.label(), program = %invocation.program, subpath = %recipe.subpath, "executing");

        let output = invocation.command().output().await?;
        let retcode = i64::from(output.status.code().unwrap_or(-1));
        let lines = console_lines(&output.stdout, &output.stderr);
        let console_lines_uri = self
            .store
            .store_artifact(serde_json::to_vec(&lines)?.into())
            .await?;

        let field = job.job_type().primary_output_field();
        let primary = if retcode == 0 {
            let path = output_dir.join(recipe.output_file);
            match (tokio::fs::read(&path).await, recipe.output_kind) {
                (Ok(data), OutputKind::Artifact) => Value::String(self.store.store_artifact(data.into()).await?),
                (Ok(data), OutputKind::Url) => Value::String(String::from_utf8_lossy(&data).trim().to_string()),
                (Err(e), _) => {
                    tracing::warn!(job = %job.label(), path = %path.display(), error = %e, "run succeeded without output file");
                    Value::Null
                }
            }
        } else {
            tracing::warn!(job = %job.label(), retcode, "non-zero exit code");
            Value::Null
        };

        Ok(StoredOutput::new()
            .with_field("retcode", retcode)
            .with_field("console_lines_uri", console_lines_uri)
            .with_field(field, primary))
    }
}
