//! WorkflowGraphBuilder - パイプライン記述をジョブ列に展開する
//!
//! # 学習ポイント
//! - 各ステージの params は上流ジョブの「保存済み出力」から作る
//! - 上流が Unresolved なら下流は作らない（チェーンを打ち切る）
//! - 起動時検証（sorter / recording の解決）は展開より先に全部済ませる
//!
//! Builder はジョブを実行しないし、出力も書き込まない。
//! 何度呼んでも同じストア状態なら同じジョブ列になる。

use std::sync::Arc;

use crate::config::{PipelineConfig, SorterConfig};
use crate::domain::{
    CompareWithTruthParams, JobDescriptor, JobParams, JobType, PrepareRecordingNwbParams,
    PrepareSortingTrueNpzParams, Recording, Resolution, SortingFigurlParams,
    SortingMetricsParams, SortingParams, StoredOutput, StudySetCatalog, Workflow,
    WorkflowResult,
};
use crate::error::{ConfigError, MemoError};
use crate::ports::{MemoStore, StoreError};

use crate::domain::workflow::Resolution::{Resolved, Unresolved};

/// Verified outputs of a sorting job.
struct SortingOutputs {
    sorting_npz_uri: String,
    console_lines_uri: Option<String>,
}

pub struct WorkflowGraphBuilder {
    store: Arc<dyn MemoStore>,
}

impl WorkflowGraphBuilder {
    pub fn new(store: Arc<dyn MemoStore>) -> Self {
        Self { store }
    }

    /// Fetch and parse the study-set catalog named by `uri`.
    pub async fn load_catalog(&self, uri: &str) -> Result<StudySetCatalog, MemoError> {
        let bytes = self
            .store
            .load_artifact(uri)
            .await?
            .ok_or_else(|| ConfigError::CatalogUnavailable(uri.to_string()))?;
        Ok(StudySetCatalog::from_json_slice(&bytes)?)
    }

    /// Load the catalog named in `config` and expand it.
    pub async fn build_from_config(&self, config: &PipelineConfig) -> Result<Workflow, MemoError> {
        let catalog = self.load_catalog(&config.study_sets_uri).await?;
        self.build(config, &catalog).await
    }

    pub async fn build(
        &self,
        config: &PipelineConfig,
        catalog: &StudySetCatalog,
    ) -> Result<Workflow, MemoError> {
        let mut plan: Vec<(&Recording, Vec<&SorterConfig>)> = Vec::new();
        for study in &config.studies {
            let sorters = config.sorters_for(study)?;
            for recording_name in &study.recording_names {
                let recording = catalog.find_recording(
                    &study.study_set_name,
                    &study.study_name,
                    recording_name,
                )?;
                plan.push((recording, sorters.clone()));
            }
        }

        let mut workflow = Workflow::new(&config.name);
        for (recording, sorters) in plan {
            self.expand_recording(&mut workflow, recording, &sorters).await?;
        }

        tracing::info!(
            workflow = %config.name,
            jobs = workflow.jobs().len(),
            results = workflow.results().len(),
            "workflow expanded"
        );
        Ok(workflow)
    }

    async fn expand_recording(
        &self,
        workflow: &mut Workflow,
        recording: &Recording,
        sorters: &[&SorterConfig],
    ) -> Result<(), StoreError> {
        let label = recording.label();

        let nwb = self.prepare_recording_nwb(workflow, recording, &label).await?;
        let true_npz = self.prepare_sorting_true_npz(workflow, recording, &label).await?;
        let true_metrics = match (&nwb, &true_npz) {
            (Resolved(nwb), Resolved(npz)) => {
                self.sorting_true_metrics(workflow, &label, nwb, npz).await?
            }
            _ => Unresolved,
        };

        let Resolved(nwb) = nwb else {
            tracing::debug!(recording = %label, "recording nwb unresolved, chain stops");
            return Ok(());
        };

        for sorter in sorters {
            let Resolved(sorting) = self.sorting(workflow, &label, &nwb, sorter).await? else {
                continue;
            };
            let figurl = self
                .sorting_figurl(workflow, &label, sorter, &nwb, &sorting)
                .await?;
            let comparison = match &true_npz {
                Resolved(true_npz) => {
                    self.compare_with_truth(workflow, &label, sorter, &sorting, true_npz)
                        .await?
                }
                Unresolved => Unresolved,
            };

            if let (Resolved(comparison), Resolved(true_npz)) = (comparison, &true_npz) {
                workflow.add_result(WorkflowResult {
                    recording: recording.clone(),
                    sorter: (*sorter).clone(),
                    recording_nwb_uri: nwb.clone(),
                    sorting_true_npz_uri: true_npz.clone(),
                    sorting_true_metrics_uri: true_metrics.clone().resolved(),
                    sorting_npz_uri: sorting.sorting_npz_uri,
                    sorting_console_lines_uri: sorting.console_lines_uri,
                    comparison_with_truth_uri: comparison,
                    sorting_figurl: figurl.resolved(),
                });
            }
        }
        Ok(())
    }

    /// Append `job` and look up its memoized output.
    async fn lookup(
        &self,
        workflow: &mut Workflow,
        job: JobDescriptor,
    ) -> Result<Resolution<StoredOutput>, StoreError> {
        let output = self.store.get_output(job.fingerprint()).await?;
        workflow.add_job(job);
        Ok(output.into())
    }

    /// Field `name` of `output`, if it is a URI whose artifact resolves.
    async fn verified(&self, output: &StoredOutput, name: &str) -> Result<Option<String>, StoreError> {
        match output.uri(name) {
            Some(uri) if self.store.artifact_exists(uri).await? => Ok(Some(uri.to_string())),
            _ => Ok(None),
        }
    }

    /// `lookup` followed by verification of the job type's primary field.
    async fn resolve_primary(
        &self,
        workflow: &mut Workflow,
        job: JobDescriptor,
    ) -> Result<Resolution<String>, StoreError> {
        let field = job.job_type().primary_output_field();
        match self.lookup(workflow, job).await? {
            Resolved(output) => Ok(self.verified(&output, field).await?.into()),
            Unresolved => Ok(Unresolved),
        }
    }

    async fn prepare_recording_nwb(
        &self,
        workflow: &mut Workflow,
        recording: &Recording,
        label: &str,
    ) -> Result<Resolution<String>, StoreError> {
        let job = JobDescriptor::new(
            format!("Prepare recording nwb: {label}"),
            JobParams::PrepareRecordingNwb(PrepareRecordingNwbParams {
                recording_uri: recording.recording_uri.clone(),
            }),
            false,
        );
        self.resolve_primary(workflow, job).await
    }

    async fn prepare_sorting_true_npz(
        &self,
        workflow: &mut Workflow,
        recording: &Recording,
        label: &str,
    ) -> Result<Resolution<String>, StoreError> {
        let job = JobDescriptor::new(
            format!("Prepare sorting true npz: {label}"),
            JobParams::PrepareSortingTrueNpz(PrepareSortingTrueNpzParams {
                sorting_true_uri: recording.sorting_true_uri.clone(),
            }),
            false,
        );
        self.resolve_primary(workflow, job).await
    }

    async fn sorting_true_metrics(
        &self,
        workflow: &mut Workflow,
        label: &str,
        recording_nwb_uri: &str,
        sorting_true_npz_uri: &str,
    ) -> Result<Resolution<String>, StoreError> {
        let job = JobDescriptor::new(
            format!("Sorting true metrics: {label}"),
            JobParams::SortingMetrics(SortingMetricsParams {
                recording_nwb_uri: recording_nwb_uri.to_string(),
                sorting_npz_uri: sorting_true_npz_uri.to_string(),
            }),
            false,
        );
        self.resolve_primary(workflow, job).await
    }

    async fn sorting(
        &self,
        workflow: &mut Workflow,
        label: &str,
        recording_nwb_uri: &str,
        sorter: &SorterConfig,
    ) -> Result<Resolution<SortingOutputs>, StoreError> {
        let job = JobDescriptor::new(
            format!("{} {label}", sorter.name),
            JobParams::Sorting(SortingParams {
                algorithm: sorter.algorithm.clone(),
                recording_nwb_uri: recording_nwb_uri.to_string(),
                sorting_params: sorter.sorting_params.clone(),
            }),
            false,
        );
        let Resolved(output) = self.lookup(workflow, job).await? else {
            return Ok(Unresolved);
        };
        let Some(sorting_npz_uri) = self
            .verified(&output, JobType::Sorting.primary_output_field())
            .await?
        else {
            return Ok(Unresolved);
        };
        let console_lines_uri = self.verified(&output, "console_lines_uri").await?;
        Ok(Resolved(SortingOutputs {
            sorting_npz_uri,
            console_lines_uri,
        }))
    }

    /// The figurl field is a URL, not an artifact; it is taken as stored.
    async fn sorting_figurl(
        &self,
        workflow: &mut Workflow,
        label: &str,
        sorter: &SorterConfig,
        recording_nwb_uri: &str,
        sorting: &SortingOutputs,
    ) -> Result<Resolution<String>, StoreError> {
        let job = JobDescriptor::new(
            format!("sorting figurl {} {label}", sorter.name),
            JobParams::SortingFigurl(SortingFigurlParams {
                label: format!("{} {label}", sorter.name),
                recording_nwb_uri: recording_nwb_uri.to_string(),
                sorting_npz_uri: sorting.sorting_npz_uri.clone(),
                sorting_console_lines_uri: sorting.console_lines_uri.clone(),
            }),
            false,
        );
        let field = JobType::SortingFigurl.primary_output_field();
        Ok(match self.lookup(workflow, job).await? {
            Resolved(output) => output.uri(field).map(str::to_string).into(),
            Unresolved => Unresolved,
        })
    }

    async fn compare_with_truth(
        &self,
        workflow: &mut Workflow,
        label: &str,
        sorter: &SorterConfig,
        sorting: &SortingOutputs,
        sorting_true_npz_uri: &str,
    ) -> Result<Resolution<String>, StoreError> {
        let job = JobDescriptor::new(
            format!("compare with truth {} {label}", sorter.name),
            JobParams::CompareWithTruth(CompareWithTruthParams {
                sorting_npz_uri: sorting.sorting_npz_uri.clone(),
                sorting_true_npz_uri: sorting_true_npz_uri.to_string(),
            }),
            false,
        );
        self.resolve_primary(workflow, job).await
    }
}
