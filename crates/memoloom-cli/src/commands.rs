//! Subcommand bodies. Each returns `anyhow::Result` and prints its report to stdout.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use memoloom_core::app::{
    JobOrder, JobOutcome, JobSelector, JobState, JobStatus, ResultCollector, RunReport, Scheduler,
    SchedulerOptions, WorkflowGraphBuilder,
};
use memoloom_core::config::{ContainerRuntime, PipelineConfig, ProcessingSettings};
use memoloom_core::domain::{ClaimantId, WorkflowResult};
use memoloom_core::ports::MemoStore;
use serde::Deserialize;
use serde_json::Value;

use crate::executor::ContainerExecutor;

/// Everything a subcommand needs besides its own arguments.
pub struct Env {
    pub store: Arc<dyn MemoStore>,
    pub executor_repo: PathBuf,
    pub claimant: ClaimantId,
    pub verbose: bool,
}

/// Flags of `run`.
#[derive(Debug, Clone, Default)]
pub struct RunFlags {
    pub force_run: bool,
    pub rerun_failing: bool,
    pub reset_locks: bool,
    pub num_parallel: Option<i64>,
    pub deterministic: bool,
    pub dry_run: bool,
    pub docker: bool,
    pub singularity: bool,
    pub image: Option<String>,
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    PipelineConfig::load(path).with_context(|| format!("failed to load pipeline config: {}", path.display()))
}

pub async fn build(env: &Env, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let workflow = WorkflowGraphBuilder::new(Arc::clone(&env.store))
        .build_from_config(&config)
        .await?;
    let collector = ResultCollector::new(Arc::clone(&env.store));
    collector.publish(&workflow).await?;
    let statuses = collector.job_statuses(&workflow).await?;

    print!("{}", format_build_report(&statuses, workflow.results()));
    Ok(())
}

pub async fn run(env: &Env, config_path: &Path, selector: &str, flags: RunFlags) -> Result<()> {
    let config = load_config(config_path)?;
    let runtime = ContainerRuntime::from_flags(flags.docker, flags.singularity)?;
    let selector: JobSelector = selector.parse()?;

    let options = SchedulerOptions {
        num_parallel: clamp_workers(flags.num_parallel),
        order: if flags.deterministic {
            JobOrder::Deterministic
        } else {
            JobOrder::Shuffled
        },
        dry_run: flags.dry_run,
        force_run: flags.force_run,
        rerun_failing: flags.rerun_failing,
        ..SchedulerOptions::new(&config.name)
    };
    let executor = ContainerExecutor::new(
        Arc::clone(&env.store),
        &env.executor_repo,
        runtime,
        flags.image,
    );
    let scheduler = Scheduler::new(Arc::clone(&env.store), Arc::new(executor), env.claimant, options);

    if flags.reset_locks {
        let cleared = scheduler.reset_locks(&selector).await?;
        println!("{cleared} locks reset.");
        return Ok(());
    }

    let report = run_scheduler(&scheduler, &selector).await?;
    if env.verbose {
        print!("{}", format_run_report(&report));
    }
    Ok(())
}

pub async fn results(env: &Env, config_path: &Path, json_format: bool) -> Result<()> {
    let config = load_config(config_path)?;
    println!("Config name: {}", config.name);
    let results = ResultCollector::new(Arc::clone(&env.store))
        .load_results(&config.name)
        .await?;
    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }
    if json_format {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    for result in &results {
        let comparison = match env.store.load_artifact(&result.comparison_with_truth_uri).await? {
            Some(bytes) => Some(serde_json::from_slice::<Vec<UnitComparison>>(&bytes).with_context(|| {
                format!("malformed comparison: {}", result.comparison_with_truth_uri)
            })?),
            None => None,
        };
        print!("{}", format_result(result, comparison.as_deref()));
    }
    Ok(())
}

pub async fn run_all(env: &Env, config_path: &Path, settings_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let settings = ProcessingSettings::load(settings_path)?.resolve();

    for algorithm in unique_algorithms(&config) {
        let (runtime, image) = settings.container_for(&algorithm);
        println!("=== {algorithm} ({runtime:?}) ===");
        let options = SchedulerOptions {
            num_parallel: settings.num_parallel,
            force_run: settings.force_run,
            ..SchedulerOptions::new(&config.name)
        };
        let executor = ContainerExecutor::new(Arc::clone(&env.store), &env.executor_repo, runtime, image);
        let scheduler = Scheduler::new(Arc::clone(&env.store), Arc::new(executor), env.claimant, options);
        let report = run_scheduler(&scheduler, &JobSelector::SortingAlgorithm(algorithm)).await?;
        if env.verbose {
            print!("{}", format_run_report(&report));
        }
    }
    Ok(())
}

/// Describe the selection, then run it.
async fn run_scheduler(scheduler: &Scheduler, selector: &JobSelector) -> Result<RunReport> {
    let jobs = scheduler.load_jobs(selector).await?;
    let total = jobs.len();
    let runnable = scheduler.filter_runnable(jobs).await?;

    println!("JOBS TO RUN:");
    for job in &runnable {
        println!("{}", job.label());
    }
    println!();
    println!("Total number of jobs: {total}");
    println!("Number of jobs to run: {}", runnable.len());
    println!("Number of jobs run simultaneously: {}", scheduler.options().num_parallel);

    Ok(scheduler.run(runnable).await?)
}

fn clamp_workers(raw: Option<i64>) -> usize {
    raw.map_or(1, |n| usize::try_from(n.max(1)).unwrap_or(1))
}

/// Distinct sorting algorithms, in config order.
fn unique_algorithms(config: &PipelineConfig) -> Vec<String> {
    let mut seen = Vec::new();
    for sorter in &config.sorters {
        if !seen.contains(&sorter.algorithm) {
            seen.push(sorter.algorithm.clone());
        }
    }
    seen
}

/// One row of a comparison-with-truth artifact.
#[derive(Debug, Deserialize)]
pub struct UnitComparison {
    pub unit_id: Value,
    pub accuracy: Value,
}

const RULE: &str = "-----------------------------";

fn format_build_report(statuses: &[JobStatus], results: &[WorkflowResult]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}\nJOBS:");
    for status in statuses {
        let marker = if status.state == JobState::Missing { "* " } else { "" };
        let _ = writeln!(out, "{marker}{}: {}", status.job_type, status.label);
    }
    let _ = writeln!(out, "{RULE}\nRESULTS:");
    for result in results {
        let _ = writeln!(out, "{} {}", result.sorter.name, result.recording.label());
    }
    let _ = writeln!(out, "{RULE}");
    out
}

fn format_result(result: &WorkflowResult, comparison: Option<&[UnitComparison]>) -> String {
    fn or_none(v: &Option<String>) -> &str {
        v.as_deref().unwrap_or("None")
    }

    let mut out = String::new();
    let _ = writeln!(out, "{}", "=".repeat(66));
    let _ = writeln!(out, "RECORDING: {}", result.recording.label());
    let _ = writeln!(out, "SORTER: {}", result.sorter.name);
    let _ = writeln!(out, "Recording nwb: {}", result.recording_nwb_uri);
    let _ = writeln!(out, "Sorting true npz: {}", result.sorting_true_npz_uri);
    let _ = writeln!(out, "Sorting npz: {}", result.sorting_npz_uri);
    let _ = writeln!(out, "Sorting console: {}", or_none(&result.sorting_console_lines_uri));
    let _ = writeln!(out, "Sorting figurl: {}", or_none(&result.sorting_figurl));
    let _ = writeln!(out);
    match comparison {
        Some(units) => {
            for unit in units {
                let _ = writeln!(out, "Unit {}: accuracy={}", unit.unit_id, unit.accuracy);
            }
        }
        None => {
            let _ = writeln!(out, "File not found: {}", result.comparison_with_truth_uri);
        }
    }
    let _ = writeln!(out);
    out
}

fn format_run_report(report: &RunReport) -> String {
    let counts = report.counts();
    let mut out = String::new();
    for job in &report.jobs {
        let _ = write!(
            out,
            "\t[worker-{}] {:?} {} (retcode={:?})",
            job.worker_id, job.outcome, job.label, job.retcode
        );
        match job.held_by {
            Some(holder) => {
                let _ = writeln!(out, " held by {holder}");
            }
            None if job.outcome == JobOutcome::SkippedLocked => {
                let _ = writeln!(out, " held by unknown");
            }
            None if !job.claimed => {
                let _ = writeln!(out, " forced without lock");
            }
            None => {
                let _ = writeln!(out);
            }
        }
    }
    let _ = writeln!(
        out,
        "selected={} claimed={} forced_unclaimed={} skipped={} succeeded={} failed={} dry_run={}",
        counts.selected,
        counts.claimed,
        counts.forced_unclaimed,
        counts.skipped_locked,
        counts.succeeded,
        counts.failed,
        counts.dry_run
    );
    out
}
