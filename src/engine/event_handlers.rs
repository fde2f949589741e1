// src/engine/event_handlers.rs

//! Handlers for each [`RuntimeEvent`](crate::engine::RuntimeEvent) kind.
//!
//! Each handler mutates the core and returns the commands the async shell
//! should run next.

use std::collections::BTreeMap;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::engine::core::{CoreRuntime, TriggerState};
use crate::engine::jobs::{Completion, JobInfo};
use crate::engine::{JobId, JobOutcome, OutputFile, ScheduledJob};
use crate::errors::{CommitflowError, Result};
use crate::pipeline::{InputSnapshot, OutputMode, PipelineInfo, ShardIndex, plan_work};
use crate::store::{Commit, Store};
use crate::types::CommitState;

/// Commands emitted by the core for the shell.
#[derive(Debug)]
pub enum CoreCommand {
    DispatchJobs(Vec<ScheduledJob>),
}

/// Result of handling a single event.
#[derive(Debug)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    pub keep_running: bool,
}

impl CoreStep {
    pub fn idle() -> Self {
        Self {
            commands: Vec::new(),
            keep_running: true,
        }
    }

    fn dispatch(jobs: Vec<ScheduledJob>) -> Self {
        let commands = if jobs.is_empty() {
            Vec::new()
        } else {
            vec![CoreCommand::DispatchJobs(jobs)]
        };
        Self {
            commands,
            keep_running: true,
        }
    }
}

/// Evaluate every pipeline subscribed to `commit`'s repo, then mark the
/// commit settled.
pub fn handle_commit_finished(core: &mut CoreRuntime, commit: Commit, seq: u64) -> CoreStep {
    let store = core.store();
    let pipelines = store.pipelines().subscribed_to(&commit.repo);
    debug!(commit = %commit, seq, subscribers = pipelines.len(), "commit finished");

    let mut jobs = Vec::new();
    if store.commit_seq(&commit).is_ok() {
        for pipeline in pipelines {
            jobs.extend(trigger_logged(core, &pipeline, &commit, seq));
        }
    }

    store.mark_settled(seq, CommitState::Finished);
    CoreStep::dispatch(jobs)
}

/// Backfill a freshly registered pipeline with every Finished commit already
/// on its inputs, oldest first.
pub fn handle_pipeline_created(
    core: &mut CoreRuntime,
    name: &str,
    ack: oneshot::Sender<()>,
) -> CoreStep {
    let store = core.store();
    let mut jobs = Vec::new();

    match store.pipelines().get(name) {
        Ok(pipeline) => {
            let mut backlog = BTreeMap::new();
            for input in &pipeline.inputs {
                match store.finished_commits(&input.repo) {
                    Ok(commits) => backlog.extend(commits),
                    Err(e) => warn!(pipeline = %name, repo = %input.repo, error = %e, "skipping backfill input"),
                }
            }
            info!(pipeline = %name, commits = backlog.len(), "backfilling pipeline");
            for (seq, commit) in backlog {
                jobs.extend(trigger_logged(core, &pipeline, &commit, seq));
            }
        }
        Err(e) => warn!(pipeline = %name, error = %e, "pipeline vanished before backfill"),
    }

    // The caller may have given up waiting.
    let _ = ack.send(());
    CoreStep::dispatch(jobs)
}

/// Open an output commit with no provenance and run a single job.
pub fn handle_run_requested(
    core: &mut CoreRuntime,
    name: &str,
    reply: oneshot::Sender<Result<Commit>>,
) -> CoreStep {
    let result = run_pipeline(core, name);
    let step = match &result {
        Ok((_, job)) => CoreStep::dispatch(vec![job.clone()]),
        Err(_) => CoreStep::idle(),
    };
    let _ = reply.send(result.map(|(commit, _)| commit));
    step
}

fn run_pipeline(core: &mut CoreRuntime, name: &str) -> Result<(Commit, ScheduledJob)> {
    let store = core.store();
    let pipeline = store.pipelines().get(name)?;
    let output = store.start_commit(&pipeline.output_repo, None)?;
    let shard = ShardIndex { index: 0, count: 1 };

    let jobs = core.jobs_mut();
    jobs.open(output.clone(), OutputMode::Append);
    let id = jobs.add(
        &pipeline.name,
        &output,
        Vec::new(),
        shard,
        pipeline.transform.accept_return_code.clone(),
    );
    info!(pipeline = %name, commit = %output, job = id, "running pipeline");

    let job = ScheduledJob {
        id,
        pipeline: pipeline.name.clone(),
        transform: pipeline.transform.clone(),
        output: output.clone(),
        inputs: Vec::new(),
        shard,
    };
    Ok((output, job))
}

pub fn handle_job_completed(
    core: &mut CoreRuntime,
    job: JobId,
    outcome: JobOutcome,
    outputs: Vec<OutputFile>,
) -> CoreStep {
    let store = core.store();
    match core.jobs_mut().complete(job, outcome) {
        Completion::Write {
            output,
            mode,
            finish,
        } => {
            debug!(job, commit = %output, files = outputs.len(), finish, "job succeeded");
            for file in &outputs {
                if let Err(e) =
                    store.put_output(&output, &file.path, &file.data, mode == OutputMode::Replace)
                {
                    warn!(job, commit = %output, path = %file.path, error = %e, "could not write job output");
                    // Later shards of this commit are ignored from here on.
                    core.jobs_mut().fail_output(&output);
                    let reason = CommitflowError::JobFailed(format!(
                        "job {job} wrote {}: {e}",
                        file.path
                    ))
                    .to_string();
                    if let Err(e) = store.cancel_commit(&output, &reason) {
                        warn!(job, commit = %output, error = %e, "could not cancel output commit");
                    }
                    return CoreStep::idle();
                }
            }
            if finish {
                if let Err(e) = store.finish_commit(&output) {
                    warn!(job, commit = %output, error = %e, "could not finish output commit");
                }
            }
        }
        Completion::Fail { output, reason } => {
            warn!(job, commit = %output, ?outcome, "job failed");
            let reason = CommitflowError::JobFailed(reason).to_string();
            if let Err(e) = store.cancel_commit(&output, &reason) {
                warn!(job, commit = %output, error = %e, "could not cancel output commit");
            }
        }
        Completion::Ignore => {}
    }
    CoreStep::idle()
}

pub fn handle_list_jobs(
    core: &CoreRuntime,
    pipeline: Option<&str>,
    reply: oneshot::Sender<Vec<JobInfo>>,
) -> CoreStep {
    let _ = reply.send(core.jobs().list(pipeline));
    CoreStep::idle()
}

fn trigger_logged(
    core: &mut CoreRuntime,
    pipeline: &PipelineInfo,
    commit: &Commit,
    seq: u64,
) -> Vec<ScheduledJob> {
    match trigger_pipeline(core, pipeline, commit, seq) {
        Ok(jobs) => jobs,
        Err(e @ CommitflowError::ProvenanceCycle(_)) => {
            error!(pipeline = %pipeline.name, commit = %commit, error = %e, "provenance invariant violated");
            core.set_state(&pipeline.name, TriggerState::Idle);
            Vec::new()
        }
        Err(e) => {
            warn!(pipeline = %pipeline.name, commit = %commit, error = %e, "trigger failed");
            core.set_state(&pipeline.name, TriggerState::Idle);
            Vec::new()
        }
    }
}

/// Run one pipeline against one finished input commit, at most once per
/// (pipeline, commit).
fn trigger_pipeline(
    core: &mut CoreRuntime,
    pipeline: &PipelineInfo,
    commit: &Commit,
    seq: u64,
) -> Result<Vec<ScheduledJob>> {
    if !core.mark_processed(&pipeline.name, seq) {
        return Ok(Vec::new());
    }
    let store = core.store();

    core.set_state(&pipeline.name, TriggerState::Evaluating);
    let origins = store.graph().origins(seq);
    let mut snapshots = Vec::with_capacity(pipeline.inputs.len());
    for input in &pipeline.inputs {
        let input_commit = if input.repo == commit.repo {
            commit.clone()
        } else {
            match select_input(&store, &input.repo, &origins)? {
                Some(c) => c,
                None => {
                    debug!(
                        pipeline = %pipeline.name,
                        commit = %commit,
                        waiting_on = %input.repo,
                        "no matching commit on input yet; skipping"
                    );
                    core.set_state(&pipeline.name, TriggerState::Idle);
                    return Ok(Vec::new());
                }
            }
        };

        let files = store
            .commit_files(&input_commit, input.method.view())?
            .into_iter()
            .filter(|(path, _)| input.accepts(path))
            .collect();
        snapshots.push(InputSnapshot {
            commit: input_commit,
            files,
            key: input.method.shard_key(),
        });
    }

    let mut seqs = Vec::with_capacity(snapshots.len());
    for snapshot in &snapshots {
        seqs.push(store.commit_seq(&snapshot.commit)?);
    }
    if !core.mark_combination(&pipeline.name, seqs) {
        debug!(pipeline = %pipeline.name, commit = %commit, "inputs already processed together");
        core.set_state(&pipeline.name, TriggerState::Idle);
        return Ok(Vec::new());
    }

    core.set_state(&pipeline.name, TriggerState::Dispatching);
    let output = store.start_commit(&pipeline.output_repo, None)?;
    for snapshot in &snapshots {
        if let Err(e) = store.add_provenance(&snapshot.commit, &output) {
            // Best effort: the commit is useless without its provenance.
            let _ = store.cancel_commit(&output, &e.to_string());
            return Err(e);
        }
    }

    let input_commits: Vec<Commit> = snapshots.iter().map(|s| s.commit.clone()).collect();
    let units = plan_work(snapshots, pipeline.shard_count(core.worker_count()));

    if units.is_empty() {
        debug!(pipeline = %pipeline.name, commit = %output, "no input data; finishing output");
        core.set_state(&pipeline.name, TriggerState::Idle);
        store.finish_commit(&output)?;
        return Ok(Vec::new());
    }

    let jobs = core.jobs_mut();
    jobs.open(output.clone(), pipeline.output_mode());
    let scheduled: Vec<ScheduledJob> = units
        .into_iter()
        .map(|unit| {
            let id = jobs.add(
                &pipeline.name,
                &output,
                input_commits.clone(),
                unit.shard,
                pipeline.transform.accept_return_code.clone(),
            );
            ScheduledJob {
                id,
                pipeline: pipeline.name.clone(),
                transform: pipeline.transform.clone(),
                output: output.clone(),
                inputs: unit.inputs,
                shard: unit.shard,
            }
        })
        .collect();

    info!(
        pipeline = %pipeline.name,
        input = %commit,
        output = %output,
        jobs = scheduled.len(),
        "triggered pipeline"
    );
    core.set_state(&pipeline.name, TriggerState::Idle);
    Ok(scheduled)
}

/// Commit of `repo` to read alongside a commit descending from `origins`.
///
/// When some origin feeds `repo`, only a Finished commit derived from those
/// same origins qualifies; the branch still running will trigger again once
/// it finishes. Otherwise the newest Finished commit is used.
fn select_input(store: &Store, repo: &str, origins: &[(u64, Commit)]) -> Result<Option<Commit>> {
    let shared: Vec<u64> = origins
        .iter()
        .filter(|(_, origin)| store.pipelines().feeds(&origin.repo, repo))
        .map(|(seq, _)| *seq)
        .collect();
    if shared.is_empty() {
        store.latest_finished(repo)
    } else {
        store.latest_derived(repo, &shared)
    }
}
