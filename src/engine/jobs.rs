// src/engine/jobs.rs

//! Bookkeeping for dispatched jobs and the output commits they write.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::engine::{JobId, JobOutcome};
use crate::pipeline::{OutputMode, ShardIndex};
use crate::store::Commit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Success,
    Failure(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: JobId,
    pub pipeline: String,
    pub output: Commit,
    pub inputs: Vec<Commit>,
    pub shard: ShardIndex,
    pub state: JobState,
}

#[derive(Debug)]
struct JobRecord {
    info: JobInfo,
    accept_return_code: Vec<i32>,
}

#[derive(Debug)]
struct OutputProgress {
    pending: usize,
    failed: bool,
    mode: OutputMode,
}

/// What the core should do with a job completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Write the job's files; finish the commit if `finish`.
    Write {
        output: Commit,
        mode: OutputMode,
        finish: bool,
    },
    /// First failure for this output commit: cancel it.
    Fail { output: Commit, reason: String },
    /// Stale or duplicate completion.
    Ignore,
}

#[derive(Debug, Default)]
pub struct JobTable {
    jobs: BTreeMap<JobId, JobRecord>,
    outputs: HashMap<Commit, OutputProgress>,
    next_id: JobId,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an output commit before its jobs are added.
    pub fn open(&mut self, output: Commit, mode: OutputMode) {
        self.outputs.insert(
            output,
            OutputProgress {
                pending: 0,
                failed: false,
                mode,
            },
        );
    }

    pub fn add(
        &mut self,
        pipeline: &str,
        output: &Commit,
        inputs: Vec<Commit>,
        shard: ShardIndex,
        accept_return_code: Vec<i32>,
    ) -> JobId {
        self.next_id += 1;
        let id = self.next_id;
        if let Some(progress) = self.outputs.get_mut(output) {
            progress.pending += 1;
        }
        self.jobs.insert(
            id,
            JobRecord {
                info: JobInfo {
                    id,
                    pipeline: pipeline.to_string(),
                    output: output.clone(),
                    inputs,
                    shard,
                    state: JobState::Running,
                },
                accept_return_code,
            },
        );
        id
    }

    pub fn complete(&mut self, id: JobId, outcome: JobOutcome) -> Completion {
        let Some(record) = self.jobs.get_mut(&id) else {
            warn!(job = id, "completion for unknown job");
            return Completion::Ignore;
        };
        if record.info.state != JobState::Running {
            warn!(job = id, "duplicate completion ignored");
            return Completion::Ignore;
        }

        let state = match outcome {
            JobOutcome::Success => JobState::Success,
            JobOutcome::Failed(code) if record.accept_return_code.contains(&code) => {
                JobState::Success
            }
            JobOutcome::Failed(code) => JobState::Failure(code),
        };
        record.info.state = state;
        let output = record.info.output.clone();
        let pipeline = record.info.pipeline.clone();

        let Some(progress) = self.outputs.get_mut(&output) else {
            return Completion::Ignore;
        };
        progress.pending = progress.pending.saturating_sub(1);
        let done = progress.pending == 0;
        let already_failed = progress.failed;
        let mode = progress.mode;

        let completion = match state {
            _ if already_failed => Completion::Ignore,
            JobState::Failure(code) => {
                progress.failed = true;
                Completion::Fail {
                    output: output.clone(),
                    reason: format!("pipeline {pipeline} job {id} exited with code {code}"),
                }
            }
            _ => Completion::Write {
                output: output.clone(),
                mode,
                finish: done,
            },
        };

        if done {
            self.outputs.remove(&output);
        }
        completion
    }

    /// Mark `output` failed after a completion could not be applied.
    pub fn fail_output(&mut self, output: &Commit) {
        if let Some(progress) = self.outputs.get_mut(output) {
            progress.failed = true;
        }
    }

    /// Output commits still waiting on jobs that have not failed.
    pub fn pending_outputs(&self) -> Vec<Commit> {
        let mut outputs: Vec<Commit> = self
            .outputs
            .iter()
            .filter(|(_, p)| !p.failed && p.pending > 0)
            .map(|(c, _)| c.clone())
            .collect();
        outputs.sort();
        outputs
    }

    pub fn list(&self, pipeline: Option<&str>) -> Vec<JobInfo> {
        self.jobs
            .values()
            .filter(|r| pipeline.is_none_or(|p| r.info.pipeline == p))
            .map(|r| r.info.clone())
            .collect()
    }
}
