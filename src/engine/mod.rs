// src/engine/mod.rs

//! Pipeline trigger engine.
//!
//! Finished commits flow in as [`RuntimeEvent::CommitFinished`]; for every
//! pipeline subscribed to the commit's repo the engine opens an output commit,
//! records provenance and dispatches jobs. Job completions flow back in and
//! finish or cancel the output commits, which in turn trigger further
//! pipelines.
//!
//! The state machine lives in [`core`]; the async shell that owns the channel
//! and the executor is [`runtime`].

use tokio::sync::oneshot;

use crate::errors::Result;
use crate::pipeline::{JobInput, ShardIndex, Transform};
use crate::store::Commit;

pub mod core;
pub mod event_handlers;
pub mod jobs;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use jobs::{JobInfo, JobState};
pub use runtime::Runtime;

pub type JobId = u64;

/// Exit status of one job as reported by an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failed(i32),
}

/// A file produced by a job, relative to its output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: String,
    pub data: Vec<u8>,
}

impl OutputFile {
    pub fn new(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }
}

/// One unit of work handed to an executor.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub id: JobId,
    pub pipeline: String,
    pub transform: Transform,
    pub output: Commit,
    pub inputs: Vec<JobInput>,
    pub shard: ShardIndex,
}

/// Events flowing into the trigger runtime from the store, the service
/// handle and executors.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// A commit became Finished.
    CommitFinished { commit: Commit, seq: u64 },
    /// A pipeline was registered; trigger its existing inputs, then ack.
    PipelineCreated {
        name: String,
        ack: oneshot::Sender<()>,
    },
    /// Run a pipeline once with no inputs.
    PipelineRunRequested {
        name: String,
        reply: oneshot::Sender<Result<Commit>>,
    },
    /// An executor finished a job.
    JobCompleted {
        job: JobId,
        outcome: JobOutcome,
        outputs: Vec<OutputFile>,
    },
    ListJobs {
        pipeline: Option<String>,
        reply: oneshot::Sender<Vec<JobInfo>>,
    },
    ShutdownRequested,
}
