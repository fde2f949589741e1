// src/engine/core.rs

//! Core trigger state machine.
//!
//! [`CoreRuntime`] consumes [`RuntimeEvent`]s one at a time and returns a
//! [`CoreStep`] describing what the async shell (`engine::runtime::Runtime`)
//! must do next. It talks to the store synchronously but owns no channels
//! and spawns nothing, so it can be driven directly in unit tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::engine::event_handlers::{
    CoreStep, handle_commit_finished, handle_job_completed, handle_list_jobs,
    handle_pipeline_created, handle_run_requested,
};
use crate::engine::jobs::JobTable;
use crate::engine::RuntimeEvent;
use crate::errors::CommitflowError;
use crate::store::Store;
use crate::types::CommitState;

/// Where a pipeline is in handling the current trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerState {
    #[default]
    Idle,
    Evaluating,
    Dispatching,
}

#[derive(Debug)]
pub struct CoreRuntime {
    store: Arc<Store>,
    jobs: JobTable,
    states: BTreeMap<String, TriggerState>,
    /// (pipeline, input commit sequence) pairs already triggered.
    processed: HashSet<(String, u64)>,
    /// (pipeline, sorted input commit sequences) combinations already run.
    combinations: HashSet<(String, Vec<u64>)>,
    worker_count: usize,
}

impl CoreRuntime {
    pub fn new(store: Arc<Store>, worker_count: usize) -> Self {
        Self {
            store,
            jobs: JobTable::new(),
            states: BTreeMap::new(),
            processed: HashSet::new(),
            combinations: HashSet::new(),
            worker_count: worker_count.max(1),
        }
    }

    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub(crate) fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    pub(crate) fn jobs_mut(&mut self) -> &mut JobTable {
        &mut self.jobs
    }

    pub fn pipeline_state(&self, pipeline: &str) -> TriggerState {
        self.states.get(pipeline).copied().unwrap_or_default()
    }

    pub(crate) fn set_state(&mut self, pipeline: &str, state: TriggerState) {
        trace!(pipeline = %pipeline, ?state, "trigger state");
        self.states.insert(pipeline.to_string(), state);
    }

    /// Returns `false` if this pipeline already ran for this input commit.
    pub(crate) fn mark_processed(&mut self, pipeline: &str, seq: u64) -> bool {
        self.processed.insert((pipeline.to_string(), seq))
    }

    /// Returns `false` if this pipeline already produced a commit from exactly
    /// these input commits, e.g. when two of its inputs finished before
    /// either event was handled.
    pub(crate) fn mark_combination(&mut self, pipeline: &str, mut seqs: Vec<u64>) -> bool {
        seqs.sort_unstable();
        self.combinations.insert((pipeline.to_string(), seqs))
    }

    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::CommitFinished { commit, seq } => {
                handle_commit_finished(self, commit, seq)
            }
            RuntimeEvent::PipelineCreated { name, ack } => {
                handle_pipeline_created(self, &name, ack)
            }
            RuntimeEvent::PipelineRunRequested { name, reply } => {
                handle_run_requested(self, &name, reply)
            }
            RuntimeEvent::JobCompleted {
                job,
                outcome,
                outputs,
            } => handle_job_completed(self, job, outcome, outputs),
            RuntimeEvent::ListJobs { pipeline, reply } => {
                handle_list_jobs(self, pipeline.as_deref(), reply)
            }
            RuntimeEvent::ShutdownRequested => CoreStep {
                commands: Vec::new(),
                keep_running: false,
            },
        }
    }

    /// Cancel output commits whose jobs will never report back.
    pub fn abort_pending(&mut self, reason: &str) {
        for output in self.jobs.pending_outputs() {
            if let Err(e) = self.store.cancel_commit(&output, reason) {
                warn!(commit = %output, error = %e, "could not cancel pending output");
            }
        }
    }

    /// Resolve an event received after shutdown without running triggers.
    pub fn drain(&mut self, event: RuntimeEvent) {
        match event {
            RuntimeEvent::CommitFinished { seq, .. } => {
                self.store.mark_settled(seq, CommitState::Finished);
            }
            RuntimeEvent::PipelineCreated { ack, .. } => {
                let _ = ack.send(());
            }
            RuntimeEvent::PipelineRunRequested { reply, .. } => {
                let _ = reply.send(Err(CommitflowError::RuntimeStopped));
            }
            RuntimeEvent::ListJobs { pipeline, reply } => {
                let _ = reply.send(self.jobs.list(pipeline.as_deref()));
            }
            RuntimeEvent::JobCompleted { .. } | RuntimeEvent::ShutdownRequested => {}
        }
    }
}
