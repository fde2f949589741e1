// src/service.rs

//! The handle through which callers reach the store, the trigger runtime
//! and the flush coordinator.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use crate::engine::{CoreRuntime, JobInfo, Runtime, RuntimeEvent};
use crate::errors::{CommitflowError, Result};
use crate::exec::{ExecutorBackend, RealExecutorBackend};
use crate::flush;
use crate::pipeline::{PipelineInfo, PipelineManifest};
use crate::store::{Commit, CommitInfo, FileInfo, ListCommitRequest, RepoInfo, Store};
use crate::types::{CommitState, PutMode};

#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    /// Job concurrency of the bundled executor and base of COEFFICIENT
    /// parallelism.
    pub worker_count: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self { worker_count: 4 }
    }
}

/// Join handle of the trigger runtime task.
#[derive(Debug)]
pub struct RuntimeHandle {
    join: JoinHandle<Result<()>>,
}

impl RuntimeHandle {
    /// Wait for the runtime to exit (after [`Service::shutdown`]).
    pub async fn join(self) -> Result<()> {
        self.join
            .await
            .map_err(|e| CommitflowError::Other(anyhow::anyhow!("runtime task failed: {e}")))?
    }
}

/// Cloneable handle to a running instance.
#[derive(Debug, Clone)]
pub struct Service {
    store: Arc<Store>,
    events: mpsc::UnboundedSender<RuntimeEvent>,
}

impl Service {
    /// Start a trigger runtime backed by the executor built by
    /// `make_executor`. Must be called from within a Tokio runtime.
    pub fn start<E, F>(options: ServiceOptions, make_executor: F) -> (Service, RuntimeHandle)
    where
        E: ExecutorBackend + 'static,
        F: FnOnce(mpsc::UnboundedSender<RuntimeEvent>) -> E,
    {
        let store = Arc::new(Store::new());
        let (tx, rx) = mpsc::unbounded_channel();
        store.set_trigger_sink(tx.clone());

        let executor = make_executor(tx.clone());
        let core = CoreRuntime::new(Arc::clone(&store), options.worker_count);
        let runtime = Runtime::new(core, rx, executor);
        let join = tokio::spawn(runtime.run());

        let service = Service { store, events: tx };
        (service, RuntimeHandle { join })
    }

    /// Start with the bundled local process executor.
    pub fn start_local(options: ServiceOptions) -> (Service, RuntimeHandle) {
        let workers = options.worker_count;
        Self::start(options, move |tx| RealExecutorBackend::new(tx, workers))
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    fn send(&self, event: RuntimeEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| CommitflowError::RuntimeStopped)
    }

    // ---- repos -------------------------------------------------------------

    pub fn create_repo(&self, name: &str) -> Result<RepoInfo> {
        self.store.create_repo(name)
    }

    pub fn inspect_repo(&self, name: &str) -> Result<RepoInfo> {
        self.store.inspect_repo(name)
    }

    pub fn list_repo(&self, provenance: &[String]) -> Vec<RepoInfo> {
        self.store.list_repo(provenance)
    }

    pub fn delete_repo(&self, name: &str, force: bool) -> Result<()> {
        self.store.delete_repo(name, force)
    }

    // ---- commits -----------------------------------------------------------

    pub fn start_commit(&self, repo: &str, parent: Option<&str>) -> Result<Commit> {
        self.store.start_commit(repo, parent)
    }

    pub fn finish_commit(&self, commit: &Commit) -> Result<()> {
        self.store.finish_commit(commit)
    }

    pub fn cancel_commit(&self, commit: &Commit, reason: &str) -> Result<()> {
        self.store.cancel_commit(commit, reason)
    }

    pub fn inspect_commit(&self, commit: &Commit) -> Result<CommitInfo> {
        self.store.inspect_commit(commit)
    }

    pub async fn list_commit(&self, request: &ListCommitRequest) -> Result<Vec<CommitInfo>> {
        self.store.list_commit(request).await
    }

    pub async fn wait_until_terminal(&self, commit: &Commit) -> Result<CommitState> {
        self.store.wait_until_terminal(commit).await
    }

    pub async fn flush_commit(
        &self,
        commits: &[Commit],
        to_repos: &[String],
    ) -> Result<Vec<CommitInfo>> {
        flush::flush_commit(&self.store, commits, to_repos).await
    }

    // ---- files -------------------------------------------------------------

    pub fn put_file(&self, commit: &Commit, path: &str, data: &[u8], mode: PutMode) -> Result<()> {
        self.store.put_file(commit, path, data, mode)
    }

    pub fn get_file(&self, commit: &Commit, path: &str, offset: u64, size: u64) -> Result<Vec<u8>> {
        self.store.get_file(commit, path, offset, size)
    }

    pub fn list_file(&self, commit: &Commit, dir: &str) -> Result<Vec<FileInfo>> {
        self.store.list_file(commit, dir)
    }

    // ---- pipelines ---------------------------------------------------------

    /// Validate and register a pipeline, create its output repo and trigger
    /// it for every Finished commit already on its inputs. Returns once
    /// those derived commits exist.
    pub async fn create_pipeline(&self, manifest: PipelineManifest) -> Result<Arc<PipelineInfo>> {
        let info = PipelineInfo::try_from(manifest)?;
        let info = self.store.register_pipeline(info)?;
        info!(pipeline = %info.name, inputs = ?info.input_repos(), "created pipeline");

        let (ack, done) = oneshot::channel();
        self.send(RuntimeEvent::PipelineCreated {
            name: info.name.clone(),
            ack,
        })?;
        done.await.map_err(|_| CommitflowError::RuntimeStopped)?;
        Ok(info)
    }

    pub fn inspect_pipeline(&self, name: &str) -> Result<Arc<PipelineInfo>> {
        self.store.pipelines().get(name)
    }

    pub fn list_pipeline(&self) -> Vec<Arc<PipelineInfo>> {
        self.store.pipelines().list()
    }

    /// Stop triggering `name`. Its output repo and provenance history stay.
    pub fn delete_pipeline(&self, name: &str) -> Result<()> {
        self.store.pipelines().remove(name)?;
        info!(pipeline = %name, "deleted pipeline");
        Ok(())
    }

    /// Run `name` once with no inputs; returns the output commit.
    pub async fn run_pipeline(&self, name: &str) -> Result<Commit> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeEvent::PipelineRunRequested {
            name: name.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| CommitflowError::RuntimeStopped)?
    }

    /// Jobs ordered by id, optionally only those of one pipeline.
    pub async fn list_job(&self, pipeline: Option<&str>) -> Result<Vec<JobInfo>> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeEvent::ListJobs {
            pipeline: pipeline.map(str::to_string),
            reply,
        })?;
        rx.await.map_err(|_| CommitflowError::RuntimeStopped)
    }

    /// Ask the trigger runtime to stop.
    pub fn shutdown(&self) -> Result<()> {
        self.send(RuntimeEvent::ShutdownRequested)
    }
}
