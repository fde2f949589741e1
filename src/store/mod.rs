// src/store/mod.rs

//! Authoritative record of repos, commits, file data and pipelines.
//!
//! Locking: the repo map is an `RwLock`, every repo has its own `Mutex`, and
//! the provenance graph, pipeline registry and notifiers each synchronize
//! themselves. Locks are always taken in the order
//! repo map -> repo -> graph -> notifier and never held across an `.await`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::engine::RuntimeEvent;
use crate::errors::{CommitflowError, Result};
use crate::notify::{Notifier, Subscription};
use crate::pipeline::{PipelineInfo, PipelineRegistry};
use crate::provenance::ProvenanceGraph;
use crate::types::{CommitState, CommitStatus, CommitType, PutMode};

pub mod commit;
pub mod files;
pub mod repo;

pub use commit::{Commit, CommitInfo, commit_id};
pub use files::{FileInfo, FileType, FileView};
pub use repo::{RepoInfo, validate_repo_name};

use commit::CommitRecord;
use files::{FileTree, list_dir, normalize_path, read_range};
use repo::RepoEntry;

/// Arguments of [`Store::list_commit`].
#[derive(Debug, Clone, Default)]
pub struct ListCommitRequest {
    /// Repos to list, in output order. Empty means every repo.
    pub repos: Vec<String>,
    /// Per-repo exclusive lower bound.
    pub from: Vec<Commit>,
    pub commit_type: CommitType,
    pub status: CommitStatus,
    /// Wait for a match instead of returning an empty list.
    pub block: bool,
}

impl ListCommitRequest {
    pub fn new<I, S>(repos: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            repos: repos.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn from_commit(mut self, commit: Commit) -> Self {
        self.from.push(commit);
        self
    }

    pub fn commit_type(mut self, commit_type: CommitType) -> Self {
        self.commit_type = commit_type;
        self
    }

    pub fn status(mut self, status: CommitStatus) -> Self {
        self.status = status;
        self
    }

    pub fn block(mut self, block: bool) -> Self {
        self.block = block;
        self
    }
}

#[derive(Debug, Default)]
pub struct Store {
    repos: RwLock<BTreeMap<String, Arc<RepoEntry>>>,
    graph: ProvenanceGraph,
    pipelines: PipelineRegistry,
    /// Fired when a commit becomes Finished or Cancelled.
    terminal: Notifier,
    /// Fired once the trigger has evaluated a terminal commit.
    settled: Notifier,
    next_seq: AtomicU64,
    trigger: RwLock<Option<mpsc::UnboundedSender<RuntimeEvent>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graph(&self) -> &ProvenanceGraph {
        &self.graph
    }

    pub fn pipelines(&self) -> &PipelineRegistry {
        &self.pipelines
    }

    fn entry(&self, repo: &str) -> Result<Arc<RepoEntry>> {
        self.repos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(repo)
            .cloned()
            .ok_or_else(|| CommitflowError::RepoNotFound(repo.to_string()))
    }

    fn repo_exists(&self, repo: &str) -> bool {
        self.repos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(repo)
    }

    // ---- repos -------------------------------------------------------------

    pub fn create_repo(&self, name: &str) -> Result<RepoInfo> {
        self.create_repo_with_provenance(name, Vec::new())
    }

    pub(crate) fn create_repo_with_provenance(
        &self,
        name: &str,
        provenance: Vec<String>,
    ) -> Result<RepoInfo> {
        validate_repo_name(name)?;
        let mut repos = self.repos.write().unwrap_or_else(PoisonError::into_inner);
        if repos.contains_key(name) {
            return Err(CommitflowError::AlreadyExists(format!("repo {name}")));
        }
        let entry = Arc::new(RepoEntry::new(name.to_string(), provenance));
        let info = entry.info();
        repos.insert(name.to_string(), entry);
        info!(repo = %name, "created repo");
        Ok(info)
    }

    pub fn inspect_repo(&self, name: &str) -> Result<RepoInfo> {
        Ok(self.entry(name)?.info())
    }

    /// Repos sorted by name; with a filter, only repos whose provenance
    /// includes every named repo.
    pub fn list_repo(&self, provenance: &[String]) -> Vec<RepoInfo> {
        let entries: Vec<Arc<RepoEntry>> = self
            .repos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        entries
            .into_iter()
            .filter(|e| provenance.iter().all(|p| e.provenance.contains(p)))
            .map(|e| e.info())
            .collect()
    }

    pub fn delete_repo(&self, name: &str, force: bool) -> Result<()> {
        let entry = self.entry(name)?;
        let seqs: Vec<u64> = entry.lock().commits.iter().map(|c| c.seq).collect();

        if !force {
            if let Some(other) = self.foreign_provenance(name, &seqs) {
                return Err(CommitflowError::HasDependents(format!(
                    "repo {name} shares provenance with {other}"
                )));
            }
            if let Some(reader) = self.pipelines.subscribed_to(name).first() {
                return Err(CommitflowError::HasDependents(format!(
                    "repo {name} is read by pipeline {}",
                    reader.name
                )));
            }
        }

        self.repos
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);

        let open: Vec<u64> = {
            let mut state = entry.lock();
            state.deleted = true;
            state
                .commits
                .iter()
                .filter(|c| c.state == CommitState::Open)
                .map(|c| c.seq)
                .collect()
        };

        self.graph.unregister(&seqs);
        for seq in open {
            self.terminal.fire(seq, CommitState::Cancelled);
            self.settled.fire(seq, CommitState::Cancelled);
        }
        entry.bump();

        let dropped = self.pipelines.remove_touching(name);
        info!(repo = %name, force, commits = seqs.len(), ?dropped, "deleted repo");
        Ok(())
    }

    /// First live repo other than `name` linked to one of `seqs` by a
    /// provenance edge in either direction.
    fn foreign_provenance(&self, name: &str, seqs: &[u64]) -> Option<String> {
        seqs.iter()
            .flat_map(|&seq| {
                let mut linked = self.graph.children(seq);
                linked.extend(self.graph.parents(seq));
                linked
            })
            .map(|(_, commit)| commit.repo)
            .find(|repo| repo != name && self.repo_exists(repo))
    }

    // ---- commits -----------------------------------------------------------

    /// Open a new commit. Without an explicit parent the newest Finished
    /// commit of the repo becomes the parent.
    pub fn start_commit(&self, repo: &str, parent: Option<&str>) -> Result<Commit> {
        let entry = self.entry(repo)?;
        let commit = {
            let mut state = entry.lock();
            if state.deleted {
                return Err(CommitflowError::RepoNotFound(repo.to_string()));
            }

            let parent = match parent {
                Some(id) => match state.get(id) {
                    Some(record) if record.state == CommitState::Finished => Some(id.to_string()),
                    Some(record) => {
                        return Err(CommitflowError::InvalidParent(format!(
                            "{repo}/{id} is {}",
                            record.state
                        )));
                    }
                    None => {
                        return Err(CommitflowError::InvalidParent(format!(
                            "{repo}/{id} does not exist"
                        )));
                    }
                },
                None => state.newest_finished().map(|r| r.id.clone()),
            };

            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
            let id = commit_id(repo, parent.as_deref(), seq);
            let commit = Commit::new(repo, id.clone());
            state.push(CommitRecord::new(id, parent, seq));
            self.graph.register(seq, commit.clone());
            commit
        };
        entry.bump();
        debug!(commit = %commit, "started commit");
        Ok(commit)
    }

    pub fn finish_commit(&self, commit: &Commit) -> Result<()> {
        let entry = self.entry(&commit.repo)?;
        let seq = {
            let mut state = entry.lock();
            let record = open_record(&mut state, commit)?;
            record.state = CommitState::Finished;
            record.finished = Some(SystemTime::now());
            record.seq
        };
        self.terminal.fire(seq, CommitState::Finished);
        entry.bump();
        debug!(commit = %commit, seq, "finished commit");
        self.publish_finished(commit.clone(), seq);
        Ok(())
    }

    /// Close an open commit without publishing it downstream.
    pub fn cancel_commit(&self, commit: &Commit, reason: &str) -> Result<()> {
        let entry = self.entry(&commit.repo)?;
        let seq = {
            let mut state = entry.lock();
            let record = open_record(&mut state, commit)?;
            record.state = CommitState::Cancelled;
            record.finished = Some(SystemTime::now());
            record.failure = Some(reason.to_string());
            record.seq
        };
        self.terminal.fire(seq, CommitState::Cancelled);
        self.settled.fire(seq, CommitState::Cancelled);
        entry.bump();
        warn!(commit = %commit, reason, "cancelled commit");
        Ok(())
    }

    pub fn inspect_commit(&self, commit: &Commit) -> Result<CommitInfo> {
        let entry = self.entry(&commit.repo)?;
        let record = {
            let state = entry.lock();
            state
                .get(&commit.id)
                .cloned()
                .ok_or_else(|| CommitflowError::CommitNotFound(commit.to_string()))?
        };
        let provenance = self
            .graph
            .parents(record.seq)
            .into_iter()
            .map(|(_, c)| c)
            .collect();
        Ok(record.info(&commit.repo, provenance))
    }

    /// Global creation sequence of `commit`.
    pub fn commit_seq(&self, commit: &Commit) -> Result<u64> {
        let entry = self.entry(&commit.repo)?;
        let state = entry.lock();
        state
            .get(&commit.id)
            .map(|r| r.seq)
            .ok_or_else(|| CommitflowError::CommitNotFound(commit.to_string()))
    }

    pub fn latest_finished(&self, repo: &str) -> Result<Option<Commit>> {
        let entry = self.entry(repo)?;
        let state = entry.lock();
        Ok(state
            .newest_finished()
            .map(|r| Commit::new(repo, r.id.clone())))
    }

    /// Newest Finished commit of `repo` derived from every one of `origins`
    /// (commit sequences).
    pub(crate) fn latest_derived(&self, repo: &str, origins: &[u64]) -> Result<Option<Commit>> {
        let candidates: Vec<(u64, String)> = {
            let entry = self.entry(repo)?;
            let state = entry.lock();
            state
                .commits
                .iter()
                .rev()
                .filter(|r| r.state == CommitState::Finished)
                .map(|r| (r.seq, r.id.clone()))
                .collect()
        };
        Ok(candidates
            .into_iter()
            .find(|(seq, _)| origins.iter().all(|&o| self.graph.derives_from(*seq, o)))
            .map(|(_, id)| Commit::new(repo, id)))
    }

    /// Finished commits of `repo` in creation order.
    pub(crate) fn finished_commits(&self, repo: &str) -> Result<Vec<(u64, Commit)>> {
        let entry = self.entry(repo)?;
        let state = entry.lock();
        Ok(state
            .commits
            .iter()
            .filter(|r| r.state == CommitState::Finished)
            .map(|r| (r.seq, Commit::new(repo, r.id.clone())))
            .collect())
    }

    /// Non-blocking listing.
    pub fn list_commit_now(&self, request: &ListCommitRequest) -> Result<Vec<CommitInfo>> {
        let repos = self.requested_repos(request);
        let mut out = Vec::new();

        for repo in &repos {
            let entry = self.entry(repo)?;
            let bound = match request.from.iter().find(|c| &c.repo == repo) {
                Some(from) => self.commit_seq(from)?,
                None => 0,
            };

            let records: Vec<CommitRecord> = entry
                .lock()
                .commits
                .iter()
                .filter(|r| r.seq > bound && r.matches(request.commit_type, request.status))
                .cloned()
                .collect();

            for record in records {
                let provenance = self
                    .graph
                    .parents(record.seq)
                    .into_iter()
                    .map(|(_, c)| c)
                    .collect();
                out.push(record.info(repo, provenance));
            }
        }
        Ok(out)
    }

    /// List commits; with `block` set, wait until at least one matches.
    pub async fn list_commit(&self, request: &ListCommitRequest) -> Result<Vec<CommitInfo>> {
        if !request.block {
            return self.list_commit_now(request);
        }

        loop {
            // Subscribe before checking so no event slips in between.
            let mut receivers = Vec::new();
            for repo in self.requested_repos(request) {
                receivers.push(self.entry(&repo)?.events.subscribe());
            }

            let found = self.list_commit_now(request)?;
            if !found.is_empty() || receivers.is_empty() {
                return Ok(found);
            }

            let mut changes = JoinSet::new();
            for mut rx in receivers {
                changes.spawn(async move { rx.changed().await });
            }
            // Either a change or a dropped sender (deleted repo); re-check both ways.
            let _ = changes.join_next().await;
        }
    }

    fn requested_repos(&self, request: &ListCommitRequest) -> Vec<String> {
        if request.repos.is_empty() {
            self.repos
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .cloned()
                .collect()
        } else {
            request.repos.clone()
        }
    }

    // ---- provenance --------------------------------------------------------

    /// Record that `derived` was produced because of `source`.
    ///
    /// The source must be Finished; the check and the insertion happen under
    /// the source repo's lock.
    pub fn add_provenance(&self, source: &Commit, derived: &Commit) -> Result<bool> {
        let derived_seq = self.commit_seq(derived)?;
        let entry = self.entry(&source.repo)?;
        let state = entry.lock();
        let record = state
            .get(&source.id)
            .ok_or_else(|| CommitflowError::CommitNotFound(source.to_string()))?;
        if record.state != CommitState::Finished {
            return Err(CommitflowError::InvalidParent(format!(
                "provenance source {source} is {}",
                record.state
            )));
        }
        self.graph.add_edge(record.seq, derived_seq)
    }

    // ---- notifications -----------------------------------------------------

    pub async fn wait_until_terminal(&self, commit: &Commit) -> Result<CommitState> {
        let seq = self.commit_seq(commit)?;
        self.terminal.subscribe(seq).wait().await
    }

    pub fn subscribe_settled(&self, seq: u64) -> Subscription {
        self.settled.subscribe(seq)
    }

    pub(crate) fn mark_settled(&self, seq: u64, state: CommitState) {
        self.settled.fire(seq, state);
    }

    pub(crate) fn set_trigger_sink(&self, tx: mpsc::UnboundedSender<RuntimeEvent>) {
        *self.trigger.write().unwrap_or_else(PoisonError::into_inner) = Some(tx);
    }

    pub(crate) fn clear_trigger_sink(&self) {
        *self.trigger.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn publish_finished(&self, commit: Commit, seq: u64) {
        let sent = match self
            .trigger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(tx) => tx.send(RuntimeEvent::CommitFinished { commit, seq }).is_ok(),
            None => false,
        };
        if !sent {
            // Nobody evaluates triggers; the commit is settled as it stands.
            self.mark_settled(seq, CommitState::Finished);
        }
    }

    // ---- files -------------------------------------------------------------

    pub fn put_file(&self, commit: &Commit, path: &str, data: &[u8], mode: PutMode) -> Result<()> {
        let path = normalize_path(path)?;
        if path.is_empty() {
            return Err(CommitflowError::InvalidName("empty file path".to_string()));
        }
        let entry = self.entry(&commit.repo)?;
        let mut state = entry.lock();
        open_record(&mut state, commit)?.files.put(path, data, mode);
        Ok(())
    }

    /// Write job output: with `replace_first`, the first write to a path in
    /// this commit discards the parent's content.
    pub(crate) fn put_output(
        &self,
        commit: &Commit,
        path: &str,
        data: &[u8],
        replace_first: bool,
    ) -> Result<()> {
        let path = normalize_path(path)?;
        if path.is_empty() {
            return Err(CommitflowError::InvalidName("empty file path".to_string()));
        }
        let entry = self.entry(&commit.repo)?;
        let mut state = entry.lock();
        let record = open_record(&mut state, commit)?;
        let mode = if replace_first && !record.files.contains(&path) {
            PutMode::Overwrite
        } else {
            PutMode::Append
        };
        record.files.put(path, data, mode);
        Ok(())
    }

    pub fn get_file(&self, commit: &Commit, path: &str, offset: u64, size: u64) -> Result<Vec<u8>> {
        let path = normalize_path(path)?;
        let contents = self.commit_files(commit, FileView::Full)?;
        contents
            .get(&path)
            .map(|data| read_range(data, offset, size))
            .ok_or_else(|| CommitflowError::FileNotFound(format!("{commit}:{path}")))
    }

    pub fn list_file(&self, commit: &Commit, dir: &str) -> Result<Vec<FileInfo>> {
        let dir = normalize_path(dir)?;
        let contents = self.commit_files(commit, FileView::Full)?;
        list_dir(&contents, &dir)
            .map_err(|_| CommitflowError::FileNotFound(format!("{commit}:{dir}")))
    }

    /// Files visible in `commit` under the given view.
    pub fn commit_files(&self, commit: &Commit, view: FileView) -> Result<BTreeMap<String, Vec<u8>>> {
        let entry = self.entry(&commit.repo)?;
        let state = entry.lock();
        let record = state
            .get(&commit.id)
            .ok_or_else(|| CommitflowError::CommitNotFound(commit.to_string()))?;
        Ok(match view {
            FileView::Diff => record.files.diff(),
            FileView::Full => FileTree::resolve(state.chain(&commit.id).into_iter().map(|r| &r.files)),
        })
    }

    // ---- pipelines ---------------------------------------------------------

    /// Register a validated pipeline and create its output repo. Fails with
    /// `DagCycle` if the output already feeds one of the inputs.
    pub(crate) fn register_pipeline(&self, info: PipelineInfo) -> Result<Arc<PipelineInfo>> {
        if self.pipelines.contains(&info.name) {
            return Err(CommitflowError::AlreadyExists(format!("pipeline {}", info.name)));
        }
        for input in &info.inputs {
            if !self.repo_exists(&input.repo) {
                return Err(CommitflowError::RepoNotFound(input.repo.clone()));
            }
        }
        self.pipelines.check_acyclic(&info)?;
        self.create_repo_with_provenance(&info.output_repo, info.input_repos())?;
        match self.pipelines.insert(info) {
            Ok(info) => Ok(info),
            Err(e) => {
                warn!(error = %e, "pipeline registration raced; output repo kept");
                Err(e)
            }
        }
    }
}

fn open_record<'a>(
    state: &'a mut repo::RepoState,
    commit: &Commit,
) -> Result<&'a mut CommitRecord> {
    let record = state
        .get_mut(&commit.id)
        .ok_or_else(|| CommitflowError::CommitNotFound(commit.to_string()))?;
    if record.state != CommitState::Open {
        return Err(CommitflowError::NotOpen(format!("{commit} is {}", record.state)));
    }
    Ok(record)
}
