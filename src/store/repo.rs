// src/store/repo.rs

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::SystemTime;

use regex::Regex;
use tokio::sync::watch;

use crate::errors::{CommitflowError, Result};
use crate::store::commit::CommitRecord;

/// Snapshot of a repo.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoInfo {
    pub repo: String,
    pub created: SystemTime,
    pub size_bytes: u64,
    /// Input repos of the pipeline writing into this repo.
    pub provenance: Vec<String>,
}

#[derive(Debug, Default)]
pub(crate) struct RepoState {
    /// Commits in creation order.
    pub commits: Vec<CommitRecord>,
    pub index: HashMap<String, usize>,
    pub deleted: bool,
}

impl RepoState {
    pub fn get(&self, id: &str) -> Option<&CommitRecord> {
        self.index.get(id).map(|&i| &self.commits[i])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut CommitRecord> {
        self.index.get(id).map(|&i| &mut self.commits[i])
    }

    pub fn push(&mut self, record: CommitRecord) {
        self.index.insert(record.id.clone(), self.commits.len());
        self.commits.push(record);
    }

    pub fn newest_finished(&self) -> Option<&CommitRecord> {
        self.commits
            .iter()
            .rev()
            .find(|c| c.state == crate::types::CommitState::Finished)
    }

    /// `id` and its parents, oldest first.
    pub fn chain(&self, id: &str) -> Vec<&CommitRecord> {
        let mut chain = Vec::new();
        let mut next = self.get(id);
        while let Some(record) = next {
            chain.push(record);
            next = record.parent.as_deref().and_then(|p| self.get(p));
        }
        chain.reverse();
        chain
    }
}

#[derive(Debug)]
pub(crate) struct RepoEntry {
    pub name: String,
    pub created: SystemTime,
    pub provenance: Vec<String>,
    state: Mutex<RepoState>,
    /// Bumped on every commit event so blocked listers can re-check.
    pub events: watch::Sender<u64>,
}

impl RepoEntry {
    pub fn new(name: String, provenance: Vec<String>) -> Self {
        let (events, _) = watch::channel(0);
        Self {
            name,
            created: SystemTime::now(),
            provenance,
            state: Mutex::new(RepoState::default()),
            events,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, RepoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bump(&self) {
        self.events.send_modify(|v| *v = v.wrapping_add(1));
    }

    pub fn info(&self) -> RepoInfo {
        let size_bytes = self.lock().commits.iter().map(|c| c.files.size_bytes()).sum();
        RepoInfo {
            repo: self.name.clone(),
            created: self.created,
            size_bytes,
            provenance: self.provenance.clone(),
        }
    }
}

fn name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").ok())
        .as_ref()
}

pub fn validate_repo_name(name: &str) -> Result<()> {
    let valid = match name_pattern() {
        Some(pattern) => pattern.is_match(name),
        None => return Err(CommitflowError::Other(anyhow::anyhow!("repo name pattern failed to compile"))),
    };
    if valid {
        Ok(())
    } else {
        Err(CommitflowError::InvalidName(format!(
            "repo name '{name}' must match [a-zA-Z0-9_-]+"
        )))
    }
}
