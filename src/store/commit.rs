// src/store/commit.rs

//! Commit identity, snapshots and the internal per-commit record.

use std::fmt;
use std::time::SystemTime;

use crate::store::files::FileTree;
use crate::types::{CommitState, CommitStatus, CommitType};

/// A commit reference: owning repo plus content-addressed id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Commit {
    pub repo: String,
    pub id: String,
}

impl Commit {
    pub fn new(repo: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repo, self.id)
    }
}

/// Derive the id of a new commit.
///
/// The id addresses the commit's position in history: repo, parent and the
/// global creation sequence, hashed with blake3 and truncated to 32 hex chars.
pub fn commit_id(repo: &str, parent: Option<&str>, seq: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(repo.as_bytes());
    hasher.update(&[0]);
    hasher.update(parent.unwrap_or_default().as_bytes());
    hasher.update(&[0]);
    hasher.update(&seq.to_le_bytes());
    hasher.finalize().to_hex().as_str()[..32].to_string()
}

/// Read-only snapshot of a commit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    pub commit: Commit,
    pub parent: Option<Commit>,
    pub state: CommitState,
    /// Global creation sequence; orders commits across repos.
    pub sequence: u64,
    pub started: SystemTime,
    pub finished: Option<SystemTime>,
    /// Bytes written by this commit itself.
    pub size_bytes: u64,
    /// Direct provenance parents: the input commits that caused this one.
    pub provenance: Vec<Commit>,
    /// Why the commit was cancelled, if it was.
    pub failure: Option<String>,
}

impl CommitInfo {
    pub fn is_failed(&self) -> bool {
        self.state == CommitState::Cancelled
    }
}

/// Mutable record of a commit, owned by its repo's state.
#[derive(Debug, Clone)]
pub(crate) struct CommitRecord {
    pub id: String,
    pub parent: Option<String>,
    pub seq: u64,
    pub state: CommitState,
    pub started: SystemTime,
    pub finished: Option<SystemTime>,
    pub failure: Option<String>,
    pub files: FileTree,
}

impl CommitRecord {
    pub fn new(id: String, parent: Option<String>, seq: u64) -> Self {
        Self {
            id,
            parent,
            seq,
            state: CommitState::Open,
            started: SystemTime::now(),
            finished: None,
            failure: None,
            files: FileTree::default(),
        }
    }

    pub fn matches(&self, commit_type: CommitType, status: CommitStatus) -> bool {
        commit_type.matches(self.state) && status.matches(self.state)
    }

    pub fn info(&self, repo: &str, provenance: Vec<Commit>) -> CommitInfo {
        CommitInfo {
            commit: Commit::new(repo, self.id.clone()),
            parent: self.parent.as_ref().map(|p| Commit::new(repo, p.clone())),
            state: self.state,
            sequence: self.seq,
            started: self.started,
            finished: self.finished,
            size_bytes: self.files.size_bytes(),
            provenance,
            failure: self.failure.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_and_distinct() {
        let a = commit_id("data", None, 1);
        assert_eq!(a, commit_id("data", None, 1));
        assert_eq!(a.len(), 32);
        assert_ne!(a, commit_id("data", None, 2));
        assert_ne!(a, commit_id("sum", None, 1));
        assert_ne!(a, commit_id("data", Some("abc"), 1));
    }

    #[test]
    fn display_is_repo_slash_id() {
        assert_eq!(Commit::new("data", "abc").to_string(), "data/abc");
    }
}
