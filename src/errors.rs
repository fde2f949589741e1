// src/errors.rs

//! Crate-wide error type, kind classification and `Result` alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommitflowError {
    #[error("repo not found: {0}")]
    RepoNotFound(String),

    #[error("commit not found: {0}")]
    CommitNotFound(String),

    #[error("pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid parent: {0}")]
    InvalidParent(String),

    #[error("commit is not open: {0}")]
    NotOpen(String),

    #[error("invalid pipeline manifest: {0}")]
    InvalidManifest(String),

    #[error("repo has dependents: {0}")]
    HasDependents(String),

    #[error("job failed: {0}")]
    JobFailed(String),

    /// A provenance edge would close a cycle. This can only happen through a
    /// bug in the trigger logic and is never retried.
    #[error("provenance cycle detected: {0}")]
    ProvenanceCycle(String),

    #[error("trigger runtime is not running")]
    RuntimeStopped,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in pipeline graph: {0}")]
    DagCycle(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification of [`CommitflowError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidState,
    HasDependents,
    JobFailed,
    Config,
    Internal,
}

impl CommitflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommitflowError::RepoNotFound(_)
            | CommitflowError::CommitNotFound(_)
            | CommitflowError::PipelineNotFound(_)
            | CommitflowError::FileNotFound(_) => ErrorKind::NotFound,
            CommitflowError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            CommitflowError::InvalidName(_)
            | CommitflowError::InvalidParent(_)
            | CommitflowError::NotOpen(_)
            | CommitflowError::InvalidManifest(_) => ErrorKind::InvalidState,
            CommitflowError::HasDependents(_) => ErrorKind::HasDependents,
            CommitflowError::JobFailed(_) => ErrorKind::JobFailed,
            CommitflowError::ConfigError(_)
            | CommitflowError::DagCycle(_)
            | CommitflowError::IoError(_)
            | CommitflowError::TomlError(_) => ErrorKind::Config,
            CommitflowError::ProvenanceCycle(_)
            | CommitflowError::RuntimeStopped
            | CommitflowError::Other(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CommitflowError>;
