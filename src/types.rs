use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Lifecycle state of a commit.
///
/// `Finished` and `Cancelled` are terminal; a commit never leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitState {
    Open,
    Finished,
    Cancelled,
}

impl CommitState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CommitState::Open)
    }
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommitState::Open => "open",
            CommitState::Finished => "finished",
            CommitState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Which commits `list_commit` returns by lifecycle stage.
///
/// - `Read`: terminal commits (their contents can be read).
/// - `Write`: commits still open for writing.
/// - `Any`: both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitType {
    #[default]
    Read,
    Write,
    Any,
}

impl CommitType {
    pub fn matches(self, state: CommitState) -> bool {
        match self {
            CommitType::Read => state.is_terminal(),
            CommitType::Write => state == CommitState::Open,
            CommitType::Any => true,
        }
    }
}

impl FromStr for CommitType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "read" => Ok(CommitType::Read),
            "write" => Ok(CommitType::Write),
            "any" => Ok(CommitType::Any),
            other => Err(format!(
                "invalid commit type: {other} (expected \"read\", \"write\" or \"any\")"
            )),
        }
    }
}

/// Whether `list_commit` hides cancelled commits (`Normal`) or not (`All`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitStatus {
    #[default]
    Normal,
    All,
}

impl CommitStatus {
    pub fn matches(self, state: CommitState) -> bool {
        match self {
            CommitStatus::Normal => state != CommitState::Cancelled,
            CommitStatus::All => true,
        }
    }
}

impl FromStr for CommitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Ok(CommitStatus::Normal),
            "all" => Ok(CommitStatus::All),
            other => Err(format!(
                "invalid commit status: {other} (expected \"normal\" or \"all\")"
            )),
        }
    }
}

/// How `put_file` combines new data with what the file already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PutMode {
    #[default]
    Append,
    Overwrite,
}

impl FromStr for PutMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "append" => Ok(PutMode::Append),
            "overwrite" => Ok(PutMode::Overwrite),
            other => Err(format!(
                "invalid put mode: {other} (expected \"append\" or \"overwrite\")"
            )),
        }
    }
}

/// Parallelism strategy as written in a manifest (`"CONSTANT"` / `"COEFFICIENT"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParallelismStrategy {
    #[default]
    Constant,
    Coefficient,
}

/// Input method name as written in a manifest (`"map"` / `"reduce"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodName {
    #[default]
    Map,
    Reduce,
}

/// Which part of a file path decides its reduce partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardKey {
    /// The whole path.
    #[default]
    Path,
    /// The first path component, so a directory stays in one partition.
    TopDir,
}

impl ShardKey {
    pub fn key_of<'a>(self, path: &'a str) -> &'a str {
        match self {
            ShardKey::Path => path,
            ShardKey::TopDir => path.split('/').next().unwrap_or(path),
        }
    }
}
