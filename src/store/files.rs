// src/store/files.rs

//! Minimal file data carried by commits.
//!
//! Each commit stores only its own writes (a [`FileTree`] of deltas). The
//! full contents of a commit are resolved by folding the deltas of its
//! parent chain, oldest first.

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{CommitflowError, Result};
use crate::types::PutMode;

/// Writes made to one path within one commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FileDelta {
    /// Discard whatever the parent chain held for this path.
    pub truncate: bool,
    pub data: Vec<u8>,
}

/// The writes of a single commit.
#[derive(Debug, Clone, Default)]
pub(crate) struct FileTree {
    deltas: BTreeMap<String, FileDelta>,
}

impl FileTree {
    pub fn put(&mut self, path: String, data: &[u8], mode: PutMode) {
        let delta = self.deltas.entry(path).or_default();
        if mode == PutMode::Overwrite {
            delta.truncate = true;
            delta.data.clear();
        }
        delta.data.extend_from_slice(data);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.deltas.contains_key(path)
    }

    pub fn size_bytes(&self) -> u64 {
        self.deltas.values().map(|d| d.data.len() as u64).sum()
    }

    /// Only the bytes written by this commit.
    pub fn diff(&self) -> BTreeMap<String, Vec<u8>> {
        self.deltas
            .iter()
            .map(|(path, delta)| (path.clone(), delta.data.clone()))
            .collect()
    }

    /// Fold a chain of trees, oldest first, into full contents.
    pub fn resolve<'a>(chain: impl IntoIterator<Item = &'a FileTree>) -> BTreeMap<String, Vec<u8>> {
        let mut contents: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for tree in chain {
            for (path, delta) in &tree.deltas {
                let file = contents.entry(path.clone()).or_default();
                if delta.truncate {
                    file.clear();
                }
                file.extend_from_slice(&delta.data);
            }
        }
        contents
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Dir,
}

/// Metadata about one entry of a commit's file tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub file_type: FileType,
    pub size_bytes: u64,
    /// blake3 hex digest of the content; `None` for directories.
    pub hash: Option<String>,
}

/// Which files of an input commit a job sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileView {
    /// Only what the commit itself wrote.
    Diff,
    /// Everything visible at the commit.
    Full,
}

/// Normalize a user supplied path to `a/b/c` form.
pub(crate) fn normalize_path(path: &str) -> Result<String> {
    let parts: Vec<&str> = path
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.iter().any(|p| *p == "..") {
        return Err(CommitflowError::InvalidName(format!(
            "path must not contain '..': {path}"
        )));
    }
    Ok(parts.join("/"))
}

/// Entries directly under `dir` (empty string = root).
pub(crate) fn list_dir(contents: &BTreeMap<String, Vec<u8>>, dir: &str) -> Result<Vec<FileInfo>> {
    let prefix = if dir.is_empty() {
        String::new()
    } else {
        format!("{dir}/")
    };

    let mut files = Vec::new();
    let mut dirs: BTreeMap<String, u64> = BTreeMap::new();
    let mut seen_any = dir.is_empty();

    for (path, data) in contents.range(prefix.clone()..) {
        let Some(rest) = path.strip_prefix(&prefix) else {
            break;
        };
        seen_any = true;
        match rest.split_once('/') {
            None => files.push(FileInfo {
                path: path.clone(),
                file_type: FileType::File,
                size_bytes: data.len() as u64,
                hash: Some(blake3::hash(data).to_hex().to_string()),
            }),
            Some((child, _)) => {
                *dirs.entry(format!("{prefix}{child}")).or_default() += data.len() as u64;
            }
        }
    }

    if !seen_any {
        return Err(CommitflowError::FileNotFound(dir.to_string()));
    }

    let file_paths: BTreeSet<&str> = files.iter().map(|f| f.path.as_str()).collect();
    let mut entries: Vec<FileInfo> = dirs
        .into_iter()
        .filter(|(path, _)| !file_paths.contains(path.as_str()))
        .map(|(path, size_bytes)| FileInfo {
            path,
            file_type: FileType::Dir,
            size_bytes,
            hash: None,
        })
        .collect();
    entries.extend(files);
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Slice `data` from `offset`; `size == 0` reads to the end.
pub(crate) fn read_range(data: &[u8], offset: u64, size: u64) -> Vec<u8> {
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
    let end = if size == 0 {
        data.len()
    } else {
        let size = usize::try_from(size).unwrap_or(usize::MAX);
        start.saturating_add(size).min(data.len())
    };
    data[start..end].to_vec()
}
