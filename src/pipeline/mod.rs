// src/pipeline/mod.rs

//! Pipeline definitions.
//!
//! - [`model`]: the TOML manifest as written by users.
//! - [`PipelineInfo`]: the validated form the trigger works with.
//! - [`partition`]: sharding of input data across jobs.
//! - [`registry`]: the set of live pipelines.

use std::collections::BTreeSet;

use globset::{Glob, GlobMatcher};

use crate::errors::{CommitflowError, Result};
use crate::store::FileView;
use crate::store::validate_repo_name;
use crate::types::{MethodName, ParallelismStrategy, ShardKey};

pub mod model;
pub mod partition;
pub mod registry;

pub use model::{InputSpec, ParallelismSpec, PipelineManifest, PipelineSpec, Transform};
pub use partition::{InputSnapshot, JobInput, ShardIndex, WorkUnit, plan_work};
pub use registry::PipelineRegistry;

/// How a pipeline consumes one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMethod {
    /// Jobs see the input commit's own writes, sharded by path.
    Direct,
    /// Jobs see the full input contents, partitioned by `shard_key`.
    Reduce { shard_key: ShardKey },
}

impl InputMethod {
    pub fn view(self) -> FileView {
        match self {
            InputMethod::Direct => FileView::Diff,
            InputMethod::Reduce { .. } => FileView::Full,
        }
    }

    pub fn shard_key(self) -> ShardKey {
        match self {
            InputMethod::Direct => ShardKey::Path,
            InputMethod::Reduce { shard_key } => shard_key,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub repo: String,
    pub method: InputMethod,
    pub glob: Option<GlobMatcher>,
}

impl PipelineInput {
    pub fn accepts(&self, path: &str) -> bool {
        self.glob.as_ref().is_none_or(|g| g.is_match(path))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Parallelism {
    Constant(u64),
    Coefficient(f64),
}

/// How job output is combined with the output commit's parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Append to whatever the output repo already holds.
    Append,
    /// The first write to a path in a commit replaces it; later writes append.
    Replace,
}

/// A validated pipeline.
#[derive(Debug, Clone)]
pub struct PipelineInfo {
    pub name: String,
    pub transform: Transform,
    pub inputs: Vec<PipelineInput>,
    pub parallelism: Parallelism,
    /// Always the pipeline's own name.
    pub output_repo: String,
}

impl PipelineInfo {
    /// Number of shards for one trigger, never less than one.
    pub fn shard_count(&self, worker_count: usize) -> u64 {
        match self.parallelism {
            Parallelism::Constant(n) => n.max(1),
            Parallelism::Coefficient(c) => {
                let shards = (c * worker_count as f64).ceil();
                if shards.is_finite() && shards >= 1.0 {
                    shards as u64
                } else {
                    1
                }
            }
        }
    }

    pub fn output_mode(&self) -> OutputMode {
        let all_direct = !self.inputs.is_empty()
            && self.inputs.iter().all(|i| i.method == InputMethod::Direct);
        if all_direct {
            OutputMode::Append
        } else {
            OutputMode::Replace
        }
    }

    pub fn input_repos(&self) -> Vec<String> {
        self.inputs.iter().map(|i| i.repo.clone()).collect()
    }

    pub fn reads(&self, repo: &str) -> bool {
        self.inputs.iter().any(|i| i.repo == repo)
    }
}

impl TryFrom<PipelineManifest> for PipelineInfo {
    type Error = CommitflowError;

    fn try_from(manifest: PipelineManifest) -> std::result::Result<Self, Self::Error> {
        let name = manifest.pipeline.name;
        validate_repo_name(&name)
            .map_err(|e| CommitflowError::InvalidManifest(format!("pipeline '{name}': {e}")))?;

        let spec = manifest.spec;
        if spec.transform.cmd.is_empty() {
            return Err(CommitflowError::InvalidManifest(format!(
                "pipeline '{name}': transform.cmd must not be empty"
            )));
        }

        let mut seen = BTreeSet::new();
        let mut inputs = Vec::with_capacity(spec.inputs.len());
        for input in spec.inputs {
            inputs.push(validate_input(&name, input, &mut seen)?);
        }

        let parallelism = validate_parallelism(&name, &spec.parallelism_spec)?;

        Ok(PipelineInfo {
            output_repo: name.clone(),
            name,
            transform: spec.transform,
            inputs,
            parallelism,
        })
    }
}

fn validate_input(
    pipeline: &str,
    input: InputSpec,
    seen: &mut BTreeSet<String>,
) -> Result<PipelineInput> {
    validate_repo_name(&input.repo)
        .map_err(|e| CommitflowError::InvalidManifest(format!("pipeline '{pipeline}': {e}")))?;

    if input.repo == pipeline {
        return Err(CommitflowError::InvalidManifest(format!(
            "pipeline '{pipeline}' cannot read its own output"
        )));
    }
    if !seen.insert(input.repo.clone()) {
        return Err(CommitflowError::InvalidManifest(format!(
            "pipeline '{pipeline}' lists input '{}' twice",
            input.repo
        )));
    }

    let glob = match input.glob.as_deref() {
        None => None,
        Some(pattern) => {
            let glob = Glob::new(pattern).map_err(|e| {
                CommitflowError::InvalidManifest(format!(
                    "pipeline '{pipeline}': invalid glob '{pattern}': {e}"
                ))
            })?;
            Some(glob.compile_matcher())
        }
    };

    let method = match input.method {
        MethodName::Map => InputMethod::Direct,
        MethodName::Reduce => InputMethod::Reduce {
            shard_key: input.shard_key,
        },
    };

    Ok(PipelineInput {
        repo: input.repo,
        method,
        glob,
    })
}

fn validate_parallelism(pipeline: &str, spec: &ParallelismSpec) -> Result<Parallelism> {
    match spec.strategy {
        ParallelismStrategy::Constant => match spec.constant.unwrap_or(1) {
            0 => Err(CommitflowError::InvalidManifest(format!(
                "pipeline '{pipeline}': parallelism constant must be >= 1"
            ))),
            n => Ok(Parallelism::Constant(n)),
        },
        ParallelismStrategy::Coefficient => match spec.coefficient {
            Some(c) if c.is_finite() && c > 0.0 => Ok(Parallelism::Coefficient(c)),
            _ => Err(CommitflowError::InvalidManifest(format!(
                "pipeline '{pipeline}': COEFFICIENT strategy needs a positive coefficient"
            ))),
        },
    }
}
