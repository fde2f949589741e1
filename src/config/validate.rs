// src/config/validate.rs

use std::collections::BTreeSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{CommitflowError, Result};
use crate::pipeline::{PipelineInfo, PipelineManifest};
use crate::store::validate_repo_name;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = CommitflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let order = validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw, order))
    }
}

/// Validate and return pipeline names in creation order.
fn validate_raw_config(cfg: &RawConfigFile) -> Result<Vec<String>> {
    ensure_not_empty(cfg)?;
    validate_global_config(cfg)?;
    validate_repos(cfg)?;
    validate_pipelines(cfg)?;
    validate_seeds(cfg)?;
    pipeline_order(cfg)
}

fn ensure_not_empty(cfg: &RawConfigFile) -> Result<()> {
    if cfg.repos.is_empty() && cfg.pipeline.is_empty() {
        return Err(CommitflowError::ConfigError(
            "config must declare at least one repo or [pipeline.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.worker_count == 0 {
        return Err(CommitflowError::ConfigError(
            "[config].worker_count must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_repos(cfg: &RawConfigFile) -> Result<()> {
    let mut seen = BTreeSet::new();
    for repo in &cfg.repos {
        validate_repo_name(repo).map_err(|e| CommitflowError::ConfigError(e.to_string()))?;
        if !seen.insert(repo.as_str()) {
            return Err(CommitflowError::ConfigError(format!(
                "repo '{repo}' is declared twice"
            )));
        }
        if cfg.pipeline.contains_key(repo) {
            return Err(CommitflowError::ConfigError(format!(
                "repo '{repo}' clashes with the output repo of pipeline '{repo}'"
            )));
        }
    }
    Ok(())
}

fn validate_pipelines(cfg: &RawConfigFile) -> Result<()> {
    for (name, spec) in &cfg.pipeline {
        let manifest = PipelineManifest::new(name.clone(), spec.clone());
        let info = PipelineInfo::try_from(manifest)
            .map_err(|e| CommitflowError::ConfigError(e.to_string()))?;

        for input in &info.inputs {
            let declared =
                cfg.repos.contains(&input.repo) || cfg.pipeline.contains_key(&input.repo);
            if !declared {
                return Err(CommitflowError::ConfigError(format!(
                    "pipeline '{name}' has unknown input repo '{}'",
                    input.repo
                )));
            }
        }
    }
    Ok(())
}

fn validate_seeds(cfg: &RawConfigFile) -> Result<()> {
    for seed in &cfg.seed {
        if !cfg.repos.contains(&seed.repo) {
            return Err(CommitflowError::ConfigError(format!(
                "seed targets '{}', which is not a declared repo",
                seed.repo
            )));
        }
    }
    Ok(())
}

/// Topological order of the pipelines.
///
/// Edge direction: input pipeline -> reading pipeline. For
///   [pipeline.B]
///   inputs = [{ repo = "A" }]
/// with `A` itself a pipeline, we add edge A -> B.
fn pipeline_order(cfg: &RawConfigFile) -> Result<Vec<String>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.pipeline.keys() {
        graph.add_node(name.as_str());
    }
    for (name, spec) in &cfg.pipeline {
        for input in &spec.inputs {
            if cfg.pipeline.contains_key(&input.repo) {
                graph.add_edge(input.repo.as_str(), name.as_str(), ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(CommitflowError::DagCycle(format!(
            "cycle detected in pipeline graph involving pipeline '{}'",
            cycle.node_id()
        ))),
    }
}
