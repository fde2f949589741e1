// src/pipeline/registry.rs

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use petgraph::algo::has_path_connecting;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{CommitflowError, Result};
use crate::pipeline::PipelineInfo;

/// Live pipelines, keyed by name.
#[derive(Debug, Default)]
pub struct PipelineRegistry {
    pipelines: RwLock<BTreeMap<String, Arc<PipelineInfo>>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, info: PipelineInfo) -> Result<Arc<PipelineInfo>> {
        let mut pipelines = self.pipelines.write().unwrap_or_else(PoisonError::into_inner);
        if pipelines.contains_key(&info.name) {
            return Err(CommitflowError::AlreadyExists(format!("pipeline {}", info.name)));
        }
        let info = Arc::new(info);
        pipelines.insert(info.name.clone(), Arc::clone(&info));
        Ok(info)
    }

    pub fn remove(&self, name: &str) -> Result<Arc<PipelineInfo>> {
        self.pipelines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| CommitflowError::PipelineNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Result<Arc<PipelineInfo>> {
        self.pipelines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| CommitflowError::PipelineNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pipelines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// All pipelines, sorted by name.
    pub fn list(&self) -> Vec<Arc<PipelineInfo>> {
        self.pipelines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Pipelines with `repo` among their inputs, sorted by name.
    pub fn subscribed_to(&self, repo: &str) -> Vec<Arc<PipelineInfo>> {
        self.pipelines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|p| p.reads(repo))
            .cloned()
            .collect()
    }

    /// Whether data written to `from` can reach `to` through live pipelines.
    /// A repo always feeds itself.
    pub fn feeds(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        let pipelines = self.pipelines.read().unwrap_or_else(PoisonError::into_inner);
        let graph = repo_graph(pipelines.values().map(Arc::as_ref));
        graph.contains_node(from)
            && graph.contains_node(to)
            && has_path_connecting(&graph, from, to, None)
    }

    /// Reject `info` if its output already feeds one of its inputs.
    pub fn check_acyclic(&self, info: &PipelineInfo) -> Result<()> {
        match info
            .inputs
            .iter()
            .find(|input| self.feeds(&info.output_repo, &input.repo))
        {
            Some(input) => Err(CommitflowError::DagCycle(format!(
                "pipeline {} would consume its own output through {}",
                info.name, input.repo
            ))),
            None => Ok(()),
        }
    }

    /// Drop every pipeline writing into or reading from `repo`.
    pub fn remove_touching(&self, repo: &str) -> Vec<String> {
        let mut pipelines = self.pipelines.write().unwrap_or_else(PoisonError::into_inner);
        let doomed: Vec<String> = pipelines
            .values()
            .filter(|p| p.output_repo == repo || p.reads(repo))
            .map(|p| p.name.clone())
            .collect();
        for name in &doomed {
            pipelines.remove(name);
        }
        doomed
    }
}

/// Repo-level graph: an edge from every input repo to the pipeline's output.
fn repo_graph<'a>(pipelines: impl Iterator<Item = &'a PipelineInfo>) -> DiGraphMap<&'a str, ()> {
    let mut graph = DiGraphMap::new();
    for pipeline in pipelines {
        for input in &pipeline.inputs {
            graph.add_edge(input.repo.as_str(), pipeline.output_repo.as_str(), ());
        }
    }
    graph
}
