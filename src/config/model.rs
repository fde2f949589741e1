// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::pipeline::{PipelineManifest, PipelineSpec};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// repos = ["data"]
///
/// [config]
/// worker_count = 4
///
/// [pipeline.sum]
/// transform = { cmd = ["sh", "-c", "cat data/* > out/total"] }
/// inputs = [{ repo = "data" }]
///
/// [[seed]]
/// repo = "data"
/// path = "sales"
/// file = "set1.txt"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Plain repos created before any pipeline.
    #[serde(default)]
    pub repos: Vec<String>,

    /// All pipelines from `[pipeline.<name>]`, keyed by pipeline name.
    #[serde(default)]
    pub pipeline: BTreeMap<String, PipelineSpec>,

    /// Initial data pushed by the CLI.
    #[serde(default)]
    pub seed: Vec<SeedSpec>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Jobs allowed to run at once; also the base of COEFFICIENT parallelism.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

fn default_worker_count() -> usize {
    4
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
        }
    }
}

/// `[[seed]]` entry: copy `file` into `repo` at `path`.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedSpec {
    pub repo: String,
    pub path: String,
    /// Relative paths are resolved against the config file's directory.
    pub file: PathBuf,
}

/// A validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>`, so holders can rely on
/// every pipeline input being declared and the pipeline graph being acyclic.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub repos: Vec<String>,
    pub pipeline: BTreeMap<String, PipelineSpec>,
    pub seed: Vec<SeedSpec>,
    /// Pipeline names, inputs before the pipelines reading them.
    order: Vec<String>,
    base_dir: PathBuf,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile, order: Vec<String>) -> Self {
        Self {
            config: raw.config,
            repos: raw.repos,
            pipeline: raw.pipeline,
            seed: raw.seed,
            order,
            base_dir: PathBuf::from("."),
        }
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Pipeline manifests in creation order.
    pub fn pipelines_in_order(&self) -> Vec<PipelineManifest> {
        self.order
            .iter()
            .filter_map(|name| {
                self.pipeline
                    .get(name)
                    .map(|spec| PipelineManifest::new(name.clone(), spec.clone()))
            })
            .collect()
    }

    pub fn seed_path(&self, seed: &SeedSpec) -> PathBuf {
        resolve(&self.base_dir, &seed.file)
    }
}

fn resolve(base: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        base.join(file)
    }
}
