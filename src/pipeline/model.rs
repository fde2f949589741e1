// src/pipeline/model.rs

//! Pipeline manifest as read from TOML.
//!
//! ```toml
//! [pipeline]
//! name = "wordcount_map"
//!
//! [transform]
//! image = "wordcount-map:latest"
//! cmd = ["/map", "wordcount_input", "out"]
//!
//! [[inputs]]
//! repo = "wordcount_input"
//! method = "reduce"
//!
//! [parallelism_spec]
//! strategy = "CONSTANT"
//! constant = 1
//! ```
//!
//! The same body (everything but `[pipeline]`) is used for
//! `[pipeline.<name>]` tables in the config file.

use serde::Deserialize;

use crate::errors::Result;
use crate::types::{MethodName, ParallelismStrategy, ShardKey};

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineManifest {
    pub pipeline: PipelineName,

    #[serde(flatten)]
    pub spec: PipelineSpec,
}

impl PipelineManifest {
    pub fn new(name: impl Into<String>, spec: PipelineSpec) -> Self {
        Self {
            pipeline: PipelineName { name: name.into() },
            spec,
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn name(&self) -> &str {
        &self.pipeline.name
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineName {
    pub name: String,
}

/// Everything a pipeline declares besides its name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineSpec {
    pub transform: Transform,

    #[serde(default)]
    pub inputs: Vec<InputSpec>,

    #[serde(default)]
    pub parallelism_spec: ParallelismSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Transform {
    /// Informational only; the bundled executor runs `cmd` directly.
    #[serde(default)]
    pub image: String,

    pub cmd: Vec<String>,

    /// Lines written to the job's stdin.
    #[serde(default)]
    pub stdin: Vec<String>,

    /// Non-zero exit codes that still count as success.
    #[serde(default)]
    pub accept_return_code: Vec<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputSpec {
    pub repo: String,

    #[serde(default)]
    pub method: MethodName,

    /// Only meaningful for `method = "reduce"`.
    #[serde(default)]
    pub shard_key: ShardKey,

    #[serde(default)]
    pub glob: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParallelismSpec {
    #[serde(default)]
    pub strategy: ParallelismStrategy,

    #[serde(default)]
    pub constant: Option<u64>,

    #[serde(default)]
    pub coefficient: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_classic_layout() {
        let manifest = PipelineManifest::from_toml(
            r#"
            [pipeline]
            name = "wordcount_map"

            [transform]
            image = "wordcount-map:latest"
            cmd = ["/map", "wordcount_input", "out"]
            accept_return_code = [4, 5]

            [[inputs]]
            repo = "wordcount_input"
            method = "reduce"
            shard_key = "top_dir"
            glob = "**/*.txt"

            [parallelism_spec]
            strategy = "COEFFICIENT"
            coefficient = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(manifest.name(), "wordcount_map");
        assert_eq!(manifest.spec.transform.accept_return_code, vec![4, 5]);
        let input = &manifest.spec.inputs[0];
        assert_eq!(input.method, MethodName::Reduce);
        assert_eq!(input.shard_key, ShardKey::TopDir);
        assert_eq!(input.glob.as_deref(), Some("**/*.txt"));
        assert_eq!(
            manifest.spec.parallelism_spec.strategy,
            ParallelismStrategy::Coefficient
        );
    }

    #[test]
    fn defaults_apply() {
        let manifest = PipelineManifest::from_toml(
            r#"
            [pipeline]
            name = "sum"
            [transform]
            cmd = ["sum"]
            [[inputs]]
            repo = "data"
            "#,
        )
        .unwrap();

        assert_eq!(manifest.spec.inputs[0].method, MethodName::Map);
        assert_eq!(manifest.spec.parallelism_spec.constant, None);
    }
}
