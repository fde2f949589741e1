use std::path::PathBuf;

use commitflow::config::{ConfigFile, ConfigSection, RawConfigFile, SeedSpec};
use commitflow::errors::Result;
use commitflow::pipeline::{InputSpec, PipelineManifest, PipelineSpec};
use commitflow::types::{MethodName, ParallelismStrategy, ShardKey};

/// Builder for `PipelineManifest`.
///
/// ```ignore
/// let m = ManifestBuilder::new("sum").cmd(["sh", "-c", "cat"]).map("data").build();
/// ```
pub struct ManifestBuilder {
    name: String,
    spec: PipelineSpec,
}

impl ManifestBuilder {
    pub fn new(name: &str) -> Self {
        let mut spec = PipelineSpec::default();
        spec.transform.cmd = vec!["true".to_string()];
        Self {
            name: name.to_string(),
            spec,
        }
    }

    pub fn cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.transform.cmd = cmd.into_iter().map(Into::into).collect();
        self
    }

    pub fn image(mut self, image: &str) -> Self {
        self.spec.transform.image = image.to_string();
        self
    }

    pub fn stdin(mut self, line: &str) -> Self {
        self.spec.transform.stdin.push(line.to_string());
        self
    }

    pub fn accept_return_code(mut self, code: i32) -> Self {
        self.spec.transform.accept_return_code.push(code);
        self
    }

    /// Add a direct (map) input.
    pub fn map(self, repo: &str) -> Self {
        self.input(repo, MethodName::Map, ShardKey::Path, None)
    }

    /// Add a reduce input partitioned by `shard_key`.
    pub fn reduce(self, repo: &str, shard_key: ShardKey) -> Self {
        self.input(repo, MethodName::Reduce, shard_key, None)
    }

    pub fn map_glob(self, repo: &str, glob: &str) -> Self {
        self.input(repo, MethodName::Map, ShardKey::Path, Some(glob))
    }

    fn input(mut self, repo: &str, method: MethodName, shard_key: ShardKey, glob: Option<&str>) -> Self {
        self.spec.inputs.push(InputSpec {
            repo: repo.to_string(),
            method,
            shard_key,
            glob: glob.map(str::to_string),
        });
        self
    }

    pub fn constant(mut self, n: u64) -> Self {
        self.spec.parallelism_spec.strategy = ParallelismStrategy::Constant;
        self.spec.parallelism_spec.constant = Some(n);
        self
    }

    pub fn coefficient(mut self, c: f64) -> Self {
        self.spec.parallelism_spec.strategy = ParallelismStrategy::Coefficient;
        self.spec.parallelism_spec.coefficient = Some(c);
        self
    }

    pub fn spec(self) -> PipelineSpec {
        self.spec
    }

    pub fn build(self) -> PipelineManifest {
        PipelineManifest::new(self.name, self.spec)
    }
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                ..RawConfigFile::default()
            },
        }
    }

    pub fn worker_count(mut self, n: usize) -> Self {
        self.config.config.worker_count = n;
        self
    }

    pub fn with_repo(mut self, name: &str) -> Self {
        self.config.repos.push(name.to_string());
        self
    }

    pub fn with_pipeline(mut self, manifest: ManifestBuilder) -> Self {
        let manifest = manifest.build();
        self.config
            .pipeline
            .insert(manifest.name().to_string(), manifest.spec);
        self
    }

    pub fn with_seed(mut self, repo: &str, path: &str, file: impl Into<PathBuf>) -> Self {
        self.config.seed.push(SeedSpec {
            repo: repo.to_string(),
            path: path.to_string(),
            file: file.into(),
        });
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
