// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `commitflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "commitflow",
    version,
    about = "Push data through a pipeline graph and wait for every derived commit.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Commitflow.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Commitflow.toml")]
    pub config: String,

    /// Only print commits of these repos (repeatable). The whole closure is
    /// still awaited.
    #[arg(long = "to-repo", value_name = "NAME")]
    pub to_repo: Vec<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `COMMITFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the topology, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
