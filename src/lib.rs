// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod flush;
pub mod fs;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod provenance;
pub mod service;
pub mod store;
pub mod types;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate};
use crate::service::{Service, ServiceOptions};
use crate::store::{Commit, CommitInfo};
use crate::types::PutMode;

pub use crate::errors::CommitflowError;
pub use crate::service::RuntimeHandle;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - repo and pipeline creation
/// - seeding and flushing
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let options = ServiceOptions {
        worker_count: cfg.config.worker_count,
    };
    let (service, runtime) = Service::start_local(options);

    let outcome = run_flow(&service, &cfg, &args.to_repo).await;

    if let Err(e) = service.shutdown() {
        warn!(error = %e, "trigger runtime already stopped");
    }
    runtime.join().await?;

    let infos = outcome?;
    print_commits(&infos);
    flush::ensure_all_finished(&infos)?;
    Ok(())
}

async fn run_flow(service: &Service, cfg: &ConfigFile, to_repos: &[String]) -> Result<Vec<CommitInfo>> {
    for repo in &cfg.repos {
        service.create_repo(repo)?;
    }
    for manifest in cfg.pipelines_in_order() {
        service.create_pipeline(manifest).await?;
    }

    let seeds = push_seeds(service, cfg)?;
    if seeds.is_empty() {
        info!("no seed data configured; nothing to flush");
        return Ok(Vec::new());
    }
    info!(commits = seeds.len(), "flushing seed commits");

    tokio::select! {
        res = service.flush_commit(&seeds, to_repos) => Ok(res?),
        res = tokio::signal::ctrl_c() => {
            res.context("listening for Ctrl+C")?;
            bail!("interrupted while waiting for derived commits");
        }
    }
}

/// One commit per seeded repo, holding every seed file for that repo.
fn push_seeds(service: &Service, cfg: &ConfigFile) -> Result<Vec<Commit>> {
    let mut open: Vec<Commit> = Vec::new();

    for seed in &cfg.seed {
        let commit = match open.iter().find(|c| c.repo == seed.repo) {
            Some(c) => c.clone(),
            None => {
                let c = service.start_commit(&seed.repo, None)?;
                open.push(c.clone());
                c
            }
        };

        let file = cfg.seed_path(seed);
        let data = std::fs::read(&file)
            .with_context(|| format!("reading seed file {}", file.display()))?;
        debug!(commit = %commit, path = %seed.path, bytes = data.len(), "seeding file");
        service.put_file(&commit, &seed.path, &data, PutMode::Append)?;
    }

    for commit in &open {
        service.finish_commit(commit)?;
    }
    Ok(open)
}

fn print_commits(infos: &[CommitInfo]) {
    println!("{:<16} {:<34} {:<10} {:>10}  PROVENANCE", "REPO", "COMMIT", "STATE", "SIZE");
    for info in infos {
        let provenance = info
            .provenance
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<16} {:<34} {:<10} {:>10}  {}",
            info.commit.repo, info.commit.id, info.state, info.size_bytes, provenance
        );
        if let Some(ref reason) = info.failure {
            println!("    failure: {reason}");
        }
    }
}

/// Simple dry-run output: print repos, pipelines and seeds.
fn print_dry_run(cfg: &ConfigFile) {
    println!("commitflow dry-run");
    println!("  config.worker_count = {}", cfg.config.worker_count);
    println!();

    println!("repos ({}):", cfg.repos.len());
    for repo in &cfg.repos {
        println!("  - {repo}");
    }

    let manifests = cfg.pipelines_in_order();
    println!("pipelines ({}):", manifests.len());
    for manifest in &manifests {
        let spec = &manifest.spec;
        println!("  - {}", manifest.name());
        println!("      cmd: {:?}", spec.transform.cmd);
        if !spec.transform.image.is_empty() {
            println!("      image: {}", spec.transform.image);
        }
        for input in &spec.inputs {
            print!("      input: {} ({:?}", input.repo, input.method);
            if let Some(ref glob) = input.glob {
                print!(", glob {glob}");
            }
            println!(")");
        }
        println!("      parallelism: {:?}", spec.parallelism_spec.strategy);
    }

    if !cfg.seed.is_empty() {
        println!("seeds ({}):", cfg.seed.len());
        for seed in &cfg.seed {
            println!("  - {}:{} <- {}", seed.repo, seed.path, cfg.seed_path(seed).display());
        }
    }

    debug!("dry-run complete (no execution)");
}
