// src/exec/job_runner.rs

//! Individual job process runner.
//!
//! A job runs in a fresh temporary workspace:
//!
//! - every input file is written to `<workspace>/<repo>/<path>`,
//! - `<workspace>/out` is created empty,
//! - `cmd` runs with the workspace as working directory and `PFS_ROOT`
//!   pointing at it, with `stdin` lines piped in,
//! - everything under `out/` becomes the job's output.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::engine::{JobOutcome, OutputFile, RuntimeEvent, ScheduledJob};
use crate::fs::{FileSystem, collect_files, write_files};

/// Run one job and report its completion to the runtime.
///
/// Setup errors are reported as a failed job with exit code -1.
pub async fn run_job(
    job: ScheduledJob,
    fs: &dyn FileSystem,
    runtime_tx: &mpsc::UnboundedSender<RuntimeEvent>,
) {
    let id = job.id;
    let (outcome, outputs) = match run_job_inner(&job, fs).await {
        Ok(result) => result,
        Err(err) => {
            error!(job = id, pipeline = %job.pipeline, error = %format!("{err:#}"), "job execution error");
            (JobOutcome::Failed(-1), Vec::new())
        }
    };

    if runtime_tx
        .send(RuntimeEvent::JobCompleted {
            job: id,
            outcome,
            outputs,
        })
        .is_err()
    {
        debug!(job = id, "runtime gone; dropping job completion");
    }
}

async fn run_job_inner(
    job: &ScheduledJob,
    fs: &dyn FileSystem,
) -> Result<(JobOutcome, Vec<OutputFile>)> {
    let Some((program, args)) = job.transform.cmd.split_first() else {
        bail!("pipeline '{}' has an empty cmd", job.pipeline);
    };

    let workspace = tempfile::Builder::new()
        .prefix(&format!("commitflow-{}-", job.pipeline))
        .tempdir()
        .context("creating job workspace")?;
    let root = workspace.path();
    prepare_workspace(job, fs, root)?;

    info!(
        job = job.id,
        pipeline = %job.pipeline,
        shard = job.shard.index,
        shards = job.shard.count,
        cmd = ?job.transform.cmd,
        "starting job process"
    );

    let mut child = Command::new(program)
        .args(args)
        .current_dir(root)
        .env("PFS_ROOT", root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning process for pipeline '{}'", job.pipeline))?;

    // Consume output so pipe buffers don't fill; log at debug.
    if let Some(stdout) = child.stdout.take() {
        log_lines(job.id, "stdout", stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        log_lines(job.id, "stderr", stderr);
    }

    if let Some(stdin) = child.stdin.take() {
        if let Err(e) = feed_stdin(stdin, &job.transform.stdin).await {
            debug!(job = job.id, error = %e, "process closed stdin early");
        }
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of pipeline '{}'", job.pipeline))?;
    let code = status.code().unwrap_or(-1);

    info!(
        job = job.id,
        pipeline = %job.pipeline,
        exit_code = code,
        success = status.success(),
        "job process exited"
    );

    let outputs = collect_files(fs, &root.join("out"))?
        .into_iter()
        .map(|(path, data)| OutputFile { path, data })
        .collect();

    let outcome = if status.success() {
        JobOutcome::Success
    } else {
        JobOutcome::Failed(code)
    };
    Ok((outcome, outputs))
}

async fn feed_stdin(mut stdin: ChildStdin, lines: &[String]) -> std::io::Result<()> {
    for line in lines {
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
    }
    // Close stdin so the process sees EOF.
    stdin.shutdown().await
}

fn log_lines<R>(job: u64, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(job, "{stream}: {line}");
        }
    });
}

fn prepare_workspace(job: &ScheduledJob, fs: &dyn FileSystem, root: &Path) -> Result<()> {
    for input in &job.inputs {
        let dir = root.join(&input.repo);
        fs.create_dir_all(&dir)?;
        write_files(fs, &dir, &input.files)
            .with_context(|| format!("materializing input {}", input.commit))?;
    }
    fs.create_dir_all(&root.join("out"))
}
