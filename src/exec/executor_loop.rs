// src/exec/executor_loop.rs

//! Main executor loop that runs job processes.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::engine::{RuntimeEvent, ScheduledJob};
use crate::exec::job_runner::run_job;
use crate::fs::RealFileSystem;

/// Spawn the background executor loop.
///
/// Each received job runs in its own Tokio task; at most `worker_count` jobs
/// run at the same time. When the returned sender is dropped the loop stops
/// and aborts running jobs (their processes are killed on drop).
pub fn spawn_executor(
    runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
    worker_count: usize,
) -> mpsc::Sender<ScheduledJob> {
    let (tx, mut rx) = mpsc::channel::<ScheduledJob>(64);
    let permits = Arc::new(Semaphore::new(worker_count.max(1)));

    tokio::spawn(async move {
        info!(workers = worker_count, "executor loop started");
        let mut running = JoinSet::new();

        while let Some(job) = rx.recv().await {
            while let Some(done) = running.try_join_next() {
                if let Err(e) = done {
                    warn!(error = %e, "job task ended abnormally");
                }
            }

            let permits = Arc::clone(&permits);
            let rt_tx = runtime_tx.clone();
            running.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                let id = job.id;
                run_job(job, &RealFileSystem, &rt_tx).await;
                debug!(job = id, "job runner finished");
            });
        }

        if !running.is_empty() {
            info!(running = running.len(), "executor channel closed; aborting running jobs");
        }
        running.shutdown().await;
        info!("executor loop finished");
    });

    tx
}
