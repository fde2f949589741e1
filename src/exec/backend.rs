// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw channel, so
//! tests can swap in an in-process executor.
//!
//! - `RealExecutorBackend` wraps the [`spawn_executor`] loop, which runs every
//!   job as a local process.
//! - Tests provide their own backend that computes outputs directly and emits
//!   `JobCompleted` events.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::engine::{RuntimeEvent, ScheduledJob};
use crate::errors::{CommitflowError, Result};

use super::executor_loop::spawn_executor;

/// Trait abstracting how dispatched jobs are executed.
///
/// Every job handed to `spawn_jobs` must eventually be answered with exactly
/// one `RuntimeEvent::JobCompleted`.
pub trait ExecutorBackend: Send {
    fn spawn_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Process executor backend used in production.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ScheduledJob>,
}

impl RealExecutorBackend {
    /// Spawns the background executor loop immediately.
    pub fn new(runtime_tx: mpsc::UnboundedSender<RuntimeEvent>, worker_count: usize) -> Self {
        let tx = spawn_executor(runtime_tx, worker_count);
        Self { tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for job in jobs {
                tx.send(job)
                    .await
                    .map_err(|e| CommitflowError::Other(anyhow::anyhow!("executor stopped: {e}")))?;
            }
            Ok(())
        })
    }
}
