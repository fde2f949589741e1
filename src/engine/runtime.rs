// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::engine::{JobOutcome, ScheduledJob};
use crate::errors::Result;
use crate::exec::ExecutorBackend;

use super::core::CoreRuntime;
use super::{CoreCommand, RuntimeEvent};

/// Async shell around [`CoreRuntime`]: reads events from the channel, feeds
/// them to the core and hands dispatched jobs to an [`ExecutorBackend`].
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    executor: E,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
        executor: E,
    ) -> Self {
        Self {
            core,
            event_rx,
            executor,
        }
    }

    /// Main event loop. Returns after `ShutdownRequested` or once every
    /// sender is gone.
    pub async fn run(mut self) -> Result<()> {
        info!(workers = self.core.worker_count(), "trigger runtime started");

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");
            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command).await;
            }

            if !step.keep_running {
                info!("shutdown requested; stopping runtime");
                break;
            }
        }

        self.shutdown();
        info!("runtime exiting");
        Ok(())
    }

    async fn execute_command(&mut self, command: CoreCommand) {
        match command {
            CoreCommand::DispatchJobs(jobs) => self.dispatch(jobs).await,
        }
    }

    async fn dispatch(&mut self, jobs: Vec<ScheduledJob>) {
        let ids: Vec<_> = jobs.iter().map(|j| j.id).collect();
        debug!(?ids, "dispatching jobs");

        if let Err(e) = self.executor.spawn_jobs(jobs).await {
            error!(error = %e, ?ids, "executor rejected jobs; failing them");
            for job in ids {
                self.core.step(RuntimeEvent::JobCompleted {
                    job,
                    outcome: JobOutcome::Failed(-1),
                    outputs: Vec::new(),
                });
            }
        }
    }

    /// Stop accepting triggers and resolve whatever is still queued so no
    /// waiter hangs on a runtime that is gone.
    fn shutdown(&mut self) {
        let store = self.core.store();
        store.clear_trigger_sink();
        self.core.abort_pending("trigger runtime shut down");

        self.event_rx.close();
        let mut drained = 0usize;
        while let Ok(event) = self.event_rx.try_recv() {
            self.core.drain(event);
            drained += 1;
        }
        if drained > 0 {
            debug!(drained, "resolved queued events after shutdown");
        }
    }
}
