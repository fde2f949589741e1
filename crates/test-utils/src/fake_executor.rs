use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use commitflow::engine::{JobId, JobOutcome, OutputFile, RuntimeEvent, ScheduledJob};
use commitflow::errors::{CommitflowError, Result};
use commitflow::exec::ExecutorBackend;

/// In-process job body: the files a job writes, or its exit code.
pub type JobFn = Arc<dyn Fn(&ScheduledJob) -> std::result::Result<Vec<OutputFile>, i32> + Send + Sync>;

/// A fake executor that:
/// - records which jobs were "run" as `(pipeline, job id)`
/// - computes outputs with the closure registered for the job's pipeline,
///   or copies the job's input files through unchanged
/// - reports `JobCompleted` immediately, or after the delay registered for
///   the job's pipeline (so jobs can finish out of dispatch order).
pub struct FnExecutor {
    runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
    bodies: HashMap<String, JobFn>,
    delays: HashMap<String, Duration>,
    executed: Arc<Mutex<Vec<(String, JobId)>>>,
}

impl FnExecutor {
    pub fn new(runtime_tx: mpsc::UnboundedSender<RuntimeEvent>) -> Self {
        Self {
            runtime_tx,
            bodies: HashMap::new(),
            delays: HashMap::new(),
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_body<F>(mut self, pipeline: &str, body: F) -> Self
    where
        F: Fn(&ScheduledJob) -> std::result::Result<Vec<OutputFile>, i32> + Send + Sync + 'static,
    {
        self.bodies.insert(pipeline.to_string(), Arc::new(body));
        self
    }

    /// Hold back every completion of `pipeline` for `delay`.
    pub fn with_delay(mut self, pipeline: &str, delay: Duration) -> Self {
        self.delays.insert(pipeline.to_string(), delay);
        self
    }

    /// Share the execution log with the test.
    pub fn with_log(mut self, executed: Arc<Mutex<Vec<(String, JobId)>>>) -> Self {
        self.executed = executed;
        self
    }
}

/// Every input file written back under the same path.
pub fn identity(job: &ScheduledJob) -> Vec<OutputFile> {
    job.inputs
        .iter()
        .flat_map(|input| input.files.iter())
        .map(|(path, data)| OutputFile::new(path.clone(), data.clone()))
        .collect()
}

impl ExecutorBackend for FnExecutor {
    fn spawn_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);
        let bodies = self.bodies.clone();
        let delays = self.delays.clone();

        Box::pin(async move {
            for job in jobs {
                executed
                    .lock()
                    .unwrap()
                    .push((job.pipeline.clone(), job.id));

                let result = match bodies.get(&job.pipeline) {
                    Some(body) => body(&job),
                    None => Ok(identity(&job)),
                };
                let (outcome, outputs) = match result {
                    Ok(outputs) => (JobOutcome::Success, outputs),
                    Err(code) => (JobOutcome::Failed(code), Vec::new()),
                };
                let event = RuntimeEvent::JobCompleted {
                    job: job.id,
                    outcome,
                    outputs,
                };

                match delays.get(&job.pipeline) {
                    Some(&delay) => {
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            // The runtime may have stopped meanwhile.
                            let _ = tx.send(event);
                        });
                    }
                    None => tx.send(event).map_err(|_| CommitflowError::RuntimeStopped)?,
                }
            }
            Ok(())
        })
    }
}
