// src/exec/mod.rs

//! Job execution layer.
//!
//! - [`executor_loop`] owns the loop that runs jobs with bounded concurrency.
//! - [`job_runner`] runs a single job as a local process in a temporary
//!   workspace.
//! - [`backend`] provides the `ExecutorBackend` trait and the
//!   `RealExecutorBackend` the runtime uses in production, and which tests
//!   replace with an in-process executor.

pub mod backend;
pub mod executor_loop;
pub mod job_runner;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use executor_loop::spawn_executor;
