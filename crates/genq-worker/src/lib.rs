//! Generation job worker.
//!
//! This crate provides:
//! - The dispatch loop: claim, execute remotely, record the outcome
//! - Periodic recovery of jobs abandoned by dead workers
//! - Progress reporting into the job store
//! - Structured logging, metrics and retry helpers
//! - Graceful shutdown

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod retry;

pub use config::WorkerConfig;
pub use dispatcher::Dispatcher;
pub use error::{WorkerError, WorkerResult};
pub use logging::{init_tracing, JobLogger};
