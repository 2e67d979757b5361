//! Background job engine for imports, exports and cull batches.
//!
//! ## Design
//!
//! - A job is split into units (one file, one asset); cancellation and pause
//!   are observed only at checkpoints between units
//! - Unit failures are recorded and skipped until they exceed a tolerance
//! - Export jobs can be paused/resumed and report an ETA
//! - Failed jobs can be retried a bounded number of times, with backoff
//! - Jobs tied to a project move it through the workflow guard
//!
//! ## Components
//!
//! - `Job`: job record with params, state, progress and log
//! - `JobEngine`: registry, control operations and worker threads
//! - `JobHandle`: lock-free progress view
//! - `UnitHandler`: per-kind unit processing
//! - `JobStore`: archive for finished jobs

pub mod config;
mod control;
pub mod engine;
pub mod error;
pub mod eta;
pub mod handler;
pub mod store;
pub mod types;
pub mod update;
mod worker;

pub use config::{ConfigError, JobEngineConfig};
pub use control::JobHandle;
pub use engine::{JobEngine, JobEngineBuilder};
pub use error::{JobError, UnitError};
pub use eta::EtaEstimator;
pub use handler::{HandlerRegistry, UnitContext, UnitHandler};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    BackoffStrategy, Job, JobKind, JobLogEntry, JobParams, JobState, LogLevel, MAX_RATING,
    RetryPolicy, UnitFailure, WorkUnit,
};
pub use update::JobUpdate;
