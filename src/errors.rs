// src/errors.rs

//! Crate-wide error type.
//!
//! Graph-shape problems (duplicates, unknown dependencies, cycles) fail
//! loudly before any script is materialised. Per-job runtime failures are
//! never surfaced here; they live in the `.fail` status files and the
//! aggregate exit code of [`crate::queue::Queue::run`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CmdqError {
    #[error("duplicate job name '{0}'")]
    DuplicateJob(String),

    #[error("job '{job}' has unknown dependency '{dep}'")]
    UnknownDependency { job: String, dep: String },

    #[error("unknown backend '{0}' (expected \"serial\", \"tmux\", or \"slurm\")")]
    UnknownBackend(String),

    #[error("cycle detected in job graph involving '{0}'")]
    CycleDetected(String),

    #[error("backend '{0}' is not available on this system")]
    BackendUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CmdqError>;
