// src/lib.rs

//! `cmdq` compiles a user-described DAG of shell commands into an
//! executable bash artifact for one of several backends (serial, tmux,
//! slurm), optionally runs it, and reports progress through per-job status
//! files.
//!
//! The generated bash is self-sufficient: dependency ordering, pass/fail
//! bookkeeping, and skip-on-ancestor-failure semantics all live in the
//! artifact, so it can be inspected before execution and re-run without a
//! supervising process.
//!
//! ```no_run
//! use cmdq::{BackendKind, JobSpec, Queue, QueueOptions, RunOptions};
//!
//! # async fn demo() -> cmdq::Result<()> {
//! let mut queue = Queue::create(BackendKind::Serial, "demo", QueueOptions::default());
//! let fetch = queue.submit(JobSpec::new("echo fetch").name("fetch"))?;
//! queue.submit(JobSpec::new("echo train").name("train").after_job(fetch))?;
//! let outcome = queue.run(&RunOptions::default()).await?;
//! assert_eq!(outcome.exit_code, 0);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cli;
pub mod emit;
pub mod errors;
pub mod graph;
pub mod logging;
pub mod monitor;
pub mod queue;
pub mod session;
pub mod state;
pub mod store;
pub mod types;

pub use backend::{Backend, SerialOptions, SlurmOptions, TmuxOptions};
pub use errors::{CmdqError, Result};
pub use graph::{Dep, GraphModel, Job, JobId, JobSpec};
pub use queue::{Queue, QueueOptions, RunOptions, RunOutcome};
pub use session::{SessionDirs, SessionId};
pub use state::{JobStatus, StateCounts, StateReader};
pub use types::{BackendKind, JobState, OnFail, SessionHandling};
