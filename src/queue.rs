// src/queue.rs

//! `Queue` binds a [`GraphModel`] to one execution backend and drives the
//! transpile → write → run lifecycle.
//!
//! Lifecycle: created → jobs submitted → `finalize_text` (pure) → `write`
//! (materialises files under a fresh session directory) → `run` → the
//! session directory persists for post-mortem.

use std::path::PathBuf;

use tracing::info;

use crate::backend::serial::SerialBackend;
use crate::backend::slurm::SlurmBackend;
use crate::backend::tmux::TmuxBackend;
use crate::backend::{Backend, SerialOptions, SlurmOptions, TmuxOptions};
use crate::emit::EmitOptions;
use crate::errors::Result;
use crate::graph::{validate_graph, GraphModel, JobId, JobSpec};
use crate::session::{SessionDirs, SessionId};
use crate::state::{JobStatus, StateCounts, StateReader};
use crate::types::BackendKind;

/// Backend-independent queue options.
#[derive(Debug, Clone, Default)]
pub struct QueueOptions {
    /// Parent directory for session directories. Defaults to
    /// `$HOME/.cache/cmdq`.
    pub dpath: Option<PathBuf>,
    /// Exported as `export KEY="VALUE"` at the top of every worker script.
    pub environ: Vec<(String, String)>,
    /// Working directory for every worker script.
    pub cwd: Option<PathBuf>,
    /// Jobs carrying any of these tags are omitted from the artifact.
    pub exclude_tags: Vec<String>,
}

/// How `run` executes the generated artifact.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Wait for completion and aggregate the result.
    pub block: bool,
    /// Replace the current process with the script (unix `exec`; the call
    /// never returns on success). Serial backend only.
    pub system: bool,
    /// Buffer the script's stdout into the outcome. Serial backend only.
    pub capture: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            block: true,
            system: false,
            capture: false,
        }
    }
}

/// Aggregate result of a run.
///
/// `exit_code` is non-zero iff at least one job failed, derived from
/// `.fail` file existence; the generated artifact itself always exits zero
/// so that downstream guards can observe failures cleanly.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub captured: Option<String>,
    pub child_pid: Option<u32>,
}

impl RunOutcome {
    pub fn from_snapshot(
        snapshot: &[JobStatus],
        captured: Option<String>,
        child_pid: Option<u32>,
    ) -> Self {
        let counts = StateCounts::tally(snapshot);
        RunOutcome {
            exit_code: if counts.failed > 0 { 1 } else { 0 },
            passed: counts.passed,
            failed: counts.failed,
            skipped: counts.skipped,
            captured,
            child_pid,
        }
    }
}

/// A job DAG bound to an execution backend.
pub struct Queue {
    model: GraphModel,
    backend: Backend,
    opts: QueueOptions,
    session: SessionDirs,
    header_commands: Vec<String>,
}

impl Queue {
    pub fn new(name: &str, backend: Backend, opts: QueueOptions) -> Self {
        let dpath = opts.dpath.clone().unwrap_or_else(default_dpath);
        let session = SessionDirs::new(&dpath, SessionId::new(name));
        Queue {
            model: GraphModel::new(name),
            backend,
            opts,
            session,
            header_commands: Vec::new(),
        }
    }

    /// Create a queue of the given backend kind with default options.
    pub fn create(kind: BackendKind, name: &str, opts: QueueOptions) -> Self {
        Queue::new(name, Backend::with_defaults(kind), opts)
    }

    pub fn name(&self) -> &str {
        self.model.queue_name()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn model(&self) -> &GraphModel {
        &self.model
    }

    pub fn session(&self) -> &SessionDirs {
        &self.session
    }

    /// Append a job. See [`GraphModel::submit`] for naming and duplicate
    /// rules.
    pub fn submit(&mut self, spec: JobSpec) -> Result<JobId> {
        self.model.submit(spec)
    }

    /// Mark that all future jobs depend on the current sink jobs.
    pub fn sync(&mut self) -> &mut Self {
        self.model.sync();
        self
    }

    /// Add a command emitted once at the top of every worker script.
    pub fn add_header_command(&mut self, command: impl Into<String>) {
        self.header_commands.push(command.into());
    }

    /// Return a new queue wrapping the same jobs with a different backend
    /// and a fresh session; the original queue is unaffected.
    pub fn change_backend(&self, backend: Backend) -> Queue {
        let dpath = self.opts.dpath.clone().unwrap_or_else(default_dpath);
        let session = SessionDirs::new(&dpath, SessionId::new(self.name()));
        Queue {
            model: self.model.clone(),
            backend,
            opts: self.opts.clone(),
            session,
            header_commands: self.header_commands.clone(),
        }
    }

    /// Pure transpilation: validate the graph and render every artifact
    /// this backend would write, as `(path, text)` pairs. No side effects
    /// beyond path derivation.
    pub fn finalize_text(&self) -> Result<Vec<(PathBuf, String)>> {
        validate_graph(&self.model)?;
        match &self.backend {
            Backend::Serial(opts) => {
                let text = self.serial(opts).finalize_text()?;
                Ok(vec![(self.session.entry_fpath(), text)])
            }
            Backend::Tmux(opts) => self.tmux(opts).finalize_scripts(),
            Backend::Slurm(opts) => {
                let text = self.slurm(opts).finalize_text()?;
                Ok(vec![(self.session.entry_fpath(), text)])
            }
        }
    }

    /// Materialise all artifacts under the session directory.
    pub fn write(&self) -> Result<Vec<PathBuf>> {
        validate_graph(&self.model)?;
        match &self.backend {
            Backend::Serial(opts) => Ok(vec![self.serial(opts).write()?]),
            Backend::Tmux(opts) => self.tmux(opts).write(),
            Backend::Slurm(opts) => Ok(vec![self.slurm(opts).write()?]),
        }
    }

    /// Execute the queue on its backend.
    pub async fn run(&self, run: &RunOptions) -> Result<RunOutcome> {
        validate_graph(&self.model)?;
        info!(
            queue = %self.name(),
            backend = %self.backend_kind(),
            session = %self.session.id(),
            jobs = self.model.num_real_jobs(),
            "running queue"
        );
        match &self.backend {
            Backend::Serial(opts) => self.serial(opts).run(run).await,
            Backend::Tmux(opts) => self.tmux(opts).run(run).await,
            Backend::Slurm(opts) => self.slurm(opts).run(run).await,
        }
    }

    /// Cancel whatever the backend has in flight. Completed jobs' status
    /// files are preserved.
    pub async fn kill(&self) -> Result<()> {
        match &self.backend {
            Backend::Serial(_) => Ok(()),
            Backend::Tmux(opts) => self.tmux(opts).kill().await,
            Backend::Slurm(opts) => self.slurm(opts).kill().await,
        }
    }

    /// Uniform progress snapshot for every real job.
    pub async fn read_state(&self) -> Vec<JobStatus> {
        match &self.backend {
            Backend::Slurm(opts) => self.slurm(opts).read_state().await,
            _ => StateReader::new(&self.session, self.model.real_job_names()).snapshot(),
        }
    }

    /// Print every artifact this queue would write, each prefixed with a
    /// `# --- <path>` header.
    ///
    /// `with_status`/`with_guards` select how much scaffolding the serial
    /// preview shows; the tmux and slurm artifacts are always complete.
    pub fn print_commands(&self, with_status: bool, with_guards: bool) -> Result<()> {
        validate_graph(&self.model)?;
        let scripts = match &self.backend {
            Backend::Serial(opts) => {
                let emit_opts = EmitOptions {
                    with_status,
                    with_guards,
                    with_locks: opts.with_locks,
                };
                let text = self.serial(opts).finalize_text_with(&emit_opts)?;
                vec![(self.session.entry_fpath(), text)]
            }
            _ => self.finalize_text()?,
        };
        for (fpath, text) in scripts {
            println!("# --- {}", fpath.display());
            println!("{text}");
        }
        Ok(())
    }

    fn serial<'a>(&'a self, opts: &'a SerialOptions) -> SerialBackend<'a> {
        SerialBackend {
            model: &self.model,
            session: &self.session,
            queue_opts: &self.opts,
            header_commands: &self.header_commands,
            opts,
        }
    }

    fn tmux<'a>(&'a self, opts: &'a TmuxOptions) -> TmuxBackend<'a> {
        TmuxBackend {
            model: &self.model,
            session: &self.session,
            queue_opts: &self.opts,
            header_commands: &self.header_commands,
            opts,
        }
    }

    fn slurm<'a>(&'a self, opts: &'a SlurmOptions) -> SlurmBackend<'a> {
        SlurmBackend {
            model: &self.model,
            session: &self.session,
            queue_opts: &self.opts,
            header_commands: &self.header_commands,
            opts,
        }
    }
}

fn default_dpath() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".cache").join("cmdq"),
        None => std::env::temp_dir().join("cmdq"),
    }
}
