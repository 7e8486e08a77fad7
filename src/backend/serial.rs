// src/backend/serial.rs

//! The serial backend: the whole DAG ordered into one self-checking bash
//! script with no inter-job parallelism.
//!
//! The script itself always exits zero; a job failure is recorded in its
//! `.fail` file and surfaces through the aggregate exit code computed by
//! [`SerialBackend::run`] from status-file existence.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use tokio::process::Command;
use tracing::{debug, info};

use crate::emit::{EmitOptions, JobEmit, ScriptBuilder};
use crate::errors::{CmdqError, Result};
use crate::graph::{GraphModel, JobId};
use crate::queue::{QueueOptions, RunOptions, RunOutcome};
use crate::session::SessionDirs;
use crate::state::{JobStatus, StateReader};

/// Options specific to serial emission.
#[derive(Debug, Clone)]
pub struct SerialOptions {
    /// First line of the generated script.
    pub shebang: String,
    /// Serialise every job under `flock` on the session lock file. Off by
    /// default; each job owns disjoint status file names, so no locking is
    /// required unless user commands share a resource.
    pub with_locks: bool,
}

impl Default for SerialOptions {
    fn default() -> Self {
        SerialOptions {
            shebang: "#!/bin/bash".to_string(),
            with_locks: false,
        }
    }
}

pub struct SerialBackend<'a> {
    pub model: &'a GraphModel,
    pub session: &'a SessionDirs,
    pub queue_opts: &'a QueueOptions,
    pub header_commands: &'a [String],
    pub opts: &'a SerialOptions,
}

impl SerialBackend<'_> {
    /// Pure transpilation: order the DAG and render the script text. No
    /// side effects beyond path derivation.
    pub fn finalize_text(&self) -> Result<String> {
        let emit_opts = EmitOptions {
            with_status: true,
            with_guards: true,
            with_locks: self.opts.with_locks,
        };
        self.finalize_text_with(&emit_opts)
    }

    /// Transpile with explicit emission flags (used by command previews).
    pub fn finalize_text_with(&self, emit_opts: &EmitOptions) -> Result<String> {
        let included = included_order(self.model, self.queue_opts)?;
        let emits = job_emits(self.model, &included, |_id| Vec::new())?;

        let builder = ScriptBuilder {
            session: self.session,
            shebang: &self.opts.shebang,
            environ: &self.queue_opts.environ,
            cwd: self.queue_opts.cwd.as_deref(),
            header_commands: self.header_commands,
            opts: *emit_opts,
        };
        Ok(builder.build(&emits, emits.len(), None))
    }

    /// Materialise the entry script under the session directory.
    pub fn write(&self) -> Result<PathBuf> {
        let text = self.finalize_text()?;
        self.session
            .ensure_dirs()
            .with_context(|| format!("creating session directory {}", self.session.root().display()))?;
        let fpath = self.session.entry_fpath();
        write_script(&fpath, &text)?;
        debug!(script = %fpath.display(), "wrote serial entry script");
        Ok(fpath)
    }

    /// Write and execute the script.
    ///
    /// The returned exit code is non-zero iff at least one job failed,
    /// aggregated from `.fail` file existence rather than the script's own
    /// (always zero) exit status.
    pub async fn run(&self, run: &RunOptions) -> Result<RunOutcome> {
        let fpath = self.write()?;
        info!(script = %fpath.display(), "running serial queue");

        if run.system {
            return exec_inline(&fpath);
        }

        let mut cmd = Command::new("bash");
        cmd.arg(&fpath);
        if run.capture {
            cmd.stdout(Stdio::piped());
        }
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning bash for {}", fpath.display()))?;

        if !run.block {
            let child_pid = child.id();
            // Detached: leave the child running; the caller polls state.
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
            return Ok(RunOutcome {
                exit_code: 0,
                passed: 0,
                failed: 0,
                skipped: 0,
                captured: None,
                child_pid,
            });
        }

        let captured = if run.capture {
            let output = child
                .wait_with_output()
                .await
                .with_context(|| format!("waiting for bash {}", fpath.display()))?;
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            child
                .wait()
                .await
                .with_context(|| format!("waiting for bash {}", fpath.display()))?;
            None
        };

        let snapshot = self.read_state();
        Ok(RunOutcome::from_snapshot(&snapshot, captured, None))
    }

    /// Walk `job_info/` and report every real job's state.
    pub fn read_state(&self) -> Vec<JobStatus> {
        StateReader::new(self.session, self.model.real_job_names()).snapshot()
    }
}

/// Topological order with tag-excluded jobs removed.
pub(crate) fn included_order(model: &GraphModel, queue_opts: &QueueOptions) -> Result<Vec<JobId>> {
    let order = model.order_jobs()?;
    if queue_opts.exclude_tags.is_empty() {
        return Ok(order);
    }
    Ok(order
        .into_iter()
        .filter(|&id| {
            !queue_opts
                .exclude_tags
                .iter()
                .any(|tag| model.job(id).has_tag(tag))
        })
        .collect())
}

/// Build [`JobEmit`]s for jobs in `included` order. `remote_deps_of`
/// reports which of a job's dependencies live in another script; all other
/// included dependencies become local guard conditions.
pub(crate) fn job_emits<'a>(
    model: &'a GraphModel,
    included: &[JobId],
    remote_deps_of: impl Fn(JobId) -> Vec<String>,
) -> Result<Vec<JobEmit<'a>>> {
    let included_set: HashSet<JobId> = included.iter().copied().collect();
    let total = included.len();

    included
        .iter()
        .enumerate()
        .map(|(pos, &id)| {
            let remote: Vec<String> = remote_deps_of(id);
            let remote_set: HashSet<&str> = remote.iter().map(|s| s.as_str()).collect();
            // Dependencies excluded from the artifact are treated as
            // satisfied; their status files will never appear.
            let local_deps: Vec<String> = model
                .resolved_deps(id)?
                .into_iter()
                .filter(|dep| included_set.contains(dep))
                .map(|dep| model.job(dep).name.clone())
                .filter(|name| !remote_set.contains(name.as_str()))
                .collect();
            Ok(JobEmit {
                job: model.job(id),
                index: pos + 1,
                total,
                local_deps,
                remote_deps: remote,
            })
        })
        .collect()
}

pub(crate) fn write_script(fpath: &Path, text: &str) -> Result<()> {
    std::fs::write(fpath, text)
        .with_context(|| format!("writing script {}", fpath.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(fpath)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(fpath, perms)?;
    }
    Ok(())
}

fn exec_inline(fpath: &Path) -> Result<RunOutcome> {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // exec only returns on failure.
        let err = std::process::Command::new("bash").arg(fpath).exec();
        Err(CmdqError::Io(err))
    }
    #[cfg(not(unix))]
    {
        let _ = fpath;
        Err(CmdqError::Other(anyhow::anyhow!(
            "inline exec is only supported on unix"
        )))
    }
}
