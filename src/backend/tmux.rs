// src/backend/tmux.rs

//! The tmux backend: partitions the DAG across N worker scripts, each run
//! in its own detached tmux session, plus a bookkeeper session that polls
//! status files and prints aggregate progress.
//!
//! Cross-worker dependency edges are enforced inside the generated bash:
//! the dependent's guard spins on the upstream job's status files until a
//! terminal touch-file appears, so no supervising host process is needed
//! once the sessions are up.

use std::collections::{HashMap, HashSet};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::backend::serial::{included_order, job_emits, write_script};
use crate::emit::{emit_job_block, Conditionals, EmitOptions, JobEmit, ScriptBuilder};
use crate::errors::{CmdqError, Result};
use crate::graph::{GraphModel, Job, JobId};
use crate::queue::{QueueOptions, RunOptions, RunOutcome};
use crate::session::{sanitize_name, SessionDirs};
use crate::state::{JobStatus, StateReader};
use crate::types::{OnFail, SessionHandling};

/// Session name prefix; the cleanup discriminator for `cmdq cleanup`.
pub const SESSION_PREFIX: &str = "cmdq_";

/// Options specific to the tmux backend.
#[derive(Debug, Clone)]
pub struct TmuxOptions {
    /// Maximum number of worker scripts (actual count is capped by the
    /// number of jobs).
    pub size: usize,
    /// GPU indices assigned round-robin to workers: worker `k` exports
    /// `CUDA_VISIBLE_DEVICES=gres[k]`.
    pub gres: Vec<u32>,
    /// Poll interval in seconds for the bookkeeper and the blocking run.
    pub refresh_rate: f64,
    /// Whether failed runs keep their panes alive for debugging.
    pub on_fail: OnFail,
    /// What to do with stale sessions from previous runs of this queue.
    pub session_handling: SessionHandling,
    /// Serialise every job under `flock` on the session lock file.
    pub with_locks: bool,
}

impl Default for TmuxOptions {
    fn default() -> Self {
        TmuxOptions {
            size: 1,
            gres: Vec::new(),
            refresh_rate: 0.4,
            on_fail: OnFail::default(),
            session_handling: SessionHandling::default(),
            with_locks: false,
        }
    }
}

pub struct TmuxBackend<'a> {
    pub model: &'a GraphModel,
    pub session: &'a SessionDirs,
    pub queue_opts: &'a QueueOptions,
    pub header_commands: &'a [String],
    pub opts: &'a TmuxOptions,
}

impl TmuxBackend<'_> {
    /// Partition the (topologically ordered) jobs across workers using
    /// greedy chain-packing: a job goes to a worker whose last job is one
    /// of its dependencies when possible, otherwise to the currently
    /// shortest worker. Ties break by worker index. Empty workers are
    /// dropped.
    pub fn partition(&self) -> Result<Vec<Vec<JobId>>> {
        let order = included_order(self.model, self.queue_opts)?;
        let edges = self.model.resolved_edges()?;
        Ok(partition_jobs(&order, &edges, self.opts.size))
    }

    /// Render every worker script plus the bookkeeper script.
    pub fn finalize_scripts(&self) -> Result<Vec<(PathBuf, String)>> {
        let workers = self.partition()?;
        let edges = self.model.resolved_edges()?;

        let mut assignment: HashMap<JobId, usize> = HashMap::new();
        for (k, jobs) in workers.iter().enumerate() {
            for &id in jobs {
                assignment.insert(id, k);
            }
        }
        let included: HashSet<JobId> = assignment.keys().copied().collect();
        let total_real = included.len();

        let emit_opts = EmitOptions {
            with_status: true,
            with_guards: true,
            with_locks: self.opts.with_locks,
        };

        let mut scripts = Vec::new();
        for (k, jobs) in workers.iter().enumerate() {
            let emits = job_emits(self.model, jobs, |id| {
                edges[id]
                    .iter()
                    .copied()
                    .filter(|dep| included.contains(dep))
                    .filter(|dep| assignment.get(dep) != Some(&k))
                    .map(|dep| self.model.job(dep).name.clone())
                    .collect()
            })?;

            let environ = self.worker_environ(k);
            let trailer = match self.opts.on_fail {
                OnFail::Keep => Some(self.keep_on_fail_trailer()),
                OnFail::Kill => None,
            };
            let builder = ScriptBuilder {
                session: self.session,
                shebang: "#!/bin/bash",
                environ: &environ,
                cwd: self.queue_opts.cwd.as_deref(),
                header_commands: self.header_commands,
                opts: emit_opts,
            };
            let text = builder.build(&emits, jobs.len(), trailer.as_deref());
            scripts.push((self.session.worker_fpath(self.model.queue_name(), k), text));
        }

        scripts.push((self.session.bookkeeper_fpath(), self.bookkeeper_script(total_real)));
        Ok(scripts)
    }

    /// Materialise all scripts under the session directory.
    pub fn write(&self) -> Result<Vec<PathBuf>> {
        let scripts = self.finalize_scripts()?;
        self.session
            .ensure_dirs()
            .with_context(|| format!("creating session directory {}", self.session.root().display()))?;
        let mut fpaths = Vec::with_capacity(scripts.len());
        for (fpath, text) in &scripts {
            write_script(fpath, text)?;
            debug!(script = %fpath.display(), "wrote tmux worker script");
            fpaths.push(fpath.clone());
        }
        Ok(fpaths)
    }

    /// Spawn one detached tmux session per worker (plus the bookkeeper)
    /// and, when blocking, poll until every real job is terminal.
    pub async fn run(&self, run: &RunOptions) -> Result<RunOutcome> {
        if !tmux_available().await {
            return Err(CmdqError::BackendUnavailable("tmux".to_string()));
        }

        self.handle_stale_sessions().await?;
        let fpaths = self.write()?;
        // Last path is the bookkeeper script.
        let (bookkeeper_fpath, worker_fpaths) =
            fpaths.split_last().expect("at least the bookkeeper script exists");

        for (k, fpath) in worker_fpaths.iter().enumerate() {
            let name = self.session_name(k);
            spawn_session(&name, fpath).await?;
            info!(session = %name, script = %fpath.display(), "spawned tmux worker");
        }
        let bk_name = self.bookkeeper_session_name();
        spawn_session(&bk_name, bookkeeper_fpath).await?;
        info!(session = %bk_name, "spawned bookkeeper");

        if !run.block {
            return Ok(RunOutcome {
                exit_code: 0,
                passed: 0,
                failed: 0,
                skipped: 0,
                captured: None,
                child_pid: None,
            });
        }

        let refresh = Duration::from_secs_f64(self.opts.refresh_rate.max(0.05));
        loop {
            let reader = StateReader::new(self.session, self.model.real_job_names());
            let counts = reader.counts();
            if counts.is_done() {
                break;
            }
            let alive = list_sessions_with_prefix(&self.session_prefix()).await;
            if alive.is_empty() {
                warn!(
                    pending = counts.pending + counts.started,
                    "all tmux sessions exited before every job reached a terminal state"
                );
                break;
            }
            tokio::time::sleep(refresh).await;
        }

        let snapshot = self.read_state();
        let outcome = RunOutcome::from_snapshot(&snapshot, None, None);
        if outcome.failed == 0 || self.opts.on_fail == OnFail::Kill {
            self.kill().await?;
        }
        Ok(outcome)
    }

    /// Kill every tmux session belonging to this run.
    pub async fn kill(&self) -> Result<()> {
        for name in list_sessions_with_prefix(&self.session_prefix()).await {
            kill_session(&name).await;
        }
        Ok(())
    }

    /// Capture the current pane content of every worker session.
    pub async fn capture(&self) -> Result<Vec<String>> {
        let mut panes = Vec::new();
        for name in list_sessions_with_prefix(&self.session_prefix()).await {
            let output = Command::new("tmux")
                .args(["capture-pane", "-p", "-t", &format!("{name}:0.0")])
                .output()
                .await
                .context("capturing tmux pane")?;
            panes.push(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        Ok(panes)
    }

    pub fn read_state(&self) -> Vec<JobStatus> {
        StateReader::new(self.session, self.model.real_job_names()).snapshot()
    }

    fn session_name(&self, k: usize) -> String {
        format!("{}{}_{}", SESSION_PREFIX, self.session.id(), k)
    }

    fn bookkeeper_session_name(&self) -> String {
        format!("{}{}_bookkeeper", SESSION_PREFIX, self.session.id())
    }

    /// Prefix shared by every session of this run.
    fn session_prefix(&self) -> String {
        format!("{}{}_", SESSION_PREFIX, self.session.id())
    }

    /// Prefix shared by every run of this *queue*; used to detect stale
    /// sessions from earlier runs.
    fn queue_prefix(&self) -> String {
        format!("{}{}-", SESSION_PREFIX, sanitize_name(self.model.queue_name()))
    }

    async fn handle_stale_sessions(&self) -> Result<()> {
        let stale = list_sessions_with_prefix(&self.queue_prefix()).await;
        if stale.is_empty() {
            return Ok(());
        }

        let handling = match self.opts.session_handling {
            SessionHandling::Auto => {
                if std::io::stdin().is_terminal() {
                    SessionHandling::Ask
                } else {
                    SessionHandling::Kill
                }
            }
            other => other,
        };

        match handling {
            SessionHandling::Ignore => {
                debug!(count = stale.len(), "ignoring stale tmux sessions");
            }
            SessionHandling::Kill => {
                for name in &stale {
                    info!(session = %name, "killing stale tmux session");
                    kill_session(name).await;
                }
            }
            SessionHandling::Ask => {
                eprintln!("found {} stale tmux session(s) for this queue:", stale.len());
                for name in &stale {
                    eprintln!("  {name}");
                }
                eprint!("kill them? [y/N] ");
                let mut answer = String::new();
                std::io::stdin()
                    .read_line(&mut answer)
                    .context("reading stale-session answer")?;
                if answer.trim().eq_ignore_ascii_case("y") {
                    for name in &stale {
                        kill_session(name).await;
                    }
                }
            }
            SessionHandling::Auto => unreachable!("auto resolved above"),
        }
        Ok(())
    }

    fn worker_environ(&self, k: usize) -> Vec<(String, String)> {
        let mut environ = self.queue_opts.environ.clone();
        if let Some(gpu) = self.opts.gres.get(k) {
            environ.push(("CUDA_VISIBLE_DEVICES".to_string(), gpu.to_string()));
        }
        environ
    }

    fn keep_on_fail_trailer(&self) -> String {
        format!(
            "# Keep the pane alive for post-mortem when any job failed\n\
             if ls \"{}\"/*.fail >/dev/null 2>&1; then\n    exec bash\nfi",
            self.session.job_info_dpath().display()
        )
    }

    fn bookkeeper_script(&self, total_real: usize) -> String {
        let info = self.session.job_info_dpath().display().to_string();
        let rate = format!("{:.2}", self.opts.refresh_rate.max(0.05));
        let count_line = |ext: &str, var: &str| {
            format!("    {var}=$(find \"{info}\" -maxdepth 1 -name '*.{ext}' 2>/dev/null | wc -l)")
        };
        let command = [
            format!("_CMDQ_TOTAL={total_real}"),
            "while true; do".to_string(),
            count_line("pass", "_CMDQ_P"),
            count_line("fail", "_CMDQ_F"),
            count_line("skip", "_CMDQ_S"),
            "    printf 'cmdq progress: passed=%s failed=%s skipped=%s total=%s\\n' \\".to_string(),
            "        \"$_CMDQ_P\" \"$_CMDQ_F\" \"$_CMDQ_S\" \"$_CMDQ_TOTAL\"".to_string(),
            "    if [ \"$(( _CMDQ_P + _CMDQ_F + _CMDQ_S ))\" -ge \"$_CMDQ_TOTAL\" ]; then".to_string(),
            "        break".to_string(),
            "    fi".to_string(),
            format!("    sleep {rate}"),
            "done".to_string(),
        ]
        .join("\n");
        let job = Job::bookkeeper("bookkeeper", command);
        let emit = JobEmit {
            job: &job,
            index: 1,
            total: 1,
            local_deps: Vec::new(),
            remote_deps: Vec::new(),
        };
        let block = emit_job_block(
            self.session,
            &emit,
            &EmitOptions::default(),
            &Conditionals::default(),
        );
        format!(
            "#!/bin/bash\n# Generated by cmdq {}\n{}",
            env!("CARGO_PKG_VERSION"),
            block
        )
    }
}

/// Greedy chain-packing over a topological order.
pub(crate) fn partition_jobs(
    order: &[JobId],
    edges: &[Vec<JobId>],
    size: usize,
) -> Vec<Vec<JobId>> {
    let w = size.max(1);
    let mut workers: Vec<Vec<JobId>> = vec![Vec::new(); w];
    let mut last: Vec<Option<JobId>> = vec![None; w];

    for &job in order {
        let dep_workers: Vec<usize> = (0..w)
            .filter(|&k| last[k].is_some_and(|l| edges[job].contains(&l)))
            .collect();
        let pick = if dep_workers.is_empty() {
            (0..w)
                .min_by_key(|&k| (workers[k].len(), k))
                .expect("at least one worker")
        } else {
            dep_workers
                .into_iter()
                .min_by_key(|&k| (workers[k].len(), k))
                .expect("non-empty candidate set")
        };
        workers[pick].push(job);
        last[pick] = Some(job);
    }

    workers.into_iter().filter(|jobs| !jobs.is_empty()).collect()
}

async fn tmux_available() -> bool {
    Command::new("tmux")
        .arg("-V")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

async fn spawn_session(name: &str, script: &std::path::Path) -> Result<()> {
    let output = Command::new("tmux")
        .args(["new-session", "-d", "-s", name, "bash"])
        .arg(script)
        .output()
        .await
        .with_context(|| format!("spawning tmux session {name}"))?;
    if !output.status.success() {
        return Err(CmdqError::Other(anyhow!(
            "tmux new-session failed for {name}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// List session names starting with `prefix`. An unreachable tmux server
/// reads as "no sessions".
pub(crate) async fn list_sessions_with_prefix(prefix: &str) -> Vec<String> {
    let output = Command::new("tmux")
        .args(["list-sessions", "-F", "#{session_name}"])
        .output()
        .await;
    let Ok(output) = output else {
        return Vec::new();
    };
    if !output.status.success() {
        return Vec::new();
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(prefix))
        .map(str::to_string)
        .collect()
}

pub(crate) async fn kill_session(name: &str) {
    let result = Command::new("tmux")
        .args(["kill-session", "-t", name])
        .output()
        .await;
    if let Err(err) = result {
        warn!(session = %name, error = %err, "failed to kill tmux session");
    }
}

/// Kill every `cmdq_*` session on the host, regardless of queue. Backs the
/// CLI `cleanup` action.
pub async fn cleanup_all_sessions() -> Result<usize> {
    let sessions = list_sessions_with_prefix(SESSION_PREFIX).await;
    for name in &sessions {
        info!(session = %name, "killing cmdq tmux session");
        kill_session(name).await;
    }
    Ok(sessions.len())
}
