// src/cli.rs

//! CLI argument parsing and the action surface.
//!
//! The CLI is a thin collaborator around the library core: it persists
//! queue rows to JSON via [`crate::store`] and replays them into a
//! [`Queue`] for `show` and `run`.

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use crate::backend::tmux::cleanup_all_sessions;
use crate::backend::Backend;
use crate::backend::TmuxOptions;
use crate::graph::JobSpec;
use crate::monitor::monitor;
use crate::queue::{Queue, QueueOptions, RunOptions};
use crate::store::{QueueRow, QueueStore};
use crate::types::BackendKind;

/// Command-line arguments for `cmdq`.
#[derive(Debug, Parser)]
#[command(
    name = "cmdq",
    version,
    about = "Build, inspect, and run DAGs of shell commands.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CMDQ_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    /// Directory holding persisted CLI queues.
    ///
    /// Default: `$HOME/.cache/cmdq/cli`.
    #[arg(long, value_name = "PATH", global = true)]
    pub dpath: Option<PathBuf>,

    #[command(subcommand)]
    pub action: Action,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(lvl: LogLevel) -> Self {
        match lvl {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Action {
    /// Create a new queue.
    New {
        name: String,
        /// Header command run at the top of every worker script
        /// (e.g. activating a virtualenv).
        #[arg(long)]
        header: Option<String>,
    },
    /// Append a command to a queue. End the options with `--` and then
    /// write the full command.
    Submit {
        name: String,
        /// Name for the submitted job; auto-generated when omitted.
        #[arg(long, value_name = "JOB")]
        job_name: Option<String>,
        /// Names of jobs this one depends on.
        #[arg(long, value_delimiter = ',', value_name = "JOBS")]
        depends: Vec<String>,
        /// The bash command to queue.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Print the generated scripts without executing anything.
    Show {
        name: String,
        #[arg(long, default_value = "serial")]
        backend: String,
        /// Number of tmux workers.
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },
    /// Execute a queue and block until every job is terminal.
    Run {
        name: String,
        #[arg(long, default_value = "serial")]
        backend: String,
        /// Number of tmux workers.
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },
    /// List the known queues.
    List,
    /// Kill all tmux sessions whose name starts with `cmdq_`.
    Cleanup,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

/// Dispatch one CLI invocation. Returns the process exit code: 0 on
/// success, 1 when any job failed.
pub async fn run(args: CliArgs) -> anyhow::Result<i32> {
    let store = match &args.dpath {
        Some(dpath) => QueueStore::new(dpath.clone()),
        None => QueueStore::new(QueueStore::default_dpath()),
    };

    match args.action {
        Action::New { name, header } => {
            let fpath = store.create(&name, header)?;
            info!(queue = %name, file = %fpath.display(), "created queue");
            Ok(0)
        }
        Action::Submit {
            name,
            job_name,
            depends,
            command,
        } => {
            if command.is_empty() {
                return Err(anyhow!("no command given; write it after `--`"));
            }
            let row = QueueRow::Command {
                command: command.join(" "),
                name: job_name,
                depends,
            };
            store.append(&name, row).context("appending to queue")?;
            Ok(0)
        }
        Action::Show {
            name,
            backend,
            workers,
        } => {
            let queue = build_queue(&store, &name, &backend, workers)?;
            queue.print_commands(true, true)?;
            Ok(0)
        }
        Action::Run {
            name,
            backend,
            workers,
        } => {
            let queue = build_queue(&store, &name, &backend, workers)?;
            // Submit without blocking, then watch progress through the
            // status files until every job is terminal.
            let run = RunOptions {
                block: false,
                ..RunOptions::default()
            };
            let counts = tokio::select! {
                counts = async {
                    queue.run(&run).await?;
                    Ok::<_, crate::errors::CmdqError>(monitor(&queue, 0.4).await)
                } => counts?,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("interrupted; cancelling queue");
                    queue.kill().await?;
                    return Ok(1);
                }
            };
            if counts.failed == 0 {
                // Nothing to debug; reap any straggler sessions.
                queue.kill().await?;
            }
            println!(
                "queue '{}' finished: passed={} failed={} skipped={}",
                name, counts.passed, counts.failed, counts.skipped
            );
            Ok(if counts.failed > 0 { 1 } else { 0 })
        }
        Action::List => {
            for name in store.list()? {
                println!("{name}");
            }
            Ok(0)
        }
        Action::Cleanup => {
            let killed = cleanup_all_sessions().await?;
            info!(killed, "cleaned up cmdq tmux sessions");
            Ok(0)
        }
    }
}

/// Replay persisted rows into a fresh queue bound to the given backend.
fn build_queue(
    store: &QueueStore,
    name: &str,
    backend: &str,
    workers: usize,
) -> anyhow::Result<Queue> {
    let kind: BackendKind = backend.parse()?;
    let backend = match kind {
        BackendKind::Tmux => Backend::Tmux(TmuxOptions {
            size: workers.max(1),
            ..TmuxOptions::default()
        }),
        other => Backend::with_defaults(other),
    };

    let mut queue = Queue::new(name, backend, QueueOptions::default());
    for row in store.load(name)? {
        match row {
            QueueRow::Header { header } => queue.add_header_command(header),
            QueueRow::Command {
                command,
                name,
                depends,
            } => {
                let mut spec = JobSpec::new(command);
                if let Some(name) = name {
                    spec = spec.name(name);
                }
                for dep in depends {
                    spec = spec.after(dep);
                }
                queue.submit(spec)?;
            }
        }
    }
    Ok(queue)
}
