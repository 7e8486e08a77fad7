// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::CmdqError;

/// Which execution backend a queue is bound to.
///
/// The airflow backend of the ancestral tool is experimental and is not
/// supported here; parsing `"airflow"` fails like any other unknown kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Serial,
    Tmux,
    Slurm,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendKind::Serial => "serial",
            BackendKind::Tmux => "tmux",
            BackendKind::Slurm => "slurm",
        };
        f.write_str(s)
    }
}

impl FromStr for BackendKind {
    type Err = CmdqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "serial" => Ok(BackendKind::Serial),
            "tmux" => Ok(BackendKind::Tmux),
            "slurm" => Ok(BackendKind::Slurm),
            other => Err(CmdqError::UnknownBackend(other.to_string())),
        }
    }
}

/// Observable state of a single job, derived from its status files.
///
/// At most one terminal state holds; `Started` means the `.stat` file exists
/// (or is unreadable mid-write) but no terminal touch-file does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Started,
    Passed,
    Failed,
    Skipped,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Passed | JobState::Failed | JobState::Skipped)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Started => "started",
            JobState::Passed => "passed",
            JobState::Failed => "failed",
            JobState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// What to do with tmux worker sessions when a blocking run finishes with
/// at least one failed job.
///
/// - `Keep` (default): leave the panes alive for post-mortem inspection.
/// - `Kill`: tear the sessions down regardless of outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFail {
    Keep,
    Kill,
}

impl Default for OnFail {
    fn default() -> Self {
        OnFail::Keep
    }
}

impl FromStr for OnFail {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "keep" => Ok(OnFail::Keep),
            "kill" => Ok(OnFail::Kill),
            other => Err(format!("invalid onfail: {other} (expected \"keep\" or \"kill\")")),
        }
    }
}

/// How to treat pre-existing tmux sessions that match this queue's name
/// prefix before spawning new workers.
///
/// `Auto` kills them when stdin is not a tty (non-interactive callers) and
/// asks otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionHandling {
    Ask,
    Kill,
    Ignore,
    Auto,
}

impl Default for SessionHandling {
    fn default() -> Self {
        SessionHandling::Auto
    }
}

impl FromStr for SessionHandling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ask" => Ok(SessionHandling::Ask),
            "kill" => Ok(SessionHandling::Kill),
            "ignore" => Ok(SessionHandling::Ignore),
            "auto" => Ok(SessionHandling::Auto),
            other => Err(format!(
                "invalid session handling: {other} (expected ask, kill, ignore, or auto)"
            )),
        }
    }
}
