// src/backend/mod.rs

//! Execution backends.
//!
//! A queue is bound to exactly one backend, modelled as a tagged variant
//! rather than an open hierarchy: each variant carries its own typed
//! options record, and unknown options simply do not exist.

pub mod serial;
pub mod slurm;
pub mod tmux;

pub use serial::SerialOptions;
pub use slurm::SlurmOptions;
pub use tmux::TmuxOptions;

use tokio::process::Command;

use crate::types::BackendKind;

/// A backend kind plus its options.
#[derive(Debug, Clone)]
pub enum Backend {
    Serial(SerialOptions),
    Tmux(TmuxOptions),
    Slurm(SlurmOptions),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Serial(_) => BackendKind::Serial,
            Backend::Tmux(_) => BackendKind::Tmux,
            Backend::Slurm(_) => BackendKind::Slurm,
        }
    }

    /// Construct a backend of the given kind with default options.
    pub fn with_defaults(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Serial => Backend::Serial(SerialOptions::default()),
            BackendKind::Tmux => Backend::Tmux(TmuxOptions::default()),
            BackendKind::Slurm => Backend::Slurm(SlurmOptions::default()),
        }
    }

    /// Availability is returned as a boolean, never raised.
    pub async fn is_available(kind: BackendKind) -> bool {
        match kind {
            BackendKind::Serial => true,
            BackendKind::Tmux => has_exe("tmux", &["-V"]).await,
            BackendKind::Slurm => slurm::is_available().await,
        }
    }

    /// Probe the host for every usable backend kind.
    pub async fn available_backends() -> Vec<BackendKind> {
        let mut available = vec![BackendKind::Serial];
        if Self::is_available(BackendKind::Tmux).await {
            available.push(BackendKind::Tmux);
        }
        if Self::is_available(BackendKind::Slurm).await {
            available.push(BackendKind::Slurm);
        }
        available
    }
}

async fn has_exe(exe: &str, args: &[&str]) -> bool {
    Command::new(exe)
        .args(args)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}
