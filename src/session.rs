// src/session.rs

//! Per-run session identity and directory layout.
//!
//! Every `run` materialises its scripts and status files under a fresh
//! session directory `<dpath>/<session-id>/`. The layout is stable and
//! consumed by external tooling:
//!
//! ```text
//! <dpath>/<session-id>/
//!   <session-id>.sh                 # serial entry script / slurm driver
//!   queue_<name>_<k>_<session>.sh   # tmux worker scripts
//!   logs/<job-name>.log
//!   job_info/<job-name>.pass        # touch-file, exists <=> passed
//!   job_info/<job-name>.fail        # touch-file, exists <=> failed
//!   job_info/<job-name>.skip        # touch-file, exists <=> skipped
//!   job_info/<job-name>.stat        # one line: "<state> <epoch-seconds> [<exit>]"
//! ```

use std::path::{Path, PathBuf};

use chrono::Utc;
use uuid::Uuid;

/// Unique identifier for one run of a queue:
/// `<sanitized-name>-<UTC-timestamp>-<short-hash>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(String);

impl SessionId {
    /// Mint a fresh session id for the given queue name.
    pub fn new(queue_name: &str) -> Self {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let hash = blake3::hash(Uuid::new_v4().as_bytes()).to_hex();
        SessionId(format!(
            "{}-{}-{}",
            sanitize_name(queue_name),
            stamp,
            &hash.as_str()[..8]
        ))
    }

    /// Reconstruct a session id from a known string (e.g. a directory name).
    pub fn from_existing(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Make a queue name safe for file names and tmux session names.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "queue".to_string()
    } else {
        cleaned
    }
}

/// Per-job status and log file paths inside a session directory.
#[derive(Debug, Clone)]
pub struct JobPaths {
    pub pass_fpath: PathBuf,
    pub fail_fpath: PathBuf,
    pub skip_fpath: PathBuf,
    pub stat_fpath: PathBuf,
    pub log_fpath: PathBuf,
}

/// The session directory and everything addressed relative to it.
#[derive(Debug, Clone)]
pub struct SessionDirs {
    id: SessionId,
    root: PathBuf,
}

impl SessionDirs {
    pub fn new(dpath: &Path, id: SessionId) -> Self {
        let root = dpath.join(id.as_str());
        SessionDirs { id, root }
    }

    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_info_dpath(&self) -> PathBuf {
        self.root.join("job_info")
    }

    pub fn log_dpath(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Entry script for the serial backend and the sbatch driver alike.
    pub fn entry_fpath(&self) -> PathBuf {
        self.root.join(format!("{}.sh", self.id.as_str()))
    }

    /// Worker script `k` for the tmux backend.
    pub fn worker_fpath(&self, queue_name: &str, k: usize) -> PathBuf {
        self.root.join(format!(
            "queue_{}_{}_{}.sh",
            sanitize_name(queue_name),
            k,
            self.id.as_str()
        ))
    }

    /// Bookkeeper script for the tmux backend.
    pub fn bookkeeper_fpath(&self) -> PathBuf {
        self.root.join(format!("bookkeeper_{}.sh", self.id.as_str()))
    }

    /// Shared advisory lock file used by `with_locks` emission.
    pub fn lock_fpath(&self) -> PathBuf {
        self.root.join("cmdq.lock")
    }

    pub fn job_paths(&self, job_name: &str) -> JobPaths {
        let info = self.job_info_dpath();
        let name = sanitize_name(job_name);
        JobPaths {
            pass_fpath: info.join(format!("{name}.pass")),
            fail_fpath: info.join(format!("{name}.fail")),
            skip_fpath: info.join(format!("{name}.skip")),
            stat_fpath: info.join(format!("{name}.stat")),
            log_fpath: self.log_dpath().join(format!("{name}.log")),
        }
    }

    /// Create the session directory tree. Fails before any script is
    /// written if the target is unwritable.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.job_info_dpath())?;
        std::fs::create_dir_all(self.log_dpath())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_embeds_sanitized_name() {
        let id = SessionId::new("my queue/1");
        assert!(id.as_str().starts_with("my-queue-1-"));
        // name, stamp, hash
        assert!(id.as_str().len() > "my-queue-1-".len() + 8);
    }

    #[test]
    fn sanitize_keeps_safe_chars() {
        assert_eq!(sanitize_name("ab_c-9"), "ab_c-9");
        assert_eq!(sanitize_name("a b/c"), "a-b-c");
        assert_eq!(sanitize_name(""), "queue");
    }

    #[test]
    fn job_paths_live_under_job_info() {
        let dirs = SessionDirs::new(Path::new("/tmp/q"), SessionId::from_existing("s-1"));
        let paths = dirs.job_paths("fit model");
        assert_eq!(paths.pass_fpath, Path::new("/tmp/q/s-1/job_info/fit-model.pass"));
        assert_eq!(paths.log_fpath, Path::new("/tmp/q/s-1/logs/fit-model.log"));
    }

    #[test]
    fn worker_script_naming() {
        let dirs = SessionDirs::new(Path::new("/tmp/q"), SessionId::from_existing("s-1"));
        let fpath = dirs.worker_fpath("demo", 2);
        assert_eq!(fpath, Path::new("/tmp/q/s-1/queue_demo_2_s-1.sh"));
    }
}
