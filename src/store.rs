// src/store.rs

//! JSON-on-disk persistence for CLI-built queues.
//!
//! Each queue is one file `<dpath>/<name>.cmdq.json` holding an ordered
//! list of rows; `cmdq submit` appends and `cmdq run`/`show` replay the
//! rows into a fresh [`crate::queue::Queue`].

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

const QUEUE_SUFFIX: &str = ".cmdq.json";

/// One persisted queue entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QueueRow {
    Header {
        header: String,
    },
    Command {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        depends: Vec<String>,
    },
}

/// Directory of persisted CLI queues.
pub struct QueueStore {
    dpath: PathBuf,
}

impl QueueStore {
    pub fn new(dpath: impl Into<PathBuf>) -> Self {
        QueueStore { dpath: dpath.into() }
    }

    /// `$HOME/.cache/cmdq/cli`, or a temp fallback without a home.
    pub fn default_dpath() -> PathBuf {
        match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(".cache").join("cmdq").join("cli"),
            None => std::env::temp_dir().join("cmdq").join("cli"),
        }
    }

    pub fn queue_fpath(&self, name: &str) -> PathBuf {
        self.dpath.join(format!("{name}{QUEUE_SUFFIX}"))
    }

    /// Create (or reset) a queue file, optionally seeding a header row.
    pub fn create(&self, name: &str, header: Option<String>) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dpath)
            .with_context(|| format!("creating queue store {}", self.dpath.display()))?;
        let rows: Vec<QueueRow> = header.map(|header| QueueRow::Header { header }).into_iter().collect();
        let fpath = self.queue_fpath(name);
        self.save(&fpath, &rows)?;
        Ok(fpath)
    }

    pub fn append(&self, name: &str, row: QueueRow) -> Result<()> {
        let mut rows = self.load(name)?;
        rows.push(row);
        self.save(&self.queue_fpath(name), &rows)
    }

    pub fn load(&self, name: &str) -> Result<Vec<QueueRow>> {
        let fpath = self.queue_fpath(name);
        let text = std::fs::read_to_string(&fpath)
            .with_context(|| format!("reading queue file {}", fpath.display()))?;
        let rows = serde_json::from_str(&text)
            .with_context(|| format!("parsing queue file {}", fpath.display()))?;
        Ok(rows)
    }

    /// Names of every persisted queue.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = match std::fs::read_dir(&self.dpath) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            let fname = entry.file_name();
            let fname = fname.to_string_lossy();
            if let Some(name) = fname.strip_suffix(QUEUE_SUFFIX) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn save(&self, fpath: &Path, rows: &[QueueRow]) -> Result<()> {
        let text = serde_json::to_string_pretty(rows)
            .context("serialising queue rows")?;
        std::fs::write(fpath, text)
            .with_context(|| format!("writing queue file {}", fpath.display()))?;
        Ok(())
    }
}
