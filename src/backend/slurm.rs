// src/backend/slurm.rs

//! The slurm backend: emits a driver script that submits one `sbatch` call
//! per job in topological order, wiring dependency edges as
//! `--dependency=afterok:` lists over captured job-id variables.
//!
//! Emission order guarantees that every `JOB_NNN` variable referenced in a
//! dependency is defined earlier in the driver.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::backend::serial::{included_order, write_script};
use crate::emit::shell_single_quote;
use crate::errors::{CmdqError, Result};
use crate::graph::{GraphModel, Job, JobId};
use crate::queue::{QueueOptions, RunOptions, RunOutcome};
use crate::session::SessionDirs;
use crate::state::JobStatus;
use crate::types::JobState;

/// Options specific to the slurm backend.
///
/// The typed fields cover the flags this tool understands; anything else
/// can be passed through `sbatch_options`, which is emitted verbatim as
/// `--key="value"` pairs (the escape hatch for slurm-version drift).
#[derive(Debug, Clone, Default)]
pub struct SlurmOptions {
    /// Default partition for jobs that carry no partition hint.
    pub partition: Option<String>,
    pub account: Option<String>,
    /// Passthrough sbatch key/value options, appended to every job.
    pub sbatch_options: Vec<(String, String)>,
    /// Poll interval in seconds for the blocking monitor.
    pub refresh_rate: f64,
}

pub struct SlurmBackend<'a> {
    pub model: &'a GraphModel,
    pub session: &'a SessionDirs,
    pub queue_opts: &'a QueueOptions,
    pub header_commands: &'a [String],
    pub opts: &'a SlurmOptions,
}

impl SlurmBackend<'_> {
    /// Render the sbatch driver script.
    pub fn finalize_text(&self) -> Result<String> {
        let included = included_order(self.model, self.queue_opts)?;
        let included_set: HashSet<JobId> = included.iter().copied().collect();

        let mut lines = vec![
            "#!/bin/bash".to_string(),
            format!("# sbatch driver generated by cmdq {}", env!("CARGO_PKG_VERSION")),
            format!("mkdir -p \"{}\"", self.session.log_dpath().display()),
        ];

        let mut varnames: HashMap<JobId, String> = HashMap::new();
        for &id in &included {
            let job = self.model.job(id);
            let deps: Vec<String> = self
                .model
                .resolved_deps(id)?
                .into_iter()
                .filter(|dep| included_set.contains(dep))
                .map(|dep| varnames[&dep].clone())
                .collect();
            let args = self.sbatch_args(job, &deps)?;
            let mut command = args.join(" \\\n    ");
            if !self.header_commands.is_empty() {
                command = format!("{} && {}", self.header_commands.join(" && "), command);
            }

            let varname = format!("JOB_{:03}", varnames.len());
            lines.push(format!("{varname}=$({command})"));
            varnames.insert(id, varname);
        }

        lines.push(String::new());
        Ok(lines.join("\n"))
    }

    fn sbatch_args(&self, job: &Job, dep_vars: &[String]) -> Result<Vec<String>> {
        let mut args = vec!["sbatch".to_string()];
        args.push(format!("--job-name=\"{}\"", job.name));
        if let Some(cpus) = job.cpus {
            args.push(format!("--cpus-per-task={cpus}"));
        }
        if let Some(ref mem) = job.mem {
            args.push(format!("--mem={}", parse_mem_megabytes(mem)?));
        }
        if let Some(gpus) = job.gpus {
            args.push(format!("--gpus={gpus}"));
        }
        if let Some(partition) = job.partition.as_ref().or(self.opts.partition.as_ref()) {
            args.push(format!("--partition={partition}"));
        }
        if let Some(ref begin) = job.begin {
            args.push(format!("--begin={begin}"));
        }
        if let Some(ref account) = self.opts.account {
            args.push(format!("--account=\"{account}\""));
        }
        args.push(format!(
            "--output=\"{}\"",
            self.session.job_paths(&job.name).log_fpath.display()
        ));
        for (key, value) in &self.opts.sbatch_options {
            args.push(format!("--{}=\"{}\"", key.replace('_', "-"), value));
        }
        if !dep_vars.is_empty() {
            let id_list = dep_vars
                .iter()
                .map(|var| format!("${{{var}}}"))
                .collect::<Vec<_>>()
                .join(":");
            args.push(format!("\"--dependency=afterok:{id_list}\""));
        }
        args.push(format!("--wrap {}", shell_single_quote(&job.command)));
        args.push("--parsable".to_string());
        Ok(args)
    }

    /// Materialise the driver under the session directory.
    pub fn write(&self) -> Result<PathBuf> {
        let text = self.finalize_text()?;
        self.session
            .ensure_dirs()
            .with_context(|| format!("creating session directory {}", self.session.root().display()))?;
        let fpath = self.session.entry_fpath();
        write_script(&fpath, &text)?;
        debug!(script = %fpath.display(), "wrote sbatch driver");
        Ok(fpath)
    }

    /// Submit everything via the driver and, when blocking, poll the slurm
    /// controller until every job left the queue.
    pub async fn run(&self, run: &RunOptions) -> Result<RunOutcome> {
        if !is_available().await {
            return Err(CmdqError::BackendUnavailable("slurm".to_string()));
        }

        let fpath = self.write()?;
        info!(script = %fpath.display(), "submitting slurm queue");
        let status = Command::new("bash")
            .arg(&fpath)
            .status()
            .await
            .with_context(|| format!("running sbatch driver {}", fpath.display()))?;
        if !status.success() {
            return Err(CmdqError::Other(anyhow!(
                "sbatch driver exited with {status}"
            )));
        }

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

        let refresh = Duration::from_secs_f64(if self.opts.refresh_rate > 0.0 {
            self.opts.refresh_rate
        } else {
            0.4
        });
        loop {
            let snapshot = self.read_state().await;
            let pending = snapshot
                .iter()
                .filter(|status| !status.state.is_terminal())
                .count();
            if pending == 0 {
                return Ok(RunOutcome::from_snapshot(&snapshot, None, None));
            }
            tokio::time::sleep(refresh).await;
        }
    }

    /// Snapshot job states from `squeue`, with `sacct` as the fallback for
    /// jobs that already left the queue. Controller hiccups read as
    /// "pending" rather than failing the monitor.
    pub async fn read_state(&self) -> Vec<JobStatus> {
        let names = self.model.real_job_names();
        let mut states: HashMap<String, JobState> = HashMap::new();

        for (name, state) in squeue_states().await {
            if names.contains(&name) {
                states.insert(name, state);
            }
        }

        if states.len() < names.len() {
            for (name, state) in sacct_states().await {
                if names.contains(&name) {
                    states.entry(name).or_insert(state);
                }
            }
        }

        names
            .into_iter()
            .map(|name| {
                let state = states.get(&name).copied().unwrap_or(JobState::Pending);
                JobStatus { name, state }
            })
            .collect()
    }

    /// `scancel` every tracked job by name.
    pub async fn kill(&self) -> Result<()> {
        for job in self.model.jobs() {
            let result = Command::new("scancel")
                .arg(format!("--name={}", job.name))
                .output()
                .await;
            if let Err(err) = result {
                warn!(job = %job.name, error = %err, "scancel failed");
            }
        }
        Ok(())
    }
}

/// True iff `sinfo -h` reports at least one node whose state is not
/// down/drained. Slurm appends markers like `*`, `~`, `#`, `%` to state
/// names depending on version; they are stripped before comparing.
pub async fn is_available() -> bool {
    let output = Command::new("sinfo").arg("-h").output().await;
    let Ok(output) = output else {
        return false;
    };
    if !output.status.success() {
        return false;
    }
    sinfo_has_usable_node(&String::from_utf8_lossy(&output.stdout))
}

/// Parse default `sinfo -h` output: PARTITION AVAIL TIMELIMIT NODES STATE
/// NODELIST.
pub(crate) fn sinfo_has_usable_node(text: &str) -> bool {
    text.lines().any(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(raw_state) = fields.get(4) else {
            return false;
        };
        let state = raw_state
            .trim_end_matches(|c: char| !c.is_ascii_alphabetic())
            .to_ascii_lowercase();
        !(state.starts_with("down") || state.starts_with("drain") || state.starts_with("drng"))
    })
}

/// Normalise a memory hint to megabytes, the unit sbatch expects for a
/// bare `--mem` value. Decimal units ("8GB" = 8000) and binary units
/// ("8GiB" = 8192) are both accepted; a bare integer is already megabytes.
pub fn parse_mem_megabytes(mem: &str) -> Result<u64> {
    let trimmed = mem.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (value_part, unit_part) = trimmed.split_at(split);

    let value: f64 = value_part
        .parse()
        .map_err(|_| CmdqError::Other(anyhow!("unparseable mem value '{mem}'")))?;

    let factor = match unit_part.trim().to_ascii_lowercase().as_str() {
        "" | "m" | "mb" => 1.0,
        "g" | "gb" => 1000.0,
        "t" | "tb" => 1_000_000.0,
        "mib" => 1.048_576,
        "gib" => 1024.0,
        "tib" => 1024.0 * 1024.0,
        other => {
            return Err(CmdqError::Other(anyhow!(
                "unknown mem unit '{other}' in '{mem}'"
            )))
        }
    };

    Ok((value * factor).round() as u64)
}

async fn squeue_states() -> Vec<(String, JobState)> {
    let output = Command::new("squeue")
        .args(["--me", "--noheader", "--format=%i %j %t"])
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
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (name, code) = (fields.get(1)?, fields.get(2)?);
            Some((name.to_string(), map_squeue_code(code)))
        })
        .collect()
}

fn map_squeue_code(code: &str) -> JobState {
    match code {
        "PD" | "CF" => JobState::Pending,
        "R" | "CG" | "S" => JobState::Started,
        "CD" => JobState::Passed,
        "F" | "TO" | "CA" | "NF" | "OOM" => JobState::Failed,
        _ => JobState::Started,
    }
}

async fn sacct_states() -> Vec<(String, JobState)> {
    let output = Command::new("sacct")
        .args(["--noheader", "--parsable2", "--format=JobID,JobName,State"])
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
        .filter_map(|line| {
            let mut fields = line.split('|');
            let _id = fields.next()?;
            let name = fields.next()?;
            let state = fields.next()?;
            Some((name.to_string(), map_sacct_state(state)))
        })
        .collect()
}

fn map_sacct_state(state: &str) -> JobState {
    let state = state.split_whitespace().next().unwrap_or(state);
    match state {
        "COMPLETED" => JobState::Passed,
        "FAILED" | "TIMEOUT" | "NODE_FAIL" | "OUT_OF_MEMORY" => JobState::Failed,
        s if s.starts_with("CANCELLED") => JobState::Failed,
        "PENDING" => JobState::Pending,
        _ => JobState::Started,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_normalisation() {
        assert_eq!(parse_mem_megabytes("512").unwrap(), 512);
        assert_eq!(parse_mem_megabytes("512MB").unwrap(), 512);
        assert_eq!(parse_mem_megabytes("8GB").unwrap(), 8000);
        assert_eq!(parse_mem_megabytes("8 GB").unwrap(), 8000);
        assert_eq!(parse_mem_megabytes("8GiB").unwrap(), 8192);
        assert_eq!(parse_mem_megabytes("1.5GB").unwrap(), 1500);
        assert!(parse_mem_megabytes("lots").is_err());
        assert!(parse_mem_megabytes("8XB").is_err());
    }

    #[test]
    fn sinfo_parsing_tolerates_state_markers() {
        // 19.x-style output with trailing markers on states.
        let all_down = "debug* up infinite 2 down* node[01-02]\n\
                        batch up infinite 1 drain~ node03\n";
        assert!(!sinfo_has_usable_node(all_down));

        let one_idle = "debug* up infinite 2 down* node[01-02]\n\
                        batch up infinite 1 idle node03\n";
        assert!(sinfo_has_usable_node(one_idle));

        let mixed = "batch up infinite 4 mix# node[10-13]\n";
        assert!(sinfo_has_usable_node(mixed));

        assert!(!sinfo_has_usable_node(""));
        assert!(!sinfo_has_usable_node("garbage\n"));
    }

    #[test]
    fn squeue_codes_map_to_states() {
        assert_eq!(map_squeue_code("PD"), JobState::Pending);
        assert_eq!(map_squeue_code("R"), JobState::Started);
        assert_eq!(map_squeue_code("CD"), JobState::Passed);
        assert_eq!(map_squeue_code("F"), JobState::Failed);
        assert_eq!(map_squeue_code("TO"), JobState::Failed);
        assert_eq!(map_squeue_code("CA"), JobState::Failed);
    }

    #[test]
    fn sacct_states_map_including_cancelled_by() {
        assert_eq!(map_sacct_state("COMPLETED"), JobState::Passed);
        assert_eq!(map_sacct_state("FAILED"), JobState::Failed);
        assert_eq!(map_sacct_state("CANCELLED by 1000"), JobState::Failed);
        assert_eq!(map_sacct_state("RUNNING"), JobState::Started);
    }
}
