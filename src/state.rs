// src/state.rs

//! Filesystem snapshots of per-job progress.
//!
//! The generated bash records terminal states as touch-files under
//! `job_info/`; this module folds them into a uniform snapshot for `run`
//! aggregation and the monitor. Readers must tolerate absent and
//! partially-written files: the decision tree below only tests existence,
//! so a half-written `.stat` simply reads as "started".

use crate::session::SessionDirs;
use crate::types::JobState;

/// Snapshot of one job's observable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub name: String,
    pub state: JobState,
}

/// Aggregate counts over a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub pending: usize,
    pub started: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
}

impl StateCounts {
    pub fn tally(statuses: &[JobStatus]) -> Self {
        let mut counts = StateCounts {
            total: statuses.len(),
            ..StateCounts::default()
        };
        for status in statuses {
            match status.state {
                JobState::Pending => counts.pending += 1,
                JobState::Started => counts.started += 1,
                JobState::Passed => counts.passed += 1,
                JobState::Failed => counts.failed += 1,
                JobState::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// True once every job has reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.passed + self.failed + self.skipped >= self.total
    }
}

/// Reads job status files for a fixed set of job names.
pub struct StateReader<'a> {
    session: &'a SessionDirs,
    names: Vec<String>,
}

impl<'a> StateReader<'a> {
    pub fn new(session: &'a SessionDirs, names: Vec<String>) -> Self {
        StateReader { session, names }
    }

    pub fn snapshot(&self) -> Vec<JobStatus> {
        self.names
            .iter()
            .map(|name| JobStatus {
                name: name.clone(),
                state: self.job_state(name),
            })
            .collect()
    }

    pub fn counts(&self) -> StateCounts {
        StateCounts::tally(&self.snapshot())
    }

    fn job_state(&self, name: &str) -> JobState {
        let paths = self.session.job_paths(name);
        if paths.pass_fpath.exists() {
            JobState::Passed
        } else if paths.fail_fpath.exists() {
            JobState::Failed
        } else if paths.skip_fpath.exists() {
            JobState::Skipped
        } else if paths.stat_fpath.exists() {
            JobState::Started
        } else {
            JobState::Pending
        }
    }
}
