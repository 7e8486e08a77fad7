// src/monitor.rs

//! Plain-text progress monitor.
//!
//! The monitor is an external consumer of the `job_info/` directory: it
//! only reads the snapshots produced by [`crate::state::StateReader`] (or
//! the slurm controller) and prints one aggregate line whenever the counts
//! change. The core deliberately stays free of any rendering library.

use std::time::Duration;

use tracing::debug;

use crate::queue::Queue;
use crate::state::StateCounts;

/// Poll the queue's state until every job is terminal, printing aggregate
/// progress lines along the way. Returns the final counts.
pub async fn monitor(queue: &Queue, refresh_rate: f64) -> StateCounts {
    let refresh = Duration::from_secs_f64(refresh_rate.max(0.05));
    let mut last_line = String::new();
    loop {
        let snapshot = queue.read_state().await;
        let counts = StateCounts::tally(&snapshot);
        let line = format!(
            "passed={} failed={} skipped={} started={} pending={} total={}",
            counts.passed, counts.failed, counts.skipped, counts.started, counts.pending,
            counts.total,
        );
        if line != last_line {
            println!("[{}] {line}", queue.name());
            last_line = line;
        }
        if counts.is_done() {
            debug!(queue = %queue.name(), "monitor: all jobs terminal");
            return counts;
        }
        tokio::time::sleep(refresh).await;
    }
}
