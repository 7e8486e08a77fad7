// tests/tmux_end_to_end.rs
//
// Full tmux runs. These tests skip silently on hosts without a tmux
// binary; the partitioning and script-content logic is covered without
// tmux in tmux_partition.rs.

mod common;

use common::{init_tracing, with_timeout, TestResult};

use cmdq::backend::TmuxOptions;
use cmdq::{
    Backend, BackendKind, JobSpec, JobState, OnFail, RunOptions, SessionHandling,
};
use cmdq_test_utils::{temp_dpath, QueueBuilder};

fn quiet_tmux(size: usize) -> Backend {
    Backend::Tmux(TmuxOptions {
        size,
        on_fail: OnFail::Kill,
        session_handling: SessionHandling::Ignore,
        ..TmuxOptions::default()
    })
}

#[tokio::test]
async fn diamond_across_two_workers() -> TestResult {
    with_timeout(async {
        init_tracing();
        if !Backend::is_available(BackendKind::Tmux).await {
            eprintln!("tmux not available; skipping");
            return Ok(());
        }

        let tmp = temp_dpath();
        let queue = QueueBuilder::new("tmux-diamond")
            .dpath(tmp.path())
            .backend(quiet_tmux(2))
            .job(JobSpec::new("true").name("a"))
            .job(JobSpec::new("true").name("b").after("a"))
            .job(JobSpec::new("false").name("c").after("a"))
            .job(JobSpec::new("true").name("d").after("b").after("c"))
            .build();

        let outcome = queue.run(&RunOptions::default()).await?;
        assert_ne!(outcome.exit_code, 0);

        let snapshot = queue.read_state().await;
        let state_of = |name: &str| {
            snapshot
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.state)
                .unwrap()
        };
        assert_eq!(state_of("a"), JobState::Passed);
        assert_eq!(state_of("b"), JobState::Passed);
        assert_eq!(state_of("c"), JobState::Failed);
        assert_eq!(state_of("d"), JobState::Skipped);

        queue.kill().await?;
        Ok(())
    })
    .await
}

#[tokio::test]
async fn parallel_independents_all_pass() -> TestResult {
    with_timeout(async {
        init_tracing();
        if !Backend::is_available(BackendKind::Tmux).await {
            eprintln!("tmux not available; skipping");
            return Ok(());
        }

        let tmp = temp_dpath();
        let mut builder = QueueBuilder::new("tmux-par")
            .dpath(tmp.path())
            .backend(quiet_tmux(3));
        for i in 0..6 {
            builder = builder.job(JobSpec::new(format!("echo {i}")).name(format!("j{i}")));
        }
        let queue = builder.build();

        let outcome = queue.run(&RunOptions::default()).await?;
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.passed, 6);

        queue.kill().await?;
        Ok(())
    })
    .await
}
