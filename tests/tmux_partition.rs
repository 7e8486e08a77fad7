// tests/tmux_partition.rs
//
// Partitioning and worker-script content checks. None of these need a
// tmux binary: they inspect the generated artifacts only.

mod common;

use common::{init_tracing, TestResult};

use cmdq::backend::tmux::TmuxBackend;
use cmdq::backend::TmuxOptions;
use cmdq::queue::QueueOptions;
use cmdq::session::{SessionDirs, SessionId};
use cmdq::types::OnFail;
use cmdq::{GraphModel, JobSpec};

fn session(tmp: &tempfile::TempDir) -> SessionDirs {
    SessionDirs::new(tmp.path(), SessionId::new("part"))
}

fn chain_plus_independents() -> GraphModel {
    // Tight chain a -> b -> c plus three independents d, e, f.
    let mut model = GraphModel::new("part");
    model.submit(JobSpec::new("echo a && sleep 0.1").name("a")).unwrap();
    model.submit(JobSpec::new("echo b").name("b").after("a")).unwrap();
    model.submit(JobSpec::new("echo c").name("c").after("b")).unwrap();
    model.submit(JobSpec::new("echo d").name("d")).unwrap();
    model.submit(JobSpec::new("echo e").name("e")).unwrap();
    model.submit(JobSpec::new("echo f").name("f")).unwrap();
    model
}

#[test]
fn chain_stays_on_one_worker() -> TestResult {
    init_tracing();

    let tmp = tempfile::tempdir()?;
    let model = chain_plus_independents();
    let session = session(&tmp);
    let queue_opts = QueueOptions::default();
    let opts = TmuxOptions {
        size: 2,
        ..TmuxOptions::default()
    };
    let backend = TmuxBackend {
        model: &model,
        session: &session,
        queue_opts: &queue_opts,
        header_commands: &[],
        opts: &opts,
    };

    let workers = backend.partition()?;
    assert_eq!(workers.len(), 2);

    let names: Vec<Vec<&str>> = workers
        .iter()
        .map(|jobs| jobs.iter().map(|&id| model.job(id).name.as_str()).collect())
        .collect();
    assert_eq!(names[0], vec!["a", "b", "c"]);
    assert_eq!(names[1], vec!["d", "e", "f"]);

    // No cross-worker edges here, so no wait loops anywhere.
    let scripts = backend.finalize_scripts()?;
    for (fpath, text) in &scripts {
        if !fpath.to_string_lossy().contains("bookkeeper") {
            assert!(!text.contains("until ["), "unexpected wait in {}", fpath.display());
        }
    }
    Ok(())
}

#[test]
fn partition_is_a_disjoint_cover_of_the_job_set() -> TestResult {
    init_tracing();

    let tmp = tempfile::tempdir()?;
    let mut model = GraphModel::new("part");
    for i in 0..13 {
        let mut spec = JobSpec::new(format!("echo {i}")).name(format!("job{i}"));
        if i >= 5 {
            spec = spec.after(format!("job{}", i % 5));
        }
        model.submit(spec).unwrap();
    }
    let session = session(&tmp);
    let queue_opts = QueueOptions::default();
    let opts = TmuxOptions {
        size: 4,
        ..TmuxOptions::default()
    };
    let backend = TmuxBackend {
        model: &model,
        session: &session,
        queue_opts: &queue_opts,
        header_commands: &[],
        opts: &opts,
    };

    let workers = backend.partition()?;
    let mut seen: Vec<usize> = workers.iter().flatten().copied().collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..13).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn cross_worker_edges_become_wait_loops() -> TestResult {
    init_tracing();

    // Diamond: a -> {b, c} -> d with two workers forces at least one
    // cross-worker edge into d's guard.
    let tmp = tempfile::tempdir()?;
    let mut model = GraphModel::new("part");
    model.submit(JobSpec::new("true").name("a")).unwrap();
    model.submit(JobSpec::new("true").name("b").after("a")).unwrap();
    model.submit(JobSpec::new("true").name("c").after("a")).unwrap();
    model.submit(JobSpec::new("true").name("d").after("b").after("c")).unwrap();

    let session = session(&tmp);
    let queue_opts = QueueOptions::default();
    let opts = TmuxOptions {
        size: 2,
        ..TmuxOptions::default()
    };
    let backend = TmuxBackend {
        model: &model,
        session: &session,
        queue_opts: &queue_opts,
        header_commands: &[],
        opts: &opts,
    };

    let scripts = backend.finalize_scripts()?;
    let worker_texts: Vec<&String> = scripts
        .iter()
        .filter(|(fpath, _)| !fpath.to_string_lossy().contains("bookkeeper"))
        .map(|(_, text)| text)
        .collect();

    let total_waits: usize = worker_texts
        .iter()
        .map(|text| text.matches("until [").count())
        .sum();
    assert!(total_waits >= 1, "diamond across two workers needs a wait loop");

    // The wait must watch all three terminal markers of the dependency.
    let waiting = worker_texts
        .iter()
        .find(|text| text.contains("until ["))
        .unwrap();
    let wait_line = waiting.lines().find(|l| l.contains("until [")).unwrap();
    assert!(wait_line.contains(".pass"));
    assert!(wait_line.contains(".fail"));
    assert!(wait_line.contains(".skip"));
    Ok(())
}

#[test]
fn bookkeeper_polls_until_all_jobs_are_terminal() -> TestResult {
    init_tracing();

    let tmp = tempfile::tempdir()?;
    let model = chain_plus_independents();
    let session = session(&tmp);
    let queue_opts = QueueOptions::default();
    let opts = TmuxOptions {
        size: 2,
        refresh_rate: 0.4,
        ..TmuxOptions::default()
    };
    let backend = TmuxBackend {
        model: &model,
        session: &session,
        queue_opts: &queue_opts,
        header_commands: &[],
        opts: &opts,
    };

    let scripts = backend.finalize_scripts()?;
    let (fpath, text) = scripts.last().unwrap();
    assert!(fpath.to_string_lossy().contains("bookkeeper"));
    assert!(text.contains("_CMDQ_TOTAL=6"));
    assert!(text.contains("cmdq progress:"));
    assert!(text.contains("sleep 0.40"));
    // The bookkeeper is a plain poller: no guards, no status files of its
    // own.
    assert!(!text.contains("### Command"));
    Ok(())
}

#[test]
fn gres_assigns_gpus_per_worker() -> TestResult {
    init_tracing();

    let tmp = tempfile::tempdir()?;
    let mut model = GraphModel::new("part");
    model.submit(JobSpec::new("true").name("a")).unwrap();
    model.submit(JobSpec::new("true").name("b")).unwrap();

    let session = session(&tmp);
    let queue_opts = QueueOptions::default();
    let opts = TmuxOptions {
        size: 2,
        gres: vec![0, 1],
        ..TmuxOptions::default()
    };
    let backend = TmuxBackend {
        model: &model,
        session: &session,
        queue_opts: &queue_opts,
        header_commands: &[],
        opts: &opts,
    };

    let scripts = backend.finalize_scripts()?;
    let worker_texts: Vec<&String> = scripts
        .iter()
        .filter(|(fpath, _)| !fpath.to_string_lossy().contains("bookkeeper"))
        .map(|(_, text)| text)
        .collect();
    assert!(worker_texts[0].contains("export CUDA_VISIBLE_DEVICES=\"0\""));
    assert!(worker_texts[1].contains("export CUDA_VISIBLE_DEVICES=\"1\""));
    Ok(())
}

#[test]
fn onfail_keep_leaves_a_post_mortem_trailer() -> TestResult {
    init_tracing();

    let tmp = tempfile::tempdir()?;
    let mut model = GraphModel::new("part");
    model.submit(JobSpec::new("true").name("a")).unwrap();

    let session = session(&tmp);
    let queue_opts = QueueOptions::default();

    for (on_fail, expected) in [(OnFail::Keep, true), (OnFail::Kill, false)] {
        let opts = TmuxOptions {
            size: 1,
            on_fail,
            ..TmuxOptions::default()
        };
        let backend = TmuxBackend {
            model: &model,
            session: &session,
            queue_opts: &queue_opts,
            header_commands: &[],
            opts: &opts,
        };
        let scripts = backend.finalize_scripts()?;
        let (_, worker) = &scripts[0];
        assert_eq!(worker.contains("exec bash"), expected, "on_fail={on_fail:?}");
    }
    Ok(())
}

#[test]
fn worker_scripts_follow_the_session_naming_scheme() -> TestResult {
    init_tracing();

    let tmp = tempfile::tempdir()?;
    let model = chain_plus_independents();
    let session = session(&tmp);
    let queue_opts = QueueOptions::default();
    let opts = TmuxOptions {
        size: 2,
        ..TmuxOptions::default()
    };
    let backend = TmuxBackend {
        model: &model,
        session: &session,
        queue_opts: &queue_opts,
        header_commands: &[],
        opts: &opts,
    };

    let fpaths = backend.write()?;
    for (k, fpath) in fpaths[..fpaths.len() - 1].iter().enumerate() {
        let fname = fpath.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(fname, format!("queue_part_{}_{}.sh", k, session.id()));
        assert!(fpath.exists());
    }
    Ok(())
}
