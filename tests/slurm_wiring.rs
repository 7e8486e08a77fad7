// tests/slurm_wiring.rs
//
// The sbatch driver is plain text; these tests check dependency wiring,
// flag emission, and ordering without needing a slurm controller.

mod common;

use common::{init_tracing, TestResult};

use cmdq::backend::slurm::SlurmBackend;
use cmdq::backend::SlurmOptions;
use cmdq::queue::QueueOptions;
use cmdq::session::{SessionDirs, SessionId};
use cmdq::{GraphModel, JobSpec};

fn session(tmp: &tempfile::TempDir) -> SessionDirs {
    SessionDirs::new(tmp.path(), SessionId::new("sq"))
}

/// Slice the full `JOB_NNN=$(sbatch ...)` block for one job out of the
/// driver text, continuation lines included.
fn sbatch_block(text: &str, job: &str) -> String {
    let needle = format!("--job-name=\"{job}\"");
    let pos = text
        .find(&needle)
        .unwrap_or_else(|| panic!("no sbatch invocation for {job}"));
    let start = text[..pos].rfind("\nJOB_").map(|p| p + 1).unwrap_or(0);
    let end = text[pos..]
        .find("\nJOB_")
        .map(|p| pos + p)
        .unwrap_or(text.len());
    text[start..end].to_string()
}

fn driver_text(
    model: &GraphModel,
    session: &SessionDirs,
    queue_opts: &QueueOptions,
    header_commands: &[String],
    opts: &SlurmOptions,
) -> String {
    let backend = SlurmBackend {
        model,
        session,
        queue_opts,
        header_commands,
        opts,
    };
    backend.finalize_text().unwrap()
}

#[test]
fn dependency_edges_become_afterok_lists() -> TestResult {
    init_tracing();

    // a; b depends a; c; d depends [b, c]
    let tmp = tempfile::tempdir()?;
    let mut model = GraphModel::new("sq");
    model.submit(JobSpec::new("echo a").name("a")).unwrap();
    model.submit(JobSpec::new("echo b").name("b").after("a")).unwrap();
    model.submit(JobSpec::new("echo c").name("c")).unwrap();
    model.submit(JobSpec::new("echo d").name("d").after("b").after("c")).unwrap();

    let text = driver_text(
        &model,
        &session(&tmp),
        &QueueOptions::default(),
        &[],
        &SlurmOptions::default(),
    );

    // One sbatch invocation spans several continuation lines; slice out the
    // whole `JOB_NNN=$(...)` block for a job.
    let block_of = |job: &str| sbatch_block(&text, job);

    assert!(block_of("b").contains("--dependency=afterok:${JOB_000}"));
    assert!(block_of("d").contains("--dependency=afterok:${JOB_001}:${JOB_002}"));
    assert!(!block_of("a").contains("--dependency"));
    assert!(!block_of("c").contains("--dependency"));

    // Every variable reference must appear textually after its definition.
    for var in ["JOB_000", "JOB_001", "JOB_002", "JOB_003"] {
        let def = text.find(&format!("{var}=$(")).expect("definition exists");
        if let Some(reference) = text.find(&format!("${{{var}}}")) {
            assert!(def < reference, "{var} referenced before definition");
        }
    }
    Ok(())
}

#[test]
fn driver_lines_are_in_topological_order() -> TestResult {
    init_tracing();

    let tmp = tempfile::tempdir()?;
    let mut model = GraphModel::new("sq");
    // Submit out of dependency order; emission must still be topological.
    model.submit(JobSpec::new("echo late").name("late").after("early")).unwrap();
    model.submit(JobSpec::new("echo early").name("early")).unwrap();

    let text = driver_text(
        &model,
        &session(&tmp),
        &QueueOptions::default(),
        &[],
        &SlurmOptions::default(),
    );

    let early = text.find("--job-name=\"early\"").unwrap();
    let late = text.find("--job-name=\"late\"").unwrap();
    assert!(early < late);
    Ok(())
}

#[test]
fn resource_hints_become_sbatch_flags() -> TestResult {
    init_tracing();

    let tmp = tempfile::tempdir()?;
    let mut model = GraphModel::new("sq");
    model
        .submit(
            JobSpec::new("train.py")
                .name("train")
                .cpus(8)
                .gpus(2)
                .mem("8GB")
                .partition("gpu-long")
                .begin("now+60"),
        )
        .unwrap();

    let text = driver_text(
        &model,
        &session(&tmp),
        &QueueOptions::default(),
        &[],
        &SlurmOptions::default(),
    );

    assert!(text.contains("--cpus-per-task=8"));
    assert!(text.contains("--gpus=2"));
    assert!(text.contains("--mem=8000"));
    assert!(text.contains("--partition=gpu-long"));
    assert!(text.contains("--begin=now+60"));
    assert!(text.contains("--parsable"));
    assert!(text.contains("--output=\""));
    Ok(())
}

#[test]
fn wrap_command_is_single_quoted() -> TestResult {
    init_tracing();

    let tmp = tempfile::tempdir()?;
    let mut model = GraphModel::new("sq");
    model
        .submit(JobSpec::new("echo 'it works' && true").name("quoted"))
        .unwrap();

    let text = driver_text(
        &model,
        &session(&tmp),
        &QueueOptions::default(),
        &[],
        &SlurmOptions::default(),
    );

    assert!(text.contains("--wrap 'echo '\\''it works'\\'' && true'"));
    Ok(())
}

#[test]
fn passthrough_options_and_account_are_emitted() -> TestResult {
    init_tracing();

    let tmp = tempfile::tempdir()?;
    let mut model = GraphModel::new("sq");
    model.submit(JobSpec::new("true").name("a")).unwrap();

    let opts = SlurmOptions {
        account: Some("project123".to_string()),
        sbatch_options: vec![("qos".to_string(), "high".to_string())],
        ..SlurmOptions::default()
    };
    let text = driver_text(&model, &session(&tmp), &QueueOptions::default(), &[], &opts);

    assert!(text.contains("--account=\"project123\""));
    assert!(text.contains("--qos=\"high\""));
    Ok(())
}

#[test]
fn header_commands_prefix_every_submission() -> TestResult {
    init_tracing();

    let tmp = tempfile::tempdir()?;
    let mut model = GraphModel::new("sq");
    model.submit(JobSpec::new("true").name("a")).unwrap();
    model.submit(JobSpec::new("true").name("b")).unwrap();

    let headers = vec!["module load python".to_string()];
    let text = driver_text(
        &model,
        &session(&tmp),
        &QueueOptions::default(),
        &headers,
        &SlurmOptions::default(),
    );

    assert_eq!(text.matches("module load python && sbatch").count(), 2);
    Ok(())
}

#[test]
fn excluded_tags_are_omitted_from_the_driver() -> TestResult {
    init_tracing();

    let tmp = tempfile::tempdir()?;
    let mut model = GraphModel::new("sq");
    model.submit(JobSpec::new("true").name("keep")).unwrap();
    model
        .submit(JobSpec::new("true").name("drop").tag("boilerplate"))
        .unwrap();

    let queue_opts = QueueOptions {
        exclude_tags: vec!["boilerplate".to_string()],
        ..QueueOptions::default()
    };
    let text = driver_text(
        &model,
        &session(&tmp),
        &queue_opts,
        &[],
        &SlurmOptions::default(),
    );

    assert!(text.contains("--job-name=\"keep\""));
    assert!(!text.contains("--job-name=\"drop\""));
    Ok(())
}

#[test]
fn queue_default_partition_applies_when_job_has_none() -> TestResult {
    init_tracing();

    let tmp = tempfile::tempdir()?;
    let mut model = GraphModel::new("sq");
    model.submit(JobSpec::new("true").name("plain")).unwrap();
    model
        .submit(JobSpec::new("true").name("pinned").partition("special"))
        .unwrap();

    let opts = SlurmOptions {
        partition: Some("default-part".to_string()),
        ..SlurmOptions::default()
    };
    let text = driver_text(&model, &session(&tmp), &QueueOptions::default(), &[], &opts);

    assert!(sbatch_block(&text, "plain").contains("--partition=default-part"));
    assert!(sbatch_block(&text, "pinned").contains("--partition=special"));
    Ok(())
}
