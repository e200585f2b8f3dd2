//! End-to-end job lifecycle tests
//!
//! Drive the real gateway, store, queue, executor, and sweeper with a
//! stub shell script standing in for the colbuilder tool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use colforge_core::domain::job::{JobRecord, JobStatus, JobType, Transition};
use colforge_core::domain::params::{DensityChangeParams, JobParameters};
use colforge_core::dto::StatusReport;
use colforge_worker::config::Config;
use colforge_worker::executor::JobExecutor;
use colforge_worker::gateway::SubmissionGateway;
use colforge_worker::queue::{CancelOutcome, TaskPayload, TaskQueue};
use colforge_worker::scheduler::ExpirySweeper;
use colforge_worker::store::JobStore;
use colforge_worker::store::memory::MemoryJobStore;

struct Harness {
    _dir: tempfile::TempDir,
    workdir_base: PathBuf,
    store: Arc<MemoryJobStore>,
    queue: TaskQueue,
    gateway: SubmissionGateway,
    config: Config,
}

fn install_stub(dir: &Path, script_body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("colbuilder-stub");
    std::fs::write(&path, format!("#!/bin/sh\n{script_body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn harness(script_body: &str) -> Harness {
    harness_with(script_body, |_| {})
}

fn harness_with(script_body: &str, tweak: impl FnOnce(&mut Config)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let stub = install_stub(dir.path(), script_body);

    let mut config = Config::default();
    config.colbuilder_path = stub;
    config.workdir_base = dir.path().join("jobs");
    config.soft_time_limit = Duration::from_secs(10);
    config.hard_time_limit = Duration::from_secs(20);
    config.termination_grace = Duration::from_millis(200);
    config.retry.base_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    tweak(&mut config);
    std::fs::create_dir_all(&config.workdir_base).unwrap();

    let store = Arc::new(MemoryJobStore::new());
    let dyn_store: Arc<dyn JobStore> = store.clone();
    let executor = Arc::new(JobExecutor::new(&config));
    let queue = TaskQueue::start(&config, dyn_store.clone(), executor);
    let gateway = SubmissionGateway::new(dyn_store, queue.clone());

    Harness {
        workdir_base: config.workdir_base.clone(),
        _dir: dir,
        store,
        queue,
        gateway,
        config,
    }
}

async fn wait_for_status(
    gateway: &SubmissionGateway,
    job_id: uuid::Uuid,
    expected: JobStatus,
) -> StatusReport {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let report = gateway.get_status(job_id).await.unwrap();
        if report.status == expected {
            return report;
        }
        if tokio::time::Instant::now() > deadline {
            panic!(
                "job {job_id} never reached {expected:?}, last seen {:?} ({:?})",
                report.status, report.error_message
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn valid_chain() -> String {
    "GPA".repeat(334).chars().take(1000).collect()
}

// A valid custom-chain molecule job runs to completion with one
// registered pdb artifact.
#[tokio::test]
async fn test_custom_molecule_job_completes_with_pdb_artifact() {
    let h = harness("echo structure > molecule.pdb");

    let job_id = h
        .gateway
        .submit(
            JobType::Molecule,
            "user-1",
            json!({
                "input": {
                    "custom": {
                        "chain_a": valid_chain(),
                        "chain_b": valid_chain(),
                        "chain_c": valid_chain(),
                    }
                }
            }),
            "custom molecule",
        )
        .await
        .unwrap();

    let report = wait_for_status(&h.gateway, job_id, JobStatus::Completed).await;
    assert_eq!(report.progress, 100);
    assert_eq!(report.output_file_kinds, vec!["pdb".to_string()]);
    assert!(report.duration_seconds.is_some());

    // Custom chains were staged as a fasta input
    let record = h.store.find_by_id(job_id).await.unwrap();
    assert!(record.input_files.contains_key("fasta"));
    h.queue.shutdown();
}

// An out-of-range contact distance fails validation before any
// subprocess is spawned; Queued goes straight to Failed.
#[tokio::test]
async fn test_invalid_contact_distance_fails_before_spawn() {
    let h = harness("touch spawned; echo structure > fibril.pdb");

    let job_id = h
        .gateway
        .submit(
            JobType::Fibril,
            "user-1",
            json!({
                "input_pdb": "/data/molecule.pdb",
                "contact_distance": 0.05,
                "fibril_length": 100.0,
            }),
            "bad fibril",
        )
        .await
        .unwrap();

    let report = wait_for_status(&h.gateway, job_id, JobStatus::Failed).await;
    assert!(report.started_at.is_none());
    let error = report.error_message.unwrap();
    assert!(error.contains("validation"), "{error}");
    assert!(error.contains("contact_distance"), "{error}");

    // The worker never created a workdir, let alone ran the tool
    assert!(!h.workdir_base.join(job_id.to_string()).exists());
    h.queue.shutdown();
}

// First attempt exits 1, second succeeds; one retry is recorded and
// the job completes.
#[tokio::test]
async fn test_transient_tool_failure_is_retried_to_completion() {
    let h = harness(
        "if [ ! -f attempted ]; then touch attempted; echo transient >&2; exit 1; fi\n\
         echo structure > modified.pdb",
    );

    let job_id = h
        .gateway
        .submit(
            JobType::DensityChange,
            "user-1",
            json!({ "input_pdb": "/data/in.pdb", "target_density": 40.0 }),
            "flaky density run",
        )
        .await
        .unwrap();

    let report = wait_for_status(&h.gateway, job_id, JobStatus::Completed).await;
    assert_eq!(report.output_file_kinds, vec!["pdb".to_string()]);

    let record = h.store.find_by_id(job_id).await.unwrap();
    assert_eq!(record.retry_count, 1);
    h.queue.shutdown();
}

// A tool that always fails exhausts the retry budget and ends Failed
// with the stderr in the message.
#[tokio::test]
async fn test_persistent_tool_failure_exhausts_budget() {
    let h = harness("echo 'bad geometry' >&2; exit 1");

    let job_id = h
        .gateway
        .submit(
            JobType::DensityChange,
            "user-1",
            json!({ "input_pdb": "/data/in.pdb", "target_density": 40.0 }),
            "doomed density run",
        )
        .await
        .unwrap();

    let report = wait_for_status(&h.gateway, job_id, JobStatus::Failed).await;
    let error = report.error_message.unwrap();
    assert!(error.contains("bad geometry"), "{error}");

    let record = h.store.find_by_id(job_id).await.unwrap();
    assert_eq!(record.retry_count, h.config.retry.max_retries);
    h.queue.shutdown();
}

// Cancelling a running job reaches Cancelled immediately, even though
// the subprocess ignores SIGTERM until the forced kill.
#[tokio::test]
async fn test_cancel_running_job_with_sigterm_ignoring_tool() {
    let h = harness("trap '' TERM\nsleep 30");

    let job_id = h
        .gateway
        .submit(
            JobType::DensityChange,
            "user-1",
            json!({ "input_pdb": "/data/in.pdb", "target_density": 40.0 }),
            "long density run",
        )
        .await
        .unwrap();

    wait_for_status(&h.gateway, job_id, JobStatus::Running).await;

    let outcome = h.gateway.cancel(job_id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Cancelled);

    let report = h.gateway.get_status(job_id).await.unwrap();
    assert_eq!(report.status, JobStatus::Cancelled);
    assert_eq!(report.error_message.as_deref(), Some("cancelled by user"));
    assert!(!report.can_cancel);

    // A second cancel is a typed no, not an error
    let outcome = h.gateway.cancel(job_id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::NotCancellable(JobStatus::Cancelled));
    h.queue.shutdown();
}

// The sweep reclaims an over-retention job once; the second pass is a
// no-op.
#[tokio::test]
async fn test_expiry_sweep_reclaims_once() {
    let h = harness("echo structure > modified.pdb");

    let job_id = h
        .gateway
        .submit(
            JobType::DensityChange,
            "user-1",
            json!({ "input_pdb": "/data/in.pdb", "target_density": 40.0 }),
            "short-lived job",
        )
        .await
        .unwrap();
    wait_for_status(&h.gateway, job_id, JobStatus::Completed).await;

    let workdir = h.workdir_base.join(job_id.to_string());
    assert!(workdir.exists());

    let dyn_store: Arc<dyn JobStore> = h.store.clone();
    let sweeper = ExpirySweeper::new(
        dyn_store,
        h.workdir_base.clone(),
        Duration::ZERO,
        Duration::from_secs(3600),
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    let stats = sweeper.sweep().await;
    assert_eq!(stats.expired, 1);

    let report = h.gateway.get_status(job_id).await.unwrap();
    assert_eq!(report.status, JobStatus::Expired);
    assert!(report.output_file_kinds.is_empty());
    assert!(!workdir.exists());

    let again = sweeper.sweep().await;
    assert_eq!(again.expired, 0);
    h.queue.shutdown();
}

// Manual cleanup goes through the maintenance lane and ends Expired.
#[tokio::test]
async fn test_manual_cleanup_of_completed_job() {
    let h = harness("echo structure > modified.pdb");

    let job_id = h
        .gateway
        .submit(
            JobType::DensityChange,
            "user-1",
            json!({ "input_pdb": "/data/in.pdb", "target_density": 40.0 }),
            "cleanup target",
        )
        .await
        .unwrap();
    wait_for_status(&h.gateway, job_id, JobStatus::Completed).await;

    h.gateway.cleanup(job_id).await.unwrap();
    let report = wait_for_status(&h.gateway, job_id, JobStatus::Expired).await;
    assert!(report.output_file_kinds.is_empty());

    // Idempotent once expired
    h.gateway.cleanup(job_id).await.unwrap();
    h.queue.shutdown();
}

// Cleanup of an unfinished job is refused.
#[tokio::test]
async fn test_cleanup_refused_while_running() {
    let h = harness("sleep 30");

    let job_id = h
        .gateway
        .submit(
            JobType::DensityChange,
            "user-1",
            json!({ "input_pdb": "/data/in.pdb", "target_density": 40.0 }),
            "still running",
        )
        .await
        .unwrap();
    wait_for_status(&h.gateway, job_id, JobStatus::Running).await;

    let err = h.gateway.cleanup(job_id).await.unwrap_err();
    assert!(err.to_string().contains("cannot be cleaned up"));

    h.gateway.cancel(job_id).await.unwrap();
    h.queue.shutdown();
}

// A malformed submission never creates a record.
#[tokio::test]
async fn test_unknown_field_rejected_without_creating_job() {
    let h = harness("echo structure > modified.pdb");

    let err = h
        .gateway
        .submit(
            JobType::DensityChange,
            "user-1",
            json!({ "input_pdb": "/data/in.pdb", "target_density": 40.0, "solvent": "tip3p" }),
            "bad payload",
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("density_change"));

    assert!(h.gateway.list_jobs("user-1").await.unwrap().is_empty());
    h.queue.shutdown();
}

// Listings are scoped to the requesting principal.
#[tokio::test]
async fn test_list_jobs_scoped_to_principal() {
    let h = harness("echo structure > modified.pdb");

    let mine = h
        .gateway
        .submit(
            JobType::DensityChange,
            "user-1",
            json!({ "input_pdb": "/data/in.pdb", "target_density": 40.0 }),
            "mine",
        )
        .await
        .unwrap();
    h.gateway
        .submit(
            JobType::DensityChange,
            "user-2",
            json!({ "input_pdb": "/data/in.pdb", "target_density": 40.0 }),
            "theirs",
        )
        .await
        .unwrap();

    let listed = h.gateway.list_jobs("user-1").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, mine);
    h.queue.shutdown();
}

fn density_record() -> JobRecord {
    JobRecord::new(
        "user-1",
        JobType::DensityChange,
        JobParameters::DensityChange(DensityChangeParams {
            input_pdb: "/data/in.pdb".to_string(),
            target_density: 40.0,
        }),
        "recovery target",
    )
}

// Recovering a job lost mid-run charges that attempt against the
// retry budget: with a budget of one, the redelivered attempt is the
// last one.
#[tokio::test]
async fn test_recovered_run_counts_against_retry_budget() {
    let h = harness_with("echo transient >&2; exit 1", |config| {
        config.retry.max_retries = 1;
    });

    // A job a previous worker died while running
    let job = density_record();
    let job_id = job.id;
    h.store.create(job).await.unwrap();
    h.store.transition(job_id, Transition::Dispatch).await.unwrap();

    let recovered = h.queue.recover().await.unwrap();
    assert_eq!(recovered, 1);

    let report = wait_for_status(&h.gateway, job_id, JobStatus::Failed).await;
    assert!(report.error_message.is_some());

    // One interrupted run plus one redelivery, nothing beyond the budget
    let record = h.store.find_by_id(job_id).await.unwrap();
    assert_eq!(record.retry_count, 1);
    h.queue.shutdown();
}

// Cancellation is keyed by job id: even when no queue handle was ever
// persisted on the record, a running subprocess is still signalled
// and dies before producing output.
#[tokio::test]
async fn test_cancel_signals_subprocess_without_persisted_handle() {
    let h = harness("sleep 2\necho structure > modified.pdb");

    let job = density_record();
    let job_id = job.id;
    h.store.create(job).await.unwrap();
    // Enqueue directly; queue_handle stays None on the record
    h.queue
        .enqueue(TaskPayload::Execute { job_id, attempt: 0 })
        .await
        .unwrap();

    wait_for_status(&h.gateway, job_id, JobStatus::Running).await;
    let outcome = h.gateway.cancel(job_id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Cancelled);

    // Give the stub time to have finished, had it not been killed
    tokio::time::sleep(Duration::from_secs(3)).await;
    let report = h.gateway.get_status(job_id).await.unwrap();
    assert_eq!(report.status, JobStatus::Cancelled);
    assert!(
        !h.workdir_base
            .join(job_id.to_string())
            .join("modified.pdb")
            .exists()
    );
    h.queue.shutdown();
}
