//! `adcm` subcommands against a real snapshot file in a temporary data dir

use std::path::Path;
use std::sync::Arc;

use adcm_common::ErrorEnvelope;
use adcm_core::OpContext;
use adcm_core::testing::CLUSTER_BUNDLE;
use adcm_persistence::{JobStatus, ObjectRef, PrototypeType, TaskId};
use adcm_scheduler::{ExternalCommandRunner, RunActionRequest, Scheduler};
use adcm_server::commands;
use adcm_server::model::{Command, Configuration};
use config::Map;
use tempfile::TempDir;

fn configuration(dir: &Path, runner: &str) -> Configuration {
    let env: Map<String, String> = [
        ("ADCM_SECRET_KEY", "cli-test-secret"),
        ("ADCM_RUNNER_COMMAND", runner),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    Configuration::from_sources(&dir.join("absent.yml"), env, Some(dir)).unwrap()
}

fn initialized(runner: &str) -> (TempDir, Configuration) {
    let dir = tempfile::tempdir().unwrap();
    let configuration = configuration(dir.path(), runner);
    commands::init(&configuration).unwrap();
    (dir, configuration)
}

fn write_bundle(dir: &Path) -> std::path::PathBuf {
    let bundle_dir = dir.join("src-bundle");
    std::fs::create_dir_all(bundle_dir.join("playbooks")).unwrap();
    std::fs::write(bundle_dir.join("playbooks/probe.yaml"), "- hosts: all\n").unwrap();
    let manifest = bundle_dir.join("config.yaml");
    std::fs::write(&manifest, CLUSTER_BUNDLE).unwrap();
    manifest
}

fn code(err: &anyhow::Error) -> String {
    ErrorEnvelope::from_anyhow(err).code
}

// ==================== Init Tests ====================

/// Test init creates the layout and an empty snapshot, and is idempotent
#[tokio::test]
async fn test_init_creates_layout() {
    let dir = tempfile::tempdir().unwrap();
    let configuration = configuration(dir.path(), "true");

    let summary = commands::dispatch(&configuration, &Command::Init).await.unwrap();
    assert_eq!(summary["created"], true);
    for sub in ["run", "bundles", "download", "tmp", "file", "data"] {
        assert!(dir.path().join(sub).is_dir(), "{} missing", sub);
    }
    assert!(configuration.state_file().is_file());

    let summary = commands::dispatch(&configuration, &Command::Init).await.unwrap();
    assert_eq!(summary["created"], false);
}

/// Test commands other than init need an existing snapshot
#[test]
fn test_commands_require_init() {
    let dir = tempfile::tempdir().unwrap();
    let configuration = configuration(dir.path(), "true");
    let err = commands::upgrade(&configuration).unwrap_err();
    assert!(err.to_string().contains("adcm init"));
}

// ==================== Upgrade Tests ====================

/// Test a fresh snapshot is already at the current schema
#[test]
fn test_upgrade_fresh_state() {
    let (_dir, configuration) = initialized("true");
    assert!(!commands::upgrade(&configuration).unwrap());
}

// ==================== Bundle Tests ====================

/// Test load-bundle registers prototypes and copies the bundle content
#[test]
fn test_load_bundle() {
    let (dir, configuration) = initialized("true");
    let manifest = write_bundle(dir.path());

    let bundle = commands::load_bundle(&configuration, &manifest).unwrap();

    let core = commands::open_core(&configuration).unwrap();
    let graph = core.snapshot();
    let stored = graph.bundle(bundle).unwrap();
    assert_eq!(stored.name, "demo");
    let content = configuration.paths().bundle_path(&stored.hash);
    assert!(content.join("config.yaml").is_file());
    assert!(content.join("playbooks/probe.yaml").is_file());
}

/// Test an invalid manifest is rejected with a validation envelope
#[test]
fn test_load_invalid_bundle() {
    let (dir, configuration) = initialized("true");
    let manifest = dir.path().join("broken.yaml");
    std::fs::write(&manifest, "- type: widget\n  name: w\n  version: \"1.0\"\n").unwrap();

    let err = commands::load_bundle(&configuration, &manifest).unwrap_err();
    assert_eq!(code(&err), "VALIDATION_ERROR");
    assert!(commands::open_core(&configuration).unwrap().snapshot().bundles.is_empty());
}

// ==================== Run Task Tests ====================

/// Test run-task on an unknown task
#[tokio::test]
async fn test_run_unknown_task() {
    let (_dir, configuration) = initialized("true");
    let err = commands::run_task(&configuration, TaskId::from(404)).await.unwrap_err();
    assert_eq!(code(&err), "TASK_NOT_FOUND");
}

/// Test run-task drives a created task through the external runner
#[tokio::test]
async fn test_run_task_with_external_runner() {
    let (dir, configuration) = initialized("true");
    let manifest = write_bundle(dir.path());
    commands::load_bundle(&configuration, &manifest).unwrap();

    let ctx = OpContext::system();
    let core = commands::open_core(&configuration).unwrap();
    let prototype = |kind: PrototypeType, name: &str| {
        core.snapshot()
            .prototypes
            .values()
            .find(|p| p.kind == kind && p.name == name)
            .map(|p| p.id)
            .unwrap()
    };
    let cluster = core
        .create_cluster(&ctx, prototype(PrototypeType::Cluster, "demo"), "c1", "")
        .unwrap();
    core.add_service(&ctx, cluster, prototype(PrototypeType::Service, "s1"))
        .unwrap();
    let probe = core
        .snapshot()
        .actions
        .values()
        .find(|a| a.name == "probe")
        .map(|a| a.id)
        .unwrap();
    let scheduler = Scheduler::new(core, Arc::new(ExternalCommandRunner::new("true")));
    let task_id = scheduler
        .run_action(&ctx, &RunActionRequest::on(ObjectRef::Cluster(cluster), probe))
        .unwrap();

    let summary = commands::dispatch(&configuration, &Command::RunTask { id: task_id.value() })
        .await
        .unwrap();
    assert_eq!(summary["status"], "success");

    let core = commands::open_core(&configuration).unwrap();
    assert_eq!(core.snapshot().task(task_id).unwrap().status, JobStatus::Success);

    let err = commands::run_task(&configuration, task_id).await.unwrap_err();
    assert_eq!(code(&err), "TASK_ERROR");
}

/// Test a failing runner makes run-task fail with a task envelope
#[tokio::test]
async fn test_run_task_failure_is_reported() {
    let (dir, configuration) = initialized("false");
    let manifest = write_bundle(dir.path());
    commands::load_bundle(&configuration, &manifest).unwrap();

    let ctx = OpContext::system();
    let core = commands::open_core(&configuration).unwrap();
    let graph = core.snapshot();
    let demo = graph
        .prototypes
        .values()
        .find(|p| p.kind == PrototypeType::Cluster)
        .map(|p| p.id)
        .unwrap();
    let s1 = graph
        .prototypes
        .values()
        .find(|p| p.kind == PrototypeType::Service && p.name == "s1")
        .map(|p| p.id)
        .unwrap();
    let probe = graph
        .actions
        .values()
        .find(|a| a.name == "probe")
        .map(|a| a.id)
        .unwrap();
    drop(graph);
    let cluster = core.create_cluster(&ctx, demo, "c1", "").unwrap();
    core.add_service(&ctx, cluster, s1).unwrap();
    let scheduler = Scheduler::new(core, Arc::new(ExternalCommandRunner::new("false")));
    let task_id = scheduler
        .run_action(&ctx, &RunActionRequest::on(ObjectRef::Cluster(cluster), probe))
        .unwrap();

    let err = commands::run_task(&configuration, task_id).await.unwrap_err();
    assert_eq!(code(&err), "TASK_ERROR");
    let core = commands::open_core(&configuration).unwrap();
    assert_eq!(core.snapshot().task(task_id).unwrap().status, JobStatus::Failed);
}
