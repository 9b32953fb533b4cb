//! The `adcm` subcommands
//!
//! Each command opens the engine over the snapshot file named by the
//! configuration, does one thing and returns a JSON summary for stdout.

use std::path::Path;
use std::sync::Arc;

use adcm_common::AdcmError;
use adcm_core::{AdcmCore, BundleManifest, OpContext};
use adcm_persistence::{
    BundleId, FileSnapshotPersistence, Graph, GraphPersistence, JobStatus, Store, TaskId,
};
use adcm_scheduler::{ExternalCommandRunner, Scheduler};
use anyhow::{Context, bail};
use serde_json::{Value, json};
use tracing::info;

use crate::model::{Command, Configuration};

pub async fn dispatch(configuration: &Configuration, command: &Command) -> anyhow::Result<Value> {
    match command {
        Command::Init => init(configuration),
        Command::Upgrade => {
            let migrated = upgrade(configuration)?;
            Ok(json!({"migrated": migrated}))
        }
        Command::LoadBundle { path } => {
            let bundle = load_bundle(configuration, path)?;
            Ok(json!({"bundle_id": bundle}))
        }
        Command::RunTask { id } => {
            let status = run_task(configuration, TaskId::from(*id)).await?;
            Ok(json!({"task_id": id, "status": status.as_str()}))
        }
    }
}

/// Engine over the configured snapshot file
pub fn open_core(configuration: &Configuration) -> anyhow::Result<AdcmCore> {
    let backend = Arc::new(FileSnapshotPersistence::new(configuration.state_file()));
    let store = Store::open(backend)?;
    Ok(AdcmCore::new(Arc::new(store), Arc::new(configuration.vault()?))
        .with_paths(configuration.paths()))
}

fn open_existing(configuration: &Configuration) -> anyhow::Result<AdcmCore> {
    let state = configuration.state_file();
    if !state.exists() {
        bail!("state file {} not found, run `adcm init` first", state.display());
    }
    open_core(configuration)
}

/// Create the directory layout and an empty snapshot; an existing snapshot is kept
pub fn init(configuration: &Configuration) -> anyhow::Result<Value> {
    let paths = configuration.paths();
    for dir in paths.all_dirs() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let state = configuration.state_file();
    let created = if state.exists() {
        info!(state = %state.display(), "State snapshot already present");
        false
    } else {
        if let Some(parent) = state.parent() {
            std::fs::create_dir_all(parent)?;
        }
        FileSnapshotPersistence::new(&state).save(&Graph::new())?;
        info!(state = %state.display(), "Empty state snapshot created");
        true
    };
    Ok(json!({"state": state, "created": created}))
}

/// Bring the snapshot to the current schema and refresh concerns
pub fn upgrade(configuration: &Configuration) -> anyhow::Result<bool> {
    let core = open_existing(configuration)?;
    let migrated = core.internal(|graph| Ok(graph.migrate()))?;
    info!(migrated, "State snapshot upgraded");
    Ok(migrated)
}

/// Load a bundle manifest and store its directory under `bundles/<hash>/`
pub fn load_bundle(configuration: &Configuration, path: &Path) -> anyhow::Result<BundleId> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read bundle manifest {}", path.display()))?;
    let manifest = BundleManifest::from_path_contents(path, &text)?;
    let core = open_existing(configuration)?;
    let bundle = core.load_bundle(&OpContext::system(), &manifest)?;

    let hash = core.snapshot().bundle(bundle)?.hash.clone();
    let target = core.paths().bundle_path(&hash);
    if !target.exists() {
        let source = path.parent().unwrap_or_else(|| Path::new("."));
        copy_dir(source, &target)
            .with_context(|| format!("failed to copy bundle content into {}", target.display()))?;
    }
    info!(bundle_id = %bundle, hash = %hash, "Bundle loaded");
    Ok(bundle)
}

/// Resume a task with the configured runner; a task that does not succeed is an error
pub async fn run_task(configuration: &Configuration, task_id: TaskId) -> anyhow::Result<JobStatus> {
    let core = open_existing(configuration)?;
    let command = configuration.runner_command();
    let runner = ExternalCommandRunner::from_command_line(&command)
        .context("runner command is empty")?;
    let scheduler = Scheduler::new(core, Arc::new(runner));
    let status = scheduler.recover(&OpContext::system(), task_id).await?;
    info!(task_id = %task_id, status = %status, "Task finished");
    if status != JobStatus::Success {
        return Err(AdcmError::Task(format!("task {} finished as {}", task_id, status)).into());
    }
    Ok(status)
}

fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}
