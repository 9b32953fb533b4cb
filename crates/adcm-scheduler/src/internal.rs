//! Scripts the engine runs itself instead of handing them to the runner

use adcm_common::{AdcmError, Result, SecretVault};
use adcm_core::Origin;
use adcm_core::hostcomponent::{commit, plan};
use adcm_core::upgrade::{bundle_revert, bundle_switch};
use adcm_persistence::{Graph, InternalScript, ScriptType, Task, TaskId};
use tracing::info;

/// Run `script` for `task_id` against `graph`
pub fn run_internal(graph: &mut Graph, vault: &SecretVault, task_id: TaskId, script: InternalScript) -> Result<()> {
    let task = graph.task(task_id)?.clone();
    match script {
        InternalScript::BundleSwitch => {
            let upgrade_id = task
                .upgrade_id
                .ok_or_else(|| AdcmError::Task(format!("task {} is not an upgrade", task_id)))?;
            bundle_switch(graph, vault, task.owner, upgrade_id, &task.post_upgrade_hc)?;
            info!(task_id = %task_id, owner = %task.owner, upgrade_id = %upgrade_id, "Bundle switched");
        }
        InternalScript::BundleRevert => {
            bundle_revert(graph, task.owner)?;
            info!(task_id = %task_id, owner = %task.owner, "Bundle reverted");
        }
        InternalScript::HcApply => commit_requested_hc(graph, task_id)?,
    }
    Ok(())
}

/// Commit the host-component map the task was submitted with
pub fn commit_requested_hc(graph: &mut Graph, task_id: TaskId) -> Result<()> {
    let task = graph.task(task_id)?.clone();
    let cluster = graph
        .cluster_of(task.owner)
        .ok_or_else(|| AdcmError::Task(format!("{} has no cluster", task.owner)))?;
    let desired = task.hostcomponent.as_deref().ok_or_else(|| {
        AdcmError::Task(format!("task {} carries no host-component map", task_id))
    })?;
    let (desired, _) = plan(graph, cluster, desired, Origin::Task(task_id))?;
    let delta = commit(graph, cluster, desired);
    info!(
        task_id = %task_id,
        cluster_id = %cluster,
        added = delta.add.len(),
        removed = delta.remove.len(),
        "Host-component map applied"
    );
    Ok(())
}

/// Whether the task commits its host-component map when it starts
///
/// Actions with an `hc_apply` step commit it at that step instead.
pub fn commits_hc_on_start(graph: &Graph, task: &Task) -> bool {
    task.hostcomponent.is_some()
        && !graph.jobs_of(task.id).iter().any(|j| {
            j.script_type == ScriptType::Internal
                && InternalScript::parse(&j.script) == Some(InternalScript::HcApply)
        })
}
