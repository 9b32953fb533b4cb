//! Turning a run request into a task with its jobs
//!
//! Preconditions are checked in a fixed order and the first failure wins:
//! locks, availability, host-component map, config, issues. Everything here
//! runs inside the caller's transaction, so a rejected request leaves no
//! trace and an accepted one is locked by the concern recompute of the same
//! commit.

use std::collections::{BTreeMap, BTreeSet};

use adcm_common::{AdcmError, Result, SecretVault, ensure};
use adcm_config::{ValidationContext, validate_config};
use adcm_core::Origin;
use adcm_core::concern::blocking_issues;
use adcm_core::hostcomponent::{check_hc_acl, plan};
use adcm_core::maintenance::{is_effectively_on, set_maintenance_mode};
use adcm_core::variants::GraphVariants;
use adcm_persistence::{
    Action, ActionHostGroupId, Graph, HcEntry, HostId, InternalScript, Job, JobStatus,
    MaintenanceMode, MaintenanceModeTransition, ObjectRef, SelectorEntry, StateChanges, SubAction,
    Task, TaskId, UpgradeId,
};
use serde_json::Value;

use crate::request::{RunActionRequest, RunPayload, RunTarget};

/// What a task carries besides the request itself
#[derive(Clone, Copy, Debug, Default)]
pub struct TaskOrigin {
    /// Upgrade whose action is being run
    pub upgrade: Option<UpgradeId>,
    /// Maintenance mode switch driven by the action
    pub maintenance_mode: Option<MaintenanceModeTransition>,
}

fn describe(graph: &Graph, object: ObjectRef) -> String {
    format!("{} {}", object.kind(), graph.display_name(object))
}

fn resolve_target(graph: &Graph, target: RunTarget) -> Result<(ObjectRef, Option<ActionHostGroupId>)> {
    match target {
        RunTarget::Object { object } => {
            graph.object(object)?;
            Ok((object, None))
        }
        RunTarget::ActionHostGroup { group } => Ok((graph.action_host_group(group)?.owner, Some(group))),
    }
}

fn check_lock(graph: &Graph, owner: ObjectRef, action: &Action, origin: Origin) -> Result<()> {
    let tolerated = graph
        .concerns
        .values()
        .filter(|c| c.locks(owner) && (c.task_id.is_none() || c.task_id != origin.task()))
        .all(|c| action.tolerates(c.cause));
    ensure!(tolerated, AdcmError::Locked(describe(graph, owner)));
    Ok(())
}

fn check_available(
    graph: &Graph,
    owner: ObjectRef,
    action: &Action,
    group: Option<ActionHostGroupId>,
    task_origin: &TaskOrigin,
) -> Result<()> {
    let not_available = |why: &str| {
        AdcmError::ActionNotAvailable(format!("{} on {}: {}", action.display_name, describe(graph, owner), why))
    };
    match task_origin.upgrade {
        Some(_) => ensure!(action.is_upgrade, not_available("not an upgrade action")),
        None => {
            ensure!(!action.is_upgrade, not_available("upgrade actions run through an upgrade"));
            // Host maintenance actions are declared by the cluster
            let declared_by_cluster = task_origin.maintenance_mode.is_some()
                && matches!(owner, ObjectRef::Host(_))
                && graph
                    .cluster_of(owner)
                    .and_then(|c| graph.prototype_of(ObjectRef::Cluster(c)).ok())
                    .is_some_and(|p| p.id == action.prototype_id);
            ensure!(
                declared_by_cluster || graph.prototype_of(owner)?.id == action.prototype_id,
                not_available("the action belongs to another prototype")
            );
        }
    }

    let target = graph.object(owner)?;
    ensure!(
        action.availability.allows(target.state(), target.multi_state()),
        not_available(&format!("state {} does not allow it", target.state()))
    );
    if !action.allow_in_maintenance_mode && is_effectively_on(graph, owner) {
        return Err(not_available("the object is in maintenance mode"));
    }
    if let Some(group) = group {
        ensure!(
            action.allow_for_action_host_group,
            not_available("the action can not run on an action host group")
        );
        ensure!(
            !graph.action_host_group(group)?.hosts.is_empty(),
            not_available("the action host group is empty")
        );
    }
    Ok(())
}

/// Requested map and the map applied after a bundle switch
type PlannedHc = (Option<Vec<HcEntry>>, Vec<HcEntry>);

fn check_hostcomponent(
    graph: &Graph,
    owner: ObjectRef,
    action: &Action,
    payload: &RunPayload,
    task_origin: &TaskOrigin,
    origin: Origin,
) -> Result<PlannedHc> {
    let Some(requested) = &payload.hostcomponent else {
        return Ok((None, Vec::new()));
    };
    ensure!(
        action.changes_hostcomponent(),
        AdcmError::InvalidHc(format!("action {} does not change the host-component map", action.name))
    );
    // Components of the new bundle do not exist before the switch
    if task_origin.upgrade.is_some() {
        return Ok((None, requested.clone()));
    }
    let cluster = graph.cluster_of(owner).ok_or_else(|| {
        AdcmError::InvalidHc(format!("{} does not belong to a cluster", describe(graph, owner)))
    })?;
    let (_, delta) = plan(graph, cluster, requested, origin)?;
    check_hc_acl(graph, action, &delta)?;
    Ok((Some(requested.clone()), Vec::new()))
}

fn is_empty_config(config: &Option<Value>) -> bool {
    match config {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

fn check_config(
    graph: &Graph,
    vault: &SecretVault,
    owner: ObjectRef,
    action: &Action,
    payload: &RunPayload,
) -> Result<(Option<Value>, Value)> {
    if action.config.is_empty() {
        ensure!(
            is_empty_config(&payload.config),
            AdcmError::ConfigValue(format!("action {} has no config", action.name))
        );
        return Ok((None, Value::Null));
    }
    let state = graph.object(owner)?.state().to_string();
    let variants = GraphVariants::new(graph, owner);
    let ctx = ValidationContext {
        state: &state,
        current: None,
        vault,
        variants: &variants,
    };
    let submitted = payload.config.clone().unwrap_or(Value::Null);
    let validated = validate_config(&action.config, &submitted, &payload.attr, &ctx)?;
    Ok((Some(validated.config), validated.attr))
}

fn check_issues(graph: &Graph, owner: ObjectRef, action: &Action) -> Result<()> {
    let untolerated = blocking_issues(graph, owner)
        .into_iter()
        .any(|c| !action.tolerates(c.cause));
    ensure!(!untolerated, AdcmError::ActionHasIssues(describe(graph, owner)));
    Ok(())
}

/// Hosts a host action runs on
pub fn expand_hosts(graph: &Graph, owner: ObjectRef) -> Vec<HostId> {
    match owner {
        ObjectRef::Cluster(id) => graph.hosts_of_cluster(id).iter().map(|h| h.id).collect(),
        ObjectRef::Service(_) | ObjectRef::Component(_) => graph.mapped_hosts(owner).into_iter().collect(),
        ObjectRef::Provider(id) => graph.hosts_of_provider(id).iter().map(|h| h.id).collect(),
        ObjectRef::Host(id) => vec![id],
    }
}

/// Scripts of an action; internal scripts appear at most once and upgrades switch the bundle
pub fn steps_of(action: &Action) -> Result<Vec<SubAction>> {
    let steps = action.steps();
    ensure!(
        !steps.is_empty(),
        AdcmError::Task(format!("action {} has no scripts", action.name))
    );
    let mut internal = BTreeSet::new();
    for step in &steps {
        if step.script_type != adcm_persistence::ScriptType::Internal {
            continue;
        }
        let script = InternalScript::parse(&step.script).ok_or_else(|| {
            AdcmError::Task(format!("unknown internal script {} in action {}", step.script, action.name))
        })?;
        ensure!(
            internal.insert(script),
            AdcmError::Task(format!(
                "internal script {} appears more than once in action {}",
                script.as_str(),
                action.name
            ))
        );
    }
    ensure!(
        !action.is_upgrade || internal.contains(&InternalScript::BundleSwitch),
        AdcmError::Task(format!("upgrade action {} does not run bundle_switch", action.name))
    );
    Ok(steps)
}

/// Ids and names of the objects on the path to `owner`
pub fn selector(graph: &Graph, owner: ObjectRef) -> BTreeMap<String, SelectorEntry> {
    let mut path = Vec::new();
    match owner {
        ObjectRef::Cluster(_) | ObjectRef::Provider(_) => path.push(owner),
        ObjectRef::Service(id) => {
            if let Ok(service) = graph.service(id) {
                path.push(ObjectRef::Cluster(service.cluster_id));
            }
            path.push(owner);
        }
        ObjectRef::Component(id) => {
            if let Ok(component) = graph.component(id) {
                path.push(ObjectRef::Cluster(component.cluster_id));
                path.push(ObjectRef::Service(component.service_id));
            }
            path.push(owner);
        }
        ObjectRef::Host(id) => {
            if let Ok(host) = graph.host(id) {
                path.push(ObjectRef::Provider(host.provider_id));
                if let Some(cluster) = host.cluster_id {
                    path.push(ObjectRef::Cluster(cluster));
                }
            }
            path.push(owner);
        }
    }
    path.into_iter()
        .map(|object| {
            (
                object.kind().to_string(),
                SelectorEntry {
                    id: object.id(),
                    name: graph.display_name(object),
                },
            )
        })
        .collect()
}

fn create_jobs(graph: &mut Graph, task_id: TaskId, action: &Action, steps: Vec<SubAction>) {
    for (position, step) in steps.into_iter().enumerate() {
        let on_fail: StateChanges = if step.on_fail.is_empty() {
            action.on_fail.clone()
        } else {
            step.on_fail
        };
        let id = graph.next_id();
        let display_name = if step.display_name.is_empty() {
            step.name.clone()
        } else {
            step.display_name
        };
        graph.jobs.insert(
            id,
            Job {
                id,
                task_id,
                position: position as u32,
                name: step.name,
                display_name,
                script: step.script,
                script_type: step.script_type,
                params: step.params,
                state_on_fail: on_fail.state,
                multi_state_on_fail_set: on_fail.multi_state_set,
                multi_state_on_fail_unset: on_fail.multi_state_unset,
                allow_to_terminate: step.allow_to_terminate.unwrap_or(action.allow_to_terminate),
                status: JobStatus::Created,
                pid: None,
                start_date: None,
                finish_date: None,
            },
        );
    }
}

/// Check a run request and create its task and jobs
pub fn prepare_task(
    graph: &mut Graph,
    vault: &SecretVault,
    request: &RunActionRequest,
    task_origin: TaskOrigin,
    origin: Origin,
    actor: &str,
) -> Result<TaskId> {
    let (owner, group) = resolve_target(graph, request.target)?;
    let action = graph.action(request.action_id)?.clone();
    let payload = &request.payload;

    check_lock(graph, owner, &action, origin)?;
    check_available(graph, owner, &action, group, &task_origin)?;
    let (hostcomponent, post_upgrade_hc) =
        check_hostcomponent(graph, owner, &action, payload, &task_origin, origin)?;
    let (config, attr) = check_config(graph, vault, owner, &action, payload)?;
    if task_origin.upgrade.is_none() && task_origin.maintenance_mode.is_none() {
        check_issues(graph, owner, &action)?;
    }
    let steps = steps_of(&action)?;

    let hosts = if action.host_action {
        expand_hosts(graph, owner)
    } else {
        Vec::new()
    };
    let hostcomponent_snapshot = graph
        .cluster_of(owner)
        .map(|c| graph.hc(c).copied().collect())
        .unwrap_or_default();

    let task_id: TaskId = graph.next_id();
    let task = Task {
        id: task_id,
        action_id: action.id,
        owner,
        action_host_group: group,
        hosts,
        selector: selector(graph, owner),
        config,
        attr,
        hostcomponent,
        hostcomponent_snapshot,
        post_upgrade_hc,
        verbose: payload.verbose,
        is_blocking: payload.is_blocking,
        status: JobStatus::Created,
        upgrade_id: task_origin.upgrade,
        maintenance_mode: task_origin.maintenance_mode,
        pending: StateChanges::default(),
        cancel_requested: false,
        actor: actor.to_string(),
        start_date: None,
        finish_date: None,
    };
    graph.tasks.insert(task_id, task);
    create_jobs(graph, task_id, &action, steps);

    if let Some(transition) = task_origin.maintenance_mode {
        set_maintenance_mode(graph, transition.object, MaintenanceMode::Changing)?;
    }
    Ok(task_id)
}
