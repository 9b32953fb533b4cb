//! Concern engine
//!
//! Issues and locks are a pure function of the graph: [`recompute`] derives
//! the full desired set, diffs it against the stored concerns and applies
//! the difference. Concerns whose identity did not change keep their id, so
//! recomputing twice is a no-op. Flags are created by plugins only; the
//! engine just refreshes the objects they are attached to.

use std::collections::{BTreeMap, BTreeSet};

use adcm_common::{AdcmError, Result};
use adcm_persistence::{
    BindEnd, Concern, ConcernCause, ConcernId, ConcernReason, ConcernType, Graph, ObjectRef,
    TaskId,
};
use serde_json::json;
use tracing::debug;

use crate::binds::missing_imports;
use crate::context::Origin;
use crate::hostcomponent::mapping_problems;

/// Identity of a concern across recomputations
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ConcernKey {
    kind: ConcernType,
    cause: Option<ConcernCause>,
    owner: ObjectRef,
    name: String,
    task_id: Option<TaskId>,
}

impl ConcernKey {
    fn of(concern: &Concern) -> Self {
        Self {
            kind: concern.kind,
            cause: concern.cause,
            owner: concern.owner,
            name: concern.name.clone(),
            task_id: concern.task_id,
        }
    }
}

struct Draft {
    key: ConcernKey,
    reason: ConcernReason,
    blocking: bool,
    affected: BTreeSet<ObjectRef>,
}

/// Bring stored concerns in line with the graph; returns true when anything changed
pub fn recompute(graph: &mut Graph) -> bool {
    let mut drafts = issue_drafts(graph);
    drafts.extend(lock_drafts(graph));

    let mut stored: BTreeMap<ConcernKey, ConcernId> = graph
        .concerns
        .values()
        .filter(|c| c.kind != ConcernType::Flag)
        .map(|c| (ConcernKey::of(c), c.id))
        .collect();

    let mut changed = false;
    for draft in drafts {
        match stored.remove(&draft.key) {
            Some(id) => {
                if let Some(concern) = graph.concerns.get_mut(&id) {
                    if concern.affected != draft.affected
                        || concern.blocking != draft.blocking
                        || concern.reason != draft.reason
                    {
                        concern.affected = draft.affected;
                        concern.blocking = draft.blocking;
                        concern.reason = draft.reason;
                        changed = true;
                    }
                }
            }
            None => {
                let id: ConcernId = graph.next_id();
                debug!(concern_id = %id, owner = %draft.key.owner, cause = ?draft.key.cause, "Concern raised");
                graph.concerns.insert(
                    id,
                    Concern {
                        id,
                        kind: draft.key.kind,
                        cause: draft.key.cause,
                        owner: draft.key.owner,
                        name: draft.key.name,
                        reason: draft.reason,
                        blocking: draft.blocking,
                        task_id: draft.key.task_id,
                        affected: draft.affected,
                    },
                );
                changed = true;
            }
        }
    }

    for (key, id) in stored {
        debug!(concern_id = %id, owner = %key.owner, cause = ?key.cause, "Concern cleared");
        graph.concerns.remove(&id);
        changed = true;
    }

    changed |= refresh_flags(graph);
    changed
}

fn refresh_flags(graph: &mut Graph) -> bool {
    let flags: Vec<(ConcernId, ObjectRef)> = graph
        .concerns
        .values()
        .filter(|c| c.kind == ConcernType::Flag)
        .map(|c| (c.id, c.owner))
        .collect();
    let mut changed = false;
    for (id, owner) in flags {
        if !graph.exists(owner) {
            graph.concerns.remove(&id);
            changed = true;
            continue;
        }
        let affected = affected_by(graph, owner, None);
        if let Some(flag) = graph.concerns.get_mut(&id) {
            if flag.affected != affected {
                flag.affected = affected;
                changed = true;
            }
        }
    }
    changed
}

/// Objects a concern owned by `owner` is attached to
///
/// Issues travel down the ownership tree; config and requirement issues also
/// reach the mapped hosts and climb to the cluster. Host issues reach every
/// cluster object the host is mapped to. Locks cover the subtree and its
/// hosts but never climb.
pub fn affected_by(graph: &Graph, owner: ObjectRef, cause: Option<ConcernCause>) -> BTreeSet<ObjectRef> {
    let upward = matches!(cause, Some(ConcernCause::Config | ConcernCause::Requirement));
    let with_hosts = upward || cause == Some(ConcernCause::Job);
    let mut out = BTreeSet::from([owner]);

    match owner {
        ObjectRef::Cluster(id) => {
            out.extend(graph.services_of(id).iter().map(|s| ObjectRef::Service(s.id)));
            out.extend(graph.components_of_cluster(id).iter().map(|c| ObjectRef::Component(c.id)));
            if cause == Some(ConcernCause::Job) {
                out.extend(graph.hosts_of_cluster(id).iter().map(|h| ObjectRef::Host(h.id)));
            } else if upward {
                out.extend(graph.hc(id).map(|e| ObjectRef::Host(e.host_id)));
            }
        }
        ObjectRef::Service(id) => {
            out.extend(graph.components_of(id).iter().map(|c| ObjectRef::Component(c.id)));
            if with_hosts {
                out.extend(graph.hosts_of_service(id).into_iter().map(ObjectRef::Host));
            }
            if upward {
                if let Ok(service) = graph.service(id) {
                    out.insert(ObjectRef::Cluster(service.cluster_id));
                }
            }
        }
        ObjectRef::Component(id) => {
            if with_hosts {
                out.extend(graph.hosts_of_component(id).into_iter().map(ObjectRef::Host));
            }
            if upward {
                if let Ok(component) = graph.component(id) {
                    out.insert(ObjectRef::Service(component.service_id));
                    out.insert(ObjectRef::Cluster(component.cluster_id));
                }
            }
        }
        ObjectRef::Provider(id) => {
            out.extend(graph.hosts_of_provider(id).iter().map(|h| ObjectRef::Host(h.id)));
        }
        ObjectRef::Host(id) => {
            if cause.is_some() && cause != Some(ConcernCause::Job) {
                for entry in graph.hc_of_host(id) {
                    out.insert(ObjectRef::Service(entry.service_id));
                    out.insert(ObjectRef::Component(entry.component_id));
                }
                if let Some(cluster) = graph.cluster_of(owner) {
                    if !graph.hc_of_host(id).is_empty() {
                        out.insert(ObjectRef::Cluster(cluster));
                    }
                }
            }
        }
    }
    out
}

fn source_placeholder(graph: &Graph, object: ObjectRef) -> serde_json::Value {
    json!({
        "type": object.kind().as_str(),
        "id": object.id(),
        "name": graph.display_name(object),
    })
}

fn issue(graph: &Graph, owner: ObjectRef, cause: ConcernCause, message: &str) -> Draft {
    Draft {
        key: ConcernKey {
            kind: ConcernType::Issue,
            cause: Some(cause),
            owner,
            name: format!("{}_issue", cause),
            task_id: None,
        },
        reason: ConcernReason::new(message).with("source", source_placeholder(graph, owner)),
        blocking: true,
        affected: affected_by(graph, owner, Some(cause)),
    }
}

/// Required parameters without a value in the object's current config
pub fn config_problems(graph: &Graph, object: ObjectRef) -> Vec<String> {
    let (Ok(prototype), Ok(Some(log))) = (graph.prototype_of(object), graph.current_config_of(object))
    else {
        return Vec::new();
    };
    adcm_config::missing_required(&prototype.config, &log.config, &log.attr)
}

/// Requirements of a service or component whose service is not in the cluster
pub fn unsatisfied_requirements(graph: &Graph, object: ObjectRef) -> Vec<String> {
    let Some(cluster) = graph.cluster_of(object) else {
        return Vec::new();
    };
    let Ok(prototype) = graph.prototype_of(object) else {
        return Vec::new();
    };
    prototype
        .requires
        .iter()
        .filter(|r| graph.service_by_name(cluster, &r.service).is_none())
        .map(|r| r.to_string())
        .collect()
}

/// Names of required services of the cluster's bundle that were not added
pub fn missing_services(graph: &Graph, cluster: adcm_persistence::ClusterId) -> Vec<String> {
    let Ok(bundle_id) = graph.bundle_of(ObjectRef::Cluster(cluster)).map(|b| b.id) else {
        return Vec::new();
    };
    graph
        .prototypes
        .values()
        .filter(|p| {
            p.bundle_id == bundle_id
                && p.kind == adcm_persistence::PrototypeType::Service
                && p.required
        })
        .filter(|p| graph.service_by_name(cluster, &p.name).is_none())
        .map(|p| p.name.clone())
        .collect()
}

fn issue_drafts(graph: &Graph) -> Vec<Draft> {
    let mut drafts = Vec::new();
    let config_issue = |object: ObjectRef, drafts: &mut Vec<Draft>| {
        if !config_problems(graph, object).is_empty() {
            drafts.push(issue(graph, object, ConcernCause::Config, "${source} has an issue with its config"));
        }
    };

    for cluster in graph.clusters.values() {
        let object = ObjectRef::Cluster(cluster.id);
        config_issue(object, &mut drafts);
        if !mapping_problems(graph, cluster.id).is_empty() {
            drafts.push(issue(
                graph,
                object,
                ConcernCause::HostComponent,
                "${source} has an issue with host-component mapping",
            ));
        }
        if !missing_services(graph, cluster.id).is_empty() {
            drafts.push(issue(
                graph,
                object,
                ConcernCause::Service,
                "${source} requires services that are not added",
            ));
        }
        let end = BindEnd {
            cluster_id: cluster.id,
            service_id: None,
        };
        if !missing_imports(graph, end).is_empty() {
            drafts.push(issue(graph, object, ConcernCause::Import, "${source} has an issue with required import"));
        }
    }

    for service in graph.services.values() {
        let object = ObjectRef::Service(service.id);
        config_issue(object, &mut drafts);
        let end = BindEnd {
            cluster_id: service.cluster_id,
            service_id: Some(service.id),
        };
        if !missing_imports(graph, end).is_empty() {
            drafts.push(issue(graph, object, ConcernCause::Import, "${source} has an issue with required import"));
        }
        if !unsatisfied_requirements(graph, object).is_empty() {
            drafts.push(issue(
                graph,
                object,
                ConcernCause::Requirement,
                "${source} has an issue with requirement",
            ));
        }
    }

    for component in graph.components.values() {
        let object = ObjectRef::Component(component.id);
        config_issue(object, &mut drafts);
        if !unsatisfied_requirements(graph, object).is_empty() {
            drafts.push(issue(
                graph,
                object,
                ConcernCause::Requirement,
                "${source} has an issue with requirement",
            ));
        }
    }

    for provider in graph.providers.values() {
        config_issue(ObjectRef::Provider(provider.id), &mut drafts);
    }
    for host in graph.hosts.values() {
        config_issue(ObjectRef::Host(host.id), &mut drafts);
    }
    drafts
}

fn lock_drafts(graph: &Graph) -> Vec<Draft> {
    let mut drafts = Vec::new();
    for task in graph.active_tasks() {
        if !graph.exists(task.owner) {
            continue;
        }
        let group = task
            .action_host_group
            .and_then(|id| graph.action_host_group(id).ok());
        let affected: BTreeSet<ObjectRef> = match group {
            Some(group) => group.hosts.iter().map(|h| ObjectRef::Host(*h)).collect(),
            None => {
                let mut affected = affected_by(graph, task.owner, Some(ConcernCause::Job));
                affected.extend(task.hosts.iter().map(|h| ObjectRef::Host(*h)));
                affected
            }
        };
        let action = graph
            .action(task.action_id)
            .map(|a| a.display_name.clone())
            .unwrap_or_default();
        drafts.push(Draft {
            key: ConcernKey {
                kind: ConcernType::Lock,
                cause: Some(ConcernCause::Job),
                owner: task.owner,
                name: "lock".to_string(),
                task_id: Some(task.id),
            },
            reason: ConcernReason::new("${source} is locked by running action ${action}")
                .with("source", source_placeholder(graph, task.owner))
                .with("action", json!(action))
                .with("task", json!(task.id)),
            blocking: task.is_blocking,
            affected,
        });
    }
    drafts
}

fn describe(graph: &Graph, object: ObjectRef) -> String {
    format!("{} {}", object.kind(), graph.display_name(object))
}

/// Blocking lock on `object` held by a task other than the caller's
pub fn lock_on(graph: &Graph, object: ObjectRef, origin: Origin) -> Option<&Concern> {
    graph
        .concerns
        .values()
        .find(|c| c.locks(object) && (c.task_id.is_none() || c.task_id != origin.task()))
}

pub fn is_locked(graph: &Graph, object: ObjectRef) -> bool {
    lock_on(graph, object, Origin::Api).is_some()
}

/// Reject edits of a locked object
pub fn ensure_unlocked(graph: &Graph, object: ObjectRef, origin: Origin) -> Result<()> {
    match lock_on(graph, object, origin) {
        Some(_) => Err(AdcmError::Locked(describe(graph, object))),
        None => Ok(()),
    }
}

/// Reject deletion while any job concern is attached, blocking or not
pub fn ensure_deletable(graph: &Graph, object: ObjectRef, origin: Origin) -> Result<()> {
    let held = graph.concerns.values().any(|c| {
        c.cause == Some(ConcernCause::Job)
            && c.affected.contains(&object)
            && (c.task_id.is_none() || c.task_id != origin.task())
    });
    if held {
        return Err(AdcmError::Locked(describe(graph, object)));
    }
    Ok(())
}

/// Blocking issues attached to `object`
pub fn blocking_issues(graph: &Graph, object: ObjectRef) -> Vec<&Concern> {
    graph
        .concerns
        .values()
        .filter(|c| c.kind == ConcernType::Issue && c.blocking && c.affected.contains(&object))
        .collect()
}

/// Upsert an advisory flag; returns true when a new flag was created
pub fn set_flag(graph: &mut Graph, owner: ObjectRef, name: &str, message: Option<&str>) -> Result<bool> {
    graph.object(owner)?;
    let message = message.unwrap_or("${source} has an outdated configuration");
    let reason = ConcernReason::new(message).with("source", source_placeholder(graph, owner));
    let existing = graph
        .concerns
        .values()
        .find(|c| c.kind == ConcernType::Flag && c.owner == owner && c.name == name)
        .map(|c| c.id);
    if let Some(id) = existing {
        let flag = graph.concern_mut(id)?;
        flag.reason = reason;
        return Ok(false);
    }
    let id: ConcernId = graph.next_id();
    let affected = affected_by(graph, owner, None);
    graph.concerns.insert(
        id,
        Concern {
            id,
            kind: ConcernType::Flag,
            cause: None,
            owner,
            name: name.to_string(),
            reason,
            blocking: false,
            task_id: None,
            affected,
        },
    );
    Ok(true)
}

/// Remove one flag by name, or every flag of the owner; returns the number removed
pub fn unset_flag(graph: &mut Graph, owner: ObjectRef, name: Option<&str>) -> usize {
    let before = graph.concerns.len();
    graph.concerns.retain(|_, c| {
        !(c.kind == ConcernType::Flag && c.owner == owner && name.is_none_or(|n| c.name == n))
    });
    before - graph.concerns.len()
}
