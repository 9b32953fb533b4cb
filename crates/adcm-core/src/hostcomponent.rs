//! Host-component planner
//!
//! A desired map is checked in a fixed order (membership, cardinality,
//! bound_to, requires, maintenance mode, locks) before it replaces the
//! cluster's current map. The delta is handed back so callers can scope
//! inventories and validate `hc_acl` rules.

use std::collections::BTreeSet;

use adcm_common::{AdcmError, Result};
use adcm_persistence::{
    Action, ClusterId, ComponentId, Graph, HcAclAction, HcEntry, HostId, MaintenanceMode,
    ObjectRef, Requirement, ServiceId,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::concern::ensure_unlocked;
use crate::context::{OpContext, Origin};
use crate::engine::AdcmCore;

/// Difference between the current and the desired map
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HcDelta {
    pub add: Vec<HcEntry>,
    pub remove: Vec<HcEntry>,
}

impl HcDelta {
    pub fn between(current: &BTreeSet<HcEntry>, desired: &BTreeSet<HcEntry>) -> Self {
        Self {
            add: desired.difference(current).copied().collect(),
            remove: current.difference(desired).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Hosts touched by the delta
    pub fn hosts(&self) -> BTreeSet<HostId> {
        self.add
            .iter()
            .chain(self.remove.iter())
            .map(|e| e.host_id)
            .collect()
    }
}

fn component_label(graph: &Graph, service: ServiceId, component: ComponentId) -> String {
    format!(
        "{}.{}",
        graph.prototype_name(ObjectRef::Service(service)),
        graph.prototype_name(ObjectRef::Component(component))
    )
}

fn hosts_in(desired: &BTreeSet<HcEntry>, component: ComponentId) -> BTreeSet<HostId> {
    desired
        .iter()
        .filter(|e| e.component_id == component)
        .map(|e| e.host_id)
        .collect()
}

/// Components whose host count breaks their constraint under `hc`
pub fn constraint_violations(graph: &Graph, cluster: ClusterId, hc: &BTreeSet<HcEntry>) -> Vec<String> {
    let cluster_hosts = graph.hosts_of_cluster(cluster).len() as u64;
    let mut out = Vec::new();
    for component in graph.components_of_cluster(cluster) {
        let Ok(prototype) = graph.prototype(component.common.prototype_id) else {
            continue;
        };
        let count = hc.iter().filter(|e| e.component_id == component.id).count() as u64;
        if let Err(message) = prototype.constraint.check(count, cluster_hosts) {
            out.push(format!(
                "component {} {}",
                component_label(graph, component.service_id, component.id),
                message
            ));
        }
    }
    out
}

/// Why the current map of `cluster` raises a host-component issue
///
/// An empty map counts once the cluster has components to place.
pub fn mapping_problems(graph: &Graph, cluster: ClusterId) -> Vec<String> {
    let hc = graph.hc_set(cluster);
    let mut out = constraint_violations(graph, cluster, &hc);
    if hc.is_empty() && !graph.components_of_cluster(cluster).is_empty() {
        out.push("host-component map is empty".to_string());
    }
    out
}

fn check_membership(graph: &Graph, cluster: ClusterId, desired: &BTreeSet<HcEntry>) -> Result<()> {
    for entry in desired {
        let service = graph
            .service(entry.service_id)
            .map_err(|_| AdcmError::InvalidHc(format!("service {} does not exist", entry.service_id)))?;
        if service.cluster_id != cluster {
            return Err(AdcmError::InvalidHc(format!(
                "service {} does not belong to cluster {}",
                entry.service_id, cluster
            )));
        }
        let component = graph.component(entry.component_id).map_err(|_| {
            AdcmError::InvalidHc(format!("component {} does not exist", entry.component_id))
        })?;
        if component.service_id != entry.service_id {
            return Err(AdcmError::InvalidHc(format!(
                "component {} does not belong to service {}",
                entry.component_id, entry.service_id
            )));
        }
        let host = graph
            .host(entry.host_id)
            .map_err(|_| AdcmError::InvalidHc(format!("host {} does not exist", entry.host_id)))?;
        if host.cluster_id != Some(cluster) {
            return Err(AdcmError::InvalidHc(format!(
                "host {} does not belong to cluster {}",
                host.fqdn, cluster
            )));
        }
    }
    Ok(())
}

fn find_component(graph: &Graph, cluster: ClusterId, requirement: &Requirement) -> Option<ComponentId> {
    let service = graph.service_by_name(cluster, &requirement.service)?;
    let name = requirement.component.as_deref()?;
    graph.component_by_name(service.id, name).map(|c| c.id)
}

fn check_bound_to(graph: &Graph, cluster: ClusterId, desired: &BTreeSet<HcEntry>) -> Result<()> {
    for component in graph.components_of_cluster(cluster) {
        let Ok(prototype) = graph.prototype(component.common.prototype_id) else {
            continue;
        };
        let Some(bound_to) = &prototype.bound_to else {
            continue;
        };
        let hosts = hosts_in(desired, component.id);
        if hosts.is_empty() {
            continue;
        }
        let label = component_label(graph, component.service_id, component.id);
        let Some(target) = find_component(graph, cluster, bound_to) else {
            return Err(AdcmError::InvalidHc(format!(
                "component {} is bound to {} which is not in the cluster",
                label, bound_to
            )));
        };
        let target_hosts = hosts_in(desired, target);
        if let Some(stray) = hosts.difference(&target_hosts).next() {
            let fqdn = graph.host(*stray).map(|h| h.fqdn.clone()).unwrap_or_default();
            return Err(AdcmError::InvalidHc(format!(
                "component {} is bound to {} which is not placed on host {}",
                label, bound_to, fqdn
            )));
        }
    }
    Ok(())
}

fn check_requirement(
    graph: &Graph,
    cluster: ClusterId,
    desired: &BTreeSet<HcEntry>,
    who: &str,
    requirement: &Requirement,
) -> Result<()> {
    if graph.service_by_name(cluster, &requirement.service).is_none() {
        return Err(AdcmError::InvalidHc(format!(
            "{} requires service {} which is not added to the cluster",
            who, requirement.service
        )));
    }
    if requirement.component.is_some() {
        let placed = find_component(graph, cluster, requirement)
            .is_some_and(|target| !hosts_in(desired, target).is_empty());
        if !placed {
            return Err(AdcmError::InvalidHc(format!(
                "{} requires component {} to be placed on a host",
                who, requirement
            )));
        }
    }
    Ok(())
}

fn check_requires(graph: &Graph, cluster: ClusterId, desired: &BTreeSet<HcEntry>) -> Result<()> {
    let mapped_components: BTreeSet<(ServiceId, ComponentId)> = desired
        .iter()
        .map(|e| (e.service_id, e.component_id))
        .collect();
    let mapped_services: BTreeSet<ServiceId> = mapped_components.iter().map(|(s, _)| *s).collect();

    for service in mapped_services {
        let prototype = graph.prototype_of(ObjectRef::Service(service))?;
        let who = format!("service {}", prototype.name);
        for requirement in &prototype.requires {
            check_requirement(graph, cluster, desired, &who, requirement)?;
        }
    }
    for (service, component) in mapped_components {
        let prototype = graph.prototype_of(ObjectRef::Component(component))?;
        let who = format!("component {}", component_label(graph, service, component));
        for requirement in &prototype.requires {
            check_requirement(graph, cluster, desired, &who, requirement)?;
        }
    }
    Ok(())
}

fn check_maintenance_mode(graph: &Graph, delta: &HcDelta) -> Result<()> {
    for entry in &delta.add {
        let host = graph.host(entry.host_id)?;
        if host.maintenance_mode == MaintenanceMode::On {
            return Err(AdcmError::InvalidHc(format!(
                "host {} is in maintenance mode and cannot receive components",
                host.fqdn
            )));
        }
    }
    Ok(())
}

/// Validate a desired map against the cluster without changing anything
pub fn plan(
    graph: &Graph,
    cluster: ClusterId,
    desired: &[HcEntry],
    origin: Origin,
) -> Result<(BTreeSet<HcEntry>, HcDelta)> {
    graph.cluster(cluster)?;
    let desired: BTreeSet<HcEntry> = desired.iter().copied().collect();
    check_membership(graph, cluster, &desired)?;

    let delta = HcDelta::between(&graph.hc_set(cluster), &desired);

    if let Some(violation) = constraint_violations(graph, cluster, &desired).into_iter().next() {
        return Err(AdcmError::InvalidHc(violation));
    }
    check_bound_to(graph, cluster, &desired)?;
    check_requires(graph, cluster, &desired)?;
    check_maintenance_mode(graph, &delta)?;

    ensure_unlocked(graph, ObjectRef::Cluster(cluster), origin)?;
    for host in delta.hosts() {
        ensure_unlocked(graph, ObjectRef::Host(host), origin)?;
    }
    Ok((desired, delta))
}

/// Replace the cluster's map and drop unmapped hosts from service and component groups
pub fn commit(graph: &mut Graph, cluster: ClusterId, desired: BTreeSet<HcEntry>) -> HcDelta {
    let delta = HcDelta::between(&graph.hc_set(cluster), &desired);
    if desired.is_empty() {
        graph.hostcomponent.remove(&cluster);
    } else {
        graph.hostcomponent.insert(cluster, desired);
    }
    if !delta.remove.is_empty() {
        prune_group_hosts(graph, cluster);
    }
    delta
}

fn prune_group_hosts(graph: &mut Graph, cluster: ClusterId) {
    let owners: Vec<ObjectRef> = graph
        .services_of(cluster)
        .iter()
        .map(|s| ObjectRef::Service(s.id))
        .chain(
            graph
                .components_of_cluster(cluster)
                .iter()
                .map(|c| ObjectRef::Component(c.id)),
        )
        .collect();
    for owner in owners {
        let mapped = graph.mapped_hosts(owner);
        for group in graph.config_host_groups.values_mut().filter(|g| g.owner == owner) {
            group.hosts.retain(|h| mapped.contains(h));
        }
        for group in graph.action_host_groups.values_mut().filter(|g| g.owner == owner) {
            group.hosts.retain(|h| mapped.contains(h));
        }
    }
}

/// Every change of `delta` is permitted by the action's `hc_acl`
pub fn check_hc_acl(graph: &Graph, action: &Action, delta: &HcDelta) -> Result<()> {
    let changes = delta
        .add
        .iter()
        .map(|e| (e, HcAclAction::Add))
        .chain(delta.remove.iter().map(|e| (e, HcAclAction::Remove)));
    for (entry, kind) in changes {
        let service = graph.prototype_name(ObjectRef::Service(entry.service_id));
        let component = graph.prototype_name(ObjectRef::Component(entry.component_id));
        if !action.hc_acl_allows(&service, &component, kind) {
            return Err(AdcmError::InvalidHc(format!(
                "action {} may not {} component {}.{}",
                action.name,
                match kind {
                    HcAclAction::Add => "add",
                    HcAclAction::Remove => "remove",
                },
                service,
                component
            )));
        }
    }
    Ok(())
}

impl AdcmCore {
    /// Validate and commit a new host-component map of `cluster`
    pub fn set_hostcomponent(
        &self,
        ctx: &OpContext,
        cluster: ClusterId,
        desired: Vec<HcEntry>,
    ) -> Result<HcDelta> {
        let origin = ctx.origin;
        let delta = self.transaction(
            ctx,
            "set_hostcomponent",
            Some(ObjectRef::Cluster(cluster).to_string()),
            |graph| {
                let (desired, _) = plan(graph, cluster, &desired, origin)?;
                Ok(commit(graph, cluster, desired))
            },
        )?;
        info!(
            cluster_id = %cluster,
            added = delta.add.len(),
            removed = delta.remove.len(),
            "Host-component map updated"
        );
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[test]
    fn test_delta() {
        let a = HcEntry::new(ServiceId(1), ComponentId(2), HostId(3));
        let b = HcEntry::new(ServiceId(1), ComponentId(2), HostId(4));
        let delta = HcDelta::between(&BTreeSet::from([a]), &BTreeSet::from([b]));
        assert_eq!(delta.add, vec![b]);
        assert_eq!(delta.remove, vec![a]);
        assert_eq!(delta.hosts(), BTreeSet::from([HostId(3), HostId(4)]));
        assert!(HcDelta::default().is_empty());
    }

    #[test]
    fn test_rejects_foreign_objects() {
        let fx = Fixture::new();
        let s1 = fx.add_service("s1");
        let a = fx.component(s1, "a");
        // h3 was never added to the cluster
        let entry = HcEntry::new(s1, a, fx.hosts[2]);
        let err = fx.core.set_hostcomponent(&fx.ctx, fx.cluster, vec![entry]).unwrap_err();
        assert_eq!(err.code(), "INVALID_HC");
    }

    #[test]
    fn test_rejects_constraint_violation() {
        let fx = Fixture::new();
        let s1 = fx.add_service("s1");
        fx.add_hosts_to_cluster(2);
        let b = fx.component(s1, "b");
        let a = fx.component(s1, "a");
        let hc = vec![
            HcEntry::new(s1, a, fx.hosts[0]),
            HcEntry::new(s1, b, fx.hosts[0]),
            HcEntry::new(s1, b, fx.hosts[1]),
        ];
        let err = fx.core.set_hostcomponent(&fx.ctx, fx.cluster, hc).unwrap_err();
        assert!(matches!(err, AdcmError::InvalidHc(ref m) if m.contains("s1.b")));
    }

    #[test]
    fn test_rejects_host_in_maintenance_mode() {
        let fx = Fixture::new();
        let s1 = fx.add_service("s1");
        fx.add_hosts_to_cluster(2);
        fx.core
            .internal(|g| {
                g.host_mut(fx.hosts[1])?.maintenance_mode = MaintenanceMode::On;
                Ok(())
            })
            .unwrap();
        let a = fx.component(s1, "a");
        let b = fx.component(s1, "b");
        let hc = vec![HcEntry::new(s1, a, fx.hosts[1]), HcEntry::new(s1, b, fx.hosts[0])];
        let err = fx.core.set_hostcomponent(&fx.ctx, fx.cluster, hc).unwrap_err();
        assert!(matches!(err, AdcmError::InvalidHc(ref m) if m.contains("maintenance mode")));
    }

    #[test]
    fn test_bound_to_and_requires() {
        let fx = Fixture::new();
        let s1 = fx.add_service("s1");
        let s2 = fx.add_service("s2");
        fx.add_hosts_to_cluster(2);
        let (a1, b1) = (fx.component(s1, "a"), fx.component(s1, "b"));
        let (a2, b2) = (fx.component(s2, "a"), fx.component(s2, "b"));
        let base = vec![
            HcEntry::new(s1, a1, fx.hosts[0]),
            HcEntry::new(s1, b1, fx.hosts[0]),
            HcEntry::new(s2, a2, fx.hosts[0]),
        ];

        // s2.b is bound to s1.a, which runs on h1 only
        let mut stray = base.clone();
        stray.push(HcEntry::new(s2, b2, fx.hosts[1]));
        let err = fx.core.set_hostcomponent(&fx.ctx, fx.cluster, stray).unwrap_err();
        assert!(matches!(err, AdcmError::InvalidHc(ref m) if m.contains("bound to")));

        let mut ok = base;
        ok.push(HcEntry::new(s2, b2, fx.hosts[0]));
        let delta = fx.core.set_hostcomponent(&fx.ctx, fx.cluster, ok).unwrap();
        assert_eq!(delta.add.len(), 4);
        assert!(delta.remove.is_empty());
    }
}
