//! Host groups of a job inventory
//!
//! Cluster actions get `CLUSTER`, one group per service and per component,
//! `.maintenance_mode` subgroups, `.add`/`.remove` groups for host-component
//! changes and `target` for scoped runs. Provider and host actions get `HOST`.

use std::collections::{BTreeMap, BTreeSet};

use adcm_common::{AdcmError, Result, SecretVault};
use adcm_core::hostcomponent::HcDelta;
use adcm_core::maintenance::is_effectively_on;
use adcm_persistence::{
    Action, Graph, HcEntry, HostId, ObjectRef, PrototypeType, ProviderId, Task,
};
use tracing::debug;

use crate::model::{GroupVars, HostVars, Inventory, InventoryGroup};
use crate::nodes::{NodeBuilder, to_value};

pub const CLUSTER_GROUP: &str = "CLUSTER";
pub const HOST_GROUP: &str = "HOST";
pub const TARGET_GROUP: &str = "target";
pub const MAINTENANCE_MODE_SUFFIX: &str = "maintenance_mode";

/// Builds the inventory of a task's jobs from one graph snapshot
pub struct InventoryBuilder<'a> {
    graph: &'a Graph,
    nodes: NodeBuilder<'a>,
}

struct Groups {
    members: BTreeMap<String, BTreeSet<HostId>>,
    mm_aware: bool,
}

impl Groups {
    fn new(mm_aware: bool) -> Self {
        Self {
            members: BTreeMap::new(),
            mm_aware,
        }
    }

    fn ensure(&mut self, name: &str) {
        self.members.entry(name.to_string()).or_default();
    }

    fn add(&mut self, name: String, host: HostId) {
        self.members.entry(name).or_default().insert(host);
    }

    /// Hosts in maintenance go to the subgroup; MM-aware actions also keep them in the group
    fn place(&mut self, name: &str, host: HostId, in_maintenance: bool) {
        if in_maintenance {
            self.add(format!("{}.{}", name, MAINTENANCE_MODE_SUFFIX), host);
            if !self.mm_aware {
                return;
            }
        }
        self.add(name.to_string(), host);
    }

    fn hosts(&self) -> BTreeSet<HostId> {
        self.members.values().flatten().copied().collect()
    }
}

impl<'a> InventoryBuilder<'a> {
    pub fn new(graph: &'a Graph, vault: &'a SecretVault) -> Self {
        Self {
            graph,
            nodes: NodeBuilder::new(graph, vault),
        }
    }

    pub fn build(&self, task: &Task) -> Result<Inventory> {
        let action = self.graph.action(task.action_id)?;
        let kind = self.graph.prototype(action.prototype_id)?.kind;
        let inventory = match kind {
            PrototypeType::Provider | PrototypeType::Host => self.provider_inventory(task, action)?,
            _ => self.cluster_inventory(task, action)?,
        };
        debug!(
            task_id = %task.id,
            groups = inventory.all.children.len(),
            "Inventory built"
        );
        Ok(inventory)
    }

    fn label(&self, object: ObjectRef) -> String {
        self.graph.prototype_name(object)
    }

    fn cluster_inventory(&self, task: &Task, action: &Action) -> Result<Inventory> {
        let cluster = self.graph.cluster_of(task.owner).ok_or_else(|| {
            AdcmError::Task(format!("{} does not belong to a cluster", task.owner))
        })?;
        let mut groups = Groups::new(action.allow_in_maintenance_mode);
        let host_mm = |host: HostId| is_effectively_on(self.graph, ObjectRef::Host(host));

        groups.ensure(CLUSTER_GROUP);
        for host in self.graph.hosts_of_cluster(cluster) {
            groups.place(CLUSTER_GROUP, host.id, host_mm(host.id));
        }

        let hc: BTreeSet<HcEntry> = match &task.hostcomponent {
            Some(requested) => requested.iter().copied().collect(),
            None => self.graph.hc_set(cluster),
        };
        for entry in &hc {
            let service = ObjectRef::Service(entry.service_id);
            let component = ObjectRef::Component(entry.component_id);
            let service_name = self.label(service);
            let component_name = format!("{}.{}", service_name, self.label(component));
            let on_host = host_mm(entry.host_id);
            groups.place(
                &service_name,
                entry.host_id,
                on_host || is_effectively_on(self.graph, service),
            );
            groups.place(
                &component_name,
                entry.host_id,
                on_host || is_effectively_on(self.graph, component),
            );
        }

        if task.hostcomponent.is_some() {
            let before: BTreeSet<HcEntry> = task.hostcomponent_snapshot.iter().copied().collect();
            let delta = HcDelta::between(&before, &hc);
            for (entries, suffix) in [(&delta.add, "add"), (&delta.remove, "remove")] {
                for entry in entries {
                    let name = format!(
                        "{}.{}.{}",
                        self.label(ObjectRef::Service(entry.service_id)),
                        self.label(ObjectRef::Component(entry.component_id)),
                        suffix
                    );
                    groups.add(name, entry.host_id);
                }
            }
        }

        for host in self.target_hosts(task)? {
            groups.add(TARGET_GROUP.to_string(), host);
        }

        let vars = self.nodes.cluster_vars(cluster, None)?;
        let mut host_vars = BTreeMap::new();
        for host in groups.hosts() {
            let mut own = self.nodes.host_vars(host)?;
            if self.in_config_group(host) {
                let alternative = self.nodes.cluster_vars(cluster, Some(host))?;
                if alternative.cluster != vars.cluster {
                    own.overrides
                        .insert("cluster".to_string(), to_value(&alternative.cluster)?);
                }
                if alternative.services != vars.services {
                    own.overrides
                        .insert("services".to_string(), to_value(&alternative.services)?);
                }
            }
            host_vars.insert(host, own);
        }
        self.assemble(groups, &host_vars, GroupVars::Cluster(vars))
    }

    fn provider_inventory(&self, task: &Task, action: &Action) -> Result<Inventory> {
        let (provider, hosts): (ProviderId, Vec<HostId>) = match task.owner {
            ObjectRef::Provider(id) => (
                id,
                self.graph.hosts_of_provider(id).iter().map(|h| h.id).collect(),
            ),
            ObjectRef::Host(id) => (self.graph.host(id)?.provider_id, vec![id]),
            other => {
                return Err(AdcmError::Task(format!(
                    "action {} of a host bundle can not run on {}",
                    action.name, other
                )));
            }
        };
        let mut groups = Groups::new(action.allow_in_maintenance_mode);
        groups.ensure(HOST_GROUP);
        for host in hosts {
            groups.place(
                HOST_GROUP,
                host,
                is_effectively_on(self.graph, ObjectRef::Host(host)),
            );
        }

        let vars = self.nodes.provider_vars(provider, None)?;
        let mut host_vars = BTreeMap::new();
        for host in groups.hosts() {
            let mut own = self.nodes.host_vars(host)?;
            if self.in_config_group(host) {
                let alternative = self.nodes.provider_vars(provider, Some(host))?;
                if alternative.provider != vars.provider {
                    own.overrides
                        .insert("provider".to_string(), to_value(&alternative.provider)?);
                }
            }
            host_vars.insert(host, own);
        }
        self.assemble(groups, &host_vars, GroupVars::Provider(vars))
    }

    /// Hosts of the `target` group: the action host group, or the hosts a host action expanded to
    fn target_hosts(&self, task: &Task) -> Result<BTreeSet<HostId>> {
        if let Some(group) = task.action_host_group {
            return Ok(self.graph.action_host_group(group)?.hosts.clone());
        }
        Ok(task.hosts.iter().copied().collect())
    }

    fn in_config_group(&self, host: HostId) -> bool {
        self.graph
            .config_host_groups
            .values()
            .any(|g| g.hosts.contains(&host))
    }

    fn assemble(
        &self,
        groups: Groups,
        host_vars: &BTreeMap<HostId, HostVars>,
        vars: GroupVars,
    ) -> Result<Inventory> {
        let mut inventory = Inventory::default();
        for (name, members) in groups.members {
            let mut hosts = BTreeMap::new();
            for host in members {
                let fqdn = self.graph.host(host)?.fqdn.clone();
                if let Some(own) = host_vars.get(&host) {
                    hosts.insert(fqdn, own.clone());
                }
            }
            inventory.all.children.insert(
                name,
                InventoryGroup {
                    hosts,
                    vars: vars.clone(),
                },
            );
        }
        Ok(inventory)
    }
}

/// Inventory for a task from the given snapshot
pub fn build_inventory(graph: &Graph, vault: &SecretVault, task: &Task) -> Result<Inventory> {
    InventoryBuilder::new(graph, vault).build(task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maintenance_hosts_go_to_subgroup() {
        let mut groups = Groups::new(false);
        groups.place("s1", HostId(1), false);
        groups.place("s1", HostId(2), true);
        assert_eq!(groups.members["s1"], BTreeSet::from([HostId(1)]));
        assert_eq!(groups.members["s1.maintenance_mode"], BTreeSet::from([HostId(2)]));
        assert_eq!(groups.hosts(), BTreeSet::from([HostId(1), HostId(2)]));
    }

    #[test]
    fn test_maintenance_aware_actions_keep_hosts() {
        let mut groups = Groups::new(true);
        groups.place("s1", HostId(2), true);
        assert!(groups.members["s1"].contains(&HostId(2)));
        assert!(groups.members["s1.maintenance_mode"].contains(&HostId(2)));
    }
}
