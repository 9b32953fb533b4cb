//! The object graph
//!
//! Entities live in id-keyed maps; relations are ids, never pointers.
//! Reverse edges (hosts of a component, groups of an owner) are derived on
//! demand from these maps.

use std::collections::{BTreeMap, BTreeSet};

use adcm_common::{AdcmError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::*;

/// Version of the persisted graph layout
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    pub bundles: BTreeMap<BundleId, Bundle>,
    #[serde(default)]
    pub prototypes: BTreeMap<PrototypeId, Prototype>,
    #[serde(default)]
    pub actions: BTreeMap<ActionId, Action>,
    #[serde(default)]
    pub upgrades: BTreeMap<UpgradeId, Upgrade>,
    #[serde(default)]
    pub clusters: BTreeMap<ClusterId, Cluster>,
    #[serde(default)]
    pub services: BTreeMap<ServiceId, Service>,
    #[serde(default)]
    pub components: BTreeMap<ComponentId, Component>,
    #[serde(default)]
    pub providers: BTreeMap<ProviderId, Provider>,
    #[serde(default)]
    pub hosts: BTreeMap<HostId, Host>,
    #[serde(default)]
    pub hostcomponent: BTreeMap<ClusterId, BTreeSet<HcEntry>>,
    #[serde(default)]
    pub object_configs: BTreeMap<ObjectConfigId, ObjectConfig>,
    #[serde(default)]
    pub config_logs: BTreeMap<ConfigLogId, ConfigLog>,
    #[serde(default)]
    pub config_host_groups: BTreeMap<ConfigHostGroupId, ConfigHostGroup>,
    #[serde(default)]
    pub action_host_groups: BTreeMap<ActionHostGroupId, ActionHostGroup>,
    #[serde(default)]
    pub binds: BTreeMap<BindId, Bind>,
    #[serde(default)]
    pub concerns: BTreeMap<ConcernId, Concern>,
    #[serde(default)]
    pub tasks: BTreeMap<TaskId, Task>,
    #[serde(default)]
    pub jobs: BTreeMap<JobId, Job>,
    /// Prototypes whose license was accepted, by id
    #[serde(default)]
    pub accepted_licenses: BTreeSet<PrototypeId>,
}

macro_rules! getters {
    ($($get:ident, $get_mut:ident, $field:ident, $id:ty, $entity:ty;)*) => {
        $(
            pub fn $get(&self, id: $id) -> Result<&$entity> {
                self.$field
                    .get(&id)
                    .ok_or_else(|| AdcmError::not_found(<$id>::KIND, id))
            }

            pub fn $get_mut(&mut self, id: $id) -> Result<&mut $entity> {
                self.$field
                    .get_mut(&id)
                    .ok_or_else(|| AdcmError::not_found(<$id>::KIND, id))
            }
        )*
    };
}

impl Graph {
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            ..Self::default()
        }
    }

    /// Allocate a fresh id; ids are unique across every entity kind
    pub fn next_id<T: From<u64>>(&mut self) -> T {
        self.next_id += 1;
        T::from(self.next_id)
    }

    /// Bring an older snapshot to the current layout; returns true when changed
    pub fn migrate(&mut self) -> bool {
        if self.schema_version >= SCHEMA_VERSION {
            return false;
        }
        let floor = self.max_known_id();
        if self.next_id < floor {
            self.next_id = floor;
        }
        self.schema_version = SCHEMA_VERSION;
        true
    }

    fn max_known_id(&self) -> u64 {
        [
            self.bundles.keys().next_back().map(|k| k.0),
            self.prototypes.keys().next_back().map(|k| k.0),
            self.actions.keys().next_back().map(|k| k.0),
            self.upgrades.keys().next_back().map(|k| k.0),
            self.clusters.keys().next_back().map(|k| k.0),
            self.services.keys().next_back().map(|k| k.0),
            self.components.keys().next_back().map(|k| k.0),
            self.providers.keys().next_back().map(|k| k.0),
            self.hosts.keys().next_back().map(|k| k.0),
            self.object_configs.keys().next_back().map(|k| k.0),
            self.config_logs.keys().next_back().map(|k| k.0),
            self.config_host_groups.keys().next_back().map(|k| k.0),
            self.action_host_groups.keys().next_back().map(|k| k.0),
            self.binds.keys().next_back().map(|k| k.0),
            self.concerns.keys().next_back().map(|k| k.0),
            self.tasks.keys().next_back().map(|k| k.0),
            self.jobs.keys().next_back().map(|k| k.0),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(0)
    }

    getters! {
        bundle, bundle_mut, bundles, BundleId, Bundle;
        prototype, prototype_mut, prototypes, PrototypeId, Prototype;
        action, action_mut, actions, ActionId, Action;
        upgrade, upgrade_mut, upgrades, UpgradeId, Upgrade;
        cluster, cluster_mut, clusters, ClusterId, Cluster;
        service, service_mut, services, ServiceId, Service;
        component, component_mut, components, ComponentId, Component;
        provider, provider_mut, providers, ProviderId, Provider;
        host, host_mut, hosts, HostId, Host;
        config_host_group, config_host_group_mut, config_host_groups, ConfigHostGroupId, ConfigHostGroup;
        action_host_group, action_host_group_mut, action_host_groups, ActionHostGroupId, ActionHostGroup;
        bind, bind_mut, binds, BindId, Bind;
        concern, concern_mut, concerns, ConcernId, Concern;
        task, task_mut, tasks, TaskId, Task;
        job, job_mut, jobs, JobId, Job;
    }

    pub fn object(&self, object: ObjectRef) -> Result<&dyn CoreObject> {
        let found: &dyn CoreObject = match object {
            ObjectRef::Cluster(id) => self.cluster(id)?,
            ObjectRef::Service(id) => self.service(id)?,
            ObjectRef::Component(id) => self.component(id)?,
            ObjectRef::Provider(id) => self.provider(id)?,
            ObjectRef::Host(id) => self.host(id)?,
        };
        Ok(found)
    }

    pub fn object_mut(&mut self, object: ObjectRef) -> Result<&mut dyn CoreObject> {
        let found: &mut dyn CoreObject = match object {
            ObjectRef::Cluster(id) => self.cluster_mut(id)?,
            ObjectRef::Service(id) => self.service_mut(id)?,
            ObjectRef::Component(id) => self.component_mut(id)?,
            ObjectRef::Provider(id) => self.provider_mut(id)?,
            ObjectRef::Host(id) => self.host_mut(id)?,
        };
        Ok(found)
    }

    pub fn exists(&self, object: ObjectRef) -> bool {
        self.object(object).is_ok()
    }

    /// Every object of the graph, clusters first
    pub fn all_objects(&self) -> Vec<ObjectRef> {
        let mut out: Vec<ObjectRef> = Vec::new();
        out.extend(self.clusters.keys().map(|id| ObjectRef::Cluster(*id)));
        out.extend(self.services.keys().map(|id| ObjectRef::Service(*id)));
        out.extend(self.components.keys().map(|id| ObjectRef::Component(*id)));
        out.extend(self.providers.keys().map(|id| ObjectRef::Provider(*id)));
        out.extend(self.hosts.keys().map(|id| ObjectRef::Host(*id)));
        out
    }

    pub fn prototype_of(&self, object: ObjectRef) -> Result<&Prototype> {
        self.prototype(self.object(object)?.prototype_id())
    }

    pub fn bundle_of(&self, object: ObjectRef) -> Result<&Bundle> {
        self.bundle(self.prototype_of(object)?.bundle_id)
    }

    /// Human readable name: cluster/provider name, host fqdn, prototype display name
    pub fn display_name(&self, object: ObjectRef) -> String {
        let name = match object {
            ObjectRef::Cluster(id) => self.cluster(id).map(|c| c.name.clone()).ok(),
            ObjectRef::Provider(id) => self.provider(id).map(|p| p.name.clone()).ok(),
            ObjectRef::Host(id) => self.host(id).map(|h| h.fqdn.clone()).ok(),
            ObjectRef::Service(_) | ObjectRef::Component(_) => {
                self.prototype_of(object).map(|p| p.display_name.clone()).ok()
            }
        };
        name.unwrap_or_else(|| object.to_string())
    }

    /// Prototype name of a service or component
    pub fn prototype_name(&self, object: ObjectRef) -> String {
        self.prototype_of(object)
            .map(|p| p.name.clone())
            .unwrap_or_default()
    }

    // --- topology -------------------------------------------------------

    pub fn services_of(&self, cluster: ClusterId) -> Vec<&Service> {
        self.services
            .values()
            .filter(|s| s.cluster_id == cluster)
            .collect()
    }

    pub fn components_of(&self, service: ServiceId) -> Vec<&Component> {
        self.components
            .values()
            .filter(|c| c.service_id == service)
            .collect()
    }

    pub fn components_of_cluster(&self, cluster: ClusterId) -> Vec<&Component> {
        self.components
            .values()
            .filter(|c| c.cluster_id == cluster)
            .collect()
    }

    pub fn hosts_of_cluster(&self, cluster: ClusterId) -> Vec<&Host> {
        self.hosts
            .values()
            .filter(|h| h.cluster_id == Some(cluster))
            .collect()
    }

    pub fn hosts_of_provider(&self, provider: ProviderId) -> Vec<&Host> {
        self.hosts
            .values()
            .filter(|h| h.provider_id == provider)
            .collect()
    }

    pub fn service_by_name(&self, cluster: ClusterId, name: &str) -> Option<&Service> {
        self.services_of(cluster).into_iter().find(|s| {
            self.prototype(s.common.prototype_id)
                .is_ok_and(|p| p.name == name)
        })
    }

    pub fn component_by_name(&self, service: ServiceId, name: &str) -> Option<&Component> {
        self.components_of(service).into_iter().find(|c| {
            self.prototype(c.common.prototype_id)
                .is_ok_and(|p| p.name == name)
        })
    }

    pub fn host_by_fqdn(&self, fqdn: &str) -> Option<&Host> {
        self.hosts.values().find(|h| h.fqdn == fqdn)
    }

    /// Cluster an object belongs to
    pub fn cluster_of(&self, object: ObjectRef) -> Option<ClusterId> {
        match object {
            ObjectRef::Cluster(id) => Some(id),
            ObjectRef::Service(id) => self.service(id).ok().map(|s| s.cluster_id),
            ObjectRef::Component(id) => self.component(id).ok().map(|c| c.cluster_id),
            ObjectRef::Host(id) => self.host(id).ok().and_then(|h| h.cluster_id),
            ObjectRef::Provider(_) => None,
        }
    }

    // --- host-component map ---------------------------------------------

    pub fn hc(&self, cluster: ClusterId) -> impl Iterator<Item = &HcEntry> {
        self.hostcomponent.get(&cluster).into_iter().flatten()
    }

    pub fn hc_set(&self, cluster: ClusterId) -> BTreeSet<HcEntry> {
        self.hc(cluster).copied().collect()
    }

    pub fn hosts_of_component(&self, component: ComponentId) -> BTreeSet<HostId> {
        let Ok(cluster) = self.component(component).map(|c| c.cluster_id) else {
            return BTreeSet::new();
        };
        self.hc(cluster)
            .filter(|e| e.component_id == component)
            .map(|e| e.host_id)
            .collect()
    }

    pub fn hosts_of_service(&self, service: ServiceId) -> BTreeSet<HostId> {
        let Ok(cluster) = self.service(service).map(|s| s.cluster_id) else {
            return BTreeSet::new();
        };
        self.hc(cluster)
            .filter(|e| e.service_id == service)
            .map(|e| e.host_id)
            .collect()
    }

    /// Entries placing anything on `host`
    pub fn hc_of_host(&self, host: HostId) -> Vec<HcEntry> {
        let Some(cluster) = self.hosts.get(&host).and_then(|h| h.cluster_id) else {
            return Vec::new();
        };
        self.hc(cluster).filter(|e| e.host_id == host).copied().collect()
    }

    /// Hosts an object reaches: cluster members, mapped hosts, provider hosts
    pub fn mapped_hosts(&self, object: ObjectRef) -> BTreeSet<HostId> {
        match object {
            ObjectRef::Cluster(id) => self.hosts_of_cluster(id).iter().map(|h| h.id).collect(),
            ObjectRef::Service(id) => self.hosts_of_service(id),
            ObjectRef::Component(id) => self.hosts_of_component(id),
            ObjectRef::Provider(id) => self.hosts_of_provider(id).iter().map(|h| h.id).collect(),
            ObjectRef::Host(id) => BTreeSet::from([id]),
        }
    }

    // --- configuration --------------------------------------------------

    pub fn object_config(&self, id: ObjectConfigId) -> Result<&ObjectConfig> {
        self.object_configs
            .get(&id)
            .ok_or_else(|| AdcmError::not_found(ObjectConfigId::KIND, id))
    }

    pub fn config_log(&self, id: ConfigLogId) -> Result<&ConfigLog> {
        self.config_logs
            .get(&id)
            .ok_or_else(|| AdcmError::not_found(ConfigLogId::KIND, id))
    }

    pub fn current_config(&self, id: ObjectConfigId) -> Result<&ConfigLog> {
        self.config_log(self.object_config(id)?.current)
    }

    /// Current revision of an object's config, if it has one
    pub fn current_config_of(&self, object: ObjectRef) -> Result<Option<&ConfigLog>> {
        match self.object(object)?.config_id() {
            Some(id) => self.current_config(id).map(Some),
            None => Ok(None),
        }
    }

    /// Create a config with its first revision
    pub fn create_config(&mut self, config: Value, attr: Value, description: &str) -> ObjectConfigId {
        let config_id: ObjectConfigId = self.next_id();
        let log_id: ConfigLogId = self.next_id();
        self.config_logs.insert(
            log_id,
            ConfigLog {
                id: log_id,
                object_config_id: config_id,
                config,
                attr,
                description: description.to_string(),
                date: Utc::now(),
            },
        );
        self.object_configs.insert(
            config_id,
            ObjectConfig {
                id: config_id,
                current: log_id,
                previous: None,
            },
        );
        config_id
    }

    /// Append a revision: `current` advances, `previous` lags by one
    pub fn append_config(
        &mut self,
        config_id: ObjectConfigId,
        config: Value,
        attr: Value,
        description: &str,
    ) -> Result<ConfigLogId> {
        let current = self.object_config(config_id)?.current;
        let log_id: ConfigLogId = self.next_id();
        self.config_logs.insert(
            log_id,
            ConfigLog {
                id: log_id,
                object_config_id: config_id,
                config,
                attr,
                description: description.to_string(),
                date: Utc::now(),
            },
        );
        if let Some(object_config) = self.object_configs.get_mut(&config_id) {
            object_config.previous = Some(current);
            object_config.current = log_id;
        }
        Ok(log_id)
    }

    /// Drop a config together with its whole history
    pub fn remove_config(&mut self, config_id: ObjectConfigId) {
        self.object_configs.remove(&config_id);
        self.config_logs.retain(|_, log| log.object_config_id != config_id);
    }

    /// Revisions of a config, oldest first
    pub fn config_history(&self, config_id: ObjectConfigId) -> Vec<&ConfigLog> {
        self.config_logs
            .values()
            .filter(|log| log.object_config_id == config_id)
            .collect()
    }

    // --- groups, binds, concerns, tasks ----------------------------------

    pub fn config_host_groups_of(&self, owner: ObjectRef) -> Vec<&ConfigHostGroup> {
        self.config_host_groups
            .values()
            .filter(|g| g.owner == owner)
            .collect()
    }

    pub fn action_host_groups_of(&self, owner: ObjectRef) -> Vec<&ActionHostGroup> {
        self.action_host_groups
            .values()
            .filter(|g| g.owner == owner)
            .collect()
    }

    /// Binds in which `cluster` (or one of its services) imports
    pub fn binds_of_importer(&self, cluster: ClusterId, service: Option<ServiceId>) -> Vec<&Bind> {
        self.binds
            .values()
            .filter(|b| b.importer.cluster_id == cluster && b.importer.service_id == service)
            .collect()
    }

    /// Concerns attached to an object
    pub fn concerns_of(&self, object: ObjectRef) -> Vec<&Concern> {
        self.concerns
            .values()
            .filter(|c| c.affected.contains(&object))
            .collect()
    }

    pub fn jobs_of(&self, task: TaskId) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().filter(|j| j.task_id == task).collect();
        jobs.sort_by_key(|j| j.position);
        jobs
    }

    pub fn active_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values().filter(|t| !t.status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_history() {
        let mut graph = Graph::new();
        let config_id = graph.create_config(json!({"a": 1}), json!({}), "init");
        let first = graph.object_config(config_id).unwrap().current;

        let second = graph
            .append_config(config_id, json!({"a": 2}), json!({}), "edit")
            .unwrap();
        let pointers = graph.object_config(config_id).unwrap();
        assert_eq!(pointers.current, second);
        assert_eq!(pointers.previous, Some(first));
        assert_eq!(graph.current_config(config_id).unwrap().config["a"], 2);
        assert_eq!(graph.config_history(config_id).len(), 2);

        graph.remove_config(config_id);
        assert!(graph.config_logs.is_empty());
        assert!(graph.object_config(config_id).is_err());
    }

    #[test]
    fn test_not_found_codes() {
        let graph = Graph::new();
        assert_eq!(graph.cluster(ClusterId(9)).unwrap_err().code(), "CLUSTER_NOT_FOUND");
        assert_eq!(
            graph.config_host_group(ConfigHostGroupId(9)).unwrap_err().code(),
            "CONFIG_HOST_GROUP_NOT_FOUND"
        );
    }

    #[test]
    fn test_ids_are_unique_and_migration_repairs_counter() {
        let mut graph = Graph::new();
        let a: ClusterId = graph.next_id();
        let b: HostId = graph.next_id();
        assert_ne!(a.0, b.0);

        let mut old = Graph::default();
        old.config_logs.insert(
            ConfigLogId(41),
            ConfigLog {
                id: ConfigLogId(41),
                object_config_id: ObjectConfigId(40),
                config: json!({}),
                attr: json!({}),
                description: String::new(),
                date: Utc::now(),
            },
        );
        assert!(old.migrate());
        assert_eq!(old.schema_version, SCHEMA_VERSION);
        let next: ClusterId = old.next_id();
        assert_eq!(next.0, 42);
        assert!(!old.migrate());
    }
}
