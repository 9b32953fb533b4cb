//! Object nodes of the inventory
//!
//! A node renders the current config for the runner (secrets revealed,
//! inactive groups `null`). When built for a host, config host groups the
//! host belongs to are merged over the owner's values, for the current
//! config as well as for the `before_upgrade` snapshot.

use std::collections::BTreeMap;

use adcm_common::{AdcmError, Result, SecretVault};
use adcm_config::{ConfigSpec, effective_host_config, render_for_runner};
use adcm_core::binds::import_values;
use adcm_core::groups::host_group_configs;
use adcm_core::maintenance::is_effectively_on;
use adcm_persistence::{
    BindEnd, ClusterId, ConfigLog, Graph, HostId, ObjectRef, ProviderId,
};
use serde_json::Value;

use crate::model::{BeforeUpgradeNode, ClusterVars, HostVars, ObjectNode, ProviderVars, ServiceNode};

pub(crate) struct NodeBuilder<'a> {
    graph: &'a Graph,
    vault: &'a SecretVault,
}

impl<'a> NodeBuilder<'a> {
    pub(crate) fn new(graph: &'a Graph, vault: &'a SecretVault) -> Self {
        Self { graph, vault }
    }

    fn render(&self, spec: &ConfigSpec, base: &ConfigLog, groups: &[&ConfigLog]) -> Result<Value> {
        let (config, attr) = effective_host_config(
            &base.config,
            &base.attr,
            groups.iter().map(|g| (&g.config, &g.attr)),
        );
        render_for_runner(spec, &config, &attr, self.vault)
    }

    fn config(&self, object: ObjectRef, host: Option<HostId>) -> Result<Value> {
        let Some(log) = self.graph.current_config_of(object)? else {
            return Ok(Value::Null);
        };
        let groups = match host {
            Some(host) => host_group_configs(self.graph, object, host),
            None => Vec::new(),
        };
        self.render(&self.graph.prototype_of(object)?.config, log, &groups)
    }

    fn before_upgrade(&self, object: ObjectRef, host: Option<HostId>) -> Result<Option<BeforeUpgradeNode>> {
        let before = &self.graph.object(object)?.common().before_upgrade;
        if before.is_empty() {
            return Ok(None);
        }
        let config = match before.config_log {
            Some(log_id) => {
                let log = self.graph.config_log(log_id)?;
                let groups: Vec<&ConfigLog> = match host {
                    Some(host) => before
                        .groups
                        .iter()
                        .filter(|(group, _)| {
                            self.graph
                                .config_host_group(**group)
                                .is_ok_and(|g| g.hosts.contains(&host))
                        })
                        .filter_map(|(_, log)| self.graph.config_log(*log).ok())
                        .collect(),
                    None => Vec::new(),
                };
                // Secrets were sealed against the prototype of that time
                let spec = match before.prototype_id.map(|id| self.graph.prototype(id)) {
                    Some(Ok(prototype)) => &prototype.config,
                    _ => &self.graph.prototype_of(object)?.config,
                };
                self.render(spec, log, &groups)?
            }
            None => Value::Null,
        };
        Ok(Some(BeforeUpgradeNode {
            state: before.state.clone(),
            config,
        }))
    }

    fn imports(&self, end: BindEnd, object: ObjectRef) -> Result<Option<Value>> {
        if self.graph.prototype_of(object)?.imports.is_empty() {
            return Ok(None);
        }
        let values = import_values(self.graph, end, self.vault)?;
        Ok(match &values {
            Value::Object(map) if map.is_empty() => None,
            _ => Some(values),
        })
    }

    pub(crate) fn node(&self, object: ObjectRef, host: Option<HostId>) -> Result<ObjectNode> {
        let target = self.graph.object(object)?;
        let (name, display_name, imports, maintenance_mode) = match object {
            ObjectRef::Cluster(id) => {
                let end = BindEnd {
                    cluster_id: id,
                    service_id: None,
                };
                (
                    Some(self.graph.display_name(object)),
                    None,
                    self.imports(end, object)?,
                    None,
                )
            }
            ObjectRef::Service(id) => {
                let end = BindEnd {
                    cluster_id: self.graph.service(id)?.cluster_id,
                    service_id: Some(id),
                };
                (
                    None,
                    Some(self.graph.display_name(object)),
                    self.imports(end, object)?,
                    Some(is_effectively_on(self.graph, object)),
                )
            }
            ObjectRef::Component(_) => (
                None,
                Some(self.graph.display_name(object)),
                None,
                Some(is_effectively_on(self.graph, object)),
            ),
            ObjectRef::Provider(_) => (Some(self.graph.display_name(object)), None, None, None),
            ObjectRef::Host(_) => (Some(self.graph.display_name(object)), None, None, None),
        };
        Ok(ObjectNode {
            id: object.id(),
            name,
            display_name,
            state: target.state().to_string(),
            multi_state: target.multi_state().iter().cloned().collect(),
            config: self.config(object, host)?,
            before_upgrade: self.before_upgrade(object, host)?,
            imports,
            maintenance_mode,
        })
    }

    /// `cluster` and `services` variables, seen from `host` when given
    pub(crate) fn cluster_vars(&self, cluster: ClusterId, host: Option<HostId>) -> Result<ClusterVars> {
        let mut services = BTreeMap::new();
        for service in self.graph.services_of(cluster) {
            let object = ObjectRef::Service(service.id);
            let mut components = BTreeMap::new();
            for component in self.graph.components_of(service.id) {
                let component_ref = ObjectRef::Component(component.id);
                components.insert(
                    self.graph.prototype_name(component_ref),
                    self.node(component_ref, host)?,
                );
            }
            services.insert(
                self.graph.prototype_name(object),
                ServiceNode {
                    node: self.node(object, host)?,
                    components,
                },
            );
        }
        Ok(ClusterVars {
            cluster: self.node(ObjectRef::Cluster(cluster), host)?,
            services,
        })
    }

    pub(crate) fn provider_vars(&self, provider: ProviderId, host: Option<HostId>) -> Result<ProviderVars> {
        Ok(ProviderVars {
            provider: self.node(ObjectRef::Provider(provider), host)?,
        })
    }

    /// Own variables of a host, without alternatives
    pub(crate) fn host_vars(&self, host: HostId) -> Result<HostVars> {
        let object = ObjectRef::Host(host);
        let target = self.graph.host(host)?;
        Ok(HostVars {
            adcm_hostid: host.value(),
            state: target.common.state.clone(),
            multi_state: target.common.multi_state.iter().cloned().collect(),
            maintenance_mode: target.maintenance_mode.is_on(),
            config: self.config(object, None)?,
            overrides: BTreeMap::new(),
        })
    }
}

pub(crate) fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| AdcmError::Unhandled(e.to_string()))
}
