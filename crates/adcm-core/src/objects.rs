//! Clusters, services, providers and hosts
//!
//! Creation, membership and cascading deletion. Every operation re-checks
//! locks against the caller's origin so a task can still edit the objects
//! it holds locked.

use adcm_common::{AdcmError, Result, SecretVault, ensure, is_valid_fqdn, is_valid_name};
use adcm_persistence::{
    Cluster, ClusterId, Component, ComponentId, Graph, Host, HostId, LicenseState,
    MaintenanceMode, ObjectCommon, ObjectRef, PrototypeId, PrototypeType, Provider, ProviderId,
    Service, ServiceId, StateChanges,
};
use tracing::info;

use crate::concern::{ensure_deletable, ensure_unlocked};
use crate::configuration::create_initial_config;
use crate::context::{OpContext, Origin};
use crate::engine::AdcmCore;

fn expect_prototype(graph: &Graph, id: PrototypeId, kind: PrototypeType) -> Result<()> {
    let prototype = graph.prototype(id)?;
    ensure!(
        prototype.kind == kind,
        AdcmError::Validation(format!(
            "prototype {} is a {} prototype, expected {}",
            id, prototype.kind, kind
        ))
    );
    Ok(())
}

/// Create a service with all components of its prototype
pub(crate) fn create_service(
    graph: &mut Graph,
    vault: &SecretVault,
    cluster: ClusterId,
    prototype_id: PrototypeId,
) -> Result<ServiceId> {
    let spec = graph.prototype(prototype_id)?.config.clone();
    let config_id = create_initial_config(graph, vault, &spec)?;
    let id: ServiceId = graph.next_id();
    graph.services.insert(
        id,
        Service {
            id,
            cluster_id: cluster,
            common: ObjectCommon::new(prototype_id, config_id),
            maintenance_mode: MaintenanceMode::Off,
        },
    );
    create_missing_components(graph, vault, id)?;
    Ok(id)
}

/// Create components declared by the service prototype that the service lacks
pub(crate) fn create_missing_components(
    graph: &mut Graph,
    vault: &SecretVault,
    service: ServiceId,
) -> Result<Vec<ComponentId>> {
    let (cluster, service_prototype) = {
        let s = graph.service(service)?;
        (s.cluster_id, s.common.prototype_id)
    };
    let wanted: Vec<(PrototypeId, String)> = graph
        .prototypes
        .values()
        .filter(|p| p.kind == PrototypeType::Component && p.parent_id == Some(service_prototype))
        .map(|p| (p.id, p.name.clone()))
        .collect();
    let mut created = Vec::new();
    for (prototype_id, name) in wanted {
        if graph.component_by_name(service, &name).is_some() {
            continue;
        }
        let spec = graph.prototype(prototype_id)?.config.clone();
        let config_id = create_initial_config(graph, vault, &spec)?;
        let id: ComponentId = graph.next_id();
        graph.components.insert(
            id,
            Component {
                id,
                cluster_id: cluster,
                service_id: service,
                common: ObjectCommon::new(prototype_id, config_id),
                maintenance_mode: MaintenanceMode::Off,
            },
        );
        created.push(id);
    }
    Ok(created)
}

fn remove_owned_groups(graph: &mut Graph, owner: ObjectRef) {
    let configs: Vec<_> = graph
        .config_host_groups
        .values()
        .filter(|g| g.owner == owner)
        .map(|g| (g.id, g.config_id))
        .collect();
    for (id, config_id) in configs {
        graph.config_host_groups.remove(&id);
        graph.remove_config(config_id);
    }
    graph.action_host_groups.retain(|_, g| g.owner != owner);
}

pub(crate) fn remove_component(graph: &mut Graph, component: ComponentId) {
    let Some(removed) = graph.components.remove(&component) else {
        return;
    };
    if let Some(set) = graph.hostcomponent.get_mut(&removed.cluster_id) {
        set.retain(|e| e.component_id != component);
    }
    remove_owned_groups(graph, ObjectRef::Component(component));
    if let Some(config_id) = removed.common.config_id {
        graph.remove_config(config_id);
    }
}

/// Remove a service and everything it owns, without checks
pub(crate) fn remove_service(graph: &mut Graph, service: ServiceId) {
    let components: Vec<ComponentId> = graph.components_of(service).iter().map(|c| c.id).collect();
    for component in components {
        remove_component(graph, component);
    }
    let Some(removed) = graph.services.remove(&service) else {
        return;
    };
    if let Some(set) = graph.hostcomponent.get_mut(&removed.cluster_id) {
        set.retain(|e| e.service_id != service);
    }
    remove_owned_groups(graph, ObjectRef::Service(service));
    graph.binds.retain(|_, b| b.importer.service_id != Some(service));
    if let Some(config_id) = removed.common.config_id {
        graph.remove_config(config_id);
    }
}

fn ensure_not_bind_source(graph: &Graph, cluster: ClusterId, service: Option<ServiceId>) -> Result<()> {
    let referenced = graph.binds.values().any(|b| {
        b.source.cluster_id == cluster
            && (service.is_none() || b.source.service_id == service)
            && b.importer.cluster_id != cluster
    });
    if referenced {
        let object = match service {
            Some(id) => ObjectRef::Service(id),
            None => ObjectRef::Cluster(cluster),
        };
        return Err(AdcmError::BindExists(format!(
            "{} {}",
            object.kind(),
            graph.display_name(object)
        )));
    }
    Ok(())
}

/// Apply state changes to an object
pub fn change_state(
    graph: &mut Graph,
    object: ObjectRef,
    changes: &StateChanges,
    origin: Origin,
) -> Result<()> {
    ensure_unlocked(graph, object, origin)?;
    let common = graph.object_mut(object)?.common_mut();
    changes.apply_to(&mut common.state, &mut common.multi_state);
    Ok(())
}

/// Delete a service after checking locks, mappings, requirements and binds
pub fn delete_service(graph: &mut Graph, service: ServiceId, origin: Origin) -> Result<()> {
    let object = ObjectRef::Service(service);
    let cluster = graph.service(service)?.cluster_id;
    ensure_deletable(graph, object, origin)?;
    ensure!(
        graph.hosts_of_service(service).is_empty(),
        AdcmError::Conflict(format!(
            "service {} has components placed on hosts",
            graph.display_name(object)
        ))
    );
    let name = graph.prototype_name(object);
    for other in graph.services_of(cluster) {
        if other.id == service {
            continue;
        }
        let requires = graph
            .prototype(other.common.prototype_id)
            .is_ok_and(|p| p.requires.iter().any(|r| r.service == name));
        ensure!(
            !requires,
            AdcmError::Conflict(format!(
                "service {} is required by {}",
                name,
                graph.prototype_name(ObjectRef::Service(other.id))
            ))
        );
    }
    ensure_not_bind_source(graph, cluster, Some(service))?;
    remove_service(graph, service);
    Ok(())
}

/// Attach a host to a cluster
pub fn add_host_to_cluster(graph: &mut Graph, cluster: ClusterId, host: HostId, origin: Origin) -> Result<()> {
    let target = graph.host(host)?;
    match target.cluster_id {
        Some(current) if current == cluster => {
            return Err(AdcmError::HostConflict(format!(
                "host {} is already in cluster {}",
                target.fqdn,
                graph.display_name(ObjectRef::Cluster(cluster))
            )));
        }
        Some(_) => return Err(AdcmError::ForeignHost(target.fqdn.clone())),
        None => {}
    }
    let host_edition = graph.bundle_of(ObjectRef::Host(host))?.edition.clone();
    let cluster_edition = graph.bundle_of(ObjectRef::Cluster(cluster))?.edition.clone();
    ensure!(
        host_edition == cluster_edition,
        AdcmError::ForeignHost(target.fqdn.clone())
    );
    ensure_unlocked(graph, ObjectRef::Cluster(cluster), origin)?;
    ensure_unlocked(graph, ObjectRef::Host(host), origin)?;
    graph.host_mut(host)?.cluster_id = Some(cluster);
    Ok(())
}

/// Detach a host that has nothing placed on it
pub fn remove_host_from_cluster(
    graph: &mut Graph,
    cluster: ClusterId,
    host: HostId,
    origin: Origin,
) -> Result<()> {
    let target = graph.host(host)?;
    ensure!(
        target.cluster_id == Some(cluster),
        AdcmError::HostConflict(format!(
            "host {} is not in cluster {}",
            target.fqdn,
            graph.display_name(ObjectRef::Cluster(cluster))
        ))
    );
    ensure!(
        graph.hc_of_host(host).is_empty(),
        AdcmError::HostHasComponents(target.fqdn.clone())
    );
    ensure_unlocked(graph, ObjectRef::Cluster(cluster), origin)?;
    ensure_unlocked(graph, ObjectRef::Host(host), origin)?;
    graph.host_mut(host)?.cluster_id = None;
    let owner = ObjectRef::Cluster(cluster);
    for group in graph.config_host_groups.values_mut().filter(|g| g.owner == owner) {
        group.hosts.remove(&host);
    }
    for group in graph.action_host_groups.values_mut().filter(|g| g.owner == owner) {
        group.hosts.remove(&host);
    }
    Ok(())
}

impl AdcmCore {
    pub fn create_cluster(
        &self,
        ctx: &OpContext,
        prototype_id: PrototypeId,
        name: &str,
        description: &str,
    ) -> Result<ClusterId> {
        let vault = self.vault();
        let id = self.transaction(ctx, "create_cluster", Some(format!("cluster {}", name)), |graph| {
            expect_prototype(graph, prototype_id, PrototypeType::Cluster)?;
            ensure!(is_valid_name(name), AdcmError::WrongName(name.to_string()));
            ensure!(
                !graph.clusters.values().any(|c| c.name == name),
                AdcmError::NameCollision(format!("cluster with name `{}` already exists", name))
            );
            let spec = graph.prototype(prototype_id)?.config.clone();
            let config_id = create_initial_config(graph, vault, &spec)?;
            let id: ClusterId = graph.next_id();
            graph.clusters.insert(
                id,
                Cluster {
                    id,
                    name: name.to_string(),
                    description: description.to_string(),
                    common: ObjectCommon::new(prototype_id, config_id),
                },
            );
            Ok(id)
        })?;
        info!(cluster_id = %id, name, "Cluster created");
        Ok(id)
    }

    pub fn create_provider(
        &self,
        ctx: &OpContext,
        prototype_id: PrototypeId,
        name: &str,
        description: &str,
    ) -> Result<ProviderId> {
        let vault = self.vault();
        let id = self.transaction(ctx, "create_provider", Some(format!("provider {}", name)), |graph| {
            expect_prototype(graph, prototype_id, PrototypeType::Provider)?;
            ensure!(is_valid_name(name), AdcmError::WrongName(name.to_string()));
            ensure!(
                !graph.providers.values().any(|p| p.name == name),
                AdcmError::NameCollision(format!("provider with name `{}` already exists", name))
            );
            let spec = graph.prototype(prototype_id)?.config.clone();
            let config_id = create_initial_config(graph, vault, &spec)?;
            let id: ProviderId = graph.next_id();
            graph.providers.insert(
                id,
                Provider {
                    id,
                    name: name.to_string(),
                    description: description.to_string(),
                    common: ObjectCommon::new(prototype_id, config_id),
                },
            );
            Ok(id)
        })?;
        info!(provider_id = %id, name, "Provider created");
        Ok(id)
    }

    pub fn create_host(
        &self,
        ctx: &OpContext,
        provider: ProviderId,
        prototype_id: PrototypeId,
        fqdn: &str,
        description: &str,
    ) -> Result<HostId> {
        let vault = self.vault();
        let id = self.transaction(ctx, "create_host", Some(format!("host {}", fqdn)), |graph| {
            expect_prototype(graph, prototype_id, PrototypeType::Host)?;
            let provider_bundle = graph.bundle_of(ObjectRef::Provider(provider))?.id;
            ensure!(
                graph.prototype(prototype_id)?.bundle_id == provider_bundle,
                AdcmError::Conflict(format!(
                    "host prototype {} does not belong to the bundle of provider {}",
                    prototype_id, provider
                ))
            );
            ensure!(is_valid_fqdn(fqdn), AdcmError::WrongName(fqdn.to_string()));
            ensure!(
                graph.host_by_fqdn(fqdn).is_none(),
                AdcmError::HostConflict(format!("host with fqdn `{}` already exists", fqdn))
            );
            let spec = graph.prototype(prototype_id)?.config.clone();
            let config_id = create_initial_config(graph, vault, &spec)?;
            let id: HostId = graph.next_id();
            graph.hosts.insert(
                id,
                Host {
                    id,
                    fqdn: fqdn.to_string(),
                    description: description.to_string(),
                    provider_id: provider,
                    cluster_id: None,
                    common: ObjectCommon::new(prototype_id, config_id),
                    maintenance_mode: MaintenanceMode::Off,
                },
            );
            Ok(id)
        })?;
        info!(host_id = %id, fqdn, "Host created");
        Ok(id)
    }

    /// Add a service of the cluster's bundle with all of its components
    pub fn add_service(
        &self,
        ctx: &OpContext,
        cluster: ClusterId,
        prototype_id: PrototypeId,
    ) -> Result<ServiceId> {
        let origin = ctx.origin;
        let vault = self.vault();
        let object = Some(ObjectRef::Cluster(cluster).to_string());
        let id = self.transaction(ctx, "add_service", object, |graph| {
            expect_prototype(graph, prototype_id, PrototypeType::Service)?;
            let prototype = graph.prototype(prototype_id)?;
            let cluster_bundle = graph.bundle_of(ObjectRef::Cluster(cluster))?.id;
            ensure!(
                prototype.bundle_id == cluster_bundle,
                AdcmError::Conflict(format!(
                    "service {} does not belong to the bundle of cluster {}",
                    prototype.name, cluster
                ))
            );
            ensure!(
                graph.service_by_name(cluster, &prototype.name).is_none(),
                AdcmError::NameCollision(format!(
                    "service {} is already added to cluster {}",
                    prototype.name, cluster
                ))
            );
            ensure!(
                prototype.license != LicenseState::Unaccepted
                    || graph.accepted_licenses.contains(&prototype_id),
                AdcmError::LicenseNotAccepted(prototype.name.clone())
            );
            ensure_unlocked(graph, ObjectRef::Cluster(cluster), origin)?;
            create_service(graph, vault, cluster, prototype_id)
        })?;
        info!(cluster_id = %cluster, service_id = %id, "Service added");
        Ok(id)
    }

    pub fn add_host_to_cluster(&self, ctx: &OpContext, cluster: ClusterId, host: HostId) -> Result<()> {
        let origin = ctx.origin;
        let object = Some(ObjectRef::Cluster(cluster).to_string());
        self.transaction(ctx, "add_host_to_cluster", object, |graph| {
            add_host_to_cluster(graph, cluster, host, origin)
        })?;
        info!(cluster_id = %cluster, host_id = %host, "Host added to cluster");
        Ok(())
    }

    pub fn remove_host_from_cluster(
        &self,
        ctx: &OpContext,
        cluster: ClusterId,
        host: HostId,
    ) -> Result<()> {
        let origin = ctx.origin;
        let object = Some(ObjectRef::Cluster(cluster).to_string());
        self.transaction(ctx, "remove_host_from_cluster", object, |graph| {
            remove_host_from_cluster(graph, cluster, host, origin)
        })?;
        info!(cluster_id = %cluster, host_id = %host, "Host removed from cluster");
        Ok(())
    }

    /// Delete a cluster with its services; its hosts return to the free pool
    ///
    /// Refused while a job holds any object of the cluster.
    pub fn delete_cluster(&self, ctx: &OpContext, cluster: ClusterId) -> Result<()> {
        let origin = ctx.origin;
        let object = ObjectRef::Cluster(cluster);
        self.transaction(ctx, "delete_cluster", Some(object.to_string()), |graph| {
            graph.cluster(cluster)?;
            let subtree: Vec<ObjectRef> = std::iter::once(object)
                .chain(graph.services_of(cluster).into_iter().map(|s| ObjectRef::Service(s.id)))
                .chain(
                    graph
                        .components_of_cluster(cluster)
                        .into_iter()
                        .map(|c| ObjectRef::Component(c.id)),
                )
                .chain(graph.hosts_of_cluster(cluster).into_iter().map(|h| ObjectRef::Host(h.id)))
                .collect();
            for member in subtree {
                ensure_deletable(graph, member, origin)?;
            }
            ensure_not_bind_source(graph, cluster, None)?;

            let services: Vec<ServiceId> = graph.services_of(cluster).iter().map(|s| s.id).collect();
            for service in services {
                remove_service(graph, service);
            }
            graph.hostcomponent.remove(&cluster);
            for host in graph.hosts.values_mut().filter(|h| h.cluster_id == Some(cluster)) {
                host.cluster_id = None;
            }
            remove_owned_groups(graph, object);
            graph.binds.retain(|_, b| b.importer.cluster_id != cluster);
            if let Some(removed) = graph.clusters.remove(&cluster) {
                if let Some(config_id) = removed.common.config_id {
                    graph.remove_config(config_id);
                }
            }
            Ok(())
        })?;
        info!(cluster_id = %cluster, "Cluster deleted");
        Ok(())
    }

    pub fn delete_service(&self, ctx: &OpContext, service: ServiceId) -> Result<()> {
        let origin = ctx.origin;
        let object = ObjectRef::Service(service);
        self.transaction(ctx, "delete_service", Some(object.to_string()), |graph| {
            delete_service(graph, service, origin)
        })?;
        info!(service_id = %service, "Service deleted");
        Ok(())
    }

    pub fn delete_provider(&self, ctx: &OpContext, provider: ProviderId) -> Result<()> {
        let origin = ctx.origin;
        let object = ObjectRef::Provider(provider);
        self.transaction(ctx, "delete_provider", Some(object.to_string()), |graph| {
            graph.provider(provider)?;
            ensure_deletable(graph, object, origin)?;
            ensure!(
                graph.hosts_of_provider(provider).is_empty(),
                AdcmError::Conflict(format!(
                    "provider {} still has hosts",
                    graph.display_name(object)
                ))
            );
            remove_owned_groups(graph, object);
            if let Some(removed) = graph.providers.remove(&provider) {
                if let Some(config_id) = removed.common.config_id {
                    graph.remove_config(config_id);
                }
            }
            Ok(())
        })?;
        info!(provider_id = %provider, "Provider deleted");
        Ok(())
    }

    pub fn delete_host(&self, ctx: &OpContext, host: HostId) -> Result<()> {
        let origin = ctx.origin;
        let object = ObjectRef::Host(host);
        self.transaction(ctx, "delete_host", Some(object.to_string()), |graph| {
            let target = graph.host(host)?;
            ensure!(
                target.cluster_id.is_none(),
                AdcmError::HostConflict(format!("host {} is in a cluster", target.fqdn))
            );
            ensure_deletable(graph, object, origin)?;
            for group in graph.config_host_groups.values_mut() {
                group.hosts.remove(&host);
            }
            for group in graph.action_host_groups.values_mut() {
                group.hosts.remove(&host);
            }
            if let Some(removed) = graph.hosts.remove(&host) {
                if let Some(config_id) = removed.common.config_id {
                    graph.remove_config(config_id);
                }
            }
            Ok(())
        })?;
        info!(host_id = %host, "Host deleted");
        Ok(())
    }

    /// Change the fqdn of a host that is still in `created` state and not in a cluster
    pub fn rename_host(&self, ctx: &OpContext, host: HostId, fqdn: &str) -> Result<()> {
        let origin = ctx.origin;
        let object = ObjectRef::Host(host);
        self.transaction(ctx, "rename_host", Some(object.to_string()), |graph| {
            let target = graph.host(host)?;
            ensure!(
                target.common.state == adcm_common::DEFAULT_STATE && target.cluster_id.is_none(),
                AdcmError::HostUpdate(format!(
                    "host {} can be renamed only in `created` state outside of clusters",
                    target.fqdn
                ))
            );
            ensure!(is_valid_fqdn(fqdn), AdcmError::WrongName(fqdn.to_string()));
            ensure!(
                graph.host_by_fqdn(fqdn).is_none_or(|h| h.id == host),
                AdcmError::HostConflict(format!("host with fqdn `{}` already exists", fqdn))
            );
            ensure_unlocked(graph, object, origin)?;
            graph.host_mut(host)?.fqdn = fqdn.to_string();
            Ok(())
        })?;
        info!(host_id = %host, fqdn, "Host renamed");
        Ok(())
    }

    /// Set state and multi-state flags of an object
    pub fn change_state(&self, ctx: &OpContext, object: ObjectRef, changes: &StateChanges) -> Result<()> {
        let origin = ctx.origin;
        self.transaction(ctx, "change_state", Some(object.to_string()), |graph| {
            change_state(graph, object, changes, origin)
        })
    }
}
