//! Bundle upgrades of clusters and providers
//!
//! `bundle_switch` moves an object tree onto the prototypes of a newer bundle
//! and leaves a `before_upgrade` snapshot on every object it touched;
//! `bundle_revert` puts the tree back from that snapshot.

use std::collections::{BTreeMap, BTreeSet};

use adcm_common::{AdcmError, Result, SecretVault, ensure};
use adcm_config::{
    ConfigSpec, GROUP_KEYS, default_group_keys, migrate_config, reveal_secrets, seal_secrets,
};
use adcm_persistence::{
    ActionId, BeforeUpgrade, BundleId, ConfigLog, Graph, HcEntry, LicenseState, ObjectConfigId,
    ObjectRef, PrototypeId, PrototypeType, Upgrade, UpgradeId,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::concern::ensure_unlocked;
use crate::configuration::{create_initial_config, sync_owner_groups};
use crate::context::OpContext;
use crate::engine::AdcmCore;
use crate::hostcomponent::commit;
use crate::objects::{create_missing_components, remove_component, remove_service};

/// What an upgrade request resolved to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UpgradeOutcome {
    /// Prototypes were switched at once
    Switched,
    /// The upgrade carries scripts; its action has to be launched
    ActionRequired { action: ActionId, upgrade: UpgradeId },
}

fn ensure_upgradable(object: ObjectRef) -> Result<()> {
    ensure!(
        matches!(object, ObjectRef::Cluster(_) | ObjectRef::Provider(_)),
        AdcmError::Upgrade(format!("{} can not be upgraded, only clusters and providers", object))
    );
    Ok(())
}

/// Upgrades applicable to a cluster or provider in its current version, edition and state
pub fn list_upgrades(graph: &Graph, object: ObjectRef) -> Result<Vec<&Upgrade>> {
    ensure_upgradable(object)?;
    let current = graph.bundle_of(object)?;
    let state = graph.object(object)?.state();
    Ok(graph
        .upgrades
        .values()
        .filter(|u| {
            graph
                .bundle(u.bundle_id)
                .is_ok_and(|b| b.name == current.name && b.id != current.id)
        })
        .filter(|u| u.applies_to(&current.version, &current.edition))
        .filter(|u| u.state_available.contains(state))
        .collect())
}

/// The object and everything that moves with it
fn members(graph: &Graph, root: ObjectRef) -> Vec<ObjectRef> {
    let mut out = vec![root];
    match root {
        ObjectRef::Cluster(cluster) => {
            for service in graph.services_of(cluster) {
                out.push(ObjectRef::Service(service.id));
                out.extend(graph.components_of(service.id).iter().map(|c| ObjectRef::Component(c.id)));
            }
        }
        ObjectRef::Provider(provider) => {
            out.extend(graph.hosts_of_provider(provider).iter().map(|h| ObjectRef::Host(h.id)));
        }
        _ => {}
    }
    out
}

fn record_before_upgrade(graph: &mut Graph, object: ObjectRef) -> Result<()> {
    let bundle_id = graph.bundle_of(object)?.id;
    let config_log = graph.current_config_of(object)?.map(|log| log.id);
    let mut groups = BTreeMap::new();
    for group in graph.config_host_groups_of(object) {
        groups.insert(group.id, graph.current_config(group.config_id)?.id);
    }
    let common = graph.object_mut(object)?.common_mut();
    common.before_upgrade = BeforeUpgrade {
        state: Some(common.state.clone()),
        bundle_id: Some(bundle_id),
        prototype_id: Some(common.prototype_id),
        config_log,
        groups,
    };
    Ok(())
}

fn find_prototype(
    graph: &Graph,
    bundle: BundleId,
    kind: PrototypeType,
    name: &str,
    parent: Option<PrototypeId>,
) -> Option<PrototypeId> {
    graph
        .prototypes
        .values()
        .find(|p| p.bundle_id == bundle && p.kind == kind && p.name == name && p.parent_id == parent)
        .map(|p| p.id)
}

/// Same-name values survive, secrets are re-sealed under the new layout
fn migrate_values(
    old_spec: &ConfigSpec,
    new_spec: &ConfigSpec,
    log: &ConfigLog,
    vault: &SecretVault,
) -> Result<(Value, Value)> {
    let revealed = reveal_secrets(old_spec, &log.config, vault)?;
    let (mut config, attr) = migrate_config(new_spec, &revealed, &log.attr);
    seal_secrets(new_spec, &mut config, vault)?;
    Ok((config, attr))
}

/// Keep the desync marks of parameters that still exist
fn migrate_group_keys(spec: &ConfigSpec, old: Option<&Value>) -> Value {
    let mut keys = default_group_keys(spec);
    let (Some(Value::Object(old)), Value::Object(new)) = (old, &mut keys) else {
        return default_group_keys(spec);
    };
    for (name, slot) in new.iter_mut() {
        match (old.get(name), slot) {
            (Some(Value::Bool(flag)), Value::Bool(target)) => *target = *flag,
            (Some(Value::Object(previous)), Value::Object(target)) => {
                if let Some(flag) = previous.get("value") {
                    target.insert("value".to_string(), flag.clone());
                }
                let previous_fields = previous.get("fields").and_then(Value::as_object);
                if let (Some(previous_fields), Some(Value::Object(fields))) =
                    (previous_fields, target.get_mut("fields"))
                {
                    for (field, flag) in fields.iter_mut() {
                        if let Some(old_flag @ Value::Bool(_)) = previous_fields.get(field) {
                            *flag = old_flag.clone();
                        }
                    }
                }
            }
            _ => {}
        }
    }
    keys
}

fn switch_prototype(
    graph: &mut Graph,
    vault: &SecretVault,
    object: ObjectRef,
    prototype: PrototypeId,
) -> Result<()> {
    let old_spec = graph.prototype_of(object)?.config.clone();
    let new_spec = graph.prototype(prototype)?.config.clone();
    graph.object_mut(object)?.common_mut().prototype_id = prototype;

    let Some(config_id) = graph.object(object)?.config_id() else {
        if let Some(config_id) = create_initial_config(graph, vault, &new_spec)? {
            graph.object_mut(object)?.common_mut().config_id = Some(config_id);
        }
        return Ok(());
    };
    let log = graph.current_config(config_id)?.clone();
    let (config, attr) = migrate_values(&old_spec, &new_spec, &log, vault)?;
    graph.append_config(config_id, config, attr, "upgrade")?;

    let groups: Vec<ObjectConfigId> = graph
        .config_host_groups_of(object)
        .iter()
        .map(|g| g.config_id)
        .collect();
    for group_config_id in groups {
        let log = graph.current_config(group_config_id)?.clone();
        let (config, mut attr) = migrate_values(&old_spec, &new_spec, &log, vault)?;
        let keys = migrate_group_keys(&new_spec, log.attr.get(GROUP_KEYS));
        match attr.as_object_mut() {
            Some(map) => {
                map.insert(GROUP_KEYS.to_string(), keys);
            }
            None => {
                let mut map = Map::new();
                map.insert(GROUP_KEYS.to_string(), keys);
                attr = Value::Object(map);
            }
        }
        graph.append_config(group_config_id, config, attr, "upgrade")?;
    }
    sync_owner_groups(graph, object)
}

/// Move `root` and its children onto the prototypes of the upgrade's bundle
///
/// Services and components missing from the new bundle are removed, new
/// components are created. `post_upgrade_hc` replaces the cluster's map when
/// not empty.
pub fn bundle_switch(
    graph: &mut Graph,
    vault: &SecretVault,
    root: ObjectRef,
    upgrade: UpgradeId,
    post_upgrade_hc: &[HcEntry],
) -> Result<()> {
    ensure_upgradable(root)?;
    let upgrade = graph.upgrade(upgrade)?.clone();
    let target = upgrade.bundle_id;
    for member in members(graph, root) {
        record_before_upgrade(graph, member)?;
    }

    let root_kind = graph.prototype_of(root)?.kind;
    let root_prototype = graph
        .prototypes
        .values()
        .find(|p| p.bundle_id == target && p.kind == root_kind)
        .map(|p| p.id)
        .ok_or_else(|| {
            AdcmError::Upgrade(format!("bundle {} has no {} prototype", target, root_kind))
        })?;
    switch_prototype(graph, vault, root, root_prototype)?;

    match root {
        ObjectRef::Cluster(cluster) => {
            let services: Vec<_> = graph.services_of(cluster).iter().map(|s| s.id).collect();
            for service in services {
                let name = graph.prototype_name(ObjectRef::Service(service));
                let Some(prototype) = find_prototype(graph, target, PrototypeType::Service, &name, None) else {
                    debug!(service_id = %service, name = %name, "Service is gone from the new bundle");
                    remove_service(graph, service);
                    continue;
                };
                switch_prototype(graph, vault, ObjectRef::Service(service), prototype)?;

                let components: Vec<_> = graph.components_of(service).iter().map(|c| c.id).collect();
                for component in components {
                    let name = graph.prototype_name(ObjectRef::Component(component));
                    match find_prototype(graph, target, PrototypeType::Component, &name, Some(prototype)) {
                        Some(p) => switch_prototype(graph, vault, ObjectRef::Component(component), p)?,
                        None => remove_component(graph, component),
                    }
                }
                create_missing_components(graph, vault, service)?;
            }
            if !post_upgrade_hc.is_empty() {
                let desired: BTreeSet<HcEntry> = post_upgrade_hc
                    .iter()
                    .filter(|e| {
                        graph.components.contains_key(&e.component_id)
                            && graph.hosts.get(&e.host_id).is_some_and(|h| h.cluster_id == Some(cluster))
                    })
                    .copied()
                    .collect();
                commit(graph, cluster, desired);
            }
        }
        ObjectRef::Provider(provider) => {
            let hosts: Vec<_> = graph.hosts_of_provider(provider).iter().map(|h| h.id).collect();
            for host in hosts {
                let name = graph.prototype_name(ObjectRef::Host(host));
                let prototype = find_prototype(graph, target, PrototypeType::Host, &name, None)
                    .ok_or_else(|| {
                        AdcmError::Upgrade(format!("bundle {} has no host prototype {}", target, name))
                    })?;
                switch_prototype(graph, vault, ObjectRef::Host(host), prototype)?;
            }
        }
        _ => {}
    }

    if let Some(state) = &upgrade.state_on_success {
        graph.object_mut(root)?.common_mut().state.clone_from(state);
    }
    Ok(())
}

fn restore_object(graph: &mut Graph, object: ObjectRef) -> Result<()> {
    let before = graph.object(object)?.common().before_upgrade.clone();
    if before.is_empty() {
        return Ok(());
    }
    if let (Some(log_id), Some(config_id)) = (before.config_log, graph.object(object)?.config_id()) {
        let log = graph.config_log(log_id)?.clone();
        graph.append_config(config_id, log.config, log.attr, "revert")?;
    }
    for (group, log_id) in &before.groups {
        let Ok(group) = graph.config_host_group(*group) else {
            continue;
        };
        let config_id = group.config_id;
        let log = graph.config_log(*log_id)?.clone();
        graph.append_config(config_id, log.config, log.attr, "revert")?;
    }
    let common = graph.object_mut(object)?.common_mut();
    if let Some(prototype) = before.prototype_id {
        common.prototype_id = prototype;
    }
    if let Some(state) = before.state {
        common.state = state;
    }
    common.before_upgrade = BeforeUpgrade::default();
    Ok(())
}

/// Undo the last `bundle_switch` of `root`
///
/// Objects created after the switch from the new bundle are removed;
/// objects the switch removed are not brought back.
pub fn bundle_revert(graph: &mut Graph, root: ObjectRef) -> Result<()> {
    ensure_upgradable(root)?;
    let old_bundle = graph
        .object(root)?
        .common()
        .before_upgrade
        .bundle_id
        .ok_or_else(|| AdcmError::Upgrade(format!("{} has not been upgraded", root)))?;

    if let ObjectRef::Cluster(cluster) = root {
        let is_new = |graph: &Graph, object: ObjectRef| {
            graph.object(object).is_ok_and(|o| o.common().before_upgrade.is_empty())
                && graph.bundle_of(object).is_ok_and(|b| b.id != old_bundle)
        };
        let components: Vec<_> = graph.components_of_cluster(cluster).iter().map(|c| c.id).collect();
        for component in components {
            if is_new(graph, ObjectRef::Component(component)) {
                remove_component(graph, component);
            }
        }
        let services: Vec<_> = graph.services_of(cluster).iter().map(|s| s.id).collect();
        for service in services {
            if is_new(graph, ObjectRef::Service(service)) {
                remove_service(graph, service);
            }
        }
    }
    for member in members(graph, root) {
        restore_object(graph, member)?;
    }
    Ok(())
}

fn ensure_license_accepted(graph: &Graph, bundle: BundleId) -> Result<()> {
    let unaccepted = graph.prototypes.values().find(|p| {
        p.bundle_id == bundle
            && matches!(p.kind, PrototypeType::Cluster | PrototypeType::Provider)
            && p.license == LicenseState::Unaccepted
            && !graph.accepted_licenses.contains(&p.id)
    });
    match unaccepted {
        Some(p) => Err(AdcmError::LicenseNotAccepted(p.name.clone())),
        None => Ok(()),
    }
}

impl AdcmCore {
    /// Applicable upgrades of a cluster or provider
    pub fn list_upgrades(&self, object: ObjectRef) -> Result<Vec<Upgrade>> {
        let graph = self.snapshot();
        Ok(list_upgrades(&graph, object)?.into_iter().cloned().collect())
    }

    /// Upgrade a cluster or provider; upgrades with scripts return the action to run
    pub fn upgrade(&self, ctx: &OpContext, object: ObjectRef, upgrade: UpgradeId) -> Result<UpgradeOutcome> {
        let origin = ctx.origin;
        let vault = self.vault();
        let outcome = self.transaction(ctx, "upgrade", Some(object.to_string()), |graph| {
            ensure_unlocked(graph, object, origin)?;
            ensure!(
                list_upgrades(graph, object)?.iter().any(|u| u.id == upgrade),
                AdcmError::Upgrade(format!("upgrade {} is not applicable to {}", upgrade, object))
            );
            let rule = graph.upgrade(upgrade)?;
            let action = rule.action_id;
            ensure_license_accepted(graph, rule.bundle_id)?;
            if let Some(action) = action {
                return Ok(UpgradeOutcome::ActionRequired { action, upgrade });
            }
            bundle_switch(graph, vault, object, upgrade, &[])?;
            Ok(UpgradeOutcome::Switched)
        })?;
        if outcome == UpgradeOutcome::Switched {
            info!(object = %object, upgrade_id = %upgrade, "Object upgraded");
        }
        Ok(outcome)
    }
}
