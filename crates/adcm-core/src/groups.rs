//! Config host groups and action host groups

use std::collections::BTreeSet;

use adcm_common::{AdcmError, Result, SecretVault, ensure};
use adcm_config::{
    GROUP_KEYS, ValidationContext, default_group_keys, sync_group_config, validate_config,
    validate_group_keys,
};
use adcm_persistence::{
    ActionHostGroup, ActionHostGroupId, ConfigHostGroup, ConfigHostGroupId, ConfigLog, ConfigLogId,
    Graph, HostId, ObjectKind, ObjectRef,
};
use serde_json::Value;
use tracing::info;

use crate::concern::ensure_unlocked;
use crate::context::OpContext;
use crate::engine::AdcmCore;
use crate::variants::GraphVariants;

/// Hosts that may join a group owned by `owner`
pub fn host_candidates(graph: &Graph, owner: ObjectRef) -> BTreeSet<HostId> {
    graph.mapped_hosts(owner)
}

/// Current group revisions of every config host group of `owner` containing `host`
pub fn host_group_configs<'a>(graph: &'a Graph, owner: ObjectRef, host: HostId) -> Vec<&'a ConfigLog> {
    graph
        .config_host_groups_of(owner)
        .into_iter()
        .filter(|g| g.hosts.contains(&host))
        .filter_map(|g| graph.current_config(g.config_id).ok())
        .collect()
}

fn with_group_keys(attr: &Value, keys: Value) -> Value {
    let mut attr = match attr {
        Value::Object(map) => Value::Object(map.clone()),
        _ => Value::Object(Default::default()),
    };
    attr[GROUP_KEYS] = keys;
    attr
}

pub fn create_config_host_group(
    graph: &mut Graph,
    owner: ObjectRef,
    name: &str,
    description: &str,
) -> Result<ConfigHostGroupId> {
    ensure!(
        owner.kind() != ObjectKind::Host,
        AdcmError::Validation("hosts can not own config host groups".to_string())
    );
    ensure!(
        !name.trim().is_empty(),
        AdcmError::WrongName("config host group name must not be empty".to_string())
    );
    ensure!(
        !graph.config_host_groups_of(owner).iter().any(|g| g.name == name),
        AdcmError::NameCollision(format!("group `{}` already exists for {}", name, owner))
    );
    let spec = graph.prototype_of(owner)?.config.clone();
    let owner_log = graph
        .current_config_of(owner)?
        .ok_or_else(|| AdcmError::Validation(format!("{} has no configuration", owner)))?;
    let config = owner_log.config.clone();
    let attr = with_group_keys(&owner_log.attr, default_group_keys(&spec));

    let config_id = graph.create_config(config, attr, "init");
    let id: ConfigHostGroupId = graph.next_id();
    graph.config_host_groups.insert(
        id,
        ConfigHostGroup {
            id,
            owner,
            name: name.to_string(),
            description: description.to_string(),
            hosts: BTreeSet::new(),
            config_id,
        },
    );
    Ok(id)
}

pub fn add_host_to_config_group(graph: &mut Graph, group: ConfigHostGroupId, host: HostId) -> Result<()> {
    let owner = graph.config_host_group(group)?.owner;
    let fqdn = graph.host(host)?.fqdn.clone();
    ensure!(
        host_candidates(graph, owner).contains(&host),
        AdcmError::HostGroupConflict(format!("host {} is not a candidate for groups of {}", fqdn, owner))
    );
    let taken = graph
        .config_host_groups_of(owner)
        .iter()
        .any(|g| g.hosts.contains(&host));
    ensure!(
        !taken,
        AdcmError::HostGroupConflict(format!("host {} is already in a group of {}", fqdn, owner))
    );
    graph.config_host_group_mut(group)?.hosts.insert(host);
    Ok(())
}

/// Validate and append a group revision; synchronised parameters keep the owner's values
pub fn apply_group_config(
    graph: &mut Graph,
    vault: &SecretVault,
    group: ConfigHostGroupId,
    config: &Value,
    attr: &Value,
    description: &str,
) -> Result<ConfigLogId> {
    let (owner, config_id) = {
        let g = graph.config_host_group(group)?;
        (g.owner, g.config_id)
    };
    let prototype = graph.prototype_of(owner)?;
    let spec = prototype.config.clone();
    let keys = validate_group_keys(
        &spec,
        attr.get(GROUP_KEYS).unwrap_or(&Value::Null),
        prototype.config_group_customization,
    )?;
    let state = graph.object(owner)?.state().to_string();
    let current = graph.current_config(config_id)?.config.clone();
    let validated = {
        let variants = GraphVariants::new(graph, owner);
        let ctx = ValidationContext {
            state: &state,
            current: Some(&current),
            vault,
            variants: &variants,
        };
        validate_config(&spec, config, attr, &ctx)?
    };
    let group_attr = with_group_keys(&validated.attr, keys);
    let owner_log = graph
        .current_config_of(owner)?
        .ok_or_else(|| AdcmError::Validation(format!("{} has no configuration", owner)))?;
    let (config, attr) = sync_group_config(&owner_log.config, &owner_log.attr, &validated.config, &group_attr);
    graph.append_config(config_id, config, attr, description)
}

pub fn create_action_host_group(
    graph: &mut Graph,
    owner: ObjectRef,
    name: &str,
    description: &str,
) -> Result<ActionHostGroupId> {
    ensure!(
        matches!(owner.kind(), ObjectKind::Cluster | ObjectKind::Service | ObjectKind::Component),
        AdcmError::Validation(format!("{} can not own action host groups", owner.kind()))
    );
    graph.object(owner)?;
    ensure!(
        !name.trim().is_empty(),
        AdcmError::WrongName("action host group name must not be empty".to_string())
    );
    ensure!(
        !graph.action_host_groups_of(owner).iter().any(|g| g.name == name),
        AdcmError::NameCollision(format!("group `{}` already exists for {}", name, owner))
    );
    let id: ActionHostGroupId = graph.next_id();
    graph.action_host_groups.insert(
        id,
        ActionHostGroup {
            id,
            owner,
            name: name.to_string(),
            description: description.to_string(),
            hosts: BTreeSet::new(),
        },
    );
    Ok(id)
}

fn ensure_group_idle(graph: &Graph, group: ActionHostGroupId) -> Result<()> {
    let busy = graph
        .active_tasks()
        .any(|t| t.action_host_group == Some(group));
    ensure!(
        !busy,
        AdcmError::Locked(format!("action host group {} has a running task", group))
    );
    Ok(())
}

impl AdcmCore {
    pub fn create_config_host_group(
        &self,
        ctx: &OpContext,
        owner: ObjectRef,
        name: &str,
        description: &str,
    ) -> Result<ConfigHostGroupId> {
        let origin = ctx.origin;
        let id = self.transaction(ctx, "create_config_host_group", Some(owner.to_string()), |graph| {
            ensure_unlocked(graph, owner, origin)?;
            create_config_host_group(graph, owner, name, description)
        })?;
        info!(group_id = %id, owner = %owner, name, "Config host group created");
        Ok(id)
    }

    pub fn delete_config_host_group(&self, ctx: &OpContext, group: ConfigHostGroupId) -> Result<()> {
        let origin = ctx.origin;
        self.transaction(ctx, "delete_config_host_group", Some(format!("config host group {}", group)), |graph| {
            let removed = graph.config_host_group(group)?.clone();
            ensure_unlocked(graph, removed.owner, origin)?;
            graph.config_host_groups.remove(&group);
            graph.remove_config(removed.config_id);
            Ok(())
        })
    }

    pub fn add_host_to_config_group(&self, ctx: &OpContext, group: ConfigHostGroupId, host: HostId) -> Result<()> {
        let origin = ctx.origin;
        self.transaction(ctx, "add_host_to_config_host_group", Some(format!("config host group {}", group)), |graph| {
            let owner = graph.config_host_group(group)?.owner;
            ensure_unlocked(graph, owner, origin)?;
            add_host_to_config_group(graph, group, host)
        })
    }

    pub fn remove_host_from_config_group(
        &self,
        ctx: &OpContext,
        group: ConfigHostGroupId,
        host: HostId,
    ) -> Result<()> {
        let origin = ctx.origin;
        self.transaction(ctx, "remove_host_from_config_host_group", Some(format!("config host group {}", group)), |graph| {
            let owner = graph.config_host_group(group)?.owner;
            ensure_unlocked(graph, owner, origin)?;
            let removed = graph.config_host_group_mut(group)?.hosts.remove(&host);
            ensure!(
                removed,
                AdcmError::HostGroupConflict(format!("host {} is not in config host group {}", host, group))
            );
            Ok(())
        })
    }

    /// Submit a group revision; `attr.group_keys` marks desynchronised parameters
    pub fn update_group_config(
        &self,
        ctx: &OpContext,
        group: ConfigHostGroupId,
        config: Value,
        attr: Value,
        description: &str,
    ) -> Result<ConfigLogId> {
        let origin = ctx.origin;
        let vault = self.vault();
        let id = self.transaction(ctx, "update_config_host_group_config", Some(format!("config host group {}", group)), |graph| {
            let owner = graph.config_host_group(group)?.owner;
            ensure_unlocked(graph, owner, origin)?;
            apply_group_config(graph, vault, group, &config, &attr, description)
        })?;
        info!(group_id = %group, config_log_id = %id, "Config host group config updated");
        Ok(id)
    }

    pub fn create_action_host_group(
        &self,
        ctx: &OpContext,
        owner: ObjectRef,
        name: &str,
        description: &str,
    ) -> Result<ActionHostGroupId> {
        let id = self.transaction(ctx, "create_action_host_group", Some(owner.to_string()), |graph| {
            create_action_host_group(graph, owner, name, description)
        })?;
        info!(group_id = %id, owner = %owner, name, "Action host group created");
        Ok(id)
    }

    pub fn delete_action_host_group(&self, ctx: &OpContext, group: ActionHostGroupId) -> Result<()> {
        self.transaction(ctx, "delete_action_host_group", Some(format!("action host group {}", group)), |graph| {
            graph.action_host_group(group)?;
            ensure_group_idle(graph, group)?;
            graph.action_host_groups.remove(&group);
            Ok(())
        })
    }

    pub fn add_host_to_action_group(&self, ctx: &OpContext, group: ActionHostGroupId, host: HostId) -> Result<()> {
        self.transaction(ctx, "add_host_to_action_host_group", Some(format!("action host group {}", group)), |graph| {
            let owner = graph.action_host_group(group)?.owner;
            let fqdn = graph.host(host)?.fqdn.clone();
            ensure!(
                host_candidates(graph, owner).contains(&host),
                AdcmError::HostGroupConflict(format!("host {} is not mapped to {}", fqdn, owner))
            );
            ensure_group_idle(graph, group)?;
            let inserted = graph.action_host_group_mut(group)?.hosts.insert(host);
            ensure!(
                inserted,
                AdcmError::HostGroupConflict(format!("host {} is already in action host group {}", fqdn, group))
            );
            Ok(())
        })
    }

    pub fn remove_host_from_action_group(
        &self,
        ctx: &OpContext,
        group: ActionHostGroupId,
        host: HostId,
    ) -> Result<()> {
        self.transaction(ctx, "remove_host_from_action_host_group", Some(format!("action host group {}", group)), |graph| {
            graph.action_host_group(group)?;
            ensure_group_idle(graph, group)?;
            let removed = graph.action_host_group_mut(group)?.hosts.remove(&host);
            ensure!(
                removed,
                AdcmError::HostGroupConflict(format!("host {} is not in action host group {}", host, group))
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use serde_json::json;

    #[test]
    fn test_config_group_overrides_and_sync() {
        let fx = Fixture::new();
        fx.add_hosts_to_cluster(2);
        let owner = ObjectRef::Cluster(fx.cluster);
        let group = fx.core.create_config_host_group(&fx.ctx, owner, "fast", "").unwrap();
        fx.core.add_host_to_config_group(&fx.ctx, group, fx.hosts[0]).unwrap();

        let err = fx.core.add_host_to_config_group(&fx.ctx, group, fx.hosts[2]).unwrap_err();
        assert_eq!(err.code(), "HOST_GROUP_CONFLICT");
        let other = fx.core.create_config_host_group(&fx.ctx, owner, "slow", "").unwrap();
        let err = fx.core.add_host_to_config_group(&fx.ctx, other, fx.hosts[0]).unwrap_err();
        assert_eq!(err.code(), "HOST_GROUP_CONFLICT");

        fx.core
            .update_group_config(
                &fx.ctx,
                group,
                json!({"integer": 40}),
                json!({"group_keys": {"integer": true}}),
                "",
            )
            .unwrap();
        fx.core
            .update_config(&fx.ctx, owner, json!({"integer": 12, "string": "changed"}), json!({}), "")
            .unwrap();

        let graph = fx.core.snapshot();
        let logs = host_group_configs(&graph, owner, fx.hosts[0]);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].config["integer"], 40);
        assert_eq!(logs[0].config["string"], "changed");
        assert!(host_group_configs(&graph, owner, fx.hosts[1]).is_empty());
    }

    #[test]
    fn test_desync_requires_customization() {
        let fx = Fixture::new();
        let owner = ObjectRef::Cluster(fx.cluster);
        let group = fx.core.create_config_host_group(&fx.ctx, owner, "g", "").unwrap();
        let err = fx
            .core
            .update_group_config(&fx.ctx, group, json!({}), json!({"group_keys": {"string": true}}), "")
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_VALUE_ERROR");
    }

    #[test]
    fn test_action_group_hosts_must_be_mapped() {
        let fx = Fixture::new();
        let (s1, _) = fx.mapped_cluster();
        let owner = ObjectRef::Service(s1);
        let group = fx.core.create_action_host_group(&fx.ctx, owner, "first", "").unwrap();
        fx.core.add_host_to_action_group(&fx.ctx, group, fx.hosts[0]).unwrap();
        let err = fx.core.add_host_to_action_group(&fx.ctx, group, fx.hosts[2]).unwrap_err();
        assert_eq!(err.code(), "HOST_GROUP_CONFLICT");
        let err = fx.core.create_action_host_group(&fx.ctx, ObjectRef::Host(fx.hosts[0]), "h", "").unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
