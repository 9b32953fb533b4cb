//! Configuration edits of objects

use adcm_common::{AdcmError, Result, SecretVault};
use adcm_config::{ConfigSpec, ValidationContext, initial_config, reveal_secrets, sync_group_config, validate_config};
use adcm_persistence::{ConfigLogId, Graph, ObjectConfigId, ObjectRef};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::concern::ensure_unlocked;
use crate::context::{OpContext, Origin};
use crate::engine::AdcmCore;
use crate::variants::GraphVariants;

/// A config revision as returned to callers
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConfigView {
    pub id: ConfigLogId,
    pub config: Value,
    pub attr: Value,
    pub description: String,
}

/// Config of a new object built from its spec defaults; `None` for objects without parameters
pub(crate) fn create_initial_config(
    graph: &mut Graph,
    vault: &SecretVault,
    spec: &ConfigSpec,
) -> Result<Option<ObjectConfigId>> {
    if spec.is_empty() {
        return Ok(None);
    }
    let (config, attr) = initial_config(spec, vault)?;
    Ok(Some(graph.create_config(config, attr, "init")))
}

/// Validate and append a config revision, then refresh the owner's host groups
pub fn apply_config(
    graph: &mut Graph,
    vault: &SecretVault,
    object: ObjectRef,
    config: &Value,
    attr: &Value,
    description: &str,
    origin: Origin,
) -> Result<ConfigLogId> {
    ensure_unlocked(graph, object, origin)?;
    let target = graph.object(object)?;
    let state = target.state().to_string();
    let config_id = target.config_id().ok_or_else(|| {
        AdcmError::Validation(format!("{} has no configuration", object))
    })?;
    let spec = graph.prototype_of(object)?.config.clone();
    let current = graph.current_config(config_id)?.config.clone();

    let validated = {
        let variants = GraphVariants::new(graph, object);
        let ctx = ValidationContext {
            state: &state,
            current: Some(&current),
            vault,
            variants: &variants,
        };
        validate_config(&spec, config, attr, &ctx)?
    };
    let log_id = graph.append_config(config_id, validated.config, validated.attr, description)?;
    sync_owner_groups(graph, object)?;
    Ok(log_id)
}

/// Re-derive synchronised values of every config host group of `owner`
pub(crate) fn sync_owner_groups(graph: &mut Graph, owner: ObjectRef) -> Result<()> {
    let Some(owner_config) = graph.current_config_of(owner)?.cloned() else {
        return Ok(());
    };
    let groups: Vec<ObjectConfigId> = graph
        .config_host_groups_of(owner)
        .iter()
        .map(|g| g.config_id)
        .collect();
    for group_config_id in groups {
        let group_log = graph.current_config(group_config_id)?;
        let (config, attr) = sync_group_config(
            &owner_config.config,
            &owner_config.attr,
            &group_log.config,
            &group_log.attr,
        );
        if config != group_log.config || attr != group_log.attr {
            graph.append_config(group_config_id, config, attr, "sync with owner")?;
        }
    }
    Ok(())
}

impl AdcmCore {
    /// Submit a new config revision for an object
    pub fn update_config(
        &self,
        ctx: &OpContext,
        object: ObjectRef,
        config: Value,
        attr: Value,
        description: &str,
    ) -> Result<ConfigLogId> {
        let origin = ctx.origin;
        let vault = self.vault();
        let log_id = self.transaction(ctx, "update_config", Some(object.to_string()), |graph| {
            apply_config(graph, vault, object, &config, &attr, description, origin)
        })?;
        info!(object = %object, config_log_id = %log_id, "Config updated");
        Ok(log_id)
    }

    /// Current config revision; secrets are revealed only with the `reveal_secrets` permission
    pub fn config_of(&self, ctx: &OpContext, object: ObjectRef, reveal: bool) -> Result<ConfigView> {
        if reveal {
            self.authorize(ctx, "reveal_secrets", Some(&object.to_string()))?;
        }
        let graph = self.snapshot();
        let log = graph
            .current_config_of(object)?
            .ok_or_else(|| AdcmError::Validation(format!("{} has no configuration", object)))?;
        let config = if reveal {
            reveal_secrets(&graph.prototype_of(object)?.config, &log.config, self.vault())?
        } else {
            log.config.clone()
        };
        Ok(ConfigView {
            id: log.id,
            config,
            attr: log.attr.clone(),
            description: log.description.clone(),
        })
    }
}
