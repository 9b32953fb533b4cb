//! State plugins
//!
//! Changes aimed at the task owner are queued on the task and committed with
//! its success; other targets change at once.

use std::collections::BTreeSet;

use adcm_common::{AdcmError, Result};
use adcm_core::Origin;
use adcm_core::objects::change_state;
use adcm_persistence::{Graph, ObjectRef, StateChanges, TaskId};
use serde::Deserialize;

use super::describe;
use crate::{AnsiblePlugin, PluginCall, PluginResult};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateArgs {
    pub state: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultiStateUnsetArgs {
    pub state: String,
    /// Succeed without change when the flag is absent
    #[serde(default)]
    pub missing_ok: bool,
}

/// State and multi-state of `target` as the task sees them, queued changes included
fn effective_state(graph: &Graph, task_id: TaskId, target: ObjectRef) -> Result<(String, BTreeSet<String>)> {
    let object = graph.object(target)?;
    let mut state = object.state().to_string();
    let mut multi_state = object.multi_state().clone();
    let task = graph.task(task_id)?;
    if task.owner == target {
        task.pending.apply_to(&mut state, &mut multi_state);
    }
    Ok((state, multi_state))
}

fn stage_changes(
    graph: &mut Graph,
    task_id: TaskId,
    target: ObjectRef,
    changes: &StateChanges,
    origin: Origin,
) -> Result<()> {
    if graph.task(task_id)?.owner == target {
        graph.object(target)?;
        graph.task_mut(task_id)?.pending.merge(changes);
        return Ok(());
    }
    change_state(graph, target, changes, origin)
}

/// `adcm_state`: set the state of the targets
pub struct StatePlugin;

impl AnsiblePlugin for StatePlugin {
    type Args = StateArgs;
    type Value = String;
    const TARGETED: bool = true;

    fn name(&self) -> &'static str {
        "adcm_state"
    }

    fn execute(
        &self,
        call: &PluginCall<'_>,
        targets: &[ObjectRef],
        args: StateArgs,
    ) -> Result<PluginResult<String>> {
        let (origin, task_id) = (call.origin(), call.task_id);
        let changes = StateChanges {
            state: Some(args.state.clone()),
            ..Default::default()
        };
        let changed = call.transaction("change_state", describe(targets), |graph| {
            let mut changed = false;
            for target in targets {
                changed |= effective_state(graph, task_id, *target)?.0 != args.state;
                stage_changes(graph, task_id, *target, &changes, origin)?;
            }
            Ok(changed)
        })?;
        Ok(PluginResult::new(changed, args.state))
    }
}

/// `adcm_multi_state_set`: raise a multi-state flag on the targets
pub struct MultiStateSetPlugin;

impl AnsiblePlugin for MultiStateSetPlugin {
    type Args = StateArgs;
    type Value = String;
    const TARGETED: bool = true;

    fn name(&self) -> &'static str {
        "adcm_multi_state_set"
    }

    fn execute(
        &self,
        call: &PluginCall<'_>,
        targets: &[ObjectRef],
        args: StateArgs,
    ) -> Result<PluginResult<String>> {
        let (origin, task_id) = (call.origin(), call.task_id);
        let changes = StateChanges {
            multi_state_set: vec![args.state.clone()],
            ..Default::default()
        };
        let changed = call.transaction("change_state", describe(targets), |graph| {
            let mut changed = false;
            for target in targets {
                changed |= !effective_state(graph, task_id, *target)?.1.contains(&args.state);
                stage_changes(graph, task_id, *target, &changes, origin)?;
            }
            Ok(changed)
        })?;
        Ok(PluginResult::new(changed, args.state))
    }
}

/// `adcm_multi_state_unset`: drop a multi-state flag from the targets
pub struct MultiStateUnsetPlugin;

impl AnsiblePlugin for MultiStateUnsetPlugin {
    type Args = MultiStateUnsetArgs;
    type Value = String;
    const TARGETED: bool = true;

    fn name(&self) -> &'static str {
        "adcm_multi_state_unset"
    }

    fn execute(
        &self,
        call: &PluginCall<'_>,
        targets: &[ObjectRef],
        args: MultiStateUnsetArgs,
    ) -> Result<PluginResult<String>> {
        let (origin, task_id) = (call.origin(), call.task_id);
        let changes = StateChanges {
            multi_state_unset: vec![args.state.clone()],
            ..Default::default()
        };
        let changed = call.transaction("change_state", describe(targets), |graph| {
            let mut changed = false;
            for target in targets {
                let present = effective_state(graph, task_id, *target)?.1.contains(&args.state);
                if !present && !args.missing_ok {
                    return Err(AdcmError::Validation(format!(
                        "{} has no multi state {}",
                        graph.display_name(*target),
                        args.state
                    )));
                }
                changed |= present;
                stage_changes(graph, task_id, *target, &changes, origin)?;
            }
            Ok(changed)
        })?;
        Ok(PluginResult::new(changed, args.state))
    }
}
