use adcm_common::Result;
use adcm_core::maintenance::set_maintenance_mode;
use adcm_persistence::{MaintenanceMode, ObjectRef};
use serde::Deserialize;

use super::describe;
use crate::{AnsiblePlugin, PluginCall, PluginResult};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MaintenanceModeArgs {
    pub value: bool,
}

/// `adcm_change_maintenance_mode`: write the flag from inside a maintenance mode action
pub struct ChangeMaintenanceModePlugin;

impl AnsiblePlugin for ChangeMaintenanceModePlugin {
    type Args = MaintenanceModeArgs;
    type Value = bool;
    const TARGETED: bool = true;

    fn name(&self) -> &'static str {
        "adcm_change_maintenance_mode"
    }

    fn execute(
        &self,
        call: &PluginCall<'_>,
        targets: &[ObjectRef],
        args: MaintenanceModeArgs,
    ) -> Result<PluginResult<bool>> {
        let value = if args.value {
            MaintenanceMode::On
        } else {
            MaintenanceMode::Off
        };
        let changed = call.transaction("change_maintenance_mode", describe(targets), |graph| {
            let mut changed = false;
            for target in targets {
                changed |= set_maintenance_mode(graph, *target, value)?;
            }
            Ok(changed)
        })?;
        Ok(PluginResult::new(changed, args.value))
    }
}
