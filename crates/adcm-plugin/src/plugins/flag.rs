use adcm_common::Result;
use adcm_core::concern::{set_flag, unset_flag};
use adcm_persistence::ObjectRef;
use serde::Deserialize;

use super::describe;
use crate::{AnsiblePlugin, PluginCall, PluginResult};

pub const DEFAULT_FLAG_NAME: &str = "adcm_outdated_config";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagOperation {
    Up,
    Down,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagArgs {
    pub operation: FlagOperation,
    /// `down` without a name lowers every flag of the target
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
}

/// `adcm_change_flag`: raise or lower advisory flags
pub struct ChangeFlagPlugin;

impl AnsiblePlugin for ChangeFlagPlugin {
    type Args = FlagArgs;
    type Value = ();
    const TARGETED: bool = true;

    fn name(&self) -> &'static str {
        "adcm_change_flag"
    }

    fn execute(
        &self,
        call: &PluginCall<'_>,
        targets: &[ObjectRef],
        args: FlagArgs,
    ) -> Result<PluginResult<()>> {
        let operation = match args.operation {
            FlagOperation::Up => "set_flag",
            FlagOperation::Down => "unset_flag",
        };
        let changed = call.transaction(operation, describe(targets), |graph| {
            let mut changed = false;
            for target in targets {
                changed |= match args.operation {
                    FlagOperation::Up => set_flag(
                        graph,
                        *target,
                        args.name.as_deref().unwrap_or(DEFAULT_FLAG_NAME),
                        args.msg.as_deref(),
                    )?,
                    FlagOperation::Down => unset_flag(graph, *target, args.name.as_deref()) > 0,
                };
            }
            Ok(changed)
        })?;
        Ok(PluginResult::new(changed, ()))
    }
}
