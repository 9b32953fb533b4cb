//! Built-in `adcm_*` plugins

mod cluster;
mod config;
mod flag;
mod hostcomponent;
mod maintenance;
mod state;

use adcm_persistence::ObjectRef;

use crate::Plugin;

pub use cluster::{
    AddHostToClusterPlugin, DeleteServiceArgs, DeleteServicePlugin, HostArgs, RemoveHostFromClusterPlugin,
};
pub use config::{ConfigArgs, ConfigPlugin};
pub use flag::{ChangeFlagPlugin, FlagArgs, FlagOperation, DEFAULT_FLAG_NAME};
pub use hostcomponent::{HcAction, HcArgs, HcOperation, HostComponentPlugin};
pub use maintenance::{ChangeMaintenanceModePlugin, MaintenanceModeArgs};
pub use state::{MultiStateSetPlugin, MultiStateUnsetPlugin, MultiStateUnsetArgs, StateArgs, StatePlugin};

pub fn builtin() -> Vec<Box<dyn Plugin>> {
    vec![
        Box::new(ConfigPlugin),
        Box::new(StatePlugin),
        Box::new(MultiStateSetPlugin),
        Box::new(MultiStateUnsetPlugin),
        Box::new(ChangeFlagPlugin),
        Box::new(ChangeMaintenanceModePlugin),
        Box::new(HostComponentPlugin),
        Box::new(AddHostToClusterPlugin),
        Box::new(RemoveHostFromClusterPlugin),
        Box::new(DeleteServicePlugin),
    ]
}

/// Audit object of a call touching `targets`
fn describe(targets: &[ObjectRef]) -> Option<String> {
    if targets.is_empty() {
        return None;
    }
    Some(
        targets
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    )
}
