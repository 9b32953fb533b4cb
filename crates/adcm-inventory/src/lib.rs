//! ADCM Inventory - Per-job inventory for the external runner
//!
//! This crate provides:
//! - The inventory document model (`all.children.<group>.{hosts, vars}`)
//! - Object nodes with runner-ready configs, `before_upgrade` snapshots,
//!   imports and maintenance mode flags
//! - Host group taxonomy for cluster, service, component and host actions
//! - Per-host alternatives for hosts in config host groups

pub mod builder;
pub mod model;
mod nodes;

pub use builder::{
    CLUSTER_GROUP, HOST_GROUP, InventoryBuilder, MAINTENANCE_MODE_SUFFIX, TARGET_GROUP,
    build_inventory,
};
pub use model::{
    BeforeUpgradeNode, ClusterVars, GroupVars, HostVars, Inventory, InventoryGroup, ObjectNode,
    ProviderVars, ServiceNode,
};
