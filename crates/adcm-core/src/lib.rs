//! ADCM Core - Object graph operations
//!
//! This crate provides:
//! - The `AdcmCore` engine handle and its audited transactions
//! - Bundle loading and upgrades
//! - Clusters, services, providers and hosts
//! - The concern engine (issues, locks, flags)
//! - The host-component planner
//! - Configuration edits, config host groups and action host groups
//! - Maintenance mode and import binds

pub mod binds;
pub mod bundle;
pub mod concern;
pub mod configuration;
pub mod context;
pub mod engine;
pub mod groups;
pub mod hostcomponent;
pub mod maintenance;
pub mod objects;
pub mod upgrade;
pub mod variants;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use bundle::BundleManifest;
pub use configuration::ConfigView;
pub use context::{OpContext, Origin};
pub use engine::AdcmCore;
pub use hostcomponent::HcDelta;
pub use maintenance::MaintenanceModeOutcome;
pub use upgrade::UpgradeOutcome;
pub use variants::GraphVariants;
