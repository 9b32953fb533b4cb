//! ADCM Common - Shared types, traits, and utilities
//!
//! This crate provides the foundational types used across all ADCM components:
//! - Error taxonomy and the `{ code, desc, level }` envelope
//! - Collaborator traits (RBAC, audit log)
//! - Secret vault for password-like configuration values
//! - Name validation helpers and the filesystem layout

pub mod crypto;
pub mod error;
pub mod macros;
pub mod paths;
pub mod traits;
pub mod utils;

// Re-exports for convenience
pub use crypto::{CryptoError, SecretVault};
pub use error::{AdcmError, ErrorEnvelope, ErrorLevel, Result};
pub use paths::AdcmPaths;
pub use traits::*;
pub use utils::{is_valid_fqdn, is_valid_name};

/// Default state of every freshly created object
pub const DEFAULT_STATE: &str = "created";

/// Name of the bundle action that switches maintenance mode on
pub const MM_TURN_ON_ACTION: &str = "adcm_turn_on_maintenance_mode";

/// Name of the bundle action that switches maintenance mode off
pub const MM_TURN_OFF_ACTION: &str = "adcm_turn_off_maintenance_mode";

/// Host-action name of the maintenance mode toggle on hosts
pub const MM_HOST_TURN_ON_ACTION: &str = "adcm_host_turn_on_maintenance_mode";

/// Host-action name of the maintenance mode toggle off hosts
pub const MM_HOST_TURN_OFF_ACTION: &str = "adcm_host_turn_off_maintenance_mode";
