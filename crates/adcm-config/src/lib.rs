//! ADCM Config - Parameter specifications and configuration resolution
//!
//! This crate provides:
//! - The parameter spec model (17 parameter types, limits, read-only predicates)
//! - Validation of submitted configs with default backfill and secret sealing
//! - Structure (`yspec`) and variant resolution
//! - Effective host configuration from config host group overrides
//! - JSON-schema rendering of specs

pub mod defaults;
pub mod group;
pub mod schema;
pub mod secret;
pub mod spec;
pub mod validate;
pub mod variant;
pub mod yspec;

pub use defaults::{default_config, group_active, is_empty_value, migrate_config, missing_required};
pub use group::{
    GROUP_KEYS, apply_overrides, default_group_keys, effective_host_config, is_desynced,
    sync_group_config, validate_group_keys,
};
pub use schema::json_schema;
pub use secret::{reveal_secrets, seal_secrets};
pub use spec::{ConfigSpec, Limits, ParamSpec, ParamType, StateScope, VariantSource, value_at};
pub use validate::{ValidatedConfig, ValidationContext, validate_config, validate_spec};
pub use variant::{NoBuiltins, VariantResolver, resolve_variants, variant_suggestions};

use adcm_common::{Result, SecretVault};
use serde_json::Value;

/// Initial config of a new object: declared defaults with secrets sealed
pub fn initial_config(spec: &ConfigSpec, vault: &SecretVault) -> Result<(Value, Value)> {
    let (mut config, attr) = default_config(spec);
    seal_secrets(spec, &mut config, vault)?;
    Ok((config, attr))
}

/// Config as handed to the runner: secrets revealed, inactive groups `null`
pub fn render_for_runner(
    spec: &ConfigSpec,
    config: &Value,
    attr: &Value,
    vault: &SecretVault,
) -> Result<Value> {
    let mut out = reveal_secrets(spec, config, vault)?;
    for param in spec.params() {
        if param.is_activatable() && !group_active(param, attr) {
            if let Some(map) = out.as_object_mut() {
                map.insert(param.name.clone(), Value::Null);
            }
        }
    }
    Ok(out)
}
