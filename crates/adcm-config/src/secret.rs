//! Sealing and revealing secret parameters

use adcm_common::{Result, SecretVault};
use serde_json::Value;

use crate::spec::{ConfigSpec, ParamSpec, ParamType};

/// Seal every secret value of `config` in place
pub fn seal_secrets(spec: &ConfigSpec, config: &mut Value, vault: &SecretVault) -> Result<()> {
    transform(spec, config, &|value| vault.seal(value).map_err(Into::into))
}

/// Copy of `config` with every secret value revealed
pub fn reveal_secrets(spec: &ConfigSpec, config: &Value, vault: &SecretVault) -> Result<Value> {
    let mut out = config.clone();
    transform(spec, &mut out, &|value| vault.reveal(value).map_err(Into::into))?;
    Ok(out)
}

/// Reveal a single value of a secret parameter
pub fn reveal_value(param: &ParamSpec, value: &Value, vault: &SecretVault) -> Result<Value> {
    let mut out = value.clone();
    apply(param.param_type, &mut out, &|v| vault.reveal(v).map_err(Into::into))?;
    Ok(out)
}

fn transform(
    spec: &ConfigSpec,
    config: &mut Value,
    f: &dyn Fn(&str) -> Result<String>,
) -> Result<()> {
    for param in spec.params() {
        let Some(value) = config.get_mut(&param.name) else {
            continue;
        };
        if param.is_group() {
            for sub in &param.subs {
                if let Some(inner) = value.get_mut(&sub.name) {
                    apply(sub.param_type, inner, f)?;
                }
            }
        } else {
            apply(param.param_type, value, f)?;
        }
    }
    Ok(())
}

fn apply(param_type: ParamType, value: &mut Value, f: &dyn Fn(&str) -> Result<String>) -> Result<()> {
    match (param_type, value) {
        (ParamType::Password | ParamType::Secrettext | ParamType::Secretfile, Value::String(s))
            if !s.is_empty() =>
        {
            *s = f(s)?;
        }
        (ParamType::Secretmap, Value::Object(map)) => {
            for item in map.values_mut() {
                if let Value::String(s) = item {
                    *s = f(s)?;
                }
            }
        }
        _ => {}
    }
    Ok(())
}
