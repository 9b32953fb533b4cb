//! Validation of submitted configurations

use adcm_common::{AdcmError, Result, SecretVault};
use regex::Regex;
use serde_json::{Map, Value, json};

use crate::defaults::{group_active, is_empty_value};
use crate::secret::{reveal_value, seal_secrets};
use crate::spec::{ConfigSpec, ParamSpec, ParamType, value_at};
use crate::variant::{VariantResolver, resolve_variants};
use crate::yspec;

/// Attr keys owned by config host groups rather than by the spec
const GROUP_ATTR_KEYS: [&str; 2] = ["group_keys", "custom_group_keys"];

/// Everything validation needs besides the spec and the submitted values
pub struct ValidationContext<'a> {
    /// State of the owning object, matched against read-only predicates
    pub state: &'a str,
    /// Current config of the object; `None` when the config is being created
    pub current: Option<&'a Value>,
    pub vault: &'a SecretVault,
    pub variants: &'a dyn VariantResolver,
}

/// Normalised config ready to be stored as a new revision
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedConfig {
    pub config: Value,
    pub attr: Value,
}

/// Validate a submitted config and attr against a spec
///
/// Missing keys are backfilled (read-only ones from the current config,
/// the rest from defaults) and secret values come back sealed.
pub fn validate_config(
    spec: &ConfigSpec,
    config: &Value,
    attr: &Value,
    ctx: &ValidationContext<'_>,
) -> Result<ValidatedConfig> {
    let empty = Map::new();
    let submitted = match config {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return Err(AdcmError::ConfigValue(format!(
                "config must be a mapping, got {}",
                other
            )));
        }
    };
    let attr_in = match attr {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(AdcmError::ConfigValue(format!(
                "attr must be a mapping, got {}",
                other
            )));
        }
    };

    reject_unknown(spec, submitted)?;
    let attr_out = normalize_attr(spec, &attr_in)?;
    let attr_value = Value::Object(attr_out);

    let mut out = Map::new();
    for param in spec.params() {
        let current = ctx.current.and_then(|c| c.get(&param.name));
        if param.is_group() {
            let active = group_active(param, &attr_value);
            let group_in = match submitted.get(&param.name) {
                Some(Value::Object(map)) => Some(map),
                Some(Value::Null) | None => None,
                Some(other) => {
                    return Err(AdcmError::ConfigValue(format!(
                        "group `{}` must be a mapping, got {}",
                        param.name, other
                    )));
                }
            };
            let mut group_out = Map::new();
            for sub in &param.subs {
                let path = format!("{}/{}", param.name, sub.name);
                let value = resolve_leaf(
                    sub,
                    &path,
                    group_in.and_then(|g| g.get(&sub.name)),
                    current.and_then(|g| g.get(&sub.name)),
                    ctx,
                    active,
                )?;
                group_out.insert(sub.name.clone(), value);
            }
            out.insert(param.name.clone(), Value::Object(group_out));
        } else {
            let value = resolve_leaf(
                param,
                &param.name,
                submitted.get(&param.name),
                current,
                ctx,
                true,
            )?;
            out.insert(param.name.clone(), value);
        }
    }

    let mut config_out = Value::Object(out);
    check_variants(spec, &config_out, ctx.variants)?;
    seal_secrets(spec, &mut config_out, ctx.vault)?;

    Ok(ValidatedConfig {
        config: config_out,
        attr: attr_value,
    })
}

fn reject_unknown(spec: &ConfigSpec, submitted: &Map<String, Value>) -> Result<()> {
    for (key, value) in submitted {
        let param = spec
            .get(key)
            .ok_or_else(|| AdcmError::ConfigValue(format!("unknown parameter `{}`", key)))?;
        if param.is_group() {
            if let Value::Object(inner) = value {
                for sub in inner.keys() {
                    if param.sub(sub).is_none() {
                        return Err(AdcmError::ConfigValue(format!(
                            "unknown parameter `{}/{}`",
                            key, sub
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

fn normalize_attr(spec: &ConfigSpec, attr: &Map<String, Value>) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for (key, value) in attr {
        if GROUP_ATTR_KEYS.contains(&key.as_str()) {
            out.insert(key.clone(), value.clone());
            continue;
        }
        let param = spec.get(key).filter(|p| p.is_activatable()).ok_or_else(|| {
            AdcmError::ConfigValue(format!("`{}` is not an activatable group", key))
        })?;
        let active = value.get("active").and_then(Value::as_bool).ok_or_else(|| {
            AdcmError::ConfigValue(format!("attr of `{}` needs a boolean `active`", param.name))
        })?;
        out.insert(key.clone(), json!({ "active": active }));
    }
    for param in spec.params() {
        if let Some(default) = param.limits.active {
            if param.is_group() && !out.contains_key(&param.name) {
                out.insert(param.name.clone(), json!({ "active": default }));
            }
        }
    }
    Ok(out)
}

fn resolve_leaf(
    param: &ParamSpec,
    path: &str,
    submitted: Option<&Value>,
    current: Option<&Value>,
    ctx: &ValidationContext<'_>,
    enforce_required: bool,
) -> Result<Value> {
    let read_only = ctx.current.is_some() && param.is_read_only(ctx.state);
    let value = match submitted {
        Some(value) => {
            if read_only {
                let current = reveal_value(param, current.unwrap_or(&Value::Null), ctx.vault)?;
                let incoming = reveal_value(param, value, ctx.vault)?;
                if current != incoming {
                    return Err(AdcmError::ConfigValue(format!(
                        "parameter `{}` is read-only in state `{}`",
                        path, ctx.state
                    )));
                }
            }
            value.clone()
        }
        None if read_only => current.cloned().unwrap_or(Value::Null),
        None => param.default.clone().unwrap_or(Value::Null),
    };
    let plain = reveal_value(param, &value, ctx.vault)?;

    if is_empty_value(param.param_type, &plain) {
        if param.required && enforce_required {
            return Err(AdcmError::ConfigValue(format!(
                "value of required parameter `{}` is missing",
                path
            )));
        }
        return Ok(plain);
    }
    check_value(param, path, &plain).map_err(AdcmError::ConfigValue)?;
    Ok(plain)
}

/// Type and limit checks of a single non-empty plain value
pub fn check_value(param: &ParamSpec, path: &str, value: &Value) -> std::result::Result<(), String> {
    let wrong_type = || format!("`{}` expects a {} value, got {}", path, param.param_type, value);
    match param.param_type {
        ParamType::String | ParamType::Text | ParamType::Password | ParamType::Secrettext => {
            let s = value.as_str().ok_or_else(wrong_type)?;
            if let Some(pattern) = &param.limits.pattern {
                let re = Regex::new(pattern)
                    .map_err(|e| format!("`{}` has an invalid pattern: {}", path, e))?;
                if !re.is_match(s) {
                    return Err(format!("`{}` does not match pattern `{}`", path, pattern));
                }
            }
            Ok(())
        }
        ParamType::File | ParamType::Secretfile | ParamType::Variant => {
            value.as_str().map(|_| ()).ok_or_else(wrong_type)
        }
        ParamType::Integer => {
            if !(value.is_i64() || value.is_u64()) {
                return Err(wrong_type());
            }
            check_bounds(param, path, value)
        }
        ParamType::Float => {
            if !value.is_number() {
                return Err(wrong_type());
            }
            check_bounds(param, path, value)
        }
        ParamType::Boolean => value.as_bool().map(|_| ()).ok_or_else(wrong_type),
        ParamType::Option => {
            let options = param
                .limits
                .option
                .as_ref()
                .ok_or_else(|| format!("`{}` declares no options", path))?;
            if options.values().any(|v| v == value) {
                Ok(())
            } else {
                Err(format!("`{}` value {} is not one of the options", path, value))
            }
        }
        ParamType::Json => Ok(()),
        ParamType::List => {
            let items = value.as_array().ok_or_else(wrong_type)?;
            if items.iter().all(Value::is_string) {
                Ok(())
            } else {
                Err(format!("`{}` must be a list of strings", path))
            }
        }
        ParamType::Map | ParamType::Secretmap => {
            let map = value.as_object().ok_or_else(wrong_type)?;
            if map.values().all(Value::is_string) {
                Ok(())
            } else {
                Err(format!("`{}` must map keys to strings", path))
            }
        }
        ParamType::Structure => match &param.limits.yspec {
            Some(schema) => yspec::validate_structure(schema, value)
                .map_err(|e| format!("`{}` structure: {}", path, e)),
            None => Ok(()),
        },
        ParamType::Group => Err(format!("`{}` is a group, not a value", path)),
    }
}

fn check_bounds(param: &ParamSpec, path: &str, value: &Value) -> std::result::Result<(), String> {
    let Some(number) = value.as_f64() else {
        return Ok(());
    };
    if let Some(min) = param.limits.min {
        if number < min {
            return Err(format!("`{}` value {} is less than {}", path, value, min));
        }
    }
    if let Some(max) = param.limits.max {
        if number > max {
            return Err(format!("`{}` value {} is greater than {}", path, value, max));
        }
    }
    Ok(())
}

fn check_variants(spec: &ConfigSpec, config: &Value, resolver: &dyn VariantResolver) -> Result<()> {
    for (path, param) in spec.leaves() {
        let Some(source) = &param.limits.source else {
            continue;
        };
        if !source.strict() {
            continue;
        }
        let Some(Value::String(value)) = value_at(config, &path) else {
            continue;
        };
        let allowed = resolve_variants(source, config, resolver)?;
        if !allowed.iter().any(|v| v == value) {
            return Err(AdcmError::ConfigValue(format!(
                "`{}` value `{}` is not one of {:?}",
                path, value, allowed
            )));
        }
    }
    Ok(())
}

/// Check a parameter list declared in a manifest
///
/// Names are unique per level, groups hold only leaves, defaults satisfy
/// their own parameter and limits are consistent.
pub fn validate_spec(spec: &ConfigSpec) -> Result<()> {
    check_level(spec.params(), "", true).map_err(AdcmError::Validation)
}

fn check_level(params: &[ParamSpec], prefix: &str, top: bool) -> std::result::Result<(), String> {
    let mut seen = std::collections::BTreeSet::new();
    for param in params {
        let path = format!("{}{}", prefix, param.name);
        if param.name.is_empty() {
            return Err("parameter with an empty name".to_string());
        }
        if !seen.insert(param.name.as_str()) {
            return Err(format!("duplicate parameter `{}`", path));
        }
        if param.is_group() {
            if !top {
                return Err(format!("group `{}` cannot be nested", path));
            }
            check_level(&param.subs, &format!("{}/", path), false)?;
            continue;
        }
        if !param.subs.is_empty() {
            return Err(format!("`{}` of type {} cannot have subs", path, param.param_type));
        }
        match param.param_type {
            ParamType::Option if param.limits.option.is_none() => {
                return Err(format!("option `{}` declares no options", path));
            }
            ParamType::Variant if param.limits.source.is_none() => {
                return Err(format!("variant `{}` declares no source", path));
            }
            ParamType::Structure => {
                let schema = param
                    .limits
                    .yspec
                    .as_ref()
                    .ok_or_else(|| format!("structure `{}` declares no yspec", path))?;
                yspec::check_schema(schema).map_err(|e| format!("`{}`: {}", path, e))?;
            }
            _ => {}
        }
        if let (Some(min), Some(max)) = (param.limits.min, param.limits.max) {
            if min > max {
                return Err(format!("`{}` has min {} above max {}", path, min, max));
            }
        }
        if let Some(pattern) = &param.limits.pattern {
            Regex::new(pattern).map_err(|e| format!("`{}` has an invalid pattern: {}", path, e))?;
        }
        if let Some(default) = &param.default {
            if !is_empty_value(param.param_type, default) {
                check_value(param, &path, default)?;
            }
        }
    }
    Ok(())
}
