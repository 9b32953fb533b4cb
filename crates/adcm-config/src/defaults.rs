//! Default configuration and required-ness

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::spec::{ConfigSpec, ParamSpec, ParamType};

/// Config and attr built purely from declared defaults
///
/// Parameters without a default are `null`; activatable groups get their
/// declared activation default in `attr`.
pub fn default_config(spec: &ConfigSpec) -> (Value, Value) {
    let mut config = Map::new();
    let mut attr = Map::new();
    for param in spec.params() {
        if param.is_group() {
            let mut group = Map::new();
            for sub in &param.subs {
                group.insert(sub.name.clone(), leaf_default(sub));
            }
            config.insert(param.name.clone(), Value::Object(group));
            if let Some(active) = param.limits.active {
                attr.insert(param.name.clone(), json!({ "active": active }));
            }
        } else {
            config.insert(param.name.clone(), leaf_default(param));
        }
    }
    (Value::Object(config), Value::Object(attr))
}

fn leaf_default(param: &ParamSpec) -> Value {
    param.default.clone().unwrap_or(Value::Null)
}

/// Value counts as not provided for a required parameter
pub fn is_empty_value(param_type: ParamType, value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty() && param_type.is_stringly(),
        Value::Array(items) => items.is_empty() && param_type == ParamType::List,
        Value::Object(map) => {
            map.is_empty() && matches!(param_type, ParamType::Map | ParamType::Secretmap)
        }
        _ => false,
    }
}

/// Activation flag of a group in `attr`, falling back to the declared default
pub fn group_active(param: &ParamSpec, attr: &Value) -> bool {
    attr.get(&param.name)
        .and_then(|a| a.get("active"))
        .and_then(Value::as_bool)
        .or(param.limits.active)
        .unwrap_or(true)
}

/// Paths of required parameters that currently have no value
///
/// Children of inactive activatable groups are not required.
pub fn missing_required(spec: &ConfigSpec, config: &Value, attr: &Value) -> Vec<String> {
    let mut missing = Vec::new();
    for param in spec.params() {
        if param.is_group() {
            if !group_active(param, attr) {
                continue;
            }
            let group = config.get(&param.name);
            for sub in &param.subs {
                let value = group.and_then(|g| g.get(&sub.name)).unwrap_or(&Value::Null);
                if sub.required && is_empty_value(sub.param_type, value) {
                    missing.push(format!("{}/{}", param.name, sub.name));
                }
            }
        } else {
            let value = config.get(&param.name).unwrap_or(&Value::Null);
            if param.required && is_empty_value(param.param_type, value) {
                missing.push(param.name.clone());
            }
        }
    }
    missing
}

/// Carry same-name values of an old config into the layout of `spec`
///
/// Used when an object switches prototype: same-name values survive, new
/// parameters receive their defaults, removed parameters are dropped.
pub fn migrate_config(spec: &ConfigSpec, old: &Value, old_attr: &Value) -> (Value, Value) {
    let (mut config, mut attr) = default_config(spec);
    for param in spec.params() {
        if param.is_group() {
            let Some(old_group) = old.get(&param.name).and_then(Value::as_object) else {
                continue;
            };
            if let Some(Value::Object(group)) = config.get_mut(&param.name) {
                for sub in &param.subs {
                    if let Some(value) = old_group.get(&sub.name) {
                        if !value.is_null() {
                            group.insert(sub.name.clone(), value.clone());
                        }
                    }
                }
            }
            if param.is_activatable() {
                if let Some(previous) = old_attr.get(&param.name) {
                    if let Some(map) = attr.as_object_mut() {
                        map.insert(param.name.clone(), previous.clone());
                    }
                }
            }
        } else if let Some(value) = old.get(&param.name) {
            if !value.is_null() {
                if let Some(map) = config.as_object_mut() {
                    map.insert(param.name.clone(), value.clone());
                }
            }
        }
    }
    if let Some(old) = old.as_object() {
        for name in old.keys().filter(|name| spec.get(name).is_none()) {
            debug!(param = %name, "Parameter dropped by config migration");
        }
    }
    (config, attr)
}
