//! Host-scoped overrides of config host groups
//!
//! A group's attr carries `group_keys`: for every parameter, whether the group
//! holds its own (desynchronised) value. Top-level leaves map to a boolean,
//! groups to `{ "value": <activation desynced>, "fields": { <sub>: bool } }`.

use adcm_common::{AdcmError, Result};
use serde_json::{Map, Value, json};

use crate::spec::{ConfigSpec, ParamSpec};

pub const GROUP_KEYS: &str = "group_keys";

/// `group_keys` with every parameter synchronised
pub fn default_group_keys(spec: &ConfigSpec) -> Value {
    let mut keys = Map::new();
    for param in spec.params() {
        if param.is_group() {
            let fields: Map<String, Value> = param
                .subs
                .iter()
                .map(|s| (s.name.clone(), Value::Bool(false)))
                .collect();
            keys.insert(param.name.clone(), json!({ "value": false, "fields": fields }));
        } else {
            keys.insert(param.name.clone(), Value::Bool(false));
        }
    }
    Value::Object(keys)
}

fn allowed(param: &ParamSpec, parent: Option<&ParamSpec>, default: bool) -> bool {
    param
        .group_customization
        .or_else(|| parent.and_then(|p| p.group_customization))
        .unwrap_or(default)
}

/// Validate and complete submitted `group_keys`
///
/// Only parameters that allow group customization may be desynchronised.
/// `default_customization` is the prototype-level default.
pub fn validate_group_keys(
    spec: &ConfigSpec,
    submitted: &Value,
    default_customization: bool,
) -> Result<Value> {
    let mut keys = default_group_keys(spec);
    let submitted = match submitted {
        Value::Null => return Ok(keys),
        Value::Object(map) => map,
        other => {
            return Err(AdcmError::ConfigValue(format!(
                "group_keys must be a mapping, got {}",
                other
            )));
        }
    };

    let denied = |path: &str| {
        AdcmError::ConfigValue(format!(
            "parameter `{}` cannot be customized in a config host group",
            path
        ))
    };

    for (name, value) in submitted {
        let param = spec
            .get(name)
            .ok_or_else(|| AdcmError::ConfigValue(format!("unknown group key `{}`", name)))?;
        if !param.is_group() {
            let desync = value.as_bool().ok_or_else(|| {
                AdcmError::ConfigValue(format!("group key `{}` must be a boolean", name))
            })?;
            if desync && !allowed(param, None, default_customization) {
                return Err(denied(name));
            }
            keys[name.as_str()] = Value::Bool(desync);
            continue;
        }

        if let Some(desync) = value.get("value").and_then(Value::as_bool) {
            if desync && !(param.is_activatable() && allowed(param, None, default_customization)) {
                return Err(denied(name));
            }
            keys[name.as_str()]["value"] = Value::Bool(desync);
        }
        if let Some(fields) = value.get("fields").and_then(Value::as_object) {
            for (sub_name, flag) in fields {
                let sub = param.sub(sub_name).ok_or_else(|| {
                    AdcmError::ConfigValue(format!("unknown group key `{}/{}`", name, sub_name))
                })?;
                let desync = flag.as_bool().ok_or_else(|| {
                    AdcmError::ConfigValue(format!(
                        "group key `{}/{}` must be a boolean",
                        name, sub_name
                    ))
                })?;
                if desync && !allowed(sub, Some(param), default_customization) {
                    return Err(denied(&format!("{}/{}", name, sub_name)));
                }
                keys[name.as_str()]["fields"][sub_name.as_str()] = Value::Bool(desync);
            }
        }
    }
    Ok(keys)
}

/// True when `path` (`name` or `group/name`) is desynchronised
pub fn is_desynced(group_keys: &Value, path: &str) -> bool {
    match path.split_once('/') {
        Some((group, sub)) => group_keys
            .get(group)
            .and_then(|g| g.get("fields"))
            .and_then(|f| f.get(sub))
            .and_then(Value::as_bool)
            .unwrap_or(false),
        None => group_keys.get(path).and_then(Value::as_bool).unwrap_or(false),
    }
}

/// Overlay the desynchronised values of one group onto a base config
pub fn apply_overrides(
    base_config: &Value,
    base_attr: &Value,
    group_config: &Value,
    group_attr: &Value,
) -> (Value, Value) {
    let mut config = base_config.clone();
    let mut attr = base_attr.clone();
    let Some(keys) = group_attr.get(GROUP_KEYS).and_then(Value::as_object) else {
        return (config, strip_group_attr(attr));
    };
    for (name, flag) in keys {
        match flag {
            Value::Bool(true) => {
                if let Some(value) = group_config.get(name) {
                    config[name.as_str()] = value.clone();
                }
            }
            Value::Object(group) => {
                if let Some(fields) = group.get("fields").and_then(Value::as_object) {
                    for (sub, desync) in fields {
                        if desync.as_bool() == Some(true) {
                            if let Some(value) = group_config.get(name).and_then(|g| g.get(sub)) {
                                config[name.as_str()][sub.as_str()] = value.clone();
                            }
                        }
                    }
                }
                if group.get("value").and_then(Value::as_bool) == Some(true) {
                    if let Some(active) = group_attr.get(name) {
                        attr[name.as_str()] = active.clone();
                    }
                }
            }
            _ => {}
        }
    }
    (config, strip_group_attr(attr))
}

fn strip_group_attr(mut attr: Value) -> Value {
    if let Some(map) = attr.as_object_mut() {
        map.remove(GROUP_KEYS);
        map.remove("custom_group_keys");
    }
    attr
}

/// Effective config of a host: owner config merged left to right with every
/// group the host is a member of
pub fn effective_host_config<'a>(
    owner_config: &Value,
    owner_attr: &Value,
    groups: impl IntoIterator<Item = (&'a Value, &'a Value)>,
) -> (Value, Value) {
    let mut config = owner_config.clone();
    let mut attr = strip_group_attr(owner_attr.clone());
    for (group_config, group_attr) in groups {
        (config, attr) = apply_overrides(&config, &attr, group_config, group_attr);
    }
    (config, attr)
}

/// New group revision after the owner's config changed
///
/// Synchronised parameters take the owner's values, desynchronised ones keep
/// the group's. `group_keys` survive in the returned attr.
pub fn sync_group_config(
    owner_config: &Value,
    owner_attr: &Value,
    group_config: &Value,
    group_attr: &Value,
) -> (Value, Value) {
    let (config, mut attr) = apply_overrides(owner_config, owner_attr, group_config, group_attr);
    if let (Some(map), Some(keys)) = (attr.as_object_mut(), group_attr.get(GROUP_KEYS)) {
        map.insert(GROUP_KEYS.to_string(), keys.clone());
    }
    (config, attr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ParamType;

    fn spec() -> ConfigSpec {
        let mut tls = ParamSpec::group(
            "tls",
            vec![
                ParamSpec::new("cert", ParamType::String).customizable(true),
                ParamSpec::new("key", ParamType::String),
            ],
        );
        tls.limits.active = Some(true);
        ConfigSpec::new(vec![
            ParamSpec::new("integer", ParamType::Integer).customizable(true),
            ParamSpec::new("string", ParamType::String),
            tls,
        ])
    }

    #[test]
    fn test_validate_group_keys() {
        let spec = spec();
        let keys = validate_group_keys(&spec, &json!({"integer": true}), false).unwrap();
        assert_eq!(keys["integer"], true);
        assert_eq!(keys["string"], false);
        assert_eq!(keys["tls"]["fields"]["cert"], false);

        assert!(validate_group_keys(&spec, &json!({"string": true}), false).is_err());
        assert!(validate_group_keys(&spec, &json!({"string": true}), true).is_ok());
        assert!(validate_group_keys(&spec, &json!({"tls": {"fields": {"key": true}}}), false).is_err());
        assert!(validate_group_keys(&spec, &json!({"tls": {"fields": {"cert": true}}}), false).is_ok());
        assert!(validate_group_keys(&spec, &json!({"missing": true}), true).is_err());
    }

    #[test]
    fn test_effective_host_config() {
        let owner = json!({"integer": 10, "string": "s", "tls": {"cert": "a", "key": "k"}});
        let owner_attr = json!({"tls": {"active": true}});
        let group = json!({"integer": 40, "string": "other", "tls": {"cert": "b", "key": "z"}});
        let group_attr = json!({
            "tls": {"active": true},
            "group_keys": {"integer": true, "string": false, "tls": {"value": false, "fields": {"cert": true, "key": false}}}
        });

        let (config, attr) = effective_host_config(&owner, &owner_attr, [(&group, &group_attr)]);
        assert_eq!(config["integer"], 40);
        assert_eq!(config["string"], "s");
        assert_eq!(config["tls"]["cert"], "b");
        assert_eq!(config["tls"]["key"], "k");
        assert!(attr.get(GROUP_KEYS).is_none());

        assert!(is_desynced(&group_attr["group_keys"], "integer"));
        assert!(is_desynced(&group_attr["group_keys"], "tls/cert"));
        assert!(!is_desynced(&group_attr["group_keys"], "tls/key"));
    }

    #[test]
    fn test_sync_group_config() {
        let owner = json!({"integer": 11, "string": "new", "tls": {"cert": "a", "key": "k2"}});
        let group = json!({"integer": 40, "string": "old", "tls": {"cert": "b", "key": "k"}});
        let group_attr = json!({"group_keys": {"integer": true, "string": false}});

        let (config, attr) = sync_group_config(&owner, &json!({}), &group, &group_attr);
        assert_eq!(config["integer"], 40);
        assert_eq!(config["string"], "new");
        assert_eq!(config["tls"]["key"], "k2");
        assert_eq!(attr[GROUP_KEYS]["integer"], true);
    }
}
