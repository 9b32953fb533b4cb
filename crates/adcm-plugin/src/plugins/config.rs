use adcm_common::{AdcmError, Result};
use adcm_core::configuration::apply_config;
use adcm_persistence::ObjectRef;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::describe;
use crate::{AnsiblePlugin, PluginCall, PluginResult};

/// Either one `key`/`value` pair or a `parameters` mapping.
/// Keys address nested parameters as `group/name`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigArgs {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
}

impl ConfigArgs {
    fn into_updates(self) -> Result<Map<String, Value>> {
        match (self.key, self.parameters) {
            (Some(key), None) => {
                let mut updates = Map::new();
                updates.insert(key, self.value.unwrap_or(Value::Null));
                Ok(updates)
            }
            (None, Some(parameters)) if self.value.is_none() && !parameters.is_empty() => {
                Ok(parameters)
            }
            _ => Err(AdcmError::Validation(
                "adcm_config takes either key and value or a non-empty parameters mapping"
                    .to_string(),
            )),
        }
    }
}

/// `adcm_config`: change configuration values of the targets
pub struct ConfigPlugin;

impl AnsiblePlugin for ConfigPlugin {
    type Args = ConfigArgs;
    type Value = Map<String, Value>;
    const TARGETED: bool = true;

    fn name(&self) -> &'static str {
        "adcm_config"
    }

    fn execute(
        &self,
        call: &PluginCall<'_>,
        targets: &[ObjectRef],
        args: ConfigArgs,
    ) -> Result<PluginResult<Map<String, Value>>> {
        let updates = args.into_updates()?;
        let origin = call.origin();
        let vault = call.core.vault();
        let changed = call.transaction("update_config", describe(targets), |graph| {
            let mut changed = false;
            for target in targets {
                let current = graph
                    .current_config_of(*target)?
                    .ok_or_else(|| AdcmError::Validation(format!("{} has no configuration", target)))?;
                let (before, attr) = (current.config.clone(), current.attr.clone());
                let mut config = before.clone();
                for (path, value) in &updates {
                    set_at(&mut config, path, value.clone())?;
                }
                if config == before {
                    continue;
                }
                apply_config(graph, vault, *target, &config, &attr, "ansible update", origin)?;
                changed = true;
            }
            Ok(changed)
        })?;
        Ok(PluginResult::new(changed, updates))
    }
}

/// Replace the value at `group/name` in a config document
fn set_at(config: &mut Value, path: &str, value: Value) -> Result<()> {
    let mut node = config;
    let mut parts = path.split('/').peekable();
    while let Some(part) = parts.next() {
        let map = node
            .as_object_mut()
            .ok_or_else(|| AdcmError::ConfigValue(format!("{} is not a group", path)))?;
        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return Ok(());
        }
        node = map
            .get_mut(part)
            .ok_or_else(|| AdcmError::ConfigValue(format!("no group {} for {}", part, path)))?;
    }
    Err(AdcmError::ConfigValue("empty parameter name".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_at_nested_and_flat() {
        let mut config = json!({"port": 1, "group": {"url": "a"}});
        set_at(&mut config, "port", json!(2)).unwrap();
        set_at(&mut config, "group/url", json!("b")).unwrap();
        assert_eq!(config, json!({"port": 2, "group": {"url": "b"}}));

        let err = set_at(&mut config, "absent/url", json!("c")).unwrap_err();
        assert_eq!(err.code(), "CONFIG_VALUE_ERROR");
        let err = set_at(&mut config, "port/sub", json!("c")).unwrap_err();
        assert_eq!(err.code(), "CONFIG_VALUE_ERROR");
    }

    #[test]
    fn test_key_and_parameters_are_exclusive() {
        let args: ConfigArgs =
            serde_json::from_value(json!({"key": "a", "parameters": {"b": 1}})).unwrap();
        assert!(args.into_updates().is_err());

        let args: ConfigArgs = serde_json::from_value(json!({"key": "a", "value": 3})).unwrap();
        assert_eq!(args.into_updates().unwrap()["a"], json!(3));
    }
}
