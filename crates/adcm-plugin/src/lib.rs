//! ADCM Plugin - Ansible plugins calling back into the engine
//!
//! This crate provides:
//! - The execution frame: job config lock, manifest, origin and error wrapping
//! - Target detectors (`from_objects`, `from_context`)
//! - Plugin traits and the registry keyed by plugin name
//! - The built-in `adcm_*` plugins

use std::collections::BTreeMap;

use adcm_common::{AdcmError, Result};
use adcm_persistence::ObjectRef;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub mod frame;
pub mod lock;
pub mod plugins;
pub mod targets;

pub use frame::{PluginCall, PluginExecutor, PluginOutcome, into_plugin_error};
pub use lock::JobFileLock;
pub use targets::{TargetArgs, TargetKind, TargetSpec};

/// Typed result of a plugin
#[derive(Clone, Debug, PartialEq)]
pub struct PluginResult<V> {
    pub changed: bool,
    pub value: V,
}

impl<V> PluginResult<V> {
    pub fn new(changed: bool, value: V) -> Self {
        Self { changed, value }
    }
}

/// A plugin with a typed argument schema and a typed result
pub trait AnsiblePlugin: Send + Sync {
    type Args: DeserializeOwned;
    type Value: Serialize;

    /// Whether target keys (`type`, `objects`, ...) are accepted and resolved
    const TARGETED: bool = false;

    fn name(&self) -> &'static str;

    /// `targets` is empty unless the plugin is targeted
    fn execute(
        &self,
        call: &PluginCall<'_>,
        targets: &[ObjectRef],
        args: Self::Args,
    ) -> Result<PluginResult<Self::Value>>;
}

/// Object-safe face of [`AnsiblePlugin`] used by the registry
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Validate raw arguments, resolve targets and execute
    fn run(&self, call: &PluginCall<'_>, args: Value) -> Result<PluginOutcome>;
}

impl<P: AnsiblePlugin> Plugin for P {
    fn name(&self) -> &str {
        AnsiblePlugin::name(self)
    }

    fn run(&self, call: &PluginCall<'_>, args: Value) -> Result<PluginOutcome> {
        let name = AnsiblePlugin::name(self);
        let mut args = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(AdcmError::Validation(format!(
                    "{} arguments must be a mapping, got {}",
                    name, other
                )));
            }
        };
        let targets = if P::TARGETED {
            let wanted = TargetArgs::split_from(&mut args)?;
            targets::detect(&call.core.snapshot(), &call.context, &wanted)?
        } else {
            Vec::new()
        };
        let args: P::Args = serde_json::from_value(Value::Object(args))
            .map_err(|e| AdcmError::Validation(format!("{}: {}", name, e)))?;

        let result = self.execute(call, &targets, args)?;
        let value = serde_json::to_value(result.value)
            .map_err(|e| AdcmError::Unhandled(format!("{} result: {}", name, e)))?;
        Ok(PluginOutcome {
            changed: result.changed,
            value,
        })
    }
}

/// Plugin registry keyed by name
#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Box<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every `adcm_*` plugin
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for plugin in plugins::builtin() {
            registry.register(plugin);
        }
        registry
    }

    /// Register a plugin, replacing one with the same name
    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        let name = plugin.name().to_string();
        if self.plugins.insert(name.clone(), plugin).is_some() {
            tracing::warn!("Plugin '{}' replaced", name);
        } else {
            tracing::debug!("Plugin '{}' registered", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Plugin> {
        self.plugins.get(name).map(|p| p.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = PluginRegistry::with_builtin();
        assert_eq!(
            registry.names(),
            vec![
                "adcm_add_host_to_cluster",
                "adcm_change_flag",
                "adcm_change_maintenance_mode",
                "adcm_config",
                "adcm_delete_service",
                "adcm_hc",
                "adcm_multi_state_set",
                "adcm_multi_state_unset",
                "adcm_remove_host_from_cluster",
                "adcm_state",
            ]
        );
        assert!(registry.get("adcm_state").is_some());
        assert!(registry.get("adcm_unknown").is_none());
    }
}
