//! Value sets of `variant` parameters

use adcm_common::{AdcmError, Result};
use serde_json::Value;

use crate::spec::{ConfigSpec, VariantSource, value_at};

/// Resolves builtin variant sources (`host_in_cluster`, `service_in_cluster`, ...)
///
/// The engine implements this over the object graph; the resolver itself only
/// knows the manifest-level sources.
pub trait VariantResolver {
    fn builtin(&self, name: &str, args: &Value) -> Result<Vec<String>>;
}

/// Resolver for contexts without an object graph: every builtin is empty
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBuiltins;

impl VariantResolver for NoBuiltins {
    fn builtin(&self, _name: &str, _args: &Value) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Resolve the value set of a variant source against `config`
pub fn resolve_variants(
    source: &VariantSource,
    config: &Value,
    resolver: &dyn VariantResolver,
) -> Result<Vec<String>> {
    match source {
        VariantSource::Inline { value, .. } => Ok(value.iter().map(display_value).collect()),
        VariantSource::Config { name, .. } => match value_at(config, name) {
            Some(Value::Array(items)) => Ok(items.iter().map(display_value).collect()),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(other) => Err(AdcmError::ConfigValue(format!(
                "variant source `{}` must be a list, got {}",
                name, other
            ))),
        },
        VariantSource::Builtin { name, args, .. } => resolver.builtin(name, args),
    }
}

/// Suggestions for every variant parameter of a config, keyed by path
pub fn variant_suggestions(
    spec: &ConfigSpec,
    config: &Value,
    resolver: &dyn VariantResolver,
) -> Result<Vec<(String, Vec<String>)>> {
    let mut out = Vec::new();
    for (path, param) in spec.leaves() {
        if let Some(source) = &param.limits.source {
            out.push((path, resolve_variants(source, config, resolver)?));
        }
    }
    Ok(out)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
