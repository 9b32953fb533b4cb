//! JSON-schema rendering of parameter specs

use serde_json::{Map, Value, json};

use crate::spec::{ConfigSpec, ParamSpec, ParamType};
use crate::yspec;

const MAX_STRUCTURE_DEPTH: usize = 32;

/// Render a spec as a JSON schema (draft 2020-12) with ADCM metadata
pub fn json_schema(spec: &ConfigSpec) -> Value {
    let (properties, required) = object_members(spec.params());
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn object_members(params: &[ParamSpec]) -> (Map<String, Value>, Vec<String>) {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in params {
        properties.insert(param.name.clone(), param_schema(param));
        required.push(param.name.clone());
    }
    (properties, required)
}

fn param_schema(param: &ParamSpec) -> Value {
    let mut node = match param.param_type {
        ParamType::Group => {
            let (properties, required) = object_members(&param.subs);
            json!({
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false,
            })
        }
        ParamType::Integer | ParamType::Float => {
            let kind = if param.param_type == ParamType::Integer {
                "integer"
            } else {
                "number"
            };
            let mut node = json!({ "type": kind });
            if let Some(min) = param.limits.min {
                node["minimum"] = json!(min);
            }
            if let Some(max) = param.limits.max {
                node["maximum"] = json!(max);
            }
            node
        }
        ParamType::Boolean => json!({ "type": "boolean" }),
        ParamType::Option => {
            let values: Vec<Value> = param
                .limits
                .option
                .as_ref()
                .map(|o| o.values().cloned().collect())
                .unwrap_or_default();
            json!({ "enum": values })
        }
        ParamType::List => json!({ "type": "array", "items": { "type": "string" } }),
        ParamType::Map | ParamType::Secretmap => {
            json!({ "type": "object", "additionalProperties": { "type": "string" } })
        }
        ParamType::Json => json!({}),
        ParamType::Structure => match &param.limits.yspec {
            Some(schema) => structure_schema(schema, "root", 0),
            None => json!({}),
        },
        _ => {
            let mut node = json!({ "type": "string" });
            if let Some(pattern) = &param.limits.pattern {
                node["pattern"] = json!(pattern);
            }
            node
        }
    };

    if !param.is_group() && !param.required {
        node = json!({ "oneOf": [node, { "type": "null" }] });
    }
    node["title"] = json!(param.display_name.clone().unwrap_or_else(|| param.name.clone()));
    node["description"] = json!(param.description);
    if let Some(default) = &param.default {
        if !param.param_type.is_secret() {
            node["default"] = default.clone();
        }
    }
    node["readOnly"] = json!(param.read_only.as_ref().is_some_and(|s| s.is_any()));
    node["adcmMeta"] = adcm_meta(param);
    node
}

fn adcm_meta(param: &ParamSpec) -> Value {
    let invisible = param
        .ui_options
        .get("invisible")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let mut meta = json!({
        "isSecret": param.param_type.is_secret(),
        "isInvisible": invisible,
        "isAdvanced": param.ui_options.get("advanced").and_then(Value::as_bool).unwrap_or(false),
        "stringExtra": null,
        "activation": null,
        "synchronization": null,
    });
    if param.is_activatable() {
        meta["activation"] = json!({ "isAllowChange": true });
    }
    if param.param_type.is_file() || param.param_type == ParamType::Text {
        meta["stringExtra"] = json!({ "isMultiline": true });
    }
    if let Some(source) = &param.limits.source {
        meta["stringExtra"] = json!({ "suggestions": [], "isStrict": source.strict() });
    }
    if param.param_type == ParamType::Structure {
        if let Some(schema) = &param.limits.yspec {
            meta["invisibleItems"] = json!(yspec::invisible_items(schema));
        }
    }
    meta
}

fn structure_schema(rules: &Value, name: &str, depth: usize) -> Value {
    if depth > MAX_STRUCTURE_DEPTH {
        return json!({});
    }
    let Some(rule) = rules.get(name) else {
        return json!({});
    };
    let str_list = |key: &str| -> Vec<String> {
        rule.get(key)
            .and_then(Value::as_array)
            .map(|v| v.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    };
    match rule.get("match").and_then(Value::as_str).unwrap_or("any") {
        "list" => {
            let item = rule.get("item").and_then(Value::as_str).unwrap_or_default();
            json!({ "type": "array", "items": structure_schema(rules, item, depth + 1) })
        }
        "dict" => {
            let mut properties = Map::new();
            if let Some(items) = rule.get("items").and_then(Value::as_object) {
                for (key, item) in items {
                    let item = item.as_str().unwrap_or_default();
                    properties.insert(key.clone(), structure_schema(rules, item, depth + 1));
                }
            }
            let additional = match rule.get("default_item").and_then(Value::as_str) {
                Some(default) => structure_schema(rules, default, depth + 1),
                None => json!(false),
            };
            json!({
                "type": "object",
                "properties": properties,
                "required": str_list("required_items"),
                "additionalProperties": additional,
            })
        }
        "string" => json!({ "type": "string" }),
        "int" | "integer" => json!({ "type": "integer" }),
        "float" => json!({ "type": "number" }),
        "bool" => json!({ "type": "boolean" }),
        "none" => json!({ "type": "null" }),
        "set" => json!({ "enum": rule.get("variants").cloned().unwrap_or(json!([])) }),
        "one_of" => {
            let variants: Vec<Value> = str_list("variants")
                .iter()
                .map(|v| structure_schema(rules, v, depth + 1))
                .collect();
            json!({ "oneOf": variants })
        }
        _ => json!({}),
    }
}
