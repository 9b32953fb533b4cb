//! Structure schemas for `structure` parameters
//!
//! A schema is a map of named rules; validation starts at rule `root`.
//!
//! ```yaml
//! root:
//!   match: list
//!   item: country
//! country:
//!   match: dict
//!   items: { name: string, code: integer }
//!   required_items: [name]
//! string:
//!   match: string
//! integer:
//!   match: int
//! ```

use serde_json::{Map, Value};

const ROOT: &str = "root";

/// Check that a schema is well formed: every referenced rule exists
pub fn check_schema(schema: &Value) -> Result<(), String> {
    let rules = schema
        .as_object()
        .ok_or_else(|| "structure schema must be a mapping of rules".to_string())?;
    if !rules.contains_key(ROOT) {
        return Err("structure schema has no `root` rule".to_string());
    }
    for (name, rule) in rules {
        let kind = rule
            .get("match")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("rule `{}` has no `match`", name))?;
        let refs: Vec<&str> = match kind {
            "list" => vec![required_str(rule, "item", name)?],
            "dict" => {
                let mut refs = Vec::new();
                if let Some(items) = rule.get("items").and_then(Value::as_object) {
                    for item in items.values() {
                        refs.push(
                            item.as_str()
                                .ok_or_else(|| format!("rule `{}` items must name rules", name))?,
                        );
                    }
                }
                if let Some(default) = rule.get("default_item").and_then(Value::as_str) {
                    refs.push(default);
                }
                for key in ["required_items", "invisible_items"] {
                    for item in str_list(rule, key) {
                        let declared = rule
                            .get("items")
                            .and_then(|i| i.get(item))
                            .is_some();
                        if !declared && rule.get("default_item").is_none() {
                            return Err(format!(
                                "rule `{}` lists `{}` in {} but does not declare it",
                                name, item, key
                            ));
                        }
                    }
                }
                refs
            }
            "one_of" => str_list(rule, "variants"),
            "set" => {
                if !rule.get("variants").is_some_and(Value::is_array) {
                    return Err(format!("rule `{}` needs a `variants` list", name));
                }
                Vec::new()
            }
            "string" | "int" | "integer" | "float" | "bool" | "none" | "any" => Vec::new(),
            other => return Err(format!("rule `{}` has unknown match `{}`", name, other)),
        };
        for reference in refs {
            if !rules.contains_key(reference) {
                return Err(format!(
                    "rule `{}` references undefined rule `{}`",
                    name, reference
                ));
            }
        }
    }
    Ok(())
}

/// Validate `value` against the schema starting at the root rule
pub fn validate_structure(schema: &Value, value: &Value) -> Result<(), String> {
    let rules = schema
        .as_object()
        .ok_or_else(|| "structure schema must be a mapping of rules".to_string())?;
    check_rule(rules, ROOT, value, "$")
}

fn check_rule(rules: &Map<String, Value>, name: &str, value: &Value, at: &str) -> Result<(), String> {
    let rule = rules
        .get(name)
        .ok_or_else(|| format!("undefined rule `{}`", name))?;
    let kind = rule.get("match").and_then(Value::as_str).unwrap_or("any");

    let mismatch = |expected: &str| format!("{}: expected {}, got {}", at, expected, type_name(value));

    match kind {
        "list" => {
            let items = value.as_array().ok_or_else(|| mismatch("a list"))?;
            let item_rule = required_str(rule, "item", name)?;
            for (i, item) in items.iter().enumerate() {
                check_rule(rules, item_rule, item, &format!("{}[{}]", at, i))?;
            }
            Ok(())
        }
        "dict" => {
            let map = value.as_object().ok_or_else(|| mismatch("a dict"))?;
            let declared = rule.get("items").and_then(Value::as_object);
            let default_item = rule.get("default_item").and_then(Value::as_str);
            for (key, item) in map {
                let item_rule = declared
                    .and_then(|d| d.get(key))
                    .and_then(Value::as_str)
                    .or(default_item)
                    .ok_or_else(|| format!("{}: unexpected key `{}`", at, key))?;
                check_rule(rules, item_rule, item, &format!("{}.{}", at, key))?;
            }
            for required in str_list(rule, "required_items") {
                if !map.contains_key(required) {
                    return Err(format!("{}: missing required key `{}`", at, required));
                }
            }
            Ok(())
        }
        "string" => value.is_string().then_some(()).ok_or_else(|| mismatch("a string")),
        "int" | "integer" => (value.is_i64() || value.is_u64())
            .then_some(())
            .ok_or_else(|| mismatch("an integer")),
        "float" => value.is_number().then_some(()).ok_or_else(|| mismatch("a number")),
        "bool" => value.is_boolean().then_some(()).ok_or_else(|| mismatch("a boolean")),
        "none" => value.is_null().then_some(()).ok_or_else(|| mismatch("null")),
        "set" => {
            let variants = rule.get("variants").and_then(Value::as_array);
            if variants.is_some_and(|v| v.contains(value)) {
                Ok(())
            } else {
                Err(format!("{}: value {} is not one of the allowed values", at, value))
            }
        }
        "one_of" => {
            let mut errors = Vec::new();
            for variant in str_list(rule, "variants") {
                match check_rule(rules, variant, value, at) {
                    Ok(()) => return Ok(()),
                    Err(e) => errors.push(e),
                }
            }
            Err(format!("{}: no variant matched ({})", at, errors.join("; ")))
        }
        _ => Ok(()),
    }
}

/// Keys of dict rules hidden from the UI, collected for schema rendering
pub fn invisible_items(schema: &Value) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(rules) = schema.as_object() {
        for rule in rules.values() {
            out.extend(str_list(rule, "invisible_items").into_iter().map(str::to_string));
        }
    }
    out.sort();
    out.dedup();
    out
}

fn required_str<'a>(rule: &'a Value, key: &str, name: &str) -> Result<&'a str, String> {
    rule.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("rule `{}` needs `{}`", name, key))
}

fn str_list<'a>(rule: &'a Value, key: &str) -> Vec<&'a str> {
    rule.get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn countries() -> Value {
        json!({
            "root": {"match": "list", "item": "country"},
            "country": {
                "match": "dict",
                "items": {"name": "string", "code": "integer", "tags": "tags"},
                "required_items": ["name"],
                "invisible_items": ["code"]
            },
            "tags": {"match": "list", "item": "string"},
            "string": {"match": "string"},
            "integer": {"match": "int"}
        })
    }

    #[test]
    fn test_valid_structure() {
        let schema = countries();
        check_schema(&schema).unwrap();
        let value = json!([{"name": "Greece", "code": 30}, {"name": "Spain", "tags": ["eu"]}]);
        validate_structure(&schema, &value).unwrap();
    }

    #[test]
    fn test_structure_errors() {
        let schema = countries();
        let err = validate_structure(&schema, &json!([{"code": 30}])).unwrap_err();
        assert!(err.contains("missing required key `name`"), "{}", err);

        let err = validate_structure(&schema, &json!([{"name": 1}])).unwrap_err();
        assert!(err.contains("$[0].name"), "{}", err);

        let err = validate_structure(&schema, &json!([{"name": "x", "extra": 1}])).unwrap_err();
        assert!(err.contains("unexpected key"), "{}", err);

        assert!(validate_structure(&schema, &json!({"name": "x"})).is_err());
    }

    #[test]
    fn test_one_of_and_set() {
        let schema = json!({
            "root": {"match": "one_of", "variants": ["level", "number"]},
            "level": {"match": "set", "variants": ["low", "high"]},
            "number": {"match": "int"}
        });
        check_schema(&schema).unwrap();
        validate_structure(&schema, &json!("low")).unwrap();
        validate_structure(&schema, &json!(3)).unwrap();
        assert!(validate_structure(&schema, &json!("medium")).is_err());
    }

    #[test]
    fn test_check_schema_rejects_dangling_rules() {
        assert!(check_schema(&json!({"root": {"match": "list", "item": "missing"}})).is_err());
        assert!(check_schema(&json!({"other": {"match": "string"}})).is_err());
        assert!(check_schema(&json!({"root": {"match": "tuple"}})).is_err());
    }

    #[test]
    fn test_invisible_items() {
        assert_eq!(invisible_items(&countries()), vec!["code".to_string()]);
    }
}
