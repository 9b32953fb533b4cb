//! Parameter specification model
//!
//! A prototype's configuration is declared as an ordered list of parameters.
//! Groups nest their children under `subs`; everything else is a leaf.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameter types understood by the resolver
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Text,
    Password,
    Secrettext,
    Integer,
    Float,
    Boolean,
    Option,
    Variant,
    File,
    Secretfile,
    Json,
    List,
    Map,
    Secretmap,
    Structure,
    Group,
}

impl ParamType {
    /// Values of these types are stored sealed by the vault
    pub fn is_secret(self) -> bool {
        matches!(
            self,
            ParamType::Password | ParamType::Secrettext | ParamType::Secretmap | ParamType::Secretfile
        )
    }

    /// Types whose value is a single string
    pub fn is_stringly(self) -> bool {
        matches!(
            self,
            ParamType::String
                | ParamType::Text
                | ParamType::Password
                | ParamType::Secrettext
                | ParamType::File
                | ParamType::Secretfile
                | ParamType::Variant
        )
    }

    pub fn is_file(self) -> bool {
        matches!(self, ParamType::File | ParamType::Secretfile)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Text => "text",
            ParamType::Password => "password",
            ParamType::Secrettext => "secrettext",
            ParamType::Integer => "integer",
            ParamType::Float => "float",
            ParamType::Boolean => "boolean",
            ParamType::Option => "option",
            ParamType::Variant => "variant",
            ParamType::File => "file",
            ParamType::Secretfile => "secretfile",
            ParamType::Json => "json",
            ParamType::List => "list",
            ParamType::Map => "map",
            ParamType::Secretmap => "secretmap",
            ParamType::Structure => "structure",
            ParamType::Group => "group",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of object states: either every state or an explicit list
///
/// Written in manifests as the keyword `any` or a list of state names.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StateScopeRepr", into = "StateScopeRepr")]
pub enum StateScope {
    #[default]
    Any,
    States(Vec<String>),
}

impl StateScope {
    pub fn contains(&self, state: &str) -> bool {
        match self {
            StateScope::Any => true,
            StateScope::States(states) => states.iter().any(|s| s == state),
        }
    }

    /// True when at least one of `states` is in scope
    pub fn intersects<'a>(&self, mut states: impl Iterator<Item = &'a String>) -> bool {
        match self {
            StateScope::Any => true,
            StateScope::States(list) => states.any(|s| list.contains(s)),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, StateScope::Any)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum StateScopeRepr {
    Keyword(String),
    List(Vec<String>),
}

impl TryFrom<StateScopeRepr> for StateScope {
    type Error = String;

    fn try_from(value: StateScopeRepr) -> Result<Self, Self::Error> {
        match value {
            StateScopeRepr::Keyword(word) if word == "any" => Ok(StateScope::Any),
            StateScopeRepr::Keyword(word) => Err(format!(
                "expected \"any\" or a list of states, got \"{}\"",
                word
            )),
            StateScopeRepr::List(states) => Ok(StateScope::States(states)),
        }
    }
}

impl From<StateScope> for StateScopeRepr {
    fn from(value: StateScope) -> Self {
        match value {
            StateScope::Any => StateScopeRepr::Keyword("any".to_string()),
            StateScope::States(states) => StateScopeRepr::List(states),
        }
    }
}

/// Where the value set of a `variant` parameter comes from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VariantSource {
    /// Computed by the engine from the object graph
    Builtin {
        name: String,
        #[serde(default)]
        args: Value,
        #[serde(default = "default_true")]
        strict: bool,
    },
    /// Listed in the manifest
    Inline {
        value: Vec<Value>,
        #[serde(default = "default_true")]
        strict: bool,
    },
    /// Read from another parameter of the same config (`group/param` path)
    Config {
        name: String,
        #[serde(default = "default_true")]
        strict: bool,
    },
}

impl VariantSource {
    pub fn strict(&self) -> bool {
        match self {
            VariantSource::Builtin { strict, .. }
            | VariantSource::Inline { strict, .. }
            | VariantSource::Config { strict, .. } => *strict,
        }
    }
}

/// Value restrictions of a parameter
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Label to value map of an `option` parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option: Option<Map<String, Value>>,
    /// Structure schema of a `structure` parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yspec: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<VariantSource>,
    /// Present on activatable groups: the activation default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

fn default_true() -> bool {
    true
}

/// One parameter of a configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<StateScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writable: Option<StateScope>,
    #[serde(default)]
    pub ui_options: Value,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_customization: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subs: Vec<ParamSpec>,
}

impl ParamSpec {
    /// Leaf parameter with no default, required
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            display_name: None,
            description: String::new(),
            default: None,
            required: true,
            read_only: None,
            writable: None,
            ui_options: Value::Null,
            limits: Limits::default(),
            group_customization: None,
            subs: Vec::new(),
        }
    }

    pub fn group(name: impl Into<String>, subs: Vec<ParamSpec>) -> Self {
        Self {
            subs,
            ..Self::new(name, ParamType::Group)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn customizable(mut self, allowed: bool) -> Self {
        self.group_customization = Some(allowed);
        self
    }

    pub fn is_group(&self) -> bool {
        self.param_type == ParamType::Group
    }

    /// Activatable groups carry an `active` limit
    pub fn is_activatable(&self) -> bool {
        self.is_group() && self.limits.active.is_some()
    }

    /// Parameter may not be changed while the owner is in `state`
    pub fn is_read_only(&self, state: &str) -> bool {
        if let Some(scope) = &self.read_only {
            return scope.contains(state);
        }
        if let Some(scope) = &self.writable {
            return !scope.contains(state);
        }
        false
    }

    pub fn sub(&self, name: &str) -> Option<&ParamSpec> {
        self.subs.iter().find(|p| p.name == name)
    }
}

/// Ordered parameter list of a prototype or action
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSpec(pub Vec<ParamSpec>);

impl ConfigSpec {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self(params)
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.0.iter().find(|p| p.name == name)
    }

    /// Look a parameter up by `name` or `group/name`
    pub fn find(&self, path: &str) -> Option<&ParamSpec> {
        match path.split_once('/') {
            Some((group, sub)) => self.get(group).and_then(|g| g.sub(sub)),
            None => self.get(path),
        }
    }

    /// Every leaf together with its `group/name` path
    pub fn leaves(&self) -> Vec<(String, &ParamSpec)> {
        let mut out = Vec::new();
        for param in &self.0 {
            if param.is_group() {
                for sub in &param.subs {
                    out.push((format!("{}/{}", param.name, sub.name), sub));
                }
            } else {
                out.push((param.name.clone(), param));
            }
        }
        out
    }

    pub fn has_secrets(&self) -> bool {
        self.leaves().iter().any(|(_, p)| p.param_type.is_secret())
    }
}

/// Read a value from a config tree by `name` or `group/name`
pub fn value_at<'a>(config: &'a Value, path: &str) -> Option<&'a Value> {
    match path.split_once('/') {
        Some((group, sub)) => config.get(group).and_then(|g| g.get(sub)),
        None => config.get(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_scope_parsing() {
        let any: StateScope = serde_json::from_value(json!("any")).unwrap();
        assert!(any.contains("installed"));

        let some: StateScope = serde_json::from_value(json!(["created"])).unwrap();
        assert!(some.contains("created"));
        assert!(!some.contains("installed"));

        assert!(serde_json::from_value::<StateScope>(json!("some")).is_err());
        assert_eq!(serde_json::to_value(StateScope::Any).unwrap(), json!("any"));
    }

    #[test]
    fn test_param_spec_from_yaml() {
        let yaml = r#"
- name: port
  type: integer
  default: 8080
  limits: { min: 1, max: 65535 }
- name: tls
  type: group
  limits: { active: false }
  subs:
    - name: cert
      type: file
      required: false
- name: mode
  type: variant
  limits:
    source: { type: inline, value: [fast, safe] }
"#;
        let spec: ConfigSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.params().len(), 3);
        assert_eq!(spec.get("port").unwrap().limits.max, Some(65535.0));
        assert!(spec.get("tls").unwrap().is_activatable());
        assert_eq!(spec.find("tls/cert").unwrap().param_type, ParamType::File);
        assert!(spec.get("mode").unwrap().limits.source.as_ref().unwrap().strict());
        assert_eq!(spec.leaves().len(), 3);
    }

    #[test]
    fn test_read_only_predicates() {
        let mut param = ParamSpec::new("x", ParamType::String);
        assert!(!param.is_read_only("created"));

        param.read_only = Some(StateScope::States(vec!["installed".into()]));
        assert!(param.is_read_only("installed"));
        assert!(!param.is_read_only("created"));

        param.read_only = None;
        param.writable = Some(StateScope::States(vec!["created".into()]));
        assert!(!param.is_read_only("created"));
        assert!(param.is_read_only("installed"));

        param.writable = None;
        param.read_only = Some(StateScope::Any);
        assert!(param.is_read_only("anything"));
    }

    #[test]
    fn test_value_at() {
        let config = json!({"a": 1, "g": {"b": 2}});
        assert_eq!(value_at(&config, "a"), Some(&json!(1)));
        assert_eq!(value_at(&config, "g/b"), Some(&json!(2)));
        assert_eq!(value_at(&config, "g/c"), None);
    }
}
