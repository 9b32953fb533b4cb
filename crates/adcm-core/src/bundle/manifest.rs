//! Bundle manifest model
//!
//! A manifest is a list of top-level definitions: one cluster or provider,
//! plus services (with nested components) or hosts. It is read from YAML or
//! JSON; archive handling happens elsewhere.

use std::collections::BTreeMap;

use adcm_common::{AdcmError, Result};
use adcm_config::{ConfigSpec, StateScope};
use adcm_persistence::{
    ActionType, Availability, Constraint, HcAclRule, ImportSpec, PrototypeType, Requirement,
    ScriptType, StateChanges, SubAction,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Versions are written as numbers or strings; both read as text
fn version_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Int(n) => n.to_string(),
        Raw::Float(f) if f.fract() == 0.0 => format!("{:.1}", f),
        Raw::Float(f) => f.to_string(),
        Raw::Text(s) => s,
    })
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportDef {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub multibind: bool,
    #[serde(default)]
    pub default: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionDef {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: ActionType,
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub script_type: ScriptType,
    #[serde(default)]
    pub params: Value,
    /// Steps of a `task` action
    #[serde(default)]
    pub scripts: Vec<SubAction>,
    #[serde(flatten)]
    pub availability: Availability,
    #[serde(default)]
    pub on_success: StateChanges,
    #[serde(default)]
    pub on_fail: StateChanges,
    #[serde(default)]
    pub host_action: bool,
    #[serde(default)]
    pub allow_for_action_host_group: bool,
    #[serde(default)]
    pub allow_in_maintenance_mode: bool,
    #[serde(default)]
    pub allow_to_terminate: bool,
    #[serde(default)]
    pub hc_acl: Vec<HcAclRule>,
    #[serde(default = "default_true")]
    pub restore_hc_on_fail: bool,
    #[serde(default)]
    pub config: ConfigSpec,
    #[serde(default)]
    pub available_in_concerns: bool,
    #[serde(default)]
    pub allowed_concern_causes: Vec<adcm_persistence::ConcernCause>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionBounds {
    #[serde(default, deserialize_with = "optional_version")]
    pub min: Option<String>,
    #[serde(default, deserialize_with = "optional_version")]
    pub max: Option<String>,
    #[serde(default, deserialize_with = "optional_version")]
    pub min_strict: Option<String>,
    #[serde(default, deserialize_with = "optional_version")]
    pub max_strict: Option<String>,
}

fn optional_version<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    version_text(deserializer).map(Some)
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpgradeStates {
    #[serde(default)]
    pub available: StateScope,
    #[serde(default)]
    pub on_success: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpgradeDef {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: String,
    pub versions: VersionBounds,
    #[serde(default)]
    pub from_edition: Option<Vec<String>>,
    #[serde(default)]
    pub states: UpgradeStates,
    /// Non-empty scripts turn the upgrade into an action
    #[serde(default)]
    pub scripts: Vec<SubAction>,
    #[serde(default)]
    pub hc_acl: Vec<HcAclRule>,
    #[serde(default)]
    pub config: ConfigSpec,
}

/// One prototype definition; components omit `type`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrototypeDef {
    #[serde(rename = "type", default)]
    pub kind: Option<PrototypeType>,
    /// Components are usually named by their key under `components`
    #[serde(default)]
    pub name: String,
    #[serde(default = "unversioned", deserialize_with = "version_text")]
    pub version: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Bundle edition, read from the cluster or provider definition
    #[serde(default)]
    pub edition: Option<String>,
    #[serde(default)]
    pub config: ConfigSpec,
    #[serde(default)]
    pub config_group_customization: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub constraint: Option<Constraint>,
    #[serde(default)]
    pub requires: Vec<Requirement>,
    #[serde(default)]
    pub bound_to: Option<Requirement>,
    #[serde(default, rename = "import")]
    pub imports: BTreeMap<String, ImportDef>,
    #[serde(default, rename = "export")]
    pub exports: Vec<String>,
    #[serde(default)]
    pub allow_maintenance_mode: bool,
    /// License text the user has to accept
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionDef>,
    #[serde(default)]
    pub components: BTreeMap<String, PrototypeDef>,
    #[serde(default)]
    pub upgrade: Vec<UpgradeDef>,
}

fn unversioned() -> String {
    "0".to_string()
}

impl PrototypeDef {
    pub fn import_specs(&self) -> Vec<ImportSpec> {
        self.imports
            .iter()
            .map(|(name, def)| ImportSpec {
                name: name.clone(),
                required: def.required,
                multibind: def.multibind,
                default: def.default.clone(),
            })
            .collect()
    }
}

/// Parsed bundle definition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleManifest(pub Vec<PrototypeDef>);

impl BundleManifest {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str::<Self>(text)
            .map(Self::with_component_names)
            .map_err(|e| AdcmError::Validation(format!("invalid bundle manifest: {}", e)))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str::<Self>(text)
            .map(Self::with_component_names)
            .map_err(|e| AdcmError::Validation(format!("invalid bundle manifest: {}", e)))
    }

    /// Components without an explicit name take their key
    fn with_component_names(mut self) -> Self {
        for def in &mut self.0 {
            for (key, component) in &mut def.components {
                if component.name.is_empty() {
                    component.name = key.clone();
                }
            }
        }
        self
    }

    /// Pick the parser by extension: `.json` is JSON, everything else YAML
    pub fn from_path_contents(path: &std::path::Path, text: &str) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(text),
            _ => Self::from_yaml(text),
        }
    }

    pub fn definitions(&self) -> &[PrototypeDef] {
        &self.0
    }

    /// The cluster or provider definition naming the bundle
    pub fn main(&self) -> Result<&PrototypeDef> {
        let mut mains = self
            .0
            .iter()
            .filter(|d| matches!(d.kind, Some(PrototypeType::Cluster | PrototypeType::Provider)));
        let main = mains.next().ok_or_else(|| {
            AdcmError::Validation("bundle must define a cluster or a provider".to_string())
        })?;
        if mains.next().is_some() {
            return Err(AdcmError::Validation(
                "bundle may define only one cluster or provider".to_string(),
            ));
        }
        Ok(main)
    }

    /// Hex sha256 of the manifest content
    pub fn content_hash(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(const_hex::encode(Sha256::digest(&bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
- type: cluster
  name: demo
  version: 2.0
  edition: enterprise
  upgrade:
    - name: from one
      versions: {min: 1, max_strict: "2.0"}
      states: {available: [created, installed], on_success: upgraded}
- type: service
  name: zk
  version: "3.8"
  requires: [{service: base}]
  components:
    server:
      constraint: [odd]
  actions:
    restart:
      script: restart.yaml
      state_available: [installed]
      multi_state_unavailable: [broken]
- type: service
  name: base
  version: 1
"#;

    #[test]
    fn test_parse_yaml_manifest() {
        let manifest = BundleManifest::from_yaml(MANIFEST).unwrap();
        let main = manifest.main().unwrap();
        assert_eq!(main.version, "2.0");
        assert_eq!(main.edition.as_deref(), Some("enterprise"));
        let upgrade = &main.upgrade[0];
        assert_eq!(upgrade.versions.min.as_deref(), Some("1"));
        assert_eq!(upgrade.versions.max_strict.as_deref(), Some("2.0"));
        assert_eq!(upgrade.states.on_success.as_deref(), Some("upgraded"));

        let zk = &manifest.definitions()[1];
        assert_eq!(zk.version, "3.8");
        assert!(zk.components["server"].kind.is_none());
        let restart = &zk.actions["restart"];
        assert!(restart.availability.allows("installed", &Default::default()));
        assert!(!restart.availability.allows("created", &Default::default()));
        assert!(restart.restore_hc_on_fail);
    }

    /// Test components are named by their key unless they carry a name
    #[test]
    fn test_component_names_from_keys() {
        let yaml = r#"
- {type: cluster, name: demo, version: 1}
- type: service
  name: s1
  version: 1
  components:
    a: {constraint: [1, +]}
    b: {name: b, display_name: Second}
"#;
        let manifest = BundleManifest::from_yaml(yaml).unwrap();
        let s1 = &manifest.definitions()[1];
        assert_eq!(s1.components["a"].name, "a");
        assert_eq!(s1.components["b"].name, "b");
        assert_eq!(s1.components["b"].display_name.as_deref(), Some("Second"));

        let json = r#"[{"type": "cluster", "name": "demo"},
            {"type": "service", "name": "s1", "components": {"x": {}}}]"#;
        let manifest = BundleManifest::from_json(json).unwrap();
        assert_eq!(manifest.definitions()[1].components["x"].name, "x");
    }

    #[test]
    fn test_main_definition_is_required() {
        let manifest = BundleManifest::from_yaml("- {type: service, name: s, version: 1}").unwrap();
        assert_eq!(manifest.main().unwrap_err().code(), "VALIDATION_ERROR");
        assert!(BundleManifest::from_json("{").is_err());
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = BundleManifest::from_yaml(MANIFEST).unwrap();
        let b = BundleManifest::from_yaml(MANIFEST).unwrap();
        let hash = a.content_hash().unwrap();
        assert_eq!(hash, b.content_hash().unwrap());
        assert_eq!(hash.len(), 64);
    }
}
