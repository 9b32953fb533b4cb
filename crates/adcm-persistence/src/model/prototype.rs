//! Bundles, prototypes and upgrade rules

use std::cmp::Ordering;
use std::fmt;

use adcm_config::{ConfigSpec, StateScope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ActionId, BundleId, PrototypeId, UpgradeId};

/// Frozen set of prototypes uploaded once
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bundle {
    pub id: BundleId,
    pub name: String,
    pub version: String,
    pub edition: String,
    /// sha256 of the manifest, names `bundles/<hash>/`
    pub hash: String,
    #[serde(default)]
    pub description: String,
    pub date: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrototypeType {
    Cluster,
    Service,
    Component,
    Provider,
    Host,
    Adcm,
}

impl PrototypeType {
    pub fn as_str(self) -> &'static str {
        match self {
            PrototypeType::Cluster => "cluster",
            PrototypeType::Service => "service",
            PrototypeType::Component => "component",
            PrototypeType::Provider => "provider",
            PrototypeType::Host => "host",
            PrototypeType::Adcm => "adcm",
        }
    }
}

impl fmt::Display for PrototypeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper bound of a component cardinality constraint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintMax {
    Count(u64),
    /// `+` as upper bound: no limit
    Unbounded,
    /// `odd`: the host count must be odd (zero allowed only when `min` is zero)
    Odd,
    /// `[+]`: every host of the cluster
    AllHosts,
}

/// Host count allowed for a component, written `[n]`, `[+]`, `[odd]`,
/// `[min, max]`, `[min, +]` or `[min, odd]`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ConstraintBound>", into = "Vec<ConstraintBound>")]
pub struct Constraint {
    pub min: u64,
    pub max: ConstraintMax,
}

impl Default for Constraint {
    fn default() -> Self {
        Self {
            min: 0,
            max: ConstraintMax::Unbounded,
        }
    }
}

impl Constraint {
    pub fn range(min: u64, max: u64) -> Self {
        Self {
            min,
            max: ConstraintMax::Count(max),
        }
    }

    pub fn at_least(min: u64) -> Self {
        Self {
            min,
            max: ConstraintMax::Unbounded,
        }
    }

    /// Check a host count; `cluster_hosts` is the size of the cluster
    pub fn check(&self, count: u64, cluster_hosts: u64) -> Result<(), String> {
        match self.max {
            ConstraintMax::AllHosts => {
                if count != cluster_hosts {
                    return Err(format!(
                        "should be installed on all {} hosts of the cluster, got {}",
                        cluster_hosts, count
                    ));
                }
                Ok(())
            }
            ConstraintMax::Odd => {
                if count == 0 && self.min == 0 {
                    return Ok(());
                }
                if count < self.min.max(1) || count % 2 == 0 {
                    return Err(format!(
                        "should be installed on an odd number of hosts (at least {}), got {}",
                        self.min.max(1),
                        count
                    ));
                }
                Ok(())
            }
            ConstraintMax::Unbounded => {
                if count < self.min {
                    return Err(format!(
                        "should be installed on at least {} hosts, got {}",
                        self.min, count
                    ));
                }
                Ok(())
            }
            ConstraintMax::Count(max) => {
                if count < self.min || count > max {
                    return Err(format!(
                        "should be installed on {} to {} hosts, got {}",
                        self.min, max, count
                    ));
                }
                Ok(())
            }
        }
    }

    /// Constraint demands at least one host
    pub fn requires_placement(&self) -> bool {
        self.min > 0
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bounds: Vec<ConstraintBound> = (*self).into();
        let text: Vec<String> = bounds.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", text.join(","))
    }
}

/// One element of a constraint list in a manifest
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstraintBound {
    Number(u64),
    Word(String),
}

impl fmt::Display for ConstraintBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintBound::Number(n) => write!(f, "{}", n),
            ConstraintBound::Word(w) => f.write_str(w),
        }
    }
}

impl TryFrom<Vec<ConstraintBound>> for Constraint {
    type Error = String;

    fn try_from(value: Vec<ConstraintBound>) -> Result<Self, Self::Error> {
        use ConstraintBound::{Number, Word};
        match value.as_slice() {
            [Number(n)] => Ok(Constraint::range(*n, *n)),
            [Word(w)] if w == "+" => Ok(Constraint {
                min: 0,
                max: ConstraintMax::AllHosts,
            }),
            [Word(w)] if w == "odd" => Ok(Constraint {
                min: 1,
                max: ConstraintMax::Odd,
            }),
            [Number(min), Number(max)] if min <= max => Ok(Constraint::range(*min, *max)),
            [Number(min), Word(w)] if w == "+" => Ok(Constraint::at_least(*min)),
            [Number(min), Word(w)] if w == "odd" => Ok(Constraint {
                min: *min,
                max: ConstraintMax::Odd,
            }),
            _ => Err(format!(
                "invalid constraint [{}]",
                value
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            )),
        }
    }
}

impl From<Constraint> for Vec<ConstraintBound> {
    fn from(value: Constraint) -> Self {
        use ConstraintBound::{Number, Word};
        match value.max {
            ConstraintMax::AllHosts => vec![Word("+".into())],
            ConstraintMax::Odd if value.min == 1 => vec![Word("odd".into())],
            ConstraintMax::Odd => vec![Number(value.min), Word("odd".into())],
            ConstraintMax::Unbounded => vec![Number(value.min), Word("+".into())],
            ConstraintMax::Count(max) if max == value.min => vec![Number(max)],
            ConstraintMax::Count(max) => vec![Number(value.min), Number(max)],
        }
    }
}

/// Reference to a service or one of its components by prototype name
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Requirement {
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.component {
            Some(component) => write!(f, "{}.{}", self.service, component),
            None => f.write_str(&self.service),
        }
    }
}

/// Import of another bundle's exports
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSpec {
    /// Prototype name of the exporting cluster or service
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub multibind: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseState {
    #[default]
    Absent,
    Unaccepted,
    Accepted,
}

/// Typed, immutable definition backing an object
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Prototype {
    pub id: PrototypeId,
    pub bundle_id: BundleId,
    #[serde(rename = "type")]
    pub kind: PrototypeType,
    pub name: String,
    pub display_name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Service prototype of a component prototype
    #[serde(default)]
    pub parent_id: Option<PrototypeId>,
    #[serde(default)]
    pub config: ConfigSpec,
    /// Default of `group_customization` for parameters that do not set it
    #[serde(default)]
    pub config_group_customization: bool,
    /// Service must be added to every cluster of the bundle
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub constraint: Constraint,
    #[serde(default)]
    pub requires: Vec<Requirement>,
    #[serde(default)]
    pub bound_to: Option<Requirement>,
    #[serde(default)]
    pub imports: Vec<ImportSpec>,
    #[serde(default)]
    pub exports: Vec<String>,
    #[serde(default)]
    pub allow_maintenance_mode: bool,
    #[serde(default)]
    pub license: LicenseState,
    #[serde(default)]
    pub license_text: Option<String>,
}

impl Prototype {
    /// Prototype with empty spec, used by fixtures and the bundle loader
    pub fn new(
        id: PrototypeId,
        bundle_id: BundleId,
        kind: PrototypeType,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            id,
            bundle_id,
            kind,
            display_name: name.clone(),
            name,
            version: version.into(),
            description: String::new(),
            parent_id: None,
            config: ConfigSpec::default(),
            config_group_customization: false,
            required: false,
            constraint: Constraint::default(),
            requires: Vec::new(),
            bound_to: None,
            imports: Vec::new(),
            exports: Vec::new(),
            allow_maintenance_mode: false,
            license: LicenseState::Absent,
            license_text: None,
        }
    }
}

/// Transition rule from older bundle versions to the bundle carrying it
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Upgrade {
    pub id: UpgradeId,
    /// Bundle objects are switched to
    pub bundle_id: BundleId,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub min_version: String,
    pub max_version: String,
    #[serde(default)]
    pub min_strict: bool,
    #[serde(default)]
    pub max_strict: bool,
    /// Editions an object must come from; `None` accepts any
    #[serde(default)]
    pub from_edition: Option<Vec<String>>,
    #[serde(default)]
    pub state_available: StateScope,
    #[serde(default)]
    pub state_on_success: Option<String>,
    /// Action run instead of a direct bundle switch
    #[serde(default)]
    pub action_id: Option<ActionId>,
}

impl Upgrade {
    /// Version and edition of an object's current bundle fall into this rule
    pub fn applies_to(&self, version: &str, edition: &str) -> bool {
        let min = compare_versions(version, &self.min_version);
        let max = compare_versions(version, &self.max_version);
        let above = if self.min_strict {
            min == Ordering::Greater
        } else {
            min != Ordering::Less
        };
        let below = if self.max_strict {
            max == Ordering::Less
        } else {
            max != Ordering::Greater
        };
        let edition_ok = self
            .from_edition
            .as_ref()
            .is_none_or(|editions| editions.iter().any(|e| e == edition || e == "any"));
        above && below && edition_ok
    }
}

/// Compare dotted versions: numeric segments numerically, others lexically
///
/// Missing trailing segments count as smaller (`1.0` < `1.0.1`); a numeric
/// segment sorts before a textual one.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left: Vec<&str> = a.split(['.', '-']).collect();
    let right: Vec<&str> = b.split(['.', '-']).collect();
    for (l, r) in left.iter().zip(right.iter()) {
        let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => l.cmp(r),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left.len().cmp(&right.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<Constraint, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[test]
    fn test_constraint_parsing() {
        assert_eq!(parse(json!([1])).unwrap(), Constraint::range(1, 1));
        assert_eq!(parse(json!([0, "+"])).unwrap(), Constraint::at_least(0));
        assert_eq!(parse(json!(["+"])).unwrap().max, ConstraintMax::AllHosts);
        assert_eq!(parse(json!(["odd"])).unwrap(), Constraint { min: 1, max: ConstraintMax::Odd });
        assert_eq!(parse(json!([0, "odd"])).unwrap().min, 0);
        assert!(parse(json!([2, 1])).is_err());
        assert!(parse(json!(["many"])).is_err());
        assert!(parse(json!([])).is_err());

        assert_eq!(serde_json::to_value(Constraint::at_least(1)).unwrap(), json!([1, "+"]));
        assert_eq!(Constraint::range(1, 1).to_string(), "[1]");
    }

    #[test]
    fn test_constraint_check() {
        assert!(Constraint::at_least(1).check(0, 3).is_err());
        assert!(Constraint::at_least(1).check(5, 5).is_ok());
        assert!(Constraint::range(1, 1).check(2, 2).is_err());

        let odd = Constraint { min: 1, max: ConstraintMax::Odd };
        assert!(odd.check(3, 4).is_ok());
        assert!(odd.check(2, 4).is_err());
        assert!(odd.check(0, 4).is_err());
        let maybe_odd = Constraint { min: 0, max: ConstraintMax::Odd };
        assert!(maybe_odd.check(0, 4).is_ok());

        let all = Constraint { min: 0, max: ConstraintMax::AllHosts };
        assert!(all.check(3, 3).is_ok());
        assert!(all.check(2, 3).is_err());
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("2.0", "2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0", "1.0.1"), Ordering::Less);
        assert_eq!(compare_versions("1.0-rc1", "1.0-rc2"), Ordering::Less);
        assert_eq!(compare_versions("1.0.1", "1.0.b"), Ordering::Less);
    }

    #[test]
    fn test_upgrade_applies_to() {
        let upgrade = Upgrade {
            id: UpgradeId(1),
            bundle_id: BundleId(2),
            name: "to 2.0".into(),
            display_name: String::new(),
            description: String::new(),
            min_version: "1.0".into(),
            max_version: "2.0".into(),
            min_strict: false,
            max_strict: true,
            from_edition: Some(vec!["community".into()]),
            state_available: StateScope::Any,
            state_on_success: None,
            action_id: None,
        };
        assert!(upgrade.applies_to("1.0", "community"));
        assert!(upgrade.applies_to("1.5", "community"));
        assert!(!upgrade.applies_to("2.0", "community"));
        assert!(!upgrade.applies_to("0.9", "community"));
        assert!(!upgrade.applies_to("1.5", "enterprise"));
    }

    proptest! {
        #[test]
        fn prop_version_order_is_antisymmetric(a in "[0-9]{1,3}(\\.[0-9a-z]{1,3}){0,3}", b in "[0-9]{1,3}(\\.[0-9a-z]{1,3}){0,3}") {
            prop_assert_eq!(compare_versions(&a, &b), compare_versions(&b, &a).reverse());
        }

        #[test]
        fn prop_range_constraint_matches_bounds(min in 0u64..5, extra in 0u64..5, count in 0u64..12) {
            let constraint = Constraint::range(min, min + extra);
            prop_assert_eq!(constraint.check(count, 12).is_ok(), count >= min && count <= min + extra);
        }
    }
}
