//! Turning a manifest into bundle, prototype, action and upgrade rows

use std::collections::{BTreeMap, BTreeSet};

use adcm_common::{AdcmError, Result, ensure};
use adcm_config::validate_spec;
use adcm_persistence::{
    Action, ActionId, ActionType, Availability, Bundle, BundleId, Graph, InternalScript,
    LicenseState, Prototype, PrototypeId, PrototypeType, Requirement, SubAction, Upgrade,
    UpgradeId,
};
use chrono::Utc;
use tracing::debug;

use super::manifest::{ActionDef, BundleManifest, PrototypeDef, UpgradeDef};

const DEFAULT_EDITION: &str = "community";

type Node = Requirement;

fn node(service: &str, component: Option<&str>) -> Node {
    Requirement {
        service: service.to_string(),
        component: component.map(str::to_string),
    }
}

/// Requirement graph of a cluster bundle: every service and component with its direct requires
struct RequirementGraph {
    edges: BTreeMap<Node, Vec<Node>>,
}

impl RequirementGraph {
    fn build(manifest: &BundleManifest) -> Self {
        let mut edges = BTreeMap::new();
        for def in manifest.definitions() {
            if def.kind != Some(PrototypeType::Service) {
                continue;
            }
            edges.insert(node(&def.name, None), def.requires.clone());
            for (name, component) in &def.components {
                edges.insert(node(&def.name, Some(name)), component.requires.clone());
            }
        }
        Self { edges }
    }

    fn contains(&self, n: &Node) -> bool {
        self.edges.contains_key(n)
    }

    /// Direct requires of `n`; a component also depends on its own service
    fn next(&self, n: &Node) -> Vec<Node> {
        let mut out: Vec<Node> = self.edges.get(n).cloned().unwrap_or_default();
        if n.component.is_some() {
            out.push(node(&n.service, None));
        }
        out
    }

    fn check(&self) -> Result<()> {
        for (from, targets) in &self.edges {
            for target in targets {
                ensure!(
                    self.contains(target),
                    AdcmError::Validation(format!("{} requires unknown {}", from, target))
                );
                ensure!(
                    target != from,
                    AdcmError::Validation(format!("{} requires itself", from))
                );
            }
        }
        let mut done = BTreeSet::new();
        for start in self.edges.keys() {
            let mut path = Vec::new();
            self.visit(start, &mut path, &mut done)?;
        }
        Ok(())
    }

    fn visit(&self, n: &Node, path: &mut Vec<Node>, done: &mut BTreeSet<Node>) -> Result<()> {
        if done.contains(n) {
            return Ok(());
        }
        if let Some(pos) = path.iter().position(|p| p == n) {
            // a service and its own components always come together
            if path[pos..].iter().all(|p| p.service == n.service) {
                return Ok(());
            }
            let cycle: Vec<String> = path[pos..].iter().map(ToString::to_string).collect();
            return Err(AdcmError::Validation(format!(
                "requires form a cycle: {} -> {}",
                cycle.join(" -> "),
                n
            )));
        }
        path.push(n.clone());
        for next in self.next(n) {
            self.visit(&next, path, done)?;
        }
        path.pop();
        done.insert(n.clone());
        Ok(())
    }

    /// Every requirement reachable from `n`, excluding `n` itself
    fn closure(&self, n: &Node) -> Vec<Node> {
        let mut seen: BTreeSet<Node> = BTreeSet::new();
        let mut out = Vec::new();
        let mut stack: Vec<Node> = self.edges.get(n).cloned().unwrap_or_default();
        stack.reverse();
        while let Some(next) = stack.pop() {
            if &next == n || !seen.insert(next.clone()) {
                continue;
            }
            out.push(next.clone());
            for further in self.next(&next).into_iter().rev() {
                stack.push(further);
            }
        }
        out
    }
}

fn check_action(owner: &str, name: &str, def: &ActionDef, components: &BTreeSet<Node>) -> Result<()> {
    let label = format!("action {} of {}", name, owner);
    match def.kind {
        ActionType::Job => ensure!(
            !def.script.is_empty(),
            AdcmError::Validation(format!("{} has no script", label))
        ),
        ActionType::Task => ensure!(
            !def.scripts.is_empty(),
            AdcmError::Validation(format!("{} has no scripts", label))
        ),
    }
    check_internal_scripts(&label, &def.scripts, false)?;
    for rule in &def.hc_acl {
        ensure!(
            components.contains(&node(&rule.service, Some(&rule.component))),
            AdcmError::Validation(format!(
                "{} refers to unknown component {}.{} in hc_acl",
                label, rule.service, rule.component
            ))
        );
    }
    validate_spec(&def.config)
}

fn check_internal_scripts(label: &str, scripts: &[SubAction], upgrade: bool) -> Result<()> {
    let mut seen = BTreeSet::new();
    for script in scripts {
        if let Some(internal) = script.internal_script() {
            ensure!(
                seen.insert(internal),
                AdcmError::Validation(format!("{} runs {} more than once", label, internal.as_str()))
            );
        } else if script.script_type == adcm_persistence::ScriptType::Internal {
            return Err(AdcmError::Validation(format!(
                "{} uses unknown internal script {}",
                label, script.script
            )));
        }
    }
    if upgrade {
        ensure!(
            seen.contains(&InternalScript::BundleSwitch),
            AdcmError::Validation(format!("{} must run bundle_switch exactly once", label))
        );
    }
    Ok(())
}

fn check_upgrade(def: &UpgradeDef, components: &BTreeSet<Node>) -> Result<()> {
    let label = format!("upgrade {}", def.name);
    let bounds = &def.versions;
    ensure!(
        bounds.min.is_some() != bounds.min_strict.is_some(),
        AdcmError::Validation(format!("{} needs exactly one of min and min_strict", label))
    );
    ensure!(
        bounds.max.is_some() != bounds.max_strict.is_some(),
        AdcmError::Validation(format!("{} needs exactly one of max and max_strict", label))
    );
    if !def.scripts.is_empty() {
        check_internal_scripts(&label, &def.scripts, true)?;
    }
    for rule in &def.hc_acl {
        ensure!(
            components.contains(&node(&rule.service, Some(&rule.component))),
            AdcmError::Validation(format!(
                "{} refers to unknown component {}.{} in hc_acl",
                label, rule.service, rule.component
            ))
        );
    }
    validate_spec(&def.config)
}

/// Reject manifests that violate structural rules before anything is stored
pub fn validate_manifest(manifest: &BundleManifest) -> Result<()> {
    let main = manifest.main()?;
    let main_kind = main.kind.unwrap_or(PrototypeType::Cluster);
    let allowed = match main_kind {
        PrototypeType::Cluster => [PrototypeType::Cluster, PrototypeType::Service],
        _ => [PrototypeType::Provider, PrototypeType::Host],
    };

    let mut names = BTreeSet::new();
    for def in manifest.definitions() {
        let kind = def.kind.ok_or_else(|| {
            AdcmError::Validation(format!("definition {} has no type", def.name))
        })?;
        ensure!(
            allowed.contains(&kind),
            AdcmError::Validation(format!("a {} bundle can not define a {}", main_kind, kind))
        );
        ensure!(
            !def.name.trim().is_empty(),
            AdcmError::WrongName("prototype name must not be empty".to_string())
        );
        ensure!(
            names.insert((kind, def.name.clone())),
            AdcmError::Validation(format!("{} {} is defined twice", kind, def.name))
        );
        ensure!(
            kind == PrototypeType::Service || def.components.is_empty(),
            AdcmError::Validation(format!("only services have components, {} has some", def.name))
        );
        validate_spec(&def.config)?;
        for component in def.components.values() {
            validate_spec(&component.config)?;
        }
    }

    let requirements = RequirementGraph::build(manifest);
    requirements.check()?;
    let components: BTreeSet<Node> = requirements
        .edges
        .keys()
        .filter(|n| n.component.is_some())
        .cloned()
        .collect();

    for def in manifest.definitions() {
        for (name, action) in &def.actions {
            check_action(&def.name, name, action, &components)?;
        }
        for (component_name, component) in &def.components {
            if let Some(target) = &component.bound_to {
                ensure!(
                    target.component.is_some() && components.contains(target),
                    AdcmError::Validation(format!(
                        "{}.{} is bound to unknown component {}",
                        def.name, component_name, target
                    ))
                );
                ensure!(
                    *target != node(&def.name, Some(component_name)),
                    AdcmError::Validation(format!("{}.{} is bound to itself", def.name, component_name))
                );
            }
            for (name, action) in &component.actions {
                check_action(&format!("{}.{}", def.name, component_name), name, action, &components)?;
            }
        }
        ensure!(
            def.upgrade.is_empty() || std::ptr::eq(def, main),
            AdcmError::Validation(format!("upgrades belong to the {} definition", main_kind))
        );
        for upgrade in &def.upgrade {
            check_upgrade(upgrade, &components)?;
        }
    }
    Ok(())
}

fn action_from_def(id: ActionId, prototype_id: PrototypeId, name: &str, def: &ActionDef) -> Action {
    let mut action = Action::job(id, prototype_id, name);
    action.display_name = def.display_name.clone().unwrap_or_else(|| name.to_string());
    action.description = def.description.clone();
    action.kind = def.kind;
    action.script = def.script.clone();
    action.script_type = def.script_type;
    action.params = def.params.clone();
    action.sub_actions = def.scripts.clone();
    action.availability = def.availability.clone();
    action.on_success = def.on_success.clone();
    action.on_fail = def.on_fail.clone();
    action.host_action = def.host_action;
    action.allow_for_action_host_group = def.allow_for_action_host_group;
    action.allow_in_maintenance_mode = def.allow_in_maintenance_mode;
    action.allow_to_terminate = def.allow_to_terminate;
    action.hc_acl = def.hc_acl.clone();
    action.restore_hc_on_fail = def.restore_hc_on_fail;
    action.config = def.config.clone();
    action.available_in_concerns = def.available_in_concerns;
    action.allowed_concern_causes = def.allowed_concern_causes.clone();
    action
}

struct Builder<'g> {
    graph: &'g mut Graph,
    bundle_id: BundleId,
    requirements: RequirementGraph,
    created: Vec<PrototypeId>,
}

impl Builder<'_> {
    fn prototype(
        &mut self,
        kind: PrototypeType,
        def: &PrototypeDef,
        version: &str,
        parent: Option<(PrototypeId, &str)>,
    ) -> PrototypeId {
        let id: PrototypeId = self.graph.next_id();
        let mut prototype = Prototype::new(id, self.bundle_id, kind, def.name.clone(), version);
        if let Some(display_name) = &def.display_name {
            prototype.display_name.clone_from(display_name);
        }
        prototype.description = def.description.clone();
        prototype.parent_id = parent.map(|(id, _)| id);
        prototype.config = def.config.clone();
        prototype.config_group_customization = def.config_group_customization;
        prototype.required = def.required;
        prototype.constraint = def.constraint.unwrap_or_default();
        let own = match (kind, parent) {
            (PrototypeType::Service, _) => Some(node(&def.name, None)),
            (PrototypeType::Component, Some((_, service))) => Some(node(service, Some(&def.name))),
            _ => None,
        };
        prototype.requires = match own {
            Some(n) => self.requirements.closure(&n),
            None => def.requires.clone(),
        };
        prototype.bound_to = def.bound_to.clone();
        prototype.imports = def.import_specs();
        prototype.exports = def.exports.clone();
        prototype.allow_maintenance_mode = def.allow_maintenance_mode;
        if let Some(text) = &def.license {
            prototype.license = LicenseState::Unaccepted;
            prototype.license_text = Some(text.clone());
        }
        self.graph.prototypes.insert(id, prototype);
        self.created.push(id);

        for (name, action) in &def.actions {
            let action_id: ActionId = self.graph.next_id();
            self.graph
                .actions
                .insert(action_id, action_from_def(action_id, id, name, action));
        }
        id
    }

    fn upgrade(&mut self, main: PrototypeId, def: &UpgradeDef) {
        let action_id = if def.scripts.is_empty() {
            None
        } else {
            let id: ActionId = self.graph.next_id();
            let mut action = Action::job(id, main, def.name.clone());
            action.display_name = def.display_name.clone().unwrap_or_else(|| def.name.clone());
            action.description = def.description.clone();
            action.kind = ActionType::Task;
            action.script = String::new();
            action.sub_actions = def.scripts.clone();
            action.availability = Availability {
                state_available: def.states.available.clone(),
                ..Availability::default()
            };
            action.hc_acl = def.hc_acl.clone();
            action.config = def.config.clone();
            action.is_upgrade = true;
            self.graph.actions.insert(id, action);
            Some(id)
        };
        let bounds = &def.versions;
        let id: UpgradeId = self.graph.next_id();
        self.graph.upgrades.insert(
            id,
            Upgrade {
                id,
                bundle_id: self.bundle_id,
                name: def.name.clone(),
                display_name: def.display_name.clone().unwrap_or_else(|| def.name.clone()),
                description: def.description.clone(),
                min_version: bounds.min.clone().or_else(|| bounds.min_strict.clone()).unwrap_or_default(),
                max_version: bounds.max.clone().or_else(|| bounds.max_strict.clone()).unwrap_or_default(),
                min_strict: bounds.min_strict.is_some(),
                max_strict: bounds.max_strict.is_some(),
                from_edition: def.from_edition.clone(),
                state_available: def.states.available.clone(),
                state_on_success: def.states.on_success.clone(),
                action_id,
            },
        );
    }
}

/// Validate and store a bundle; the manifest hash names its directory
pub fn load_bundle(graph: &mut Graph, manifest: &BundleManifest) -> Result<BundleId> {
    validate_manifest(manifest)?;
    let main = manifest.main()?;
    let hash = manifest.content_hash()?;
    let edition = main.edition.clone().unwrap_or_else(|| DEFAULT_EDITION.to_string());

    if let Some(existing) = graph.bundles.values().find(|b| {
        b.hash == hash || (b.name == main.name && b.version == main.version && b.edition == edition)
    }) {
        return Err(AdcmError::BundleConflict(format!(
            "bundle {} {} ({}) is already loaded",
            existing.name, existing.version, existing.edition
        )));
    }

    let bundle_id: BundleId = graph.next_id();
    graph.bundles.insert(
        bundle_id,
        Bundle {
            id: bundle_id,
            name: main.name.clone(),
            version: main.version.clone(),
            edition,
            hash,
            description: main.description.clone(),
            date: Utc::now(),
        },
    );

    let mut builder = Builder {
        graph,
        bundle_id,
        requirements: RequirementGraph::build(manifest),
        created: Vec::new(),
    };
    let mut main_id = None;
    for def in manifest.definitions() {
        let kind = def.kind.unwrap_or(PrototypeType::Service);
        let id = builder.prototype(kind, def, &def.version, None);
        if std::ptr::eq(def, main) {
            main_id = Some(id);
        }
        for component in def.components.values() {
            builder.prototype(PrototypeType::Component, component, &def.version, Some((id, &def.name)));
        }
    }
    if let Some(main_id) = main_id {
        for upgrade in &main.upgrade {
            builder.upgrade(main_id, upgrade);
        }
    }
    debug!(bundle_id = %bundle_id, prototypes = builder.created.len(), "Bundle stored");
    Ok(bundle_id)
}

/// Remove a bundle no object uses any more
pub fn delete_bundle(graph: &mut Graph, bundle: BundleId) -> Result<()> {
    graph.bundle(bundle)?;
    let prototypes: BTreeSet<PrototypeId> = graph
        .prototypes
        .values()
        .filter(|p| p.bundle_id == bundle)
        .map(|p| p.id)
        .collect();
    let in_use = graph
        .all_objects()
        .into_iter()
        .filter_map(|o| graph.object(o).ok().map(|obj| obj.prototype_id()))
        .any(|p| prototypes.contains(&p));
    ensure!(
        !in_use,
        AdcmError::Conflict(format!("bundle {} is used by existing objects", bundle))
    );
    graph.prototypes.retain(|id, _| !prototypes.contains(id));
    graph.actions.retain(|_, a| !prototypes.contains(&a.prototype_id));
    graph.upgrades.retain(|_, u| u.bundle_id != bundle);
    graph.accepted_licenses.retain(|p| !prototypes.contains(p));
    graph.bundles.remove(&bundle);
    Ok(())
}

/// Mark a prototype's license accepted
pub fn accept_license(graph: &mut Graph, prototype: PrototypeId) -> Result<()> {
    let target = graph.prototype_mut(prototype)?;
    ensure!(
        target.license != LicenseState::Absent,
        AdcmError::Validation(format!("prototype {} has no license", target.name))
    );
    target.license = LicenseState::Accepted;
    graph.accepted_licenses.insert(prototype);
    Ok(())
}
