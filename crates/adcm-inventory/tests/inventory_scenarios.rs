//! Inventory scenarios
//!
//! Inventories are built for hand-made tasks over the sample cluster so that
//! the group taxonomy can be checked without running a scheduler.

use std::collections::BTreeMap;

use adcm_core::testing::Fixture;
use adcm_core::UpgradeOutcome;
use adcm_inventory::{CLUSTER_GROUP, HOST_GROUP, TARGET_GROUP, build_inventory};
use adcm_persistence::{
    ActionId, HcEntry, JobStatus, MaintenanceMode, ObjectRef, StateChanges, Task, TaskId,
};
use serde_json::{Value, json};

fn task(fx: &Fixture, owner: ObjectRef, action_id: ActionId) -> Task {
    let graph = fx.core.snapshot();
    let snapshot = graph
        .cluster_of(owner)
        .map(|c| graph.hc(c).copied().collect())
        .unwrap_or_default();
    Task {
        id: TaskId(1000),
        action_id,
        owner,
        action_host_group: None,
        hosts: Vec::new(),
        selector: BTreeMap::new(),
        config: None,
        attr: Value::Null,
        hostcomponent: None,
        hostcomponent_snapshot: snapshot,
        post_upgrade_hc: Vec::new(),
        verbose: false,
        is_blocking: true,
        status: JobStatus::Running,
        upgrade_id: None,
        maintenance_mode: None,
        pending: StateChanges::default(),
        cancel_requested: false,
        actor: "admin".to_string(),
        start_date: None,
        finish_date: None,
    }
}

fn inventory_json(fx: &Fixture, task: &Task) -> Value {
    let graph = fx.core.snapshot();
    let inventory = build_inventory(&graph, fx.core.vault(), task).unwrap();
    serde_json::to_value(&inventory).unwrap()
}

// ==================== Group Taxonomy Tests ====================

/// Mapped hosts appear in CLUSTER, service and component groups
#[test]
fn test_cluster_groups() {
    let fx = Fixture::new();
    fx.mapped_cluster();
    let install = task(&fx, ObjectRef::Cluster(fx.cluster), fx.cluster_action("install"));
    let graph = fx.core.snapshot();
    let inventory = build_inventory(&graph, fx.core.vault(), &install).unwrap();

    assert_eq!(
        inventory.hosts_of(CLUSTER_GROUP),
        vec!["h1.example.com", "h2.example.com"]
    );
    assert_eq!(inventory.hosts_of("s1"), vec!["h1.example.com", "h2.example.com"]);
    assert_eq!(inventory.hosts_of("s1.a"), vec!["h1.example.com", "h2.example.com"]);
    assert_eq!(inventory.hosts_of("s1.b"), vec!["h1.example.com"]);
    assert!(inventory.group(TARGET_GROUP).is_none());

    let value = serde_json::to_value(&inventory).unwrap();
    let h1 = &value["all"]["children"]["CLUSTER"]["hosts"]["h1.example.com"];
    assert_eq!(h1["adcm_hostid"], json!(fx.hosts[0].value()));
    assert_eq!(h1["config"]["port"], 22);
    let vars = &value["all"]["children"]["s1.a"]["vars"];
    assert_eq!(vars["cluster"]["name"], "c1");
    assert_eq!(vars["cluster"]["config"]["integer"], 10);
    assert_eq!(vars["services"]["s1"]["config"]["port"], 8080);
    assert_eq!(vars["services"]["s1"]["a"]["config"]["heap"], "1g");
    assert_eq!(vars["services"]["s1"]["maintenance_mode"], false);
    assert!(vars["cluster"].get("before_upgrade").is_none());
}

/// Service maintenance moves its hosts to the maintenance subgroups only
#[test]
fn test_service_maintenance_mode_subgroups() {
    let fx = Fixture::new();
    let (s1, _) = fx.mapped_cluster();
    fx.core
        .change_maintenance_mode(&fx.ctx, ObjectRef::Service(s1), MaintenanceMode::On)
        .unwrap();

    let install = task(&fx, ObjectRef::Cluster(fx.cluster), fx.cluster_action("install"));
    let value = inventory_json(&fx, &install);
    let children = value["all"]["children"].as_object().unwrap();
    assert!(!children.contains_key("s1"));
    assert!(!children.contains_key("s1.a"));
    assert!(!children.contains_key("s1.b"));
    let hosts = |group: &str| -> Vec<String> {
        children[group]["hosts"].as_object().unwrap().keys().cloned().collect()
    };
    assert_eq!(hosts("s1.maintenance_mode"), vec!["h1.example.com", "h2.example.com"]);
    assert_eq!(hosts("s1.a.maintenance_mode"), vec!["h1.example.com", "h2.example.com"]);
    assert_eq!(hosts("s1.b.maintenance_mode"), vec!["h1.example.com"]);
    // hosts themselves stay out of maintenance
    assert_eq!(hosts("CLUSTER"), vec!["h1.example.com", "h2.example.com"]);
    let services = &children["CLUSTER"]["vars"]["services"];
    assert_eq!(services["s1"]["maintenance_mode"], true);
    assert_eq!(services["s1"]["a"]["maintenance_mode"], true);

    let probe = task(&fx, ObjectRef::Cluster(fx.cluster), fx.cluster_action("probe"));
    let value = inventory_json(&fx, &probe);
    let children = value["all"]["children"].as_object().unwrap();
    assert!(children.contains_key("s1"), "MM-aware actions keep the hosts");
    assert!(children.contains_key("s1.maintenance_mode"));
}

/// Host-component changes get add and remove groups
#[test]
fn test_hc_delta_groups() {
    let fx = Fixture::new();
    let (s1, hc) = fx.mapped_cluster();
    fx.core
        .add_host_to_cluster(&fx.ctx, fx.cluster, fx.hosts[2])
        .unwrap();
    let a = fx.component(s1, "a");
    let mut requested = hc.clone();
    requested.retain(|e| !(e.component_id == a && e.host_id == fx.hosts[1]));
    requested.push(HcEntry::new(s1, a, fx.hosts[2]));

    let mut expand = task(&fx, ObjectRef::Cluster(fx.cluster), fx.cluster_action("expand"));
    expand.hostcomponent = Some(requested);
    let graph = fx.core.snapshot();
    let inventory = build_inventory(&graph, fx.core.vault(), &expand).unwrap();
    assert_eq!(inventory.hosts_of("s1.a.add"), vec!["h3.example.com"]);
    assert_eq!(inventory.hosts_of("s1.a.remove"), vec!["h2.example.com"]);
    assert_eq!(inventory.hosts_of("s1.a"), vec!["h1.example.com", "h3.example.com"]);
}

/// Runs on an action host group expose its hosts as `target`
#[test]
fn test_action_host_group_target() {
    let fx = Fixture::new();
    let (s1, _) = fx.mapped_cluster();
    let owner = ObjectRef::Service(s1);
    let group = fx.core.create_action_host_group(&fx.ctx, owner, "first", "").unwrap();
    fx.core.add_host_to_action_group(&fx.ctx, group, fx.hosts[0]).unwrap();

    let mut check = task(&fx, owner, fx.action(owner, "check"));
    check.action_host_group = Some(group);
    let graph = fx.core.snapshot();
    let inventory = build_inventory(&graph, fx.core.vault(), &check).unwrap();
    assert_eq!(inventory.hosts_of(TARGET_GROUP), vec!["h1.example.com"]);
}

/// Provider actions get every provider host in HOST
#[test]
fn test_provider_inventory() {
    let fx = Fixture::new();
    let owner = ObjectRef::Provider(fx.provider);
    let check_all = task(&fx, owner, fx.action(owner, "check_all"));
    let value = inventory_json(&fx, &check_all);
    let group = &value["all"]["children"][HOST_GROUP];
    assert_eq!(group["hosts"].as_object().unwrap().len(), 3);
    assert_eq!(group["vars"]["provider"]["config"]["user"], "root");
    assert_eq!(group["vars"]["provider"]["name"], "p1");

    let host = ObjectRef::Host(fx.hosts[1]);
    let reboot = task(&fx, host, fx.action(host, "reboot"));
    let value = inventory_json(&fx, &reboot);
    let hosts = value["all"]["children"][HOST_GROUP]["hosts"].as_object().unwrap();
    assert_eq!(hosts.keys().collect::<Vec<_>>(), vec!["h2.example.com"]);
}

// ==================== Config Tests ====================

/// Secrets reach the runner in plain text
#[test]
fn test_secrets_are_revealed() {
    let fx = Fixture::new();
    let cluster = ObjectRef::Cluster(fx.cluster);
    fx.core
        .update_config(
            &fx.ctx,
            cluster,
            json!({"integer": 10, "string": "value", "password": "s3cret"}),
            json!({}),
            "",
        )
        .unwrap();
    let stored = fx.core.config_of(&fx.ctx, cluster, false).unwrap();
    assert_ne!(stored.config["password"], "s3cret");

    let install = task(&fx, cluster, fx.cluster_action("install"));
    let value = inventory_json(&fx, &install);
    assert_eq!(
        value["all"]["children"]["CLUSTER"]["vars"]["cluster"]["config"]["password"],
        "s3cret"
    );
}

/// Group overrides and the before-upgrade snapshot show up as host alternatives
#[test]
fn test_before_upgrade_host_alternative() {
    let fx = Fixture::new();
    fx.add_hosts_to_cluster(2);
    let cluster = ObjectRef::Cluster(fx.cluster);
    let group = fx.core.create_config_host_group(&fx.ctx, cluster, "fast", "").unwrap();
    fx.core.add_host_to_config_group(&fx.ctx, group, fx.hosts[0]).unwrap();
    fx.core
        .update_group_config(
            &fx.ctx,
            group,
            json!({"integer": 40}),
            json!({"group_keys": {"integer": true}}),
            "",
        )
        .unwrap();

    let plain = fx
        .core
        .list_upgrades(cluster)
        .unwrap()
        .into_iter()
        .find(|u| u.name == "plain")
        .unwrap();
    let scripted = fx
        .core
        .list_upgrades(cluster)
        .unwrap()
        .into_iter()
        .find(|u| u.name == "scripted")
        .unwrap();
    let outcome = fx.core.upgrade(&fx.ctx, cluster, plain.id).unwrap();
    assert_eq!(outcome, UpgradeOutcome::Switched);

    let post = task(&fx, cluster, scripted.action_id.unwrap());
    let value = inventory_json(&fx, &post);
    let group_vars = &value["all"]["children"]["CLUSTER"]["vars"]["cluster"];
    assert_eq!(group_vars["config"]["integer"], 10);
    assert_eq!(group_vars["config"]["added"], "fresh");
    assert_eq!(group_vars["before_upgrade"]["config"]["integer"], 10);
    assert_eq!(group_vars["before_upgrade"]["state"], "created");

    let hosts = &value["all"]["children"]["CLUSTER"]["hosts"];
    let h1 = &hosts["h1.example.com"]["cluster"];
    assert_eq!(h1["before_upgrade"]["config"]["integer"], 40);
    assert_eq!(h1["config"]["integer"], 40);
    assert!(hosts["h2.example.com"].get("cluster").is_none());
}

// ==================== Determinism Tests ====================

/// Same snapshot and task give byte-identical inventories with each host placed once
#[test]
fn test_inventory_is_deterministic() {
    let fx = Fixture::new();
    let (_, hc) = fx.mapped_cluster();
    fx.core
        .change_maintenance_mode(&fx.ctx, ObjectRef::Host(fx.hosts[1]), MaintenanceMode::On)
        .unwrap();
    let install = task(&fx, ObjectRef::Cluster(fx.cluster), fx.cluster_action("install"));
    let graph = fx.core.snapshot();
    let first = build_inventory(&graph, fx.core.vault(), &install).unwrap();
    let second = build_inventory(&graph, fx.core.vault(), &install).unwrap();
    assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());

    let mm_group = format!("{}.maintenance_mode", CLUSTER_GROUP);
    for entry in &hc {
        let fqdn = graph.host(entry.host_id).unwrap().fqdn.as_str();
        let placements = [CLUSTER_GROUP, mm_group.as_str()]
            .iter()
            .filter(|g| first.hosts_of(g).contains(&fqdn))
            .count();
        assert_eq!(placements, 1, "{} placed {} times", fqdn, placements);
    }
    assert_eq!(first.hosts_of(&mm_group), vec!["h2.example.com"]);
}
