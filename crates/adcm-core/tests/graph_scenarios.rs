//! Object graph scenarios
//!
//! End-to-end flows over the engine handle: topology building, concern
//! bookkeeping and lock gating.

use std::collections::BTreeMap;

use adcm_common::Principal;
use adcm_core::OpContext;
use adcm_core::testing::Fixture;
use adcm_persistence::{
    ConcernCause, ConcernType, JobStatus, MaintenanceMode, ObjectRef, StateChanges, Task, TaskId,
};
use serde_json::{Value, json};

fn causes_on(fx: &Fixture, object: ObjectRef) -> Vec<ConcernCause> {
    fx.core
        .snapshot()
        .concerns_of(object)
        .iter()
        .filter_map(|c| c.cause)
        .collect()
}

/// Insert a running task owned by `owner` the way the scheduler does
fn start_task(fx: &Fixture, owner: ObjectRef, is_blocking: bool) -> TaskId {
    let action_id = fx.cluster_action("install");
    fx.core
        .internal(|graph| {
            let id: TaskId = graph.next_id();
            graph.tasks.insert(
                id,
                Task {
                    id,
                    action_id,
                    owner,
                    action_host_group: None,
                    hosts: Vec::new(),
                    selector: BTreeMap::new(),
                    config: None,
                    attr: Value::Null,
                    hostcomponent: None,
                    hostcomponent_snapshot: Vec::new(),
                    post_upgrade_hc: Vec::new(),
                    verbose: false,
                    is_blocking,
                    status: JobStatus::Running,
                    upgrade_id: None,
                    maintenance_mode: None,
                    pending: StateChanges::default(),
                    cancel_requested: false,
                    actor: "admin".to_string(),
                    start_date: None,
                    finish_date: None,
                },
            );
            Ok(id)
        })
        .unwrap()
}

fn finish_task(fx: &Fixture, task: TaskId) {
    fx.core
        .internal(|graph| {
            graph.task_mut(task)?.status = JobStatus::Success;
            Ok(())
        })
        .unwrap();
}

// ==================== Topology Tests ====================

/// Create-and-map clears every issue of the cluster
#[test]
fn test_create_and_map_clears_concerns() {
    let fx = Fixture::new();
    let cluster = ObjectRef::Cluster(fx.cluster);
    assert_eq!(causes_on(&fx, cluster), vec![ConcernCause::Service]);

    let s1 = fx.add_service("s1");
    let causes = causes_on(&fx, cluster);
    assert!(!causes.contains(&ConcernCause::Service), "s1 is the only required service");
    assert!(causes.contains(&ConcernCause::HostComponent));

    fx.add_hosts_to_cluster(2);
    let a = fx.component(s1, "a");
    let b = fx.component(s1, "b");
    let hc = vec![
        adcm_persistence::HcEntry::new(s1, a, fx.hosts[0]),
        adcm_persistence::HcEntry::new(s1, a, fx.hosts[1]),
        adcm_persistence::HcEntry::new(s1, b, fx.hosts[0]),
    ];
    let delta = fx.core.set_hostcomponent(&fx.ctx, fx.cluster, hc).unwrap();
    assert_eq!(delta.add.len(), 3);
    assert!(delta.remove.is_empty());

    let graph = fx.core.snapshot();
    assert_eq!(graph.hosts_of_component(a).len(), 2);
    assert_eq!(graph.hosts_of_component(b).len(), 1);
    assert!(graph.concerns.is_empty(), "left over: {:?}", graph.concerns);
}

/// Mapping a component twice over its maximum is rejected and changes nothing
#[test]
fn test_constraint_violation_is_rejected() {
    let fx = Fixture::new();
    let (s1, hc) = fx.mapped_cluster();
    let b = fx.component(s1, "b");
    let mut desired = hc.clone();
    desired.push(adcm_persistence::HcEntry::new(s1, b, fx.hosts[1]));

    let err = fx
        .core
        .set_hostcomponent(&fx.ctx, fx.cluster, desired)
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_HC");
    assert_eq!(fx.core.snapshot().hc_set(fx.cluster).len(), hc.len());
}

/// A host in another cluster can not join
#[test]
fn test_host_belongs_to_one_cluster() {
    let fx = Fixture::new();
    fx.add_hosts_to_cluster(1);
    let prototype = fx.cluster_prototype();
    let other = fx.core.create_cluster(&fx.ctx, prototype, "c2", "").unwrap();

    let err = fx
        .core
        .add_host_to_cluster(&fx.ctx, other, fx.hosts[0])
        .unwrap_err();
    assert_eq!(err.code(), "FOREIGN_HOST");
    let graph = fx.core.snapshot();
    assert_eq!(graph.host(fx.hosts[0]).unwrap().cluster_id, Some(fx.cluster));
}

// ==================== Lock Tests ====================

/// Every gated operation is refused while a blocking task runs on the cluster
#[test]
fn test_locked_cluster_rejects_edits() {
    let fx = Fixture::new();
    let (s1, hc) = fx.mapped_cluster();
    let cluster = ObjectRef::Cluster(fx.cluster);
    let task = start_task(&fx, cluster, true);

    let graph = fx.core.snapshot();
    let lock = graph
        .concerns
        .values()
        .find(|c| c.kind == ConcernType::Lock)
        .expect("lock concern is raised");
    assert_eq!(lock.task_id, Some(task));
    assert!(lock.affected.contains(&ObjectRef::Service(s1)));

    let remap = fx.core.set_hostcomponent(&fx.ctx, fx.cluster, hc.clone());
    assert_eq!(remap.unwrap_err().code(), "LOCK_ERROR");

    let config = fx
        .core
        .update_config(&fx.ctx, cluster, json!({"integer": 1, "string": "x"}), json!({}), "");
    assert_eq!(config.unwrap_err().code(), "LOCK_ERROR");

    let mm = fx
        .core
        .change_maintenance_mode(&fx.ctx, ObjectRef::Service(s1), MaintenanceMode::On);
    assert_eq!(mm.unwrap_err().code(), "LOCK_ERROR");

    let delete = fx.core.delete_service(&fx.ctx, s1);
    assert_eq!(delete.unwrap_err().code(), "LOCK_ERROR");

    finish_task(&fx, task);
    assert!(
        fx.core
            .snapshot()
            .concerns
            .values()
            .all(|c| c.kind != ConcernType::Lock)
    );
    fx.core
        .set_hostcomponent(&fx.ctx, fx.cluster, hc)
        .expect("edits succeed once the task is over");
}

/// Operations issued on behalf of the running task pass its own lock
#[test]
fn test_own_lock_does_not_block_the_task() {
    let fx = Fixture::new();
    let cluster = ObjectRef::Cluster(fx.cluster);
    let task = start_task(&fx, cluster, true);

    let from_task = OpContext::task(task, Principal::new("admin"));
    fx.core
        .update_config(&from_task, cluster, json!({"integer": 3, "string": "x"}), json!({}), "plugin")
        .expect("task origin passes its own lock");
    let api = fx
        .core
        .update_config(&fx.ctx, cluster, json!({"integer": 4, "string": "x"}), json!({}), "");
    assert_eq!(api.unwrap_err().code(), "LOCK_ERROR");
}

/// A non-blocking task allows edits but not deletion
#[test]
fn test_non_blocking_task_still_protects_deletion() {
    let fx = Fixture::new();
    let s2 = fx.add_service("s2");
    let cluster = ObjectRef::Cluster(fx.cluster);
    start_task(&fx, cluster, false);

    fx.core
        .update_config(&fx.ctx, cluster, json!({"integer": 5, "string": "y"}), json!({}), "")
        .expect("non-blocking lock does not gate edits");
    let err = fx.core.delete_service(&fx.ctx, s2).unwrap_err();
    assert_eq!(err.code(), "LOCK_ERROR");
}

/// A task on a host blocks deleting the cluster the host belongs to
#[test]
fn test_cluster_delete_checks_its_whole_subtree() {
    let fx = Fixture::new();
    fx.mapped_cluster();
    let task = start_task(&fx, ObjectRef::Host(fx.hosts[1]), true);

    let err = fx.core.delete_cluster(&fx.ctx, fx.cluster).unwrap_err();
    assert_eq!(err.code(), "LOCK_ERROR");
    let graph = fx.core.snapshot();
    assert_eq!(graph.host(fx.hosts[1]).unwrap().cluster_id, Some(fx.cluster));
    assert_eq!(graph.services_of(fx.cluster).len(), 1);

    finish_task(&fx, task);
    fx.core.delete_cluster(&fx.ctx, fx.cluster).unwrap();
}

// ==================== Audit Tests ====================

/// Each mutating operation leaves exactly one audit record
#[test]
fn test_one_audit_record_per_operation() {
    let fx = Fixture::new();
    let before = fx.audit.by_operation("set_hostcomponent").len();
    fx.mapped_cluster();
    let _ = fx.core.set_hostcomponent(&fx.ctx, fx.cluster, Vec::new());
    assert_eq!(fx.audit.by_operation("set_hostcomponent").len(), before + 2);
    assert_eq!(fx.audit.by_operation("add_host_to_cluster").len(), 2);
}
