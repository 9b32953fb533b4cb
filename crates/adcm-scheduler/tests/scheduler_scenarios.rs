//! Scheduler scenarios
//!
//! Tasks run on the sample cluster against a scripted runner; job files are
//! written under a temporary directory and inspected after the run.

mod common;

use adcm_core::concern::is_locked;
use adcm_persistence::{HcEntry, JobStatus, MaintenanceMode, ObjectRef};
use adcm_scheduler::{JobManifest, RunActionRequest, RunPayload};
use serde_json::{Value, json};

use common::{harness, wait_until};

fn read_inventory(path: &std::path::Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn job_statuses(h: &common::Harness, task_id: adcm_persistence::TaskId) -> Vec<JobStatus> {
    h.fx.core
        .snapshot()
        .jobs_of(task_id)
        .iter()
        .map(|j| j.status)
        .collect()
}

// ==================== Lock Tests ====================

/// The cluster refuses host-component edits while its task runs
#[tokio::test]
async fn test_lock_held_while_task_runs() {
    let h = harness();
    let (_, hc) = h.fx.mapped_cluster();
    let cluster = ObjectRef::Cluster(h.fx.cluster);
    h.runner.hold("install");

    let request = RunActionRequest::on(cluster, h.fx.cluster_action("install"));
    let task_id = h.scheduler.run_action(&h.fx.ctx, &request).unwrap();
    assert!(is_locked(&h.fx.core.snapshot(), cluster));
    let handle = h.scheduler.launch(task_id);
    let runner = h.runner.clone();
    wait_until(|| runner.launched().len() == 1).await;

    let err = h
        .fx
        .core
        .set_hostcomponent(&h.fx.ctx, h.fx.cluster, hc.clone())
        .unwrap_err();
    assert_eq!(err.code(), "LOCK_ERROR");
    assert_eq!(h.fx.core.snapshot().task(task_id).unwrap().status, JobStatus::Running);

    h.runner.release();
    assert_eq!(handle.await.unwrap().unwrap(), JobStatus::Success);

    let graph = h.fx.core.snapshot();
    assert!(!is_locked(&graph, cluster));
    let cluster_state = &graph.cluster(h.fx.cluster).unwrap().common;
    assert_eq!(cluster_state.state, "installed");
    assert!(cluster_state.multi_state.contains("deployed"));
    let job = graph.jobs_of(task_id)[0];
    assert_eq!(job.pid, Some(std::process::id()));
    assert!(job.finish_date.is_some());
    h.fx.core.set_hostcomponent(&h.fx.ctx, h.fx.cluster, hc).unwrap();
}

/// Only the hosts of an action host group are locked by its task
#[tokio::test]
async fn test_action_host_group_scoping() {
    let h = harness();
    let (s1, _) = h.fx.mapped_cluster();
    let owner = ObjectRef::Service(s1);
    let group = h.fx.core.create_action_host_group(&h.fx.ctx, owner, "first", "").unwrap();
    h.fx.core.add_host_to_action_group(&h.fx.ctx, group, h.fx.hosts[0]).unwrap();
    h.runner.hold("check");

    let request = RunActionRequest::on_group(group, h.fx.action(owner, "check"));
    let task_id = h.scheduler.run_action(&h.fx.ctx, &request).unwrap();
    let handle = h.scheduler.launch(task_id);
    let runner = h.runner.clone();
    wait_until(|| runner.launched().len() == 1).await;

    let graph = h.fx.core.snapshot();
    assert!(is_locked(&graph, ObjectRef::Host(h.fx.hosts[0])));
    assert!(!is_locked(&graph, ObjectRef::Host(h.fx.hosts[1])));

    h.runner.release();
    assert_eq!(handle.await.unwrap().unwrap(), JobStatus::Success);

    let launch = h.runner.launch_of("check");
    let inventory = read_inventory(&launch.inventory_path);
    let target: Vec<&String> = inventory["all"]["children"]["target"]["hosts"]
        .as_object()
        .unwrap()
        .keys()
        .collect();
    assert_eq!(target, vec!["h1.example.com"]);
    let manifest = JobManifest::read(&launch.config_path).unwrap();
    assert_eq!(manifest.job.hostgroup, "target");
    assert_eq!(manifest.context.owner(), Some(owner));
}

/// A job on a service keeps its whole cluster from being deleted
#[tokio::test]
async fn test_cluster_with_running_service_task_is_not_deleted() {
    let h = harness();
    let (s1, _) = h.fx.mapped_cluster();
    let service = ObjectRef::Service(s1);
    h.runner.hold("check");

    let request = RunActionRequest::on(service, h.fx.action(service, "check"));
    let task_id = h.scheduler.run_action(&h.fx.ctx, &request).unwrap();
    let handle = h.scheduler.launch(task_id);
    let runner = h.runner.clone();
    wait_until(|| runner.launched().len() == 1).await;
    assert!(is_locked(&h.fx.core.snapshot(), service));

    let err = h.fx.core.delete_cluster(&h.fx.ctx, h.fx.cluster).unwrap_err();
    assert_eq!(err.code(), "LOCK_ERROR");
    let graph = h.fx.core.snapshot();
    assert!(graph.cluster(h.fx.cluster).is_ok());
    assert!(graph.service(s1).is_ok());
    assert_eq!(graph.hosts_of_cluster(h.fx.cluster).len(), 2);

    h.runner.release();
    assert_eq!(handle.await.unwrap().unwrap(), JobStatus::Success);
    h.fx.core.delete_cluster(&h.fx.ctx, h.fx.cluster).unwrap();
    assert!(h.fx.core.snapshot().clusters.is_empty());
}

// ==================== Failure Tests ====================

/// A failure after hc_apply puts the submitted map back
#[tokio::test]
async fn test_failure_restores_hostcomponent() {
    let h = harness();
    let (s1, hc) = h.fx.mapped_cluster();
    h.fx.core
        .add_host_to_cluster(&h.fx.ctx, h.fx.cluster, h.fx.hosts[2])
        .unwrap();
    let a = h.fx.component(s1, "a");
    let b = h.fx.component(s1, "b");
    let requested = vec![
        HcEntry::new(s1, a, h.fx.hosts[0]),
        HcEntry::new(s1, b, h.fx.hosts[0]),
        HcEntry::new(s1, a, h.fx.hosts[2]),
    ];
    h.runner.fail_on("verify");

    let request = RunActionRequest::on(ObjectRef::Cluster(h.fx.cluster), h.fx.cluster_action("expand"))
        .with_payload(RunPayload::default().with_hostcomponent(requested));
    let task_id = h.scheduler.run_action(&h.fx.ctx, &request).unwrap();
    let status = h.scheduler.launch(task_id).await.unwrap().unwrap();
    assert_eq!(status, JobStatus::Failed);

    let graph = h.fx.core.snapshot();
    assert_eq!(graph.hc_set(h.fx.cluster), hc.iter().copied().collect());
    assert_eq!(graph.task(task_id).unwrap().status, JobStatus::Failed);
    assert_eq!(
        job_statuses(&h, task_id),
        vec![JobStatus::Success, JobStatus::Success, JobStatus::Failed]
    );
    assert_eq!(h.runner.launched(), vec!["place", "verify"]);
    assert!(!is_locked(&graph, ObjectRef::Cluster(h.fx.cluster)));

    let inventory = read_inventory(&h.runner.launch_of("verify").inventory_path);
    assert!(inventory["all"]["children"]["s1.a.add"]["hosts"]
        .get("h3.example.com")
        .is_some());
}

/// A failed single-job action applies its on_fail state
#[tokio::test]
async fn test_failure_applies_on_fail_state() {
    let h = harness();
    h.fx.mapped_cluster();
    h.runner.fail_on("install");

    let request = RunActionRequest::on(ObjectRef::Cluster(h.fx.cluster), h.fx.cluster_action("install"));
    let task_id = h.scheduler.run_action(&h.fx.ctx, &request).unwrap();
    assert_eq!(h.scheduler.launch(task_id).await.unwrap().unwrap(), JobStatus::Failed);

    let graph = h.fx.core.snapshot();
    let cluster = &graph.cluster(h.fx.cluster).unwrap().common;
    assert_eq!(cluster.state, "failed");
    assert!(!cluster.multi_state.contains("deployed"));
}

/// The sub-script's own on_fail wins and later jobs never start
#[tokio::test]
async fn test_sub_script_on_fail() {
    let h = harness();
    h.fx.mapped_cluster();
    h.runner.fail_on("apply");

    let request = RunActionRequest::on(ObjectRef::Cluster(h.fx.cluster), h.fx.cluster_action("deploy"));
    let task_id = h.scheduler.run_action(&h.fx.ctx, &request).unwrap();
    assert_eq!(h.scheduler.launch(task_id).await.unwrap().unwrap(), JobStatus::Failed);
    assert_eq!(
        job_statuses(&h, task_id),
        vec![JobStatus::Success, JobStatus::Failed, JobStatus::Aborted]
    );
    assert_eq!(h.runner.launched(), vec!["prepare", "apply"]);
    assert_eq!(
        h.fx.core.snapshot().cluster(h.fx.cluster).unwrap().common.state,
        "created"
    );

    let h = harness();
    h.fx.mapped_cluster();
    h.runner.fail_on("finish");
    let request = RunActionRequest::on(ObjectRef::Cluster(h.fx.cluster), h.fx.cluster_action("deploy"));
    let task_id = h.scheduler.run_action(&h.fx.ctx, &request).unwrap();
    assert_eq!(h.scheduler.launch(task_id).await.unwrap().unwrap(), JobStatus::Failed);
    let graph = h.fx.core.snapshot();
    assert!(graph.cluster(h.fx.cluster).unwrap().common.multi_state.contains("finish_failed"));
}

// ==================== Host-Component Tests ====================

/// Mapped cluster with h3 joined, plus a request moving `s1.a` from h2 to h3
fn scale_request(h: &common::Harness) -> (Vec<HcEntry>, Vec<HcEntry>, RunActionRequest) {
    let (s1, hc) = h.fx.mapped_cluster();
    h.fx.core
        .add_host_to_cluster(&h.fx.ctx, h.fx.cluster, h.fx.hosts[2])
        .unwrap();
    let a = h.fx.component(s1, "a");
    let b = h.fx.component(s1, "b");
    let requested = vec![
        HcEntry::new(s1, a, h.fx.hosts[0]),
        HcEntry::new(s1, b, h.fx.hosts[0]),
        HcEntry::new(s1, a, h.fx.hosts[2]),
    ];
    let request = RunActionRequest::on(ObjectRef::Cluster(h.fx.cluster), h.fx.cluster_action("scale"))
        .with_payload(RunPayload::default().with_hostcomponent(requested.clone()));
    (hc, requested, request)
}

/// An action without hc_apply commits the requested map when its task starts
#[tokio::test]
async fn test_hc_action_without_hc_apply_commits_map() {
    let h = harness();
    let (hc, requested, request) = scale_request(&h);
    h.runner.hold("scale");

    let task_id = h.scheduler.run_action(&h.fx.ctx, &request).unwrap();
    assert_eq!(h.fx.core.snapshot().hc_set(h.fx.cluster), hc.iter().copied().collect());
    let handle = h.scheduler.launch(task_id);
    let runner = h.runner.clone();
    wait_until(|| runner.launched().len() == 1).await;
    assert_eq!(
        h.fx.core.snapshot().hc_set(h.fx.cluster),
        requested.iter().copied().collect()
    );

    h.runner.release();
    assert_eq!(handle.await.unwrap().unwrap(), JobStatus::Success);
    let graph = h.fx.core.snapshot();
    assert_eq!(graph.hc_set(h.fx.cluster), requested.iter().copied().collect());
    assert!(!is_locked(&graph, ObjectRef::Cluster(h.fx.cluster)));

    let inventory = read_inventory(&h.runner.launch_of("scale").inventory_path);
    let children = &inventory["all"]["children"];
    assert!(children["s1.a.add"]["hosts"].get("h3.example.com").is_some());
    assert!(children["s1.a.remove"]["hosts"].get("h2.example.com").is_some());
}

/// The map committed at start is put back when the action fails
#[tokio::test]
async fn test_hc_action_without_hc_apply_restores_on_failure() {
    let h = harness();
    let (hc, _, request) = scale_request(&h);
    h.runner.fail_on("scale");

    let task_id = h.scheduler.run_action(&h.fx.ctx, &request).unwrap();
    assert_eq!(h.scheduler.launch(task_id).await.unwrap().unwrap(), JobStatus::Failed);

    let graph = h.fx.core.snapshot();
    assert_eq!(graph.hc_set(h.fx.cluster), hc.iter().copied().collect());
    assert_eq!(graph.task(task_id).unwrap().status, JobStatus::Failed);
}

// ==================== Ordering Tests ====================

/// Jobs start one after another in position order
#[tokio::test]
async fn test_jobs_run_in_order() {
    let h = harness();
    h.fx.mapped_cluster();

    let request = RunActionRequest::on(ObjectRef::Cluster(h.fx.cluster), h.fx.cluster_action("deploy"));
    let task_id = h.scheduler.run_action(&h.fx.ctx, &request).unwrap();
    assert_eq!(h.scheduler.launch(task_id).await.unwrap().unwrap(), JobStatus::Success);

    assert_eq!(h.runner.launched(), vec!["prepare", "apply", "finish"]);
    assert_eq!(h.runner.max_running(), 1);

    let graph = h.fx.core.snapshot();
    let jobs = graph.jobs_of(task_id);
    let positions: Vec<u32> = jobs.iter().map(|j| j.position).collect();
    assert_eq!(positions, vec![0, 1, 2]);
    for pair in jobs.windows(2) {
        assert!(pair[0].finish_date.unwrap() <= pair[1].start_date.unwrap());
    }
    assert_eq!(graph.cluster(h.fx.cluster).unwrap().common.state, "deployed");

    let launches = h.runner.launches();
    let dirs: Vec<_> = launches.iter().map(|l| l.job_dir.clone()).collect();
    assert_eq!(dirs.len(), 3);
    assert!(dirs.iter().all(|d| d.join("config.json").exists()));
    let manifest = JobManifest::read(&launches[1].config_path).unwrap();
    assert_eq!(manifest.job.job_name, "apply");
    assert_eq!(manifest.job.action, "deploy");
    assert_eq!(manifest.job.hostgroup, "CLUSTER");
    assert_eq!(manifest.job.task_id, task_id);
}

// ==================== Cancellation Tests ====================

/// A terminable job is killed and the task ends aborted
#[tokio::test]
async fn test_cancel_terminates_running_job() {
    let h = harness();
    h.fx.mapped_cluster();
    h.runner.hold("prepare");

    let request = RunActionRequest::on(ObjectRef::Cluster(h.fx.cluster), h.fx.cluster_action("deploy"));
    let task_id = h.scheduler.run_action(&h.fx.ctx, &request).unwrap();
    let handle = h.scheduler.launch(task_id);
    let runner = h.runner.clone();
    wait_until(|| runner.launched().len() == 1).await;

    h.scheduler.cancel_task(&h.fx.ctx, task_id).unwrap();
    assert_eq!(handle.await.unwrap().unwrap(), JobStatus::Aborted);
    assert_eq!(job_statuses(&h, task_id), vec![JobStatus::Aborted; 3]);
    assert_eq!(h.runner.launched(), vec!["prepare"]);

    let graph = h.fx.core.snapshot();
    assert_eq!(graph.cluster(h.fx.cluster).unwrap().common.state, "created");
    assert!(!is_locked(&graph, ObjectRef::Cluster(h.fx.cluster)));
}

/// Cancelling is refused while the running job may not be terminated
#[tokio::test]
async fn test_cancel_refused_for_non_terminable_job() {
    let h = harness();
    h.fx.mapped_cluster();
    h.runner.hold("install");

    let request = RunActionRequest::on(ObjectRef::Cluster(h.fx.cluster), h.fx.cluster_action("install"));
    let task_id = h.scheduler.run_action(&h.fx.ctx, &request).unwrap();
    let handle = h.scheduler.launch(task_id);
    let runner = h.runner.clone();
    wait_until(|| runner.launched().len() == 1).await;

    let err = h.scheduler.cancel_task(&h.fx.ctx, task_id).unwrap_err();
    assert_eq!(err.code(), "TASK_ERROR");
    assert!(!h.fx.core.snapshot().task(task_id).unwrap().cancel_requested);

    h.runner.release();
    assert_eq!(handle.await.unwrap().unwrap(), JobStatus::Success);
}

/// Cancelling a job aborts its task
#[tokio::test]
async fn test_cancel_single_job() {
    let h = harness();
    h.fx.mapped_cluster();
    h.runner.hold("apply");

    let request = RunActionRequest::on(ObjectRef::Cluster(h.fx.cluster), h.fx.cluster_action("deploy"));
    let task_id = h.scheduler.run_action(&h.fx.ctx, &request).unwrap();
    let handle = h.scheduler.launch(task_id);
    let runner = h.runner.clone();
    wait_until(|| runner.launched().len() == 2).await;

    let apply = h.fx.core.snapshot().jobs_of(task_id)[1].id;
    h.scheduler.cancel_job(&h.fx.ctx, apply).unwrap();
    assert_eq!(handle.await.unwrap().unwrap(), JobStatus::Aborted);
    assert_eq!(
        job_statuses(&h, task_id),
        vec![JobStatus::Success, JobStatus::Aborted, JobStatus::Aborted]
    );

    let first = h.fx.core.snapshot().jobs_of(task_id)[0].id;
    let err = h.scheduler.cancel_job(&h.fx.ctx, first).unwrap_err();
    assert_eq!(err.code(), "TASK_ERROR");
}

// ==================== Recovery Tests ====================

/// A task interrupted mid-way resumes from its first unfinished job
#[tokio::test]
async fn test_recover_resumes_unfinished_task() {
    let h = harness();
    h.fx.mapped_cluster();
    let request = RunActionRequest::on(ObjectRef::Cluster(h.fx.cluster), h.fx.cluster_action("deploy"));
    let task_id = h.scheduler.run_action(&h.fx.ctx, &request).unwrap();
    let jobs: Vec<_> = h.fx.core.snapshot().jobs_of(task_id).iter().map(|j| j.id).collect();
    h.fx.core
        .internal(|graph| {
            graph.task_mut(task_id)?.status = JobStatus::Running;
            graph.job_mut(jobs[0])?.status = JobStatus::Success;
            graph.job_mut(jobs[1])?.status = JobStatus::Running;
            Ok(())
        })
        .unwrap();

    let status = h.scheduler.recover(&h.fx.ctx, task_id).await.unwrap();
    assert_eq!(status, JobStatus::Success);
    assert_eq!(h.runner.launched(), vec!["apply", "finish"]);
    assert_eq!(
        h.fx.core.snapshot().cluster(h.fx.cluster).unwrap().common.state,
        "deployed"
    );

    let err = h.scheduler.recover(&h.fx.ctx, task_id).await.unwrap_err();
    assert_eq!(err.code(), "TASK_ERROR");
}

// ==================== Upgrade Tests ====================

/// A scripted upgrade switches the bundle between its jobs
#[tokio::test]
async fn test_scripted_upgrade() {
    let h = harness();
    h.fx.add_hosts_to_cluster(2);
    let cluster = ObjectRef::Cluster(h.fx.cluster);
    let group = h
        .fx
        .core
        .create_config_host_group(&h.fx.ctx, cluster, "fast", "")
        .unwrap();
    h.fx.core
        .add_host_to_config_group(&h.fx.ctx, group, h.fx.hosts[0])
        .unwrap();
    h.fx.core
        .update_group_config(
            &h.fx.ctx,
            group,
            json!({"integer": 40}),
            json!({"group_keys": {"integer": true}}),
            "",
        )
        .unwrap();

    let scripted = h
        .fx
        .core
        .list_upgrades(cluster)
        .unwrap()
        .into_iter()
        .find(|u| u.name == "scripted")
        .unwrap();
    let task_id = h
        .scheduler
        .upgrade(&h.fx.ctx, cluster, scripted.id, RunPayload::default())
        .unwrap()
        .unwrap();
    assert_eq!(h.scheduler.launch(task_id).await.unwrap().unwrap(), JobStatus::Success);
    assert_eq!(h.runner.launched(), vec!["pre", "post"]);

    let graph = h.fx.core.snapshot();
    assert_eq!(graph.bundle_of(cluster).unwrap().version, "2.0");
    assert_eq!(graph.cluster(h.fx.cluster).unwrap().common.state, "upgraded");

    let before = read_inventory(&h.runner.launch_of("pre").inventory_path);
    assert!(before["all"]["children"]["CLUSTER"]["vars"]["cluster"]
        .get("before_upgrade")
        .is_none());

    let after = read_inventory(&h.runner.launch_of("post").inventory_path);
    let h1 = &after["all"]["children"]["CLUSTER"]["hosts"]["h1.example.com"]["cluster"];
    assert_eq!(h1["before_upgrade"]["config"]["integer"], 40);
    assert_eq!(h1["config"]["integer"], 40);
    assert_eq!(after["all"]["children"]["CLUSTER"]["vars"]["cluster"]["config"]["integer"], 10);
}

/// Upgrades without scripts switch at once and create no task
#[tokio::test]
async fn test_plain_upgrade_has_no_task() {
    let h = harness();
    let cluster = ObjectRef::Cluster(h.fx.cluster);
    let plain = h
        .fx
        .core
        .list_upgrades(cluster)
        .unwrap()
        .into_iter()
        .find(|u| u.name == "plain")
        .unwrap();
    let task = h
        .scheduler
        .upgrade(&h.fx.ctx, cluster, plain.id, RunPayload::default())
        .unwrap();
    assert!(task.is_none());
    assert!(h.fx.core.snapshot().tasks.is_empty());
}

// ==================== Maintenance Mode Tests ====================

/// A bundle action carries the maintenance mode switch
#[tokio::test]
async fn test_maintenance_mode_action() {
    let h = harness();
    h.fx.mapped_cluster();
    let s2 = h.fx.add_service("s2");
    let service = ObjectRef::Service(s2);
    h.runner.hold("adcm_turn_on_maintenance_mode");

    let task_id = h
        .scheduler
        .change_maintenance_mode(&h.fx.ctx, service, MaintenanceMode::On)
        .unwrap()
        .unwrap();
    assert_eq!(
        h.fx.core.snapshot().service(s2).unwrap().maintenance_mode,
        MaintenanceMode::Changing
    );
    let handle = h.scheduler.launch(task_id);
    h.runner.release();
    assert_eq!(handle.await.unwrap().unwrap(), JobStatus::Success);
    assert_eq!(
        h.fx.core.snapshot().service(s2).unwrap().maintenance_mode,
        MaintenanceMode::On
    );

    h.runner.fail_on("adcm_turn_off_maintenance_mode");
    let task_id = h
        .scheduler
        .change_maintenance_mode(&h.fx.ctx, service, MaintenanceMode::Off)
        .unwrap()
        .unwrap();
    assert_eq!(h.scheduler.launch(task_id).await.unwrap().unwrap(), JobStatus::Failed);
    assert_eq!(
        h.fx.core.snapshot().service(s2).unwrap().maintenance_mode,
        MaintenanceMode::On
    );
}
