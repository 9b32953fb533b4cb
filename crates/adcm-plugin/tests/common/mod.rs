//! Common test utilities for plugin tests
//!
//! This module provides:
//! - PluginRunner: a runner whose jobs call plugins in-process
//! - Harness: the mapped sample cluster with a scheduler writing under a temp dir

use std::collections::BTreeMap;
use std::sync::Arc;

use adcm_common::Result;
use adcm_core::AdcmCore;
use adcm_core::testing::Fixture;
use adcm_persistence::{JobStatus, ObjectRef, TaskId};
use adcm_plugin::{PluginExecutor, PluginOutcome};
use adcm_scheduler::{JobControl, JobLaunch, JobRunner, RunActionRequest, Scheduler};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;

/// Runner that plays plugin calls instead of playbooks; a failed call fails the job
pub struct PluginRunner {
    executor: PluginExecutor,
    calls: Mutex<BTreeMap<String, Vec<(String, Value)>>>,
    results: Mutex<Vec<(String, Result<PluginOutcome>)>>,
}

#[allow(dead_code)]
impl PluginRunner {
    pub fn new(core: AdcmCore) -> Arc<Self> {
        Arc::new(Self {
            executor: PluginExecutor::new(core),
            calls: Mutex::new(BTreeMap::new()),
            results: Mutex::new(Vec::new()),
        })
    }

    /// Jobs named `job` call `plugin` with `args`
    pub fn on(&self, job: &str, plugin: &str, args: Value) {
        self.calls
            .lock()
            .entry(job.to_string())
            .or_default()
            .push((plugin.to_string(), args));
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn take_results(&self) -> Vec<(String, Result<PluginOutcome>)> {
        std::mem::take(&mut *self.results.lock())
    }

    pub fn executor(&self) -> &PluginExecutor {
        &self.executor
    }
}

#[async_trait]
impl JobRunner for PluginRunner {
    async fn run(&self, launch: &JobLaunch, _control: JobControl) -> anyhow::Result<JobStatus> {
        let calls = self.calls.lock().get(&launch.name).cloned().unwrap_or_default();
        for (plugin, args) in calls {
            let result = self.executor.execute(&launch.config_path, &plugin, args);
            let failed = result.is_err();
            self.results.lock().push((plugin, result));
            if failed {
                return Ok(JobStatus::Failed);
            }
        }
        Ok(JobStatus::Success)
    }
}

pub struct Harness {
    pub fx: Fixture,
    pub runner: Arc<PluginRunner>,
    pub scheduler: Arc<Scheduler>,
    _dir: TempDir,
}

#[allow(dead_code)]
impl Harness {
    /// Run `action` of `object` to the end
    pub async fn run(&self, object: ObjectRef, action: &str) -> (TaskId, JobStatus) {
        let action = self.fx.action(object, action);
        let task = self
            .scheduler
            .run_action(&self.fx.ctx, &RunActionRequest::on(object, action))
            .unwrap();
        let status = self.scheduler.execute_task(task).await.unwrap();
        (task, status)
    }

    /// Run `probe` on the cluster
    pub async fn probe(&self) -> (TaskId, JobStatus) {
        self.run(ObjectRef::Cluster(self.fx.cluster), "probe").await
    }
}

/// `c1` with `s1` mapped onto h1 and h2; h3 stays outside the cluster
pub fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let fx = Fixture::in_dir(dir.path());
    fx.mapped_cluster();
    let runner = PluginRunner::new(fx.core.clone());
    let scheduler = Arc::new(Scheduler::new(fx.core.clone(), runner.clone()));
    Harness {
        fx,
        runner,
        scheduler,
        _dir: dir,
    }
}
