//! Common test utilities for scheduler tests
//!
//! This module provides:
//! - ScriptedRunner: a runner whose jobs succeed, fail or wait on demand
//! - Harness: the sample cluster with a scheduler writing under a temp dir

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use adcm_core::testing::Fixture;
use adcm_persistence::JobStatus;
use adcm_scheduler::{JobControl, JobLaunch, JobRunner, Scheduler};
use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Semaphore;

/// Runner driven by the test instead of by scripts
pub struct ScriptedRunner {
    failing: Mutex<BTreeSet<String>>,
    held: Mutex<BTreeSet<String>>,
    gate: Semaphore,
    launches: Mutex<Vec<JobLaunch>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            failing: Mutex::new(BTreeSet::new()),
            held: Mutex::new(BTreeSet::new()),
            gate: Semaphore::new(0),
            launches: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        })
    }

    /// Jobs named `name` report failure
    pub fn fail_on(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }

    /// Jobs named `name` wait for [`ScriptedRunner::release`] or cancellation
    pub fn hold(&self, name: &str) {
        self.held.lock().insert(name.to_string());
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn launches(&self) -> Vec<JobLaunch> {
        self.launches.lock().clone()
    }

    pub fn launched(&self) -> Vec<String> {
        self.launches.lock().iter().map(|l| l.name.clone()).collect()
    }

    pub fn launch_of(&self, name: &str) -> JobLaunch {
        self.launches()
            .into_iter()
            .find(|l| l.name == name)
            .unwrap_or_else(|| panic!("job {} was not launched", name))
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRunner for ScriptedRunner {
    async fn run(&self, launch: &JobLaunch, mut control: JobControl) -> anyhow::Result<JobStatus> {
        self.launches.lock().push(launch.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        control.report_pid(std::process::id());

        let held = self.held.lock().contains(&launch.name);
        let mut status = JobStatus::Success;
        if held {
            tokio::select! {
                permit = self.gate.acquire() => permit?.forget(),
                _ = control.cancelled() => status = JobStatus::Aborted,
            }
        }
        if status == JobStatus::Success && self.failing.lock().contains(&launch.name) {
            status = JobStatus::Failed;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(status)
    }
}

pub struct Harness {
    pub fx: Fixture,
    pub runner: Arc<ScriptedRunner>,
    pub scheduler: Arc<Scheduler>,
    _dir: TempDir,
}

pub fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let fx = Fixture::in_dir(dir.path());
    let runner = ScriptedRunner::new();
    let scheduler = Arc::new(Scheduler::new(fx.core.clone(), runner.clone()));
    Harness {
        fx,
        runner,
        scheduler,
        _dir: dir,
    }
}

/// Poll `condition` until it holds; panics after five seconds
#[allow(dead_code)]
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
