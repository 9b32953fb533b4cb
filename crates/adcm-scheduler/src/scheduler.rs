//! Task execution
//!
//! One cooperative loop per task dispatches its jobs strictly in order.
//! Job status changes are committed through the engine, so the lock concern
//! of a task appears with its creation and disappears in the same commit
//! that records its terminal status.

use std::sync::Arc;

use adcm_common::{AdcmError, AuditRecord, AuditResult, Principal, Result, ensure};
use adcm_core::hostcomponent::commit;
use adcm_core::maintenance::finish_transition;
use adcm_core::{AdcmCore, MaintenanceModeOutcome, OpContext, UpgradeOutcome};
use adcm_inventory::build_inventory;
use adcm_persistence::{
    Graph, InternalScript, Job, JobId, JobStatus, MaintenanceMode, ObjectRef, ScriptType,
    StateChanges, Task, TaskId, UpgradeId,
};
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::internal::{commit_requested_hc, commits_hc_on_start, run_internal};
use crate::manifest::{job_manifest, materialize_files, write_job_files};
use crate::metrics;
use crate::prepare::{TaskOrigin, prepare_task};
use crate::request::{RunActionRequest, RunPayload, RunTarget};
use crate::runner::{JobControl, JobLaunch, JobRunner};

fn apply_changes(graph: &mut Graph, object: ObjectRef, changes: &StateChanges) -> Result<()> {
    if changes.is_empty() || !graph.exists(object) {
        return Ok(());
    }
    let common = graph.object_mut(object)?.common_mut();
    changes.apply_to(&mut common.state, &mut common.multi_state);
    Ok(())
}

/// Record the terminal status of a task and its side effects
///
/// Unfinished jobs become `Aborted`, except `failed_job` which takes
/// `outcome`. Success commits the pending state changes and the action's
/// `on_success`; failure applies the failed job's `on_fail`. Failure and
/// abort restore the submission-time host-component map when the action
/// asks for it.
pub fn settle_task(graph: &mut Graph, task_id: TaskId, outcome: JobStatus, failed_job: Option<JobId>) -> Result<()> {
    let task = graph.task(task_id)?.clone();
    ensure!(
        task.status.can_transition_to(outcome),
        AdcmError::Task(format!("task {} can not move from {} to {}", task_id, task.status, outcome))
    );
    let action = graph.action(task.action_id)?.clone();
    let now = Utc::now();

    let unfinished: Vec<JobId> = graph
        .jobs_of(task_id)
        .iter()
        .filter(|j| !j.status.is_terminal())
        .map(|j| j.id)
        .collect();
    for id in unfinished {
        let job = graph.job_mut(id)?;
        job.status = if Some(id) == failed_job {
            outcome
        } else {
            JobStatus::Aborted
        };
        job.finish_date = Some(now);
    }

    match outcome {
        JobStatus::Success => {
            let mut changes = task.pending.clone();
            changes.merge(&action.on_success);
            apply_changes(graph, task.owner, &changes)?;
        }
        _ => {
            if outcome == JobStatus::Failed {
                if let Some(job) = failed_job {
                    let on_fail = graph.job(job)?.on_fail();
                    apply_changes(graph, task.owner, &on_fail)?;
                }
            }
            if action.changes_hostcomponent() && action.restore_hc_on_fail && task.hostcomponent.is_some() {
                if let Some(cluster) = graph.cluster_of(task.owner) {
                    let delta = commit(graph, cluster, task.hostcomponent_snapshot.iter().copied().collect());
                    if !delta.is_empty() {
                        info!(task_id = %task_id, cluster_id = %cluster, "Host-component map restored");
                    }
                }
            }
        }
    }

    if let Some(transition) = &task.maintenance_mode {
        finish_transition(graph, transition, outcome == JobStatus::Success)?;
    }

    let task = graph.task_mut(task_id)?;
    task.status = outcome;
    task.finish_date = Some(now);
    Ok(())
}

fn running_job(graph: &Graph, task_id: TaskId) -> Option<&Job> {
    graph
        .jobs_of(task_id)
        .into_iter()
        .find(|j| j.status == JobStatus::Running)
}

/// Action scheduler
///
/// Requests are turned into tasks inside one engine transaction; tasks are
/// then driven by [`Scheduler::execute_task`], usually on a spawned loop.
pub struct Scheduler {
    core: AdcmCore,
    runner: Arc<dyn JobRunner>,
    /// Cancellation channels of the tasks driven by this process
    cancels: DashMap<TaskId, watch::Sender<bool>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("core", &self.core)
            .field("driven_tasks", &self.cancels.len())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(core: AdcmCore, runner: Arc<dyn JobRunner>) -> Self {
        Self {
            core,
            runner,
            cancels: DashMap::new(),
        }
    }

    pub fn core(&self) -> &AdcmCore {
        &self.core
    }

    fn submit(&self, ctx: &OpContext, request: &RunActionRequest, task_origin: TaskOrigin) -> Result<TaskId> {
        let vault = self.core.vault();
        let origin = ctx.origin;
        let actor = ctx.actor.name.clone();
        let object = match request.target {
            RunTarget::Object { object } => object.to_string(),
            RunTarget::ActionHostGroup { group } => format!("action host group {}", group),
        };
        let task_id = self.core.transaction(ctx, "run_action", Some(object), |graph| {
            prepare_task(graph, vault, request, task_origin, origin, &actor)
        })?;
        info!(task_id = %task_id, action_id = %request.action_id, actor = %ctx.actor.name, "Task created");
        Ok(task_id)
    }

    /// Create a task for `request`; the task is locked but not started
    pub fn run_action(&self, ctx: &OpContext, request: &RunActionRequest) -> Result<TaskId> {
        self.submit(ctx, request, TaskOrigin::default())
    }

    /// Upgrade `object`; returns the task when the upgrade runs scripts
    pub fn upgrade(
        &self,
        ctx: &OpContext,
        object: ObjectRef,
        upgrade: UpgradeId,
        payload: RunPayload,
    ) -> Result<Option<TaskId>> {
        match self.core.upgrade(ctx, object, upgrade)? {
            UpgradeOutcome::Switched => Ok(None),
            UpgradeOutcome::ActionRequired { action, upgrade } => {
                let request = RunActionRequest::on(object, action).with_payload(payload);
                let task_origin = TaskOrigin {
                    upgrade: Some(upgrade),
                    maintenance_mode: None,
                };
                self.submit(ctx, &request, task_origin).map(Some)
            }
        }
    }

    /// Switch maintenance mode; returns the task when a bundle action performs the switch
    pub fn change_maintenance_mode(
        &self,
        ctx: &OpContext,
        object: ObjectRef,
        target: MaintenanceMode,
    ) -> Result<Option<TaskId>> {
        match self.core.change_maintenance_mode(ctx, object, target)? {
            MaintenanceModeOutcome::Applied { .. } => Ok(None),
            MaintenanceModeOutcome::ActionRequired { action, transition } => {
                let request = RunActionRequest::on(object, action);
                let task_origin = TaskOrigin {
                    upgrade: None,
                    maintenance_mode: Some(transition),
                };
                self.submit(ctx, &request, task_origin).map(Some)
            }
        }
    }

    fn subscribe(&self, task_id: TaskId) -> watch::Receiver<bool> {
        self.cancels
            .entry(task_id)
            .or_insert_with(|| watch::channel(false).0)
            .subscribe()
    }

    /// Drive `task_id` on a spawned loop
    pub fn launch(self: &Arc<Self>, task_id: TaskId) -> JoinHandle<Result<JobStatus>> {
        self.subscribe(task_id);
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let result = scheduler.execute_task(task_id).await;
            if let Err(e) = &result {
                error!(task_id = %task_id, error = %e, "Task loop stopped");
            }
            result
        })
    }

    /// Run the jobs of a task in order until it reaches a terminal status
    ///
    /// A task found `Running` is resumed: finished jobs are skipped and the
    /// job that was running is started again.
    pub async fn execute_task(&self, task_id: TaskId) -> Result<JobStatus> {
        let cancel = self.subscribe(task_id);
        let result = self.drive(task_id, cancel).await;
        self.cancels.remove(&task_id);
        result
    }

    async fn drive(&self, task_id: TaskId, cancel: watch::Receiver<bool>) -> Result<JobStatus> {
        let resumed = self.core.internal(|graph| {
            let task = graph.task_mut(task_id)?;
            match task.status {
                JobStatus::Created => {
                    task.status = JobStatus::Running;
                    task.start_date = Some(Utc::now());
                    Ok(false)
                }
                JobStatus::Running => Ok(true),
                status => Err(AdcmError::Task(format!("task {} is already {}", task_id, status))),
            }
        })?;
        info!(task_id = %task_id, resumed, "Task started");

        let mut outcome = JobStatus::Success;
        let mut failed_job = None;
        if !resumed {
            let committed = self.core.internal(|graph| {
                let task = graph.task(task_id)?.clone();
                if commits_hc_on_start(graph, &task) {
                    commit_requested_hc(graph, task_id)?;
                }
                Ok(())
            });
            if let Err(e) = committed {
                error!(task_id = %task_id, error = %e, "Host-component map could not be applied");
                outcome = JobStatus::Failed;
            }
        }

        let jobs: Vec<JobId> = if outcome == JobStatus::Success {
            self.core.snapshot().jobs_of(task_id).iter().map(|j| j.id).collect()
        } else {
            Vec::new()
        };
        for job_id in jobs {
            let graph = self.core.snapshot();
            let job = graph.job(job_id)?;
            match job.status {
                JobStatus::Success => continue,
                JobStatus::Failed | JobStatus::Aborted => {
                    outcome = job.status;
                    failed_job = Some(job_id);
                    break;
                }
                JobStatus::Created | JobStatus::Running => {}
            }
            if graph.task(task_id)?.cancel_requested {
                outcome = JobStatus::Aborted;
                break;
            }
            let status = self.run_job(task_id, job_id, cancel.clone()).await;
            if status != JobStatus::Success {
                outcome = status;
                failed_job = Some(job_id);
                break;
            }
        }

        let task = self.finish(task_id, outcome, failed_job)?;
        info!(task_id = %task_id, status = %outcome, "Task finished");
        self.audit_finish(&task, outcome);
        Ok(outcome)
    }

    fn finish(&self, task_id: TaskId, outcome: JobStatus, failed_job: Option<JobId>) -> Result<Task> {
        let task = self.core.internal(|graph| {
            settle_task(graph, task_id, outcome, failed_job)?;
            Ok(graph.task(task_id)?.clone())
        })?;
        metrics::record_task_finished(outcome);
        Ok(task)
    }

    fn audit_finish(&self, task: &Task, outcome: JobStatus) {
        let result = if outcome == JobStatus::Success {
            AuditResult::Success
        } else {
            AuditResult::Fail
        };
        let graph = self.core.snapshot();
        let action = graph
            .action(task.action_id)
            .map(|a| a.display_name.clone())
            .unwrap_or_default();
        self.core.audit().record(
            AuditRecord::new("task_finished", Some(task.owner.to_string()), result, &Principal::new(task.actor.clone()))
                .with_detail(format!("task {} {} {}", task.id, action, outcome)),
        );
    }

    /// Run one job; errors are logged and reported as `Failed`
    async fn run_job(&self, task_id: TaskId, job_id: JobId, cancel: watch::Receiver<bool>) -> JobStatus {
        match self.try_run_job(task_id, job_id, cancel).await {
            Ok(status) => status,
            Err(e) => {
                error!(task_id = %task_id, job_id = %job_id, error = %e, "Job failed to run");
                JobStatus::Failed
            }
        }
    }

    async fn try_run_job(&self, task_id: TaskId, job_id: JobId, cancel: watch::Receiver<bool>) -> Result<JobStatus> {
        self.core.internal(|graph| {
            let job = graph.job_mut(job_id)?;
            if job.status == JobStatus::Created {
                job.status = JobStatus::Running;
                job.start_date = Some(Utc::now());
            }
            job.pid = None;
            Ok(())
        })?;
        metrics::record_job_started();

        let graph = self.core.snapshot();
        let task = graph.task(task_id)?;
        let job = graph.job(job_id)?;
        info!(task_id = %task_id, job_id = %job_id, job = %job.name, position = job.position, "Job started");

        let status = match job.script_type {
            ScriptType::Internal => {
                let script = InternalScript::parse(&job.script)
                    .ok_or_else(|| AdcmError::Task(format!("unknown internal script {}", job.script)))?;
                let vault = self.core.vault();
                self.core.internal(|graph| run_internal(graph, vault, task_id, script))?;
                JobStatus::Success
            }
            ScriptType::Ansible | ScriptType::Python => {
                let launch = self.prepare_launch(&graph, task, job).await?;
                let core = self.core.clone();
                let record_pid = Arc::new(move |pid: u32| {
                    let stored = core.internal(|graph| {
                        graph.job_mut(job_id)?.pid = Some(pid);
                        Ok(())
                    });
                    if let Err(e) = stored {
                        warn!(job_id = %job_id, pid, error = %e, "Failed to record runner pid");
                    }
                });
                let control = JobControl::new(cancel, record_pid);
                match self.runner.run(&launch, control).await {
                    Ok(status) if status.is_terminal() => status,
                    Ok(status) => {
                        warn!(job_id = %job_id, status = %status, "Runner returned a non-terminal status");
                        JobStatus::Failed
                    }
                    Err(e) => return Err(AdcmError::Runner(format!("{:#}", e))),
                }
            }
        };

        if status == JobStatus::Success {
            self.core.internal(|graph| {
                let job = graph.job_mut(job_id)?;
                job.status = JobStatus::Success;
                job.finish_date = Some(Utc::now());
                Ok(())
            })?;
        }
        debug!(task_id = %task_id, job_id = %job_id, status = %status, "Job ended");
        Ok(status)
    }

    async fn prepare_launch(&self, graph: &Graph, task: &Task, job: &Job) -> Result<JobLaunch> {
        let vault = self.core.vault();
        let paths = self.core.paths();
        let inventory = build_inventory(graph, vault, task)?;
        let manifest = job_manifest(graph, vault, paths, task, job)?;
        materialize_files(graph, vault, paths, task.owner)?;
        let (config_path, inventory_path) = write_job_files(paths, &manifest, &inventory).await?;
        Ok(JobLaunch {
            task_id: task.id,
            job_id: job.id,
            name: job.name.clone(),
            script: job.script.clone(),
            script_type: job.script_type,
            params: job.params.clone(),
            verbose: task.verbose,
            job_dir: paths.job_dir(job.id.value()),
            config_path,
            inventory_path,
            bundle_dir: manifest.env.stack_dir,
        })
    }

    /// Request cancellation of a task
    ///
    /// Refused while the running job does not allow termination. A task no
    /// loop of this process drives is aborted at once; otherwise the loop
    /// stops at the next job boundary or kills the running job.
    pub fn cancel_task(&self, ctx: &OpContext, task_id: TaskId) -> Result<()> {
        let settled = self.core.transaction(ctx, "cancel_task", Some(format!("task {}", task_id)), |graph| {
            let task = graph.task(task_id)?;
            ensure!(
                !task.status.is_terminal(),
                AdcmError::Task(format!("task {} is already {}", task_id, task.status))
            );
            if let Some(job) = running_job(graph, task_id) {
                ensure!(
                    job.allow_to_terminate,
                    AdcmError::Task(format!("job {} of task {} can not be terminated", job.name, task_id))
                );
            }
            graph.task_mut(task_id)?.cancel_requested = true;
            if self.cancels.contains_key(&task_id) {
                return Ok(None);
            }
            settle_task(graph, task_id, JobStatus::Aborted, None)?;
            Ok(Some(graph.task(task_id)?.clone()))
        })?;

        match settled {
            Some(task) => {
                metrics::record_task_finished(JobStatus::Aborted);
                info!(task_id = %task_id, "Task aborted before it started");
                self.audit_finish(&task, JobStatus::Aborted);
            }
            None => {
                if let Some(sender) = self.cancels.get(&task_id) {
                    sender.send_replace(true);
                }
                info!(task_id = %task_id, "Task cancellation requested");
            }
        }
        Ok(())
    }

    /// Cancel the task of `job_id` under the same rule as [`Scheduler::cancel_task`]
    pub fn cancel_job(&self, ctx: &OpContext, job_id: JobId) -> Result<()> {
        let task_id = {
            let graph = self.core.snapshot();
            let job = graph.job(job_id)?;
            ensure!(
                !job.status.is_terminal(),
                AdcmError::Task(format!("job {} is already {}", job_id, job.status))
            );
            job.task_id
        };
        self.cancel_task(ctx, task_id)
    }

    /// Resume a task left unfinished, e.g. after a restart
    pub async fn recover(&self, ctx: &OpContext, task_id: TaskId) -> Result<JobStatus> {
        self.core.authorize(ctx, "run_task", Some(&format!("task {}", task_id)))?;
        {
            let graph = self.core.snapshot();
            let task = graph.task(task_id)?;
            ensure!(
                !task.status.is_terminal(),
                AdcmError::Task(format!("task {} is already {} and can not be run again", task_id, task.status))
            );
        }
        warn!(task_id = %task_id, "Recovering task");
        self.execute_task(task_id).await
    }
}
