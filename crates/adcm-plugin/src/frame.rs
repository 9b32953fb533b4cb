//! Execution frame shared by every plugin call
//!
//! A call locks the job's `config.json`, reads the job manifest, checks the
//! job is still running and hands the plugin a [`PluginCall`] whose
//! operations carry the task as origin. Runtime failures leave the frame as
//! `PluginRuntime` errors; domain errors keep their own code.

use std::path::Path;

use adcm_common::{AdcmError, AuditRecord, AuditResult, Principal, Result, ensure};
use adcm_core::{AdcmCore, OpContext, Origin};
use adcm_persistence::{ClusterId, Graph, JobId, JobStatus, TaskId};
use adcm_scheduler::{JobContext, JobManifest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::PluginRegistry;
use crate::lock::JobFileLock;

/// What a plugin reports back to the playbook
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PluginOutcome {
    pub changed: bool,
    pub value: Value,
}

/// The job a plugin runs for
pub struct PluginCall<'a> {
    pub core: &'a AdcmCore,
    pub ctx: OpContext,
    pub task_id: TaskId,
    pub job_id: JobId,
    pub context: JobContext,
}

impl PluginCall<'_> {
    pub fn origin(&self) -> Origin {
        self.ctx.origin
    }

    pub fn cluster(&self) -> Result<ClusterId> {
        self.context
            .cluster_id
            .ok_or_else(|| AdcmError::not_found("cluster", "in job context"))
    }

    /// Audited mutation on behalf of the task
    pub fn transaction<T>(
        &self,
        operation: &str,
        object: Option<String>,
        f: impl FnOnce(&mut Graph) -> Result<T>,
    ) -> Result<T> {
        self.core.transaction(&self.ctx, operation, object, f)
    }
}

pub struct PluginExecutor {
    core: AdcmCore,
    registry: PluginRegistry,
}

impl PluginExecutor {
    /// Executor with every built-in plugin registered
    pub fn new(core: AdcmCore) -> Self {
        Self::with_registry(core, PluginRegistry::with_builtin())
    }

    pub fn with_registry(core: AdcmCore, registry: PluginRegistry) -> Self {
        Self { core, registry }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Run `plugin` for the job whose manifest is at `config_path`
    pub fn execute(&self, config_path: &Path, plugin: &str, args: Value) -> Result<PluginOutcome> {
        let mut actor = Principal::system();
        let result = self
            .execute_locked(config_path, plugin, args, &mut actor)
            .map_err(|e| into_plugin_error(plugin, e));
        match &result {
            Ok(outcome) => info!(plugin, changed = outcome.changed, "Plugin finished"),
            Err(AdcmError::PluginRuntime { cause, .. }) => {
                warn!(plugin, cause = %cause, "Plugin crashed");
                self.core.audit().record(
                    AuditRecord::new(plugin, None, AuditResult::Fail, &actor).with_detail(cause.clone()),
                );
            }
            Err(e) => warn!(plugin, code = %e.code(), error = %e, "Plugin failed"),
        }
        result
    }

    fn execute_locked(
        &self,
        config_path: &Path,
        plugin: &str,
        args: Value,
        actor: &mut Principal,
    ) -> Result<PluginOutcome> {
        let entry = self
            .registry
            .get(plugin)
            .ok_or_else(|| AdcmError::Validation(format!("unknown plugin {}", plugin)))?;

        let _lock = JobFileLock::acquire(config_path).map_err(|e| {
            AdcmError::Unhandled(format!("cannot lock {}: {}", config_path.display(), e))
        })?;
        let manifest = JobManifest::read(config_path).map_err(|e| {
            AdcmError::Unhandled(format!("cannot read {}: {}", config_path.display(), e))
        })?;

        let (task_id, job_id) = (manifest.job.task_id, manifest.job.id);
        {
            let graph = self.core.snapshot();
            let job = graph.job(job_id)?;
            ensure!(
                job.status == JobStatus::Running,
                AdcmError::Task(format!("job {} is {}, not running", job_id, job.status))
            );
            *actor = Principal::new(graph.task(task_id)?.actor.clone());
        }

        let call = PluginCall {
            core: &self.core,
            ctx: OpContext::task(task_id, actor.clone()),
            task_id,
            job_id,
            context: manifest.context,
        };
        info!(plugin, task_id = %task_id, job_id = %job_id, "Running plugin");
        entry.run(&call, args)
    }
}

/// Errors a plugin cannot explain in domain terms become `PluginRuntime`
pub fn into_plugin_error(plugin: &str, error: AdcmError) -> AdcmError {
    match error {
        AdcmError::Unhandled(cause) | AdcmError::Storage(cause) | AdcmError::Runner(cause) => {
            AdcmError::PluginRuntime {
                plugin: plugin.to_string(),
                cause,
            }
        }
        other => other,
    }
}
