//! Job-local files under `run/<job_id>/`
//!
//! `config.json` tells the runner and the plugins which job they serve and
//! on whose behalf; `inventory.json` is the host tree. File-typed config
//! parameters of the objects involved are materialised into the file dir.

use std::path::{Path, PathBuf};

use adcm_common::{AdcmError, AdcmPaths, Result, SecretVault};
use adcm_config::{ParamType, render_for_runner, value_at};
use adcm_inventory::{CLUSTER_GROUP, HOST_GROUP, Inventory, TARGET_GROUP};
use adcm_persistence::{
    ClusterId, ComponentId, Graph, HostId, Job, JobId, ObjectKind, ObjectRef, ProviderId,
    ScriptType, ServiceId, Task, TaskId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Object a job runs for, with the ids of its ancestors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobContext {
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<ClusterId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<ServiceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_id: Option<ComponentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<ProviderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<HostId>,
}

impl JobContext {
    pub fn of(graph: &Graph, owner: ObjectRef) -> Result<Self> {
        let mut context = Self {
            kind: owner.kind(),
            cluster_id: None,
            service_id: None,
            component_id: None,
            provider_id: None,
            host_id: None,
        };
        match owner {
            ObjectRef::Cluster(id) => context.cluster_id = Some(id),
            ObjectRef::Service(id) => {
                context.cluster_id = Some(graph.service(id)?.cluster_id);
                context.service_id = Some(id);
            }
            ObjectRef::Component(id) => {
                let component = graph.component(id)?;
                context.cluster_id = Some(component.cluster_id);
                context.service_id = Some(component.service_id);
                context.component_id = Some(id);
            }
            ObjectRef::Provider(id) => context.provider_id = Some(id),
            ObjectRef::Host(id) => {
                context.provider_id = Some(graph.host(id)?.provider_id);
                context.host_id = Some(id);
            }
        }
        Ok(context)
    }

    /// The object the context was built for
    pub fn owner(&self) -> Option<ObjectRef> {
        match self.kind {
            ObjectKind::Cluster => self.cluster_id.map(ObjectRef::Cluster),
            ObjectKind::Service => self.service_id.map(ObjectRef::Service),
            ObjectKind::Component => self.component_id.map(ObjectRef::Component),
            ObjectKind::Provider => self.provider_id.map(ObjectRef::Provider),
            ObjectKind::Host => self.host_id.map(ObjectRef::Host),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobEnv {
    pub run_dir: PathBuf,
    pub stack_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub file_dir: PathBuf,
    pub data_dir: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobSection {
    pub id: JobId,
    pub task_id: TaskId,
    pub action: String,
    pub job_name: String,
    pub script: String,
    pub script_type: ScriptType,
    #[serde(default)]
    pub params: Value,
    pub verbose: bool,
    /// Inventory group the script targets
    pub hostgroup: String,
    /// Action config with secrets revealed
    #[serde(default)]
    pub config: Value,
}

/// Content of `config.json`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobManifest {
    pub context: JobContext,
    pub env: JobEnv,
    pub job: JobSection,
}

impl JobManifest {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn hostgroup(graph: &Graph, task: &Task) -> String {
    if task.action_host_group.is_some() || !task.hosts.is_empty() {
        return TARGET_GROUP.to_string();
    }
    match task.owner {
        ObjectRef::Cluster(_) => CLUSTER_GROUP.to_string(),
        ObjectRef::Service(_) => graph.prototype_name(task.owner),
        ObjectRef::Component(id) => match graph.component(id) {
            Ok(component) => format!(
                "{}.{}",
                graph.prototype_name(ObjectRef::Service(component.service_id)),
                graph.prototype_name(task.owner)
            ),
            Err(_) => graph.prototype_name(task.owner),
        },
        ObjectRef::Provider(_) | ObjectRef::Host(_) => HOST_GROUP.to_string(),
    }
}

/// Build `config.json` for one job of `task`
pub fn job_manifest(
    graph: &Graph,
    vault: &SecretVault,
    paths: &AdcmPaths,
    task: &Task,
    job: &Job,
) -> Result<JobManifest> {
    let action = graph.action(task.action_id)?;
    let bundle = graph.bundle(graph.prototype(action.prototype_id)?.bundle_id)?;
    let config = match &task.config {
        Some(config) => render_for_runner(&action.config, config, &task.attr, vault)?,
        None => Value::Null,
    };
    Ok(JobManifest {
        context: JobContext::of(graph, task.owner)?,
        env: JobEnv {
            run_dir: paths.run_dir.clone(),
            stack_dir: paths.bundle_path(&bundle.hash),
            tmp_dir: paths.tmp_dir.clone(),
            file_dir: paths.file_dir.clone(),
            data_dir: paths.task_data_dir(task.id.value()),
        },
        job: JobSection {
            id: job.id,
            task_id: task.id,
            action: action.name.clone(),
            job_name: job.name.clone(),
            script: job.script.clone(),
            script_type: job.script_type,
            params: job.params.clone(),
            verbose: task.verbose,
            hostgroup: hostgroup(graph, task),
            config,
        },
    })
}

/// Objects whose file parameters the job may read
fn objects_in_scope(graph: &Graph, owner: ObjectRef) -> Vec<ObjectRef> {
    let mut objects = Vec::new();
    if let Some(cluster) = graph.cluster_of(owner) {
        objects.push(ObjectRef::Cluster(cluster));
        for service in graph.services_of(cluster) {
            objects.push(ObjectRef::Service(service.id));
            objects.extend(graph.components_of(service.id).iter().map(|c| ObjectRef::Component(c.id)));
        }
        objects.extend(graph.hosts_of_cluster(cluster).iter().map(|h| ObjectRef::Host(h.id)));
    }
    let provider = match owner {
        ObjectRef::Provider(id) => Some(id),
        ObjectRef::Host(id) => graph.host(id).ok().map(|h| h.provider_id),
        _ => None,
    };
    if let Some(provider) = provider {
        objects.push(ObjectRef::Provider(provider));
        for host in graph.hosts_of_provider(provider) {
            if !objects.contains(&ObjectRef::Host(host.id)) {
                objects.push(ObjectRef::Host(host.id));
            }
        }
    }
    objects
}

/// Write file and secretfile values as `<kind>.<id>.<group>.<name>` under the file dir
pub fn materialize_files(graph: &Graph, vault: &SecretVault, paths: &AdcmPaths, owner: ObjectRef) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    std::fs::create_dir_all(&paths.file_dir).map_err(|e| io_error(&paths.file_dir, e))?;
    for object in objects_in_scope(graph, owner) {
        let Some(log) = graph.current_config_of(object)? else {
            continue;
        };
        let spec = &graph.prototype_of(object)?.config;
        let files: Vec<_> = spec
            .leaves()
            .into_iter()
            .filter(|(_, p)| matches!(p.param_type, ParamType::File | ParamType::Secretfile))
            .collect();
        if files.is_empty() {
            continue;
        }
        let rendered = render_for_runner(spec, &log.config, &log.attr, vault)?;
        for (path, _) in files {
            let Some(Value::String(content)) = value_at(&rendered, &path) else {
                continue;
            };
            let (group, name) = path.split_once('/').unwrap_or(("", path.as_str()));
            let file = paths
                .file_dir
                .join(format!("{}.{}.{}.{}", object.kind(), object.id(), group, name));
            std::fs::write(&file, content).map_err(|e| io_error(&file, e))?;
            written.push(file);
        }
    }
    Ok(written)
}

fn io_error(path: &Path, e: std::io::Error) -> AdcmError {
    AdcmError::Runner(format!("{}: {}", path.display(), e))
}

/// Write `config.json` and `inventory.json` into the job directory
pub async fn write_job_files(
    paths: &AdcmPaths,
    manifest: &JobManifest,
    inventory: &Inventory,
) -> Result<(PathBuf, PathBuf)> {
    let job_id = manifest.job.id.value();
    let dir = paths.job_dir(job_id);
    tokio::fs::create_dir_all(&dir).await.map_err(|e| io_error(&dir, e))?;
    let data_dir = &manifest.env.data_dir;
    tokio::fs::create_dir_all(data_dir).await.map_err(|e| io_error(data_dir, e))?;

    let config_path = paths.job_config(job_id);
    let config = serde_json::to_vec_pretty(manifest).map_err(|e| AdcmError::Unhandled(e.to_string()))?;
    tokio::fs::write(&config_path, config).await.map_err(|e| io_error(&config_path, e))?;

    let inventory_path = paths.job_inventory(job_id);
    let text = inventory.to_json().map_err(|e| AdcmError::Unhandled(e.to_string()))?;
    tokio::fs::write(&inventory_path, text).await.map_err(|e| io_error(&inventory_path, e))?;
    debug!(job_id, dir = %dir.display(), "Job files written");
    Ok((config_path, inventory_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use adcm_core::testing::Fixture;
    use serde_json::json;

    #[test]
    fn test_context_of_component() {
        let fx = Fixture::new();
        let (s1, _) = fx.mapped_cluster();
        let a = fx.component(s1, "a");
        let graph = fx.core.snapshot();
        let context = JobContext::of(&graph, ObjectRef::Component(a)).unwrap();
        assert_eq!(context.cluster_id, Some(fx.cluster));
        assert_eq!(context.service_id, Some(s1));
        assert_eq!(context.owner(), Some(ObjectRef::Component(a)));

        let value = serde_json::to_value(context).unwrap();
        assert_eq!(value["type"], "component");
        assert!(value.get("host_id").is_none());
    }

    #[test]
    fn test_context_round_trips_through_json() {
        let context: JobContext = serde_json::from_value(json!({"type": "host", "provider_id": 1, "host_id": 4})).unwrap();
        assert_eq!(context.owner(), Some(ObjectRef::Host(HostId(4))));
        assert_eq!(context.cluster_id, None);
    }
}
