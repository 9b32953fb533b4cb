use adcm_common::{AdcmError, Result, ensure};
use adcm_core::HcDelta;
use adcm_core::hostcomponent::{commit, plan};
use adcm_persistence::{ClusterId, Graph, HcEntry, ObjectRef};
use serde::Deserialize;
use tracing::info;

use crate::{AnsiblePlugin, PluginCall, PluginResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HcAction {
    Add,
    Remove,
}

/// One edge change, named the way playbooks know the objects
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HcOperation {
    pub action: HcAction,
    pub service: String,
    pub component: String,
    pub host: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HcArgs {
    pub operations: Vec<HcOperation>,
}

/// `adcm_hc`: edit the host-component map of the job's cluster
pub struct HostComponentPlugin;

impl AnsiblePlugin for HostComponentPlugin {
    type Args = HcArgs;
    type Value = HcDelta;

    fn name(&self) -> &'static str {
        "adcm_hc"
    }

    fn execute(
        &self,
        call: &PluginCall<'_>,
        _targets: &[ObjectRef],
        args: HcArgs,
    ) -> Result<PluginResult<HcDelta>> {
        ensure!(
            !args.operations.is_empty(),
            AdcmError::Validation("adcm_hc needs at least one operation".to_string())
        );
        let cluster = call.cluster()?;
        let origin = call.origin();
        let delta = call.transaction(
            "set_hostcomponent",
            Some(ObjectRef::Cluster(cluster).to_string()),
            |graph| {
                let mut desired = graph.hc_set(cluster);
                for operation in &args.operations {
                    let entry = lookup(graph, cluster, operation)?;
                    match operation.action {
                        HcAction::Add => ensure!(
                            desired.insert(entry),
                            AdcmError::InvalidHc(format!("{} is already mapped", entry))
                        ),
                        HcAction::Remove => ensure!(
                            desired.remove(&entry),
                            AdcmError::InvalidHc(format!("{} is not mapped", entry))
                        ),
                    }
                }
                let desired: Vec<HcEntry> = desired.into_iter().collect();
                let (desired, _) = plan(graph, cluster, &desired, origin)?;
                Ok(commit(graph, cluster, desired))
            },
        )?;
        info!(
            cluster_id = %cluster,
            added = delta.add.len(),
            removed = delta.remove.len(),
            "Host-component map changed by playbook"
        );
        Ok(PluginResult::new(!delta.is_empty(), delta))
    }
}

fn lookup(graph: &Graph, cluster: ClusterId, operation: &HcOperation) -> Result<HcEntry> {
    let service = graph
        .service_by_name(cluster, &operation.service)
        .ok_or_else(|| AdcmError::not_found("service", &operation.service))?;
    let component = graph
        .component_by_name(service.id, &operation.component)
        .ok_or_else(|| AdcmError::not_found("component", &operation.component))?;
    let host = graph
        .host_by_fqdn(&operation.host)
        .ok_or_else(|| AdcmError::not_found("host", &operation.host))?;
    Ok(HcEntry::new(service.id, component.id, host.id))
}
