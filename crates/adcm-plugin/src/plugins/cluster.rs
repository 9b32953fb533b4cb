use adcm_common::{AdcmError, Result};
use adcm_core::objects::{add_host_to_cluster, delete_service, remove_host_from_cluster};
use adcm_persistence::{Graph, HostId, ObjectRef, ServiceId};
use serde::Deserialize;

use crate::{AnsiblePlugin, PluginCall, PluginResult};

/// A host named by `fqdn` or by `host_id`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostArgs {
    #[serde(default)]
    pub fqdn: Option<String>,
    #[serde(default)]
    pub host_id: Option<HostId>,
}

impl HostArgs {
    fn find(&self, graph: &Graph) -> Result<HostId> {
        match (&self.fqdn, self.host_id) {
            (_, Some(id)) => Ok(graph.host(id)?.id),
            (Some(fqdn), None) => graph
                .host_by_fqdn(fqdn)
                .map(|h| h.id)
                .ok_or_else(|| AdcmError::not_found("host", fqdn)),
            (None, None) => Err(AdcmError::Validation("fqdn or host_id is required".to_string())),
        }
    }
}

/// `adcm_add_host_to_cluster`: attach a provider host to the job's cluster
pub struct AddHostToClusterPlugin;

impl AnsiblePlugin for AddHostToClusterPlugin {
    type Args = HostArgs;
    type Value = HostId;

    fn name(&self) -> &'static str {
        "adcm_add_host_to_cluster"
    }

    fn execute(
        &self,
        call: &PluginCall<'_>,
        _targets: &[ObjectRef],
        args: HostArgs,
    ) -> Result<PluginResult<HostId>> {
        let cluster = call.cluster()?;
        let origin = call.origin();
        call.transaction(
            "add_host_to_cluster",
            Some(ObjectRef::Cluster(cluster).to_string()),
            |graph| {
                let host = args.find(graph)?;
                if graph.host(host)?.cluster_id == Some(cluster) {
                    return Ok(PluginResult::new(false, host));
                }
                add_host_to_cluster(graph, cluster, host, origin)?;
                Ok(PluginResult::new(true, host))
            },
        )
    }
}

/// `adcm_remove_host_from_cluster`: detach an unmapped host from the job's cluster
pub struct RemoveHostFromClusterPlugin;

impl AnsiblePlugin for RemoveHostFromClusterPlugin {
    type Args = HostArgs;
    type Value = HostId;

    fn name(&self) -> &'static str {
        "adcm_remove_host_from_cluster"
    }

    fn execute(
        &self,
        call: &PluginCall<'_>,
        _targets: &[ObjectRef],
        args: HostArgs,
    ) -> Result<PluginResult<HostId>> {
        let cluster = call.cluster()?;
        let origin = call.origin();
        call.transaction(
            "remove_host_from_cluster",
            Some(ObjectRef::Cluster(cluster).to_string()),
            |graph| {
                let host = args.find(graph)?;
                if graph.host(host)?.cluster_id.is_none() {
                    return Ok(PluginResult::new(false, host));
                }
                remove_host_from_cluster(graph, cluster, host, origin)?;
                Ok(PluginResult::new(true, host))
            },
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteServiceArgs {
    /// Service of the job's cluster; the context service when absent
    #[serde(default)]
    pub service: Option<String>,
}

/// `adcm_delete_service`: remove a service from the job's cluster
pub struct DeleteServicePlugin;

impl AnsiblePlugin for DeleteServicePlugin {
    type Args = DeleteServiceArgs;
    type Value = ServiceId;

    fn name(&self) -> &'static str {
        "adcm_delete_service"
    }

    fn execute(
        &self,
        call: &PluginCall<'_>,
        _targets: &[ObjectRef],
        args: DeleteServiceArgs,
    ) -> Result<PluginResult<ServiceId>> {
        let origin = call.origin();
        let service = match &args.service {
            Some(name) => call
                .core
                .snapshot()
                .service_by_name(call.cluster()?, name)
                .map(|s| s.id)
                .ok_or_else(|| AdcmError::not_found("service", name))?,
            None => call
                .context
                .service_id
                .ok_or_else(|| AdcmError::not_found("service", "in job context"))?,
        };
        call.transaction(
            "delete_service",
            Some(ObjectRef::Service(service).to_string()),
            |graph| delete_service(graph, service, origin),
        )?;
        Ok(PluginResult::new(true, service))
    }
}
